//! Append-only creation log used by the file engine.
//!
//! The log is newline-delimited JSON, one object per successful create:
//!
//! ```text
//! {"uuid":"6f1c…","user_id":1,"short_url":"abc123","original_url":"https://example.com"}
//! ```
//!
//! There is no header, trailer or record count; the stream simply ends.

use linkvault_core::{Result, StorageError, UserId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// A persisted creation record. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Event {
    pub uuid: Uuid,
    pub user_id: UserId,
    #[serde(deserialize_with = "non_empty")]
    pub short_url: String,
    pub original_url: String,
}

impl Event {
    pub(crate) fn new(
        user_id: UserId,
        short_url: impl Into<String>,
        original_url: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            user_id,
            short_url: short_url.into(),
            original_url: original_url.into(),
        }
    }
}

fn non_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.is_empty() {
        return Err(serde::de::Error::custom("short_url must not be empty"));
    }
    Ok(value)
}

/// State recovered from a log.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub events: Vec<Event>,
    /// Highest user id seen, or 0 for an empty log.
    pub last_user_id: i64,
}

/// Decodes every event in `reader` until end of stream.
///
/// Any malformed record, including a truncated last one, fails the whole
/// replay.
pub(crate) fn replay<R: Read>(reader: R) -> Result<Replay> {
    let mut replay = Replay::default();

    for event in serde_json::Deserializer::from_reader(reader).into_iter::<Event>() {
        let event = event.map_err(|e| {
            if e.is_io() {
                StorageError::Io(e.to_string())
            } else {
                StorageError::ReplayCorruption {
                    line: e.line(),
                    message: e.to_string(),
                }
            }
        })?;

        replay.last_user_id = replay.last_user_id.max(event.user_id.get());
        replay.events.push(event);
    }

    Ok(replay)
}

/// Exclusive append handle on the log file.
#[derive(Debug)]
pub(crate) struct EventLog {
    file: File,
}

impl EventLog {
    /// Opens `path` for appending, creating it when missing.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    #[cfg(test)]
    pub(crate) fn from_file(file: File) -> Self {
        Self { file }
    }

    /// Appends `events` as one write.
    ///
    /// On failure the file is truncated back to its previous length so a
    /// half-written record never reaches the next replay.
    pub(crate) fn append(&mut self, events: &[Event]) -> Result<()> {
        let mut buf = Vec::with_capacity(events.len() * 128);
        for event in events {
            serde_json::to_writer(&mut buf, event)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            buf.push(b'\n');
        }

        let len = self.file.metadata()?.len();
        if let Err(err) = self.file.write_all(&buf).and_then(|()| self.file.flush()) {
            if let Err(truncate_err) = self.file.set_len(len) {
                warn!(error = %truncate_err, "failed to truncate event log after a failed append");
            }
            return Err(err.into());
        }

        Ok(())
    }
}
