use crate::event_log::{self, Event, EventLog};
use crate::memory::MemoryStorage;
use async_trait::async_trait;
use linkvault_core::{NewUrl, Resolution, Result, StorageError, UrlStorage, UserId, UserUrl};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug)]
struct FileInner {
    memory: MemoryStorage,
    path: PathBuf,
    log: Mutex<EventLog>,
}

/// File-backed engine: an in-memory store plus an append-only event log.
///
/// Reads are served by the wrapped [`MemoryStorage`]. Creates go through the
/// memory store first and are then appended to the log; a failed append
/// removes the in-memory entry again. The log lock is held for the whole
/// create, so creates are serialized per instance.
///
/// Deletions only affect memory. The log records creations exclusively, so
/// a deleted mapping reappears after the next replay.
#[derive(Debug, Clone)]
pub struct FileStorage {
    inner: Arc<FileInner>,
}

impl FileStorage {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// Fails with [`StorageError::ReplayCorruption`] if any record is
    /// malformed; nothing is loaded in that case.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(path))
            .await
            .map_err(|e| StorageError::Io(format!("replay task failed: {e}")))?
    }

    fn open_blocking(path: PathBuf) -> Result<Self> {
        let log = EventLog::open(&path)?;
        let replay = event_log::replay(BufReader::new(File::open(&path)?))?;

        info!(
            path = %path.display(),
            events = replay.events.len(),
            last_user_id = replay.last_user_id,
            "replayed event log"
        );

        let memory = MemoryStorage::restore(
            replay
                .events
                .into_iter()
                .map(|event| (event.user_id, event.short_url, event.original_url)),
            replay.last_user_id,
        );

        Ok(Self {
            inner: Arc::new(FileInner {
                memory,
                path,
                log: Mutex::new(log),
            }),
        })
    }

    /// Returns the path of the event log.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Runs `op` on a blocking worker.
    ///
    /// Once started the worker runs to completion even if the caller's future
    /// is dropped, so the memory update and the log append land together or
    /// not at all.
    async fn run_to_completion<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StorageError::Io(format!("log task failed: {e}")))?
    }
}

impl FileInner {
    fn create(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        let mut log = self.log.lock();
        self.memory.insert(user, short_id, long_url)?;

        if let Err(err) = log.append(&[Event::new(user, short_id, long_url)]) {
            self.memory.remove(user, short_id);
            error!(user_id = %user, short_id, error = %err, "event log append failed");
            return Err(err);
        }

        debug!(user_id = %user, short_id, "appended create event");
        Ok(())
    }

    fn create_batch(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        let mut log = self.log.lock();
        self.memory.insert_batch(user, records)?;
        if records.is_empty() {
            return Ok(());
        }

        let events: Vec<Event> = records
            .iter()
            .map(|r| Event::new(user, r.short_id.as_str(), r.long_url.as_str()))
            .collect();

        if let Err(err) = log.append(&events) {
            for record in records {
                self.memory.remove(user, &record.short_id);
            }
            error!(user_id = %user, count = records.len(), error = %err, "event log append failed");
            return Err(err);
        }

        debug!(user_id = %user, count = records.len(), "appended create events");
        Ok(())
    }
}

#[async_trait]
impl UrlStorage for FileStorage {
    async fn create_url(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        if short_id.is_empty() {
            return Err(StorageError::EmptyIdentifier);
        }
        let short_id = short_id.to_owned();
        let long_url = long_url.to_owned();
        self.run_to_completion(move |inner| inner.create(user, &short_id, &long_url))
            .await
    }

    async fn batch_create_urls(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        let records = records.to_vec();
        self.run_to_completion(move |inner| inner.create_batch(user, &records))
            .await
    }

    async fn resolve_url(&self, short_id: &str) -> Result<Resolution> {
        Ok(self.inner.memory.get(short_id))
    }

    async fn list_user_urls(&self, user: UserId) -> Result<Vec<UserUrl>> {
        Ok(self.inner.memory.list(user))
    }

    async fn delete_urls(&self, short_ids: &[String]) -> Result<()> {
        self.inner.memory.delete_urls(short_ids).await
    }

    async fn health_check(&self) -> Result<()> {
        tokio::fs::metadata(&self.inner.path)
            .await
            .map(|_| ())
            .map_err(|e| {
                StorageError::Unavailable(format!("{}: {e}", self.inner.path.display()))
            })
    }

    async fn allocate_user_id(&self) -> Result<UserId> {
        Ok(self.inner.memory.next_user_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: UserId = UserId::new(1);

    async fn open_in(dir: &TempDir) -> FileStorage {
        FileStorage::open(dir.path().join("urls.log")).await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_in(&dir).await;

        assert!(storage.path().exists());
        assert!(storage.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn create_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_in(&dir).await;

        storage
            .create_url(ALICE, "a1", "https://a.example")
            .await
            .unwrap();
        storage
            .batch_create_urls(
                ALICE,
                &[
                    NewUrl::new("a2", "https://b.example"),
                    NewUrl::new("a3", "https://c.example"),
                ],
            )
            .await
            .unwrap();

        let contents = std::fs::read_to_string(storage.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[tokio::test]
    async fn rejected_creates_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_in(&dir).await;

        storage
            .create_url(ALICE, "a1", "https://a.example")
            .await
            .unwrap();
        let duplicate = storage
            .create_url(ALICE, "a2", "https://a.example")
            .await
            .unwrap_err();
        let empty = storage
            .create_url(ALICE, "", "https://b.example")
            .await
            .unwrap_err();

        assert_eq!(duplicate, StorageError::DuplicateUrl("a1".to_string()));
        assert_eq!(empty, StorageError::EmptyIdentifier);
        let contents = std::fs::read_to_string(storage.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn failed_append_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_in(&dir).await;

        // A read-only handle makes every append fail.
        let read_only = File::open(storage.path()).unwrap();
        *storage.inner.log.lock() = EventLog::from_file(read_only);

        let err = storage
            .create_url(ALICE, "a1", "https://a.example")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)), "{err:?}");
        assert_eq!(storage.resolve_url("a1").await.unwrap(), Resolution::NotFound);
        assert!(storage.list_user_urls(ALICE).await.unwrap().is_empty());

        let err = storage
            .batch_create_urls(ALICE, &[NewUrl::new("b1", "https://b.example")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)), "{err:?}");
        assert_eq!(storage.resolve_url("b1").await.unwrap(), Resolution::NotFound);
    }

    #[tokio::test]
    async fn corrupt_log_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.log");
        std::fs::write(&path, "{\"uuid\": 42}\n").unwrap();

        let err = FileStorage::open(&path).await.unwrap_err();

        assert!(matches!(err, StorageError::ReplayCorruption { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn user_ids_continue_after_replay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = open_in(&dir).await;
            let user = storage.allocate_user_id().await.unwrap();
            let user = UserId::new(user.get() + 4);
            storage
                .create_url(user, "a1", "https://a.example")
                .await
                .unwrap();
        }

        let storage = open_in(&dir).await;
        assert_eq!(storage.allocate_user_id().await.unwrap(), UserId::new(6));
    }

    #[tokio::test]
    async fn health_check_fails_when_log_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_in(&dir).await;

        std::fs::remove_file(storage.path()).unwrap();

        let err = storage.health_check().await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)), "{err:?}");
    }
}
