use linkvault_core::{NewUrl, Result, StorageError};
use std::collections::{HashMap, HashSet};

/// Rejects a batch that can never be stored as a whole.
///
/// Checks only what is visible inside the batch itself: empty short ids,
/// a short id used twice, or a long URL listed twice. For a repeated long
/// URL the error carries the short id of its first occurrence.
pub(crate) fn validate_batch(records: &[NewUrl]) -> Result<()> {
    if records.iter().any(|r| r.short_id.is_empty()) {
        return Err(StorageError::EmptyIdentifier);
    }

    let mut short_ids = HashSet::with_capacity(records.len());
    let mut long_urls: HashMap<&str, &str> = HashMap::with_capacity(records.len());

    for record in records {
        if !short_ids.insert(record.short_id.as_str()) {
            return Err(StorageError::Conflict(record.short_id.clone()));
        }
        if let Some(first) = long_urls.insert(&record.long_url, &record.short_id) {
            return Err(StorageError::DuplicateUrl(first.to_string()));
        }
    }

    Ok(())
}
