use crate::batch::validate_batch;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use linkvault_core::{NewUrl, Resolution, Result, StorageError, UrlStorage, UserId, UserUrl};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Inner {
    /// Per-user namespaces: short id -> long URL.
    users: DashMap<UserId, HashMap<String, String>>,
    /// Global index: short id -> owning user.
    owners: DashMap<String, UserId>,
    last_user_id: AtomicI64,
}

/// In-memory implementation of the storage contract using DashMap.
///
/// Every mutation of a user's namespace happens while holding that user's
/// DashMap entry, so duplicate detection and insert are one critical section
/// per user. Users on different shards proceed in parallel.
///
/// Lock order is always user entry, then owner entry; readers never hold an
/// owner guard while touching the user map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    /// Creates an empty in-memory store. User ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from previously persisted mappings.
    ///
    /// Later entries win: a short id seen again moves to its latest owner,
    /// and a long URL seen again for the same user keeps only its latest
    /// short id.
    pub(crate) fn restore<I>(entries: I, last_user_id: i64) -> Self
    where
        I: IntoIterator<Item = (UserId, String, String)>,
    {
        let storage = Self::new();
        let inner = &storage.inner;
        inner.last_user_id.store(last_user_id, Ordering::SeqCst);

        for (user, short_id, long_url) in entries {
            if let Some(previous) = inner.owners.insert(short_id.clone(), user) {
                if previous != user {
                    if let Some(mut urls) = inner.users.get_mut(&previous) {
                        urls.remove(&short_id);
                    }
                }
            }

            let mut urls = inner.users.entry(user).or_default();
            if let Some(stale) = find_short_id(&urls, &long_url) {
                if stale != short_id {
                    urls.remove(&stale);
                    inner.owners.remove_if(&stale, |_, owner| *owner == user);
                }
            }
            urls.insert(short_id, long_url);
        }

        storage
    }

    /// Number of stored mappings across all users.
    pub fn len(&self) -> usize {
        self.inner.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.owners.is_empty()
    }

    pub(crate) fn insert(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        if short_id.is_empty() {
            return Err(StorageError::EmptyIdentifier);
        }

        let mut urls = self.inner.users.entry(user).or_default();

        if let Some(existing) = find_short_id(&urls, long_url) {
            debug!(user_id = %user, short_id = %existing, "url already shortened");
            return Err(StorageError::DuplicateUrl(existing));
        }

        match self.inner.owners.entry(short_id.to_owned()) {
            Entry::Occupied(_) => return Err(StorageError::Conflict(short_id.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(user);
            }
        }

        urls.insert(short_id.to_owned(), long_url.to_owned());
        trace!(user_id = %user, short_id, "stored url");
        Ok(())
    }

    pub(crate) fn insert_batch(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        validate_batch(records)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut urls = self.inner.users.entry(user).or_default();

        for record in records {
            if let Some(existing) = find_short_id(&urls, &record.long_url) {
                return Err(StorageError::DuplicateUrl(existing));
            }
        }

        let mut claimed: Vec<&str> = Vec::with_capacity(records.len());
        for record in records {
            // The shard guard must be released before rolling back.
            let taken = match self.inner.owners.entry(record.short_id.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(user);
                    false
                }
            };

            if taken {
                for short_id in claimed {
                    self.inner.owners.remove(short_id);
                }
                return Err(StorageError::Conflict(record.short_id.clone()));
            }
            claimed.push(&record.short_id);
        }

        for record in records {
            urls.insert(record.short_id.clone(), record.long_url.clone());
        }
        debug!(user_id = %user, count = records.len(), "stored url batch");
        Ok(())
    }

    /// Removes one mapping if `user` still owns it.
    pub(crate) fn remove(&self, user: UserId, short_id: &str) {
        if let Some(mut urls) = self.inner.users.get_mut(&user) {
            urls.remove(short_id);
        }
        self.inner
            .owners
            .remove_if(short_id, |_, owner| *owner == user);
    }

    pub(crate) fn get(&self, short_id: &str) -> Resolution {
        let Some(owner) = self.inner.owners.get(short_id).map(|entry| *entry) else {
            return Resolution::NotFound;
        };

        self.inner
            .users
            .get(&owner)
            .and_then(|urls| urls.get(short_id).cloned())
            .map_or(Resolution::NotFound, Resolution::Found)
    }

    pub(crate) fn list(&self, user: UserId) -> Vec<UserUrl> {
        self.inner
            .users
            .get(&user)
            .map(|urls| {
                urls.iter()
                    .map(|(short_id, long_url)| UserUrl {
                        short_id: short_id.clone(),
                        long_url: long_url.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn remove_all(&self, short_ids: &[String]) -> usize {
        let mut removed = 0;
        for short_id in short_ids {
            let Some((_, owner)) = self.inner.owners.remove(short_id) else {
                continue;
            };
            if let Some(mut urls) = self.inner.users.get_mut(&owner) {
                urls.remove(short_id);
            }
            removed += 1;
        }
        removed
    }

    pub(crate) fn next_user_id(&self) -> UserId {
        UserId::new(self.inner.last_user_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn find_short_id(urls: &HashMap<String, String>, long_url: &str) -> Option<String> {
    urls.iter()
        .find(|(_, stored)| stored.as_str() == long_url)
        .map(|(short_id, _)| short_id.clone())
}

#[async_trait]
impl UrlStorage for MemoryStorage {
    async fn create_url(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        self.insert(user, short_id, long_url)
    }

    async fn batch_create_urls(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        self.insert_batch(user, records)
    }

    async fn resolve_url(&self, short_id: &str) -> Result<Resolution> {
        Ok(self.get(short_id))
    }

    async fn list_user_urls(&self, user: UserId) -> Result<Vec<UserUrl>> {
        Ok(self.list(user))
    }

    async fn delete_urls(&self, short_ids: &[String]) -> Result<()> {
        let removed = self.remove_all(short_ids);
        debug!(requested = short_ids.len(), removed, "deleted urls");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn allocate_user_id(&self) -> Result<UserId> {
        Ok(self.next_user_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn create_and_resolve() {
        let repo = MemoryStorage::new();

        repo.create_url(ALICE, "abc123", "https://example.com")
            .await
            .unwrap();

        let resolved = repo.resolve_url("abc123").await.unwrap();
        assert_eq!(resolved, Resolution::Found("https://example.com".to_string()));
    }

    #[tokio::test]
    async fn resolve_nonexistent() {
        let repo = MemoryStorage::new();
        assert_eq!(repo.resolve_url("nope").await.unwrap(), Resolution::NotFound);
    }

    #[tokio::test]
    async fn empty_short_id_is_rejected() {
        let repo = MemoryStorage::new();

        let err = repo
            .create_url(ALICE, "", "https://example.com")
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::EmptyIdentifier);
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn same_url_for_same_user_returns_existing_id() {
        let repo = MemoryStorage::new();

        repo.create_url(ALICE, "abc123", "https://example.com")
            .await
            .unwrap();
        let err = repo
            .create_url(ALICE, "zzz999", "https://example.com")
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::DuplicateUrl("abc123".to_string()));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.resolve_url("zzz999").await.unwrap(), Resolution::NotFound);
    }

    #[tokio::test]
    async fn same_url_for_different_users_is_allowed() {
        let repo = MemoryStorage::new();

        repo.create_url(ALICE, "abc123", "https://example.com")
            .await
            .unwrap();
        repo.create_url(BOB, "def456", "https://example.com")
            .await
            .unwrap();

        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn short_id_taken_by_another_user_conflicts() {
        let repo = MemoryStorage::new();

        repo.create_url(ALICE, "abc123", "https://alice.example")
            .await
            .unwrap();
        let err = repo
            .create_url(BOB, "abc123", "https://bob.example")
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Conflict("abc123".to_string()));
        assert_eq!(
            repo.resolve_url("abc123").await.unwrap(),
            Resolution::Found("https://alice.example".to_string())
        );
        assert!(repo.list_user_urls(BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_returns_only_the_users_urls() {
        let repo = MemoryStorage::new();

        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();
        repo.create_url(ALICE, "a2", "https://b.example").await.unwrap();
        repo.create_url(BOB, "b1", "https://c.example").await.unwrap();

        let mut urls = repo.list_user_urls(ALICE).await.unwrap();
        urls.sort_by(|a, b| a.short_id.cmp(&b.short_id));

        assert_eq!(
            urls,
            vec![
                UserUrl {
                    short_id: "a1".to_string(),
                    long_url: "https://a.example".to_string()
                },
                UserUrl {
                    short_id: "a2".to_string(),
                    long_url: "https://b.example".to_string()
                },
            ]
        );
        assert!(repo.list_user_urls(UserId::new(99)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_create_stores_every_record() {
        let repo = MemoryStorage::new();
        let records = vec![
            NewUrl::new("a1", "https://a.example"),
            NewUrl::new("a2", "https://b.example"),
        ];

        repo.batch_create_urls(ALICE, &records).await.unwrap();

        assert_eq!(repo.list_user_urls(ALICE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_create_is_all_or_nothing() {
        let repo = MemoryStorage::new();
        repo.create_url(BOB, "taken", "https://bob.example")
            .await
            .unwrap();

        let records = vec![
            NewUrl::new("a1", "https://a.example"),
            NewUrl::new("taken", "https://b.example"),
        ];
        let err = repo.batch_create_urls(ALICE, &records).await.unwrap_err();

        assert_eq!(err, StorageError::Conflict("taken".to_string()));
        assert_eq!(repo.resolve_url("a1").await.unwrap(), Resolution::NotFound);
        assert!(repo.list_user_urls(ALICE).await.unwrap().is_empty());

        // The rolled-back id can be claimed afterwards.
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();
    }

    #[tokio::test]
    async fn batch_create_rejects_already_shortened_url() {
        let repo = MemoryStorage::new();
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();

        let records = vec![
            NewUrl::new("a2", "https://b.example"),
            NewUrl::new("a3", "https://a.example"),
        ];
        let err = repo.batch_create_urls(ALICE, &records).await.unwrap_err();

        assert_eq!(err, StorageError::DuplicateUrl("a1".to_string()));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_mappings() {
        let repo = MemoryStorage::new();
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();
        repo.create_url(BOB, "b1", "https://b.example").await.unwrap();

        repo.delete_urls(&ids(&["a1", "b1", "unknown"])).await.unwrap();

        assert_eq!(repo.resolve_url("a1").await.unwrap(), Resolution::NotFound);
        assert_eq!(repo.resolve_url("b1").await.unwrap(), Resolution::NotFound);
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn delete_with_no_ids_is_a_noop() {
        let repo = MemoryStorage::new();
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();

        repo.delete_urls(&[]).await.unwrap();

        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn url_can_be_shortened_again_after_delete() {
        let repo = MemoryStorage::new();
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();
        repo.delete_urls(&ids(&["a1"])).await.unwrap();

        repo.create_url(ALICE, "a2", "https://a.example").await.unwrap();

        assert_eq!(
            repo.resolve_url("a2").await.unwrap(),
            Resolution::Found("https://a.example".to_string())
        );
    }

    #[tokio::test]
    async fn remove_only_touches_the_owner() {
        let repo = MemoryStorage::new();
        repo.create_url(ALICE, "a1", "https://a.example").await.unwrap();

        repo.remove(BOB, "a1");
        assert!(repo.get("a1").is_found());

        repo.remove(ALICE, "a1");
        assert_eq!(repo.get("a1"), Resolution::NotFound);
    }

    #[tokio::test]
    async fn user_ids_start_at_one_and_increase() {
        let repo = MemoryStorage::new();

        assert_eq!(repo.allocate_user_id().await.unwrap(), UserId::new(1));
        assert_eq!(repo.allocate_user_id().await.unwrap(), UserId::new(2));
    }

    #[tokio::test]
    async fn restore_seeds_user_allocator() {
        let repo = MemoryStorage::restore(
            vec![(UserId::new(7), "a1".to_string(), "https://a.example".to_string())],
            7,
        );

        assert!(repo.get("a1").is_found());
        assert_eq!(repo.allocate_user_id().await.unwrap(), UserId::new(8));
    }

    #[tokio::test]
    async fn restore_keeps_latest_short_id_per_url() {
        let repo = MemoryStorage::restore(
            vec![
                (ALICE, "a1".to_string(), "https://a.example".to_string()),
                (BOB, "b1".to_string(), "https://a.example".to_string()),
                (ALICE, "a2".to_string(), "https://a.example".to_string()),
            ],
            2,
        );

        let urls = repo.list_user_urls(ALICE).await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].short_id, "a2");
        assert_eq!(repo.resolve_url("a1").await.unwrap(), Resolution::NotFound);
        assert!(repo.get("b1").is_found());
        assert_eq!(repo.len(), 2);

        // The released id is free again.
        repo.create_url(BOB, "a1", "https://c.example").await.unwrap();
    }

    #[tokio::test]
    async fn health_check_always_succeeds() {
        assert!(MemoryStorage::new().health_check().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_creates_of_same_url_yield_one_record() {
        let repo = MemoryStorage::new();
        let mut handles = vec![];

        for i in 0..16u32 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.create_url(ALICE, &format!("code-{i:02}"), "https://example.com")
                    .await
            }));
        }

        let mut created = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => created += 1,
                Err(StorageError::DuplicateUrl(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(duplicates, 15);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_access() {
        let repo = MemoryStorage::new();
        let mut handles = vec![];

        for i in 0..10i64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let user = UserId::new(i % 3 + 1);
                repo.create_url(
                    user,
                    &format!("code-{i:03}"),
                    &format!("https://example{i}.com"),
                )
                .await
                .unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..10 {
            let resolved = repo.resolve_url(&format!("code-{i:03}")).await.unwrap();
            assert_eq!(resolved, Resolution::Found(format!("https://example{i}.com")));
        }
    }
}
