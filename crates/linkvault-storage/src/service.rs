use crate::coalescer::{DeletionCoalescer, DeletionQueue};
use crate::config::CoalescerSettings;
use linkvault_core::{NewUrl, Resolution, Result, StorageError, UrlStorage, UserId, UserUrl};
use linkvault_generator::Generator;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Shortening front for one storage engine.
///
/// Wraps a [`UrlStorage`] and a [`Generator`] to handle:
/// - Short id generation, retried with a fresh id when the id is taken
/// - Ownership checks before queueing deletions
/// - The deletion coalescer that belongs to this storage instance
#[derive(Debug)]
pub struct ShortenerService<S, G> {
    storage: Arc<S>,
    generator: Arc<G>,
    deletions: DeletionCoalescer,
    max_attempts: usize,
}

impl<S: UrlStorage, G: Generator> ShortenerService<S, G> {
    /// Creates the service and spawns its deletion coalescer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(storage: S, generator: G, settings: CoalescerSettings) -> Self {
        let storage = Arc::new(storage);
        let deletions = DeletionCoalescer::spawn(Arc::clone(&storage), settings);

        Self {
            storage,
            generator: Arc::new(generator),
            deletions,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many ids are tried before giving up on a taken id.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn deletion_queue(&self) -> DeletionQueue {
        self.deletions.queue()
    }

    fn generate_id(&self) -> Result<String> {
        self.generator
            .generate()
            .map_err(|e| StorageError::Generator(e.to_string()))
    }

    /// Shortens `long_url` for `user` and returns the new short id.
    ///
    /// If the user already shortened this URL the call fails with
    /// [`StorageError::DuplicateUrl`] carrying the existing id.
    pub async fn shorten(&self, user: UserId, long_url: &str) -> Result<String> {
        let mut last_conflict = None;

        for attempt in 1..=self.max_attempts {
            let short_id = self.generate_id()?;
            match self.storage.create_url(user, &short_id, long_url).await {
                Ok(()) => {
                    debug!(user_id = %user, short_id = %short_id, "shortened url");
                    return Ok(short_id);
                }
                Err(StorageError::Conflict(taken)) => {
                    warn!(user_id = %user, short_id = %taken, attempt, "short id taken, retrying");
                    last_conflict = Some(taken);
                }
                Err(err) => return Err(err),
            }
        }

        Err(StorageError::Conflict(last_conflict.unwrap_or_default()))
    }

    /// Shortens every URL in one all-or-nothing batch.
    ///
    /// A taken id regenerates ids for the whole batch and tries again.
    pub async fn shorten_batch(
        &self,
        user: UserId,
        long_urls: &[String],
    ) -> Result<Vec<NewUrl>> {
        let mut last_conflict = None;

        for attempt in 1..=self.max_attempts {
            let records = long_urls
                .iter()
                .map(|long_url| Ok(NewUrl::new(self.generate_id()?, long_url.as_str())))
                .collect::<Result<Vec<_>>>()?;

            match self.storage.batch_create_urls(user, &records).await {
                Ok(()) => {
                    debug!(user_id = %user, count = records.len(), "shortened url batch");
                    return Ok(records);
                }
                Err(StorageError::Conflict(taken)) => {
                    warn!(
                        user_id = %user,
                        short_id = %taken,
                        attempt,
                        "short id taken, retrying batch"
                    );
                    last_conflict = Some(taken);
                }
                Err(err) => return Err(err),
            }
        }

        Err(StorageError::Conflict(last_conflict.unwrap_or_default()))
    }

    pub async fn resolve(&self, short_id: &str) -> Result<Resolution> {
        self.storage.resolve_url(short_id).await
    }

    pub async fn list(&self, user: UserId) -> Result<Vec<UserUrl>> {
        self.storage.list_user_urls(user).await
    }

    /// Queues deletion of the ids in `short_ids` that `user` owns.
    ///
    /// Returns how many ids were queued. Ids owned by someone else, or not
    /// stored at all, are skipped silently.
    pub async fn delete_user_urls(&self, user: UserId, short_ids: &[String]) -> Result<usize> {
        let owned: HashSet<String> = self
            .storage
            .list_user_urls(user)
            .await?
            .into_iter()
            .map(|url| url.short_id)
            .collect();

        let queued: Vec<&String> = short_ids.iter().filter(|id| owned.contains(*id)).collect();
        let count = queued.len();
        self.deletions
            .queue()
            .enqueue_all(queued.into_iter().cloned())?;

        debug!(
            user_id = %user,
            requested = short_ids.len(),
            queued = count,
            "queued deletions"
        );
        Ok(count)
    }

    pub async fn allocate_user_id(&self) -> Result<UserId> {
        self.storage.allocate_user_id().await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.storage.health_check().await
    }

    /// Stops the deletion coalescer after flushing what it has buffered.
    pub async fn shutdown(self) {
        self.deletions.shutdown().await;
    }
}
