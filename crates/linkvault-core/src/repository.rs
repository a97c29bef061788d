use crate::error::{Result, StorageError};
use crate::user::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One record of a bulk create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUrl {
    pub short_id: String,
    pub long_url: String,
}

impl NewUrl {
    pub fn new(short_id: impl Into<String>, long_url: impl Into<String>) -> Self {
        Self {
            short_id: short_id.into(),
            long_url: long_url.into(),
        }
    }
}

/// A mapping owned by a user, as returned by [`UrlStorage::list_user_urls`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_id: String,
    pub long_url: String,
}

/// Outcome of resolving a short id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The short id maps to a live URL.
    Found(String),
    /// No record has ever been stored under the short id.
    NotFound,
    /// The record exists but was soft-deleted.
    Gone,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Resolution::Gone)
    }

    /// Converts a miss into [`StorageError::NotFound`] or [`StorageError::Gone`].
    pub fn into_result(self, short_id: &str) -> Result<String> {
        match self {
            Resolution::Found(url) => Ok(url),
            Resolution::NotFound => Err(StorageError::NotFound(short_id.to_string())),
            Resolution::Gone => Err(StorageError::Gone(short_id.to_string())),
        }
    }
}

/// The storage contract shared by every backend engine.
///
/// All operations are safe to call concurrently. Duplicate detection is
/// scoped to one user: creating a URL the user already shortened yields
/// [`StorageError::DuplicateUrl`] carrying the existing short id, and no
/// second record is written. Resolution ignores the owning user.
#[async_trait]
pub trait UrlStorage: Send + Sync + 'static {
    /// Stores `short_id -> long_url` for `user`.
    ///
    /// Fails with [`StorageError::EmptyIdentifier`] when `short_id` is empty
    /// and with [`StorageError::Conflict`] when the short id is already taken.
    async fn create_url(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()>;

    /// Stores every record or none of them.
    async fn batch_create_urls(&self, user: UserId, records: &[NewUrl]) -> Result<()>;

    /// Looks up a short id across all users.
    async fn resolve_url(&self, short_id: &str) -> Result<Resolution>;

    /// Returns every live mapping owned by `user`, in no particular order.
    async fn list_user_urls(&self, user: UserId) -> Result<Vec<UserUrl>>;

    /// Removes the listed short ids. Unknown ids are ignored and an empty
    /// slice is a no-op.
    async fn delete_urls(&self, short_ids: &[String]) -> Result<()>;

    /// Verifies the backend can serve requests.
    async fn health_check(&self) -> Result<()>;

    /// Mints a fresh user id.
    async fn allocate_user_id(&self) -> Result<UserId>;
}
