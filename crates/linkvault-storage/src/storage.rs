use crate::config::StorageConfig;
use crate::file::FileStorage;
use crate::memory::MemoryStorage;
use crate::postgres::PostgresStorage;
use async_trait::async_trait;
use linkvault_core::{NewUrl, Resolution, Result, UrlStorage, UserId, UserUrl};
use std::fmt::{Display, Formatter};
use tracing::info;

/// The engine chosen for a storage instance.
///
/// Picked once by [`Storage::open`] and fixed for the lifetime of the value.
#[derive(Debug, Clone)]
pub enum Storage {
    Memory(MemoryStorage),
    File(FileStorage),
    Postgres(PostgresStorage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    File,
    Postgres,
}

impl Display for StorageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::File => write!(f, "file"),
            StorageKind::Postgres => write!(f, "postgres"),
        }
    }
}

impl Storage {
    /// Builds the engine selected by `config`.
    ///
    /// A configured database must be reachable and migrated, and a configured
    /// log must replay cleanly; otherwise this fails instead of falling back
    /// to another engine.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let storage = if let Some(dsn) = config.database_dsn() {
            Storage::Postgres(PostgresStorage::connect(dsn).await?)
        } else if let Some(path) = config.file_storage_path() {
            Storage::File(FileStorage::open(path).await?)
        } else {
            Storage::Memory(MemoryStorage::new())
        };

        info!(engine = %storage.kind(), "storage engine ready");
        Ok(storage)
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            Storage::Memory(_) => StorageKind::Memory,
            Storage::File(_) => StorageKind::File,
            Storage::Postgres(_) => StorageKind::Postgres,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $engine:ident => $call:expr) => {
        match $self {
            Storage::Memory($engine) => $call,
            Storage::File($engine) => $call,
            Storage::Postgres($engine) => $call,
        }
    };
}

#[async_trait]
impl UrlStorage for Storage {
    async fn create_url(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        dispatch!(self, engine => engine.create_url(user, short_id, long_url).await)
    }

    async fn batch_create_urls(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        dispatch!(self, engine => engine.batch_create_urls(user, records).await)
    }

    async fn resolve_url(&self, short_id: &str) -> Result<Resolution> {
        dispatch!(self, engine => engine.resolve_url(short_id).await)
    }

    async fn list_user_urls(&self, user: UserId) -> Result<Vec<UserUrl>> {
        dispatch!(self, engine => engine.list_user_urls(user).await)
    }

    async fn delete_urls(&self, short_ids: &[String]) -> Result<()> {
        dispatch!(self, engine => engine.delete_urls(short_ids).await)
    }

    async fn health_check(&self) -> Result<()> {
        dispatch!(self, engine => engine.health_check().await)
    }

    async fn allocate_user_id(&self) -> Result<UserId> {
        dispatch!(self, engine => engine.allocate_user_id().await)
    }
}
