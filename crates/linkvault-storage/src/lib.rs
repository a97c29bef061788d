//! Storage engines for the Linkvault URL store.
//!
//! One engine is chosen per process through [`Storage::open`]: PostgreSQL,
//! an append-only file log replayed at startup, or memory only. Deletions
//! are batched by a [`DeletionCoalescer`] owned by the [`ShortenerService`].

mod batch;
pub mod coalescer;
pub mod config;
mod event_log;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod storage;

pub use coalescer::{DeletionCoalescer, DeletionQueue};
pub use config::{CoalescerSettings, StorageConfig};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use service::ShortenerService;
pub use storage::{Storage, StorageKind};

pub use linkvault_core::{
    NewUrl, Resolution, Result, StorageError, UrlStorage, UserId, UserUrl,
};
