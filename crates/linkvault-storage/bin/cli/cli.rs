use clap::{Parser, Subcommand, ValueEnum};
use linkvault_storage::{CoalescerSettings, StorageConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DELETE_BATCH_SIZE_ENV: &str = "DELETE_BATCH_SIZE";
pub const DELETE_IDLE_INTERVAL_MS_ENV: &str = "DELETE_IDLE_INTERVAL_MS";
pub const LOG_FORMAT_ENV: &str = "LINKVAULT_LOG_FORMAT";

pub const DEFAULT_DELETE_BATCH_SIZE: usize = 10;
pub const DEFAULT_DELETE_IDLE_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "linkvault", about = "Administer a Linkvault URL store")]
pub struct CLI {
    /// PostgreSQL connection string; takes precedence over the file log.
    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// Path of the append-only event log.
    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DELETE_BATCH_SIZE_ENV, default_value_t = DEFAULT_DELETE_BATCH_SIZE)]
    pub delete_batch_size: usize,

    #[arg(
        long,
        env = DELETE_IDLE_INTERVAL_MS_ENV,
        default_value_t = DEFAULT_DELETE_IDLE_INTERVAL_MS
    )]
    pub delete_idle_interval_ms: u64,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mint a new user id.
    AllocateUser,
    /// Shorten one or more URLs for a user.
    Shorten {
        #[arg(long)]
        user: i64,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the long URL behind a short id.
    Resolve { short_id: String },
    /// List a user's live URLs.
    List {
        #[arg(long)]
        user: i64,
    },
    /// Delete short ids owned by a user.
    Delete {
        #[arg(long)]
        user: i64,
        #[arg(required = true)]
        short_ids: Vec<String>,
    },
    /// Check that the storage backend is reachable.
    Health,
}

impl CLI {
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::new(self.database_dsn.clone(), self.file_storage_path.clone())
    }

    pub fn coalescer_settings(&self) -> CoalescerSettings {
        CoalescerSettings::builder()
            .batch_size(self.delete_batch_size)
            .idle_interval(Duration::from_millis(self.delete_idle_interval_ms))
            .build()
    }
}
