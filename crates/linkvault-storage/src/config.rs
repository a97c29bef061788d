use std::path::{Path, PathBuf};
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Selects and configures the storage engine.
///
/// A database DSN wins over a file path; with neither set the store lives
/// in memory only. Empty strings count as unset.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct StorageConfig {
    #[builder(default, setter(strip_option, into))]
    database_dsn: Option<String>,
    #[builder(default, setter(strip_option, into))]
    file_storage_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn new(database_dsn: Option<String>, file_storage_path: Option<PathBuf>) -> Self {
        Self {
            database_dsn,
            file_storage_path,
        }
    }

    pub fn database_dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|dsn| !dsn.is_empty())
    }

    pub fn file_storage_path(&self) -> Option<&Path> {
        self.file_storage_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// Flush thresholds of the deletion coalescer.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct CoalescerSettings {
    /// Flush as soon as this many ids are buffered.
    #[builder(default = 10)]
    pub batch_size: usize,
    /// Flush this long after the first id entered an empty buffer.
    #[builder(default = Duration::from_secs(1))]
    pub idle_interval: Duration,
}

impl Default for CoalescerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_count_as_unset() {
        let config = StorageConfig::builder()
            .database_dsn("")
            .file_storage_path("")
            .build();

        assert_eq!(config.database_dsn(), None);
        assert_eq!(config.file_storage_path(), None);
    }

    #[test]
    fn values_are_exposed() {
        let config = StorageConfig::builder()
            .database_dsn("postgres://localhost/linkvault")
            .file_storage_path("/tmp/urls.log")
            .build();

        assert_eq!(config.database_dsn(), Some("postgres://localhost/linkvault"));
        assert_eq!(config.file_storage_path(), Some(Path::new("/tmp/urls.log")));
    }

    #[test]
    fn optional_values_from_the_environment() {
        let config = StorageConfig::new(None, Some(PathBuf::from("/tmp/urls.log")));

        assert_eq!(config.database_dsn(), None);
        assert_eq!(config.file_storage_path(), Some(Path::new("/tmp/urls.log")));
    }

    #[test]
    fn coalescer_defaults() {
        let settings = CoalescerSettings::default();
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.idle_interval, Duration::from_secs(1));
    }
}
