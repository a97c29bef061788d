use crate::{Generator, GeneratorError};
use std::sync::atomic::{AtomicU64, Ordering};

/// A short id generator using a sequential counter.
///
/// Produces ids like "lv000000", "lv000001", etc. Ids are unique within a
/// single instance; instances sharing a store need distinct prefixes.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SeqGenerator {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> Result<String, GeneratorError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}{:06}", self.prefix, count))
    }
}
