pub mod random;
pub mod seq;

pub use random::RandomGenerator;
pub use seq::SeqGenerator;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

/// Trait for generating short ids.
///
/// Implementations are pure generators that don't interact with storage, so
/// uniqueness is probabilistic (random) or per-instance (sequential). Callers
/// that need global uniqueness retry on a storage conflict.
pub trait Generator: Send + Sync + 'static {
    /// Generates a non-empty, URL-safe short id.
    fn generate(&self) -> Result<String, GeneratorError>;
}
