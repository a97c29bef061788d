use crate::{Generator, GeneratorError};
use rand::rngs::OsRng;
use rand::RngCore;
use typed_builder::TypedBuilder;

const MAX_BYTES: usize = 32;

/// Random short id generator backed by the operating system's entropy source.
///
/// Draws `bytes` random bytes and encodes them as base58, which only uses
/// alphanumeric characters and is therefore safe in a URL path. Six bytes
/// give ids of at most 9 characters over a 2^48 space.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RandomGenerator {
    #[builder(default = 6)]
    bytes: usize,
}

impl RandomGenerator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> Result<String, GeneratorError> {
        let len = self.bytes.clamp(1, MAX_BYTES);
        let mut buf = [0_u8; MAX_BYTES];
        OsRng
            .try_fill_bytes(&mut buf[..len])
            .map_err(|e| GeneratorError::EntropyUnavailable(e.to_string()))?;
        Ok(bs58::encode(&buf[..len]).into_string())
    }
}
