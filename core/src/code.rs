//! Registration code generation.
//!
//! Codes are drawn uniformly from a 32-symbol alphabet that leaves out the
//! glyphs candidates confuse when reading a code aloud or off a receipt
//! (`0`/`O`, `1`/`I`). At the default length of 8 the space holds 2^40 codes,
//! so with 10^5 registrations on file a fresh code collides with probability
//! below 10^-7. Uniqueness is still enforced by storage; the engine retries
//! generation up to [`MAX_CODE_ATTEMPTS`] times when the store reports a
//! duplicate.

use crate::types::RegistrationCode;
use rand::Rng;
use thiserror::Error;

/// Symbols a generated code may contain.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Shortest generated code.
pub const MIN_CODE_LENGTH: usize = 6;

/// Longest generated code.
pub const MAX_CODE_LENGTH: usize = 8;

/// Recommended code length.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// How many collisions the engine tolerates before giving up.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// Produces candidate registration codes.
///
/// Implementations are stateless with respect to uniqueness: they never learn
/// which codes are taken, so calling [`CodeGenerator::generate`] again after a
/// collision is always safe.
pub trait CodeGenerator: Send + Sync {
    /// Produce a new candidate code.
    fn generate(&self) -> RegistrationCode;
}

/// Invalid generator configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("registration code length must be between 6 and 8, got {0}")]
pub struct InvalidCodeLength(pub usize);

/// Uniform random generator over [`CODE_ALPHABET`].
#[derive(Debug, Clone, Copy)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    /// Create a generator producing codes of `length` characters.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCodeLength`] when `length` is outside
    /// [`MIN_CODE_LENGTH`]`..=`[`MAX_CODE_LENGTH`].
    pub const fn new(length: usize) -> Result<Self, InvalidCodeLength> {
        if length < MIN_CODE_LENGTH || length > MAX_CODE_LENGTH {
            return Err(InvalidCodeLength(length));
        }
        Ok(Self { length })
    }

    /// Configured code length.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
        }
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> RegistrationCode {
        let mut rng = rand::thread_rng();
        let raw: String = (0..self.length)
            .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
            .collect();

        RegistrationCode::from_alphabet(raw)
    }
}
