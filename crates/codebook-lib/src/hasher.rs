//! Deterministic content hashing for k-mer substrings.
//!
//! With a known alphabet the hash is a Horner polynomial over symbol codes,
//! which is collision-free while `A^k` fits in 64 bits. Otherwise bytes go
//! through a seeded AHasher so hashes are stable across runs.

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

/// Hash function for symbol strings
#[derive(Clone)]
pub enum SymbolHasher {
    /// Polynomial hash in base `alphabet_size`
    Alphabet(u64),
    /// Seeded byte hash
    Seeded(RandomState),
}

impl SymbolHasher {
    /// Alphabet-aware polynomial hasher
    pub fn for_alphabet(alphabet_size: usize) -> Self {
        Self::Alphabet(alphabet_size as u64)
    }

    /// Raw byte hasher with the given seed
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(RandomState::with_seeds(seed, !seed, seed, !seed))
    }

    /// Hash a string of symbols
    #[inline]
    pub fn hash_symbols(&self, symbols: &[u8]) -> u64 {
        match self {
            SymbolHasher::Alphabet(a) => symbols
                .iter()
                .fold(0u64, |h, &s| h.wrapping_mul(*a).wrapping_add(s as u64)),
            SymbolHasher::Seeded(state) => {
                let mut hasher = state.build_hasher();
                hasher.write(symbols);
                hasher.finish()
            }
        }
    }
}

impl Default for SymbolHasher {
    fn default() -> Self {
        Self::seeded(crate::constants::DEFAULT_SEED)
    }
}

/// Multiplier spreading small prehashed values over the high bits
const MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Hasher for keys that carry a precomputed hash
///
/// The value is multiplied by an odd constant, which keeps it injective
/// while filling the high bits hash tables take their control tags from.
#[derive(Default, Clone, Copy)]
pub struct PrehashedHasher(u64);

impl Hasher for PrehashedHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.rotate_left(8) ^ b as u64;
        }
    }

    #[inline]
    fn write_u64(&mut self, value: u64) {
        self.0 = value.wrapping_mul(MIX);
    }
}

/// Build-hasher for maps keyed by prehashed values
pub type BuildPrehashed = std::hash::BuildHasherDefault<PrehashedHasher>;
