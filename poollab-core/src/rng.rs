//! Deterministic seed derivation.
//!
//! Seeds are BLAKE3 hashes of a master seed plus a list of string parts, so a
//! given `(unit, direction, data range)` always samples the same parameter
//! candidates regardless of which worker thread evaluates it.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed source shared by the skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl Default for SeedHierarchy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive a sub-seed from ordered parts. Parts are length-prefixed so
    /// `["ab", "c"]` and `["a", "bc"]` produce different seeds.
    pub fn sub_seed(&self, parts: &[&str]) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, parts: &[&str]) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(parts))
    }
}
