//! Deterministic random number generation.
//!
//! RULE: Nothing in the pipeline may call any platform RNG.
//! All randomness flows through StageRng instances derived from the
//! single seed carried in ClusteringParams; the seed is threaded
//! explicitly through every call, never ambient.
//!
//! Each stage gets its own stream, seeded deterministically from
//! (seed XOR stage_index), so adding a future randomized stage never
//! perturbs an existing stage's stream.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single stage.
pub struct StageRng {
    inner: Pcg64Mcg,
}

impl StageRng {
    /// Create a stage RNG from the run seed and a stable stage slot.
    pub fn new(seed: u64, slot: StageSlot) -> Self {
        let derived = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived),
        }
    }

    /// Draw a raw u64 (full range).
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }
}

/// Stable stage slot assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StageSlot {
    Segmentation = 0,
    // Add new randomized stages here, append only.
}
