//! Deterministic random number generation.
//!
//! A small xorshift64*-based PRNG, kept dependency-free so weight
//! initialization and shuffling reproduce exactly for a given seed.

use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_STATE: u64 = 0x853c49e6748fea9b;

/// Seedable PRNG used for weight initialization and dataset shuffling.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create an RNG from an explicit seed. A zero seed is remapped to a
    /// fixed non-zero constant, since xorshift has an all-zero fixpoint.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { DEFAULT_STATE } else { seed },
        }
    }

    /// Create an RNG seeded from the wall clock.
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::new(nanos)
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64* (Vigna): xorshift step plus a multiplicative scramble.
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545f4914f6cdd1d)
    }

    /// Uniform sample in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // Top 24 bits give a uniform dyadic in [0, 1).
        (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn uniform(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer sample in [0, upper); returns 0 when upper is 0.
    pub fn below(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u64() % upper as u64) as usize
        }
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, data: &mut [T]) {
        for i in (1..data.len()).rev() {
            let j = self.below(i + 1);
            data.swap(i, j);
        }
    }
}
