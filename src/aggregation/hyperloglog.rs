//! HyperLogLog distinct-count estimator
//!
//! `2^precision` one-byte registers; expected relative error is
//! `1.04 / sqrt(2^precision)` (precision 10 ≈ 3.2%, 12 ≈ 1.6%, 14 ≈ 0.8%).
//!
//! Items are hashed with 64-bit FNV-1a followed by a murmur3 finalizer so
//! that short, similar identifiers still spread across registers. The hash
//! is unseeded: register state written to a snapshot stays meaningful after
//! a restart.

use fnv::FnvHasher;
use std::hash::Hasher;

pub const PRECISION_MIN: u8 = 4;
pub const PRECISION_MAX: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Create an empty estimator. `precision` is clamped to
    /// `PRECISION_MIN..=PRECISION_MAX`.
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(PRECISION_MIN, PRECISION_MAX);
        HyperLogLog {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    /// Rebuild from persisted registers
    pub fn from_registers(precision: u8, registers: Vec<u8>) -> Option<Self> {
        if !(PRECISION_MIN..=PRECISION_MAX).contains(&precision) {
            return None;
        }
        if registers.len() != 1 << precision {
            return None;
        }
        let rank_max = 64 - precision + 1;
        if registers.iter().any(|&r| r > rank_max) {
            return None;
        }
        Some(HyperLogLog {
            precision,
            registers,
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Expected relative standard error for a precision
    pub fn standard_error(precision: u8) -> f64 {
        1.04 / ((1u64 << precision) as f64).sqrt()
    }

    /// Add an item. Returns true if any register changed (the estimate may
    /// have moved).
    pub fn insert(&mut self, item: &[u8]) -> bool {
        let hash = hash_item(item);
        let p = self.precision as u32;
        let index = (hash >> (64 - p)) as usize;
        // Guard bit keeps the rank bounded at 64 - p + 1.
        let w = (hash << p) | (1 << (p - 1));
        let rank = (w.leading_zeros() + 1) as u8;

        if rank > self.registers[index] {
            self.registers[index] = rank;
            true
        } else {
            false
        }
    }

    /// Current distinct-count estimate
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let mut harmonic = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            harmonic += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = alpha(self.registers.len()) * m * m / harmonic;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for the small range
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

fn hash_item(item: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(item);
    fmix64(hasher.finish())
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
