//! 256-bit chainwork accumulation from compact `nBits` difficulty targets.
//!
//! The best chain is the one with the most accumulated work, computed
//! per-block as `work = 2^256 / (target + 1)` and carried forward as a
//! running sum so the sync coordinator can compare competing tips.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Calculates the work represented by a compact target (nBits).
pub fn calculate_work_from_bits(n_bits: u32) -> [u8; 32] {
    let exponent = n_bits >> 24;
    let mantissa = n_bits & 0x00ffffff;

    if mantissa == 0 || exponent == 0 {
        return [0u8; 32];
    }

    let target = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        let shift_bytes = exponent - 3;
        BigUint::from(mantissa) << (8 * shift_bytes)
    };

    if target.is_zero() {
        return [0u8; 32];
    }

    let numerator = BigUint::one() << 256;
    let denominator = target + BigUint::one();
    let work: BigUint = numerator / denominator;

    let work_bytes = work.to_bytes_be();
    let mut result = [0u8; 32];
    let start = 32 - work_bytes.len();
    result[start..].copy_from_slice(&work_bytes);
    result
}

/// Adds two 256-bit chainwork values, saturating at 2^256-1.
pub fn add_chainwork(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let a_big = BigUint::from_bytes_be(a);
    let b_big = BigUint::from_bytes_be(b);
    let sum = a_big + b_big;

    let sum_bytes = sum.to_bytes_be();
    let mut result = [0u8; 32];
    let start = 32 - sum_bytes.len().min(32);
    result[start..].copy_from_slice(&sum_bytes[sum_bytes.len().saturating_sub(32)..]);
    result
}

pub fn compare_chainwork(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_difficulty_yields_more_work() {
        let bits = 0x1d00ffff;
        let work = calculate_work_from_bits(bits);
        assert_ne!(work, [0u8; 32]);

        let higher_difficulty_bits = 0x1b0404cb;
        let higher_work = calculate_work_from_bits(higher_difficulty_bits);
        assert_eq!(compare_chainwork(&higher_work, &work), std::cmp::Ordering::Greater);
    }

    #[test]
    fn zero_bits_yield_zero_work() {
        assert_eq!(calculate_work_from_bits(0), [0u8; 32]);
    }

    #[test]
    fn add_chainwork_accumulates() {
        let a = calculate_work_from_bits(0x1d00ffff);
        let b = calculate_work_from_bits(0x1d00ffff);
        let sum = add_chainwork(&a, &b);
        assert_eq!(compare_chainwork(&sum, &a), std::cmp::Ordering::Greater);
    }
}
