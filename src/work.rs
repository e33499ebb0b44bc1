//! Target/work conversions shared by the weights skiplist, the tracker's
//! work aggregation and `think`'s hash-rate estimates.

use num_bigint::BigUint;
use num_traits::One;

/// Expected number of hash attempts to find a hash under `target`:
/// `2^256 / (target + 1)`. A share that just met a looser target
/// contributes less work than one that met a tighter one.
pub fn target_to_average_attempts(target: &BigUint) -> BigUint {
    let denom = target + BigUint::one();
    (BigUint::one() << 256) / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_target_is_one_attempt() {
        let max_target = (BigUint::one() << 256) - BigUint::one();
        assert_eq!(target_to_average_attempts(&max_target), BigUint::one());
    }

    #[test]
    fn smaller_target_means_more_attempts() {
        let loose = BigUint::from(1_000_000u64);
        let tight = BigUint::from(1_000u64);
        assert!(target_to_average_attempts(&tight) > target_to_average_attempts(&loose));
    }
}
