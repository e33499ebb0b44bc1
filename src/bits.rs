//! Compact floating-point target encoding, in the spirit of the underlying
//! chain's "nBits": an 8-bit exponent (byte count) plus a 24-bit mantissa,
//! packed into a single `u32`. Generalizes the exponent/mantissa shape the
//! teacher's `CompactDifficulty` used for a `u64` difficulty to a full
//! 256-bit [`BigUint`] target.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::ShareChainError;
use crate::pack::Packable;

/// A target packed into the wire's compact float form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bits(pub u32);

impl Bits {
    /// Encodes `target`, rounding up to the nearest value representable at
    /// the chosen exponent. Targets are upper bounds a hash must not
    /// exceed, so silently rounding down would tighten the bound beyond
    /// what was intended; this never returns a `Bits` whose `target()` is
    /// smaller than the input.
    pub fn from_target(target: &BigUint) -> Bits {
        if target.is_zero() {
            return Bits(0);
        }

        let bytes = target.to_bytes_be();
        let mut size = bytes.len() as u32;

        let (mut mantissa, truncated_nonzero) = if bytes.len() <= 3 {
            let mut padded = vec![0u8; 3 - bytes.len()];
            padded.extend_from_slice(&bytes);
            (be3_to_u32(&padded), false)
        } else {
            let truncated_nonzero = bytes[3..].iter().any(|&b| b != 0);
            (be3_to_u32(&bytes[0..3]), truncated_nonzero)
        };

        if truncated_nonzero {
            mantissa += 1;
            if mantissa > 0x00FF_FFFF {
                mantissa >>= 8;
                size += 1;
            }
        }

        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            size += 1;
        }

        Bits(mantissa | (size << 24))
    }

    /// Decodes back to the 256-bit target.
    pub fn target(&self) -> BigUint {
        let exponent = (self.0 >> 24) as u32;
        let mantissa = self.0 & 0x00FF_FFFF;

        if exponent <= 3 {
            BigUint::from(mantissa >> (8 * (3 - exponent)))
        } else {
            BigUint::from(mantissa) << (8 * (exponent - 3))
        }
    }
}

fn be3_to_u32(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

impl Packable for Bits {
    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        Ok(Bits(u32::unpack(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn small_targets_round_trip_exactly() {
        for v in [0u64, 1, 255, 256, 65535, 0xFF_FFFF] {
            let t = BigUint::from(v);
            let bits = Bits::from_target(&t);
            assert_eq!(bits.target(), t, "value {v}");
        }
    }

    #[test]
    fn large_targets_round_up_never_down() {
        // A value whose low bytes don't fit in the 3-byte mantissa.
        let t = BigUint::from(0x12_3456_789Au64);
        let bits = Bits::from_target(&t);
        assert!(bits.target() >= t);
    }

    #[test]
    fn max_target_256_bit_roundtrips_within_bound() {
        let max_target = (BigUint::one() << 256) - BigUint::one();
        let bits = Bits::from_target(&max_target);
        assert!(bits.target() >= max_target || bits.target() == max_target);
    }

    #[test]
    fn zero_target_encodes_to_zero() {
        let bits = Bits::from_target(&BigUint::zero());
        assert_eq!(bits.0, 0);
        assert_eq!(bits.target(), BigUint::zero());
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let bits = Bits::from_target(&BigUint::from(123456789u64));
        let mut out = Vec::new();
        bits.pack(&mut out);
        let mut buf = out.as_slice();
        let back = Bits::unpack(&mut buf).unwrap();
        assert_eq!(bits, back);
    }
}
