//! Compiled-in network parameters.
//!
//! This is the crate's analogue of a config object, but with no file or CLI
//! loading surface: a pool operator embedding this crate picks a [`Params`]
//! value in code. Nothing here is read from disk.

use num_bigint::BigUint;
use num_traits::One;

/// Network-level constants shared by every component that walks the share
/// chain or validates a share against it.
#[derive(Debug, Clone)]
pub struct Params {
    /// Target seconds between consecutive shares.
    pub share_period: u64,
    /// Payout lookback window, in shares.
    pub chain_length: u64,
    /// Shorter lookback used for some weight computations (<= chain_length).
    pub real_chain_length: u64,
    /// Shares to look behind when estimating the pool's hash rate for the
    /// next share's target.
    pub target_lookbehind: u64,
    /// Target number of shares found per parent-chain block.
    pub spread: u64,
    /// Average seconds between parent-chain blocks.
    pub parent_block_period: u64,
    /// Hard upper bound on any share's target.
    pub max_target: BigUint,
    /// Hard lower bound on any share's target (i.e. the highest difficulty).
    pub min_target: BigUint,
    /// 8-byte pool identifier mixed into the coinbase ref hash.
    pub identifier: [u8; 8],
    /// Fixed output script that absorbs payout rounding residue.
    pub donation_script: Vec<u8>,
    /// Wire-level magic byte distinguishing this pool's shares from others.
    pub prefix: u8,
}

impl Params {
    /// The live network this pool core is built for.
    pub fn mainnet() -> Self {
        Params {
            share_period: 30,
            chain_length: 24 * 60 * 60 / 30, // ~1 day of shares
            real_chain_length: 24 * 60 * 60 / 30,
            target_lookbehind: 200,
            spread: 3,
            parent_block_period: 600,
            max_target: max_target_for_bits(32),
            min_target: BigUint::one(),
            identifier: *b"shrchn01",
            donation_script: donation_script(),
            prefix: 0x24,
        }
    }

    /// A scaled-down instance for tests that need many shares without
    /// constructing a day's worth of chain.
    #[cfg(test)]
    pub fn test_params() -> Self {
        Params {
            share_period: 5,
            chain_length: 20,
            real_chain_length: 20,
            target_lookbehind: 5,
            spread: 3,
            parent_block_period: 60,
            max_target: max_target_for_bits(32),
            min_target: BigUint::one(),
            identifier: *b"testnet0",
            donation_script: donation_script(),
            prefix: 0x24,
        }
    }
}

/// `2^(8*n) - 1`, used to derive a generous upper target bound.
fn max_target_for_bits(n: u32) -> BigUint {
    (BigUint::one() << (8 * n)) - BigUint::one()
}

/// A fixed 67-byte P2PK-style script. The exact public key is arbitrary for
/// this crate's purposes; what matters is that it is a stable, well-formed
/// script every payout computation can fall back on.
fn donation_script() -> Vec<u8> {
    let mut script = Vec::with_capacity(67);
    script.push(0x41); // push 65 bytes
    script.push(0x04); // uncompressed pubkey marker
    script.extend_from_slice(&[0u8; 64]);
    script.push(0xac); // OP_CHECKSIG
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn donation_script_is_67_bytes() {
        assert_eq!(Params::mainnet().donation_script.len(), 67);
    }

    #[test]
    fn min_target_below_max_target() {
        let p = Params::mainnet();
        assert!(p.min_target < p.max_target);
    }

    #[test]
    fn test_params_are_small() {
        let p = Params::test_params();
        assert!(p.chain_length < Params::mainnet().chain_length);
    }
}
