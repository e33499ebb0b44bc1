//! `generate_transaction`: rebuilds the coinbase a share must embed from
//! chain context, shared verbatim between building a fresh share and
//! re-deriving one during [`super::check::check`]. Returns a
//! [`ShareBuilder`] rather than a finished share — the trailing tagged
//! output (and therefore the final `hash_link`/`merkle_link`/`gentx_hash`)
//! depends on the concrete version, so sealing is a separate, per-version
//! step (§9 "deferred construction").

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::bits::Bits;
use crate::error::ShareChainError;
use crate::hash::{hash256, Hash256};
use crate::merkle::{calculate_merkle_link, MerkleLink};
use crate::params::Params;
use crate::pack::Packable;
use crate::script;
use crate::tracker::Tracker;
use crate::tx::{Gentx, TxOut};
use crate::work::target_to_average_attempts;

use super::v7::ShareV7;
use super::v8::ShareV8;
use super::v9::ShareV9;
use super::{MinHeader, ShareCommon, ShareData, ShareInfo, StaleInfo, TxHashRef};

/// Maximum ancestors walked per desired tx hash when compressing references
/// (§5 resource bound).
const MAX_TX_REF_LOOKBACK: u64 = 100;
/// Per-share byte budget for transactions this share announces fresh.
const MAX_NEW_TX_BYTES: u64 = 50_000;
/// Output list cannot exceed this many destinations.
const MAX_OUTPUTS: usize = 4000;

/// Everything `generate_transaction` needs that isn't already implied by
/// the tracker: the miner's choices plus the chain-wide targets this share
/// must hit.
pub struct GenerateParams<'a> {
    pub tracker: &'a Tracker,
    pub previous_share_hash: Option<Hash256>,
    pub coinbase: Vec<u8>,
    pub pubkey_hash: [u8; 20],
    pub subsidy: u64,
    pub donation: u16,
    pub stale_info: StaleInfo,
    pub desired_version: u64,
    /// Target the underlying block would need to meet to be a solution.
    pub block_target: BigUint,
    pub desired_timestamp: u32,
    pub desired_target: BigUint,
    /// Transaction hashes the miner wants included, in desired order.
    pub desired_other_tx_hashes: Vec<Hash256>,
    /// Byte length of each candidate transaction, for the new-tx budget.
    pub known_tx_sizes: HashMap<Hash256, u64>,
    pub params: &'a Params,
}

impl<'a> GenerateParams<'a> {
    /// A minimal, internally-consistent instance for tests that don't care
    /// about target/weight edge cases: wide-open target, no other
    /// transactions, all subsidy to one pubkey hash plus the donation
    /// residue.
    #[cfg(test)]
    pub fn test_default(previous: Option<Hash256>, params: &'a Params, tracker: &'a Tracker) -> Self {
        let desired_timestamp = match previous.and_then(|h| tracker.get(&h)) {
            Some(prev) => prev.timestamp() + params.share_period as u32,
            None => 1_700_000_000,
        };
        GenerateParams {
            tracker,
            previous_share_hash: previous,
            coinbase: vec![0u8, 0u8],
            pubkey_hash: [0u8; 20],
            subsidy: 5_000_000_000,
            donation: 0,
            stale_info: StaleInfo::None,
            desired_version: 9,
            block_target: params.max_target.clone(),
            desired_timestamp,
            desired_target: params.max_target.clone(),
            desired_other_tx_hashes: Vec::new(),
            known_tx_sizes: HashMap::new(),
            params,
        }
    }
}

/// A sealed-pending share: the coinbase-committing payload and the gentx
/// built from chain context, missing only the version-specific trailing
/// output and the links/hash that depend on it.
#[derive(Debug, Clone)]
pub struct ShareBuilder {
    pub share_info: ShareInfo,
    /// Destination outputs only; the trailing tagged output is appended by
    /// `seal_*`.
    pub gentx: Gentx,
    /// The full, order-resolved other-transaction hash list (new ∪
    /// referenced), used to build the merkle link over `[coinbase] ++
    /// other_txs`.
    pub other_tx_hashes: Vec<Hash256>,
}

fn clamp_biguint(value: BigUint, lo: &BigUint, hi: &BigUint) -> BigUint {
    if value < *lo {
        lo.clone()
    } else if value > *hi {
        hi.clone()
    } else {
        value
    }
}

impl ShareBuilder {
    /// §4.3 `generate_transaction`.
    pub fn generate(p: GenerateParams<'_>) -> Result<ShareBuilder, ShareChainError> {
        let previous_share = p.previous_share_hash.and_then(|h| p.tracker.get(&h));
        let height = p
            .previous_share_hash
            .and_then(|h| p.tracker.get_height(&h))
            .unwrap_or(0);

        // --- 2. target window ---
        let pre_target3 = if height < p.params.target_lookbehind {
            p.params.max_target.clone()
        } else {
            let prev_hash = p.previous_share_hash.unwrap();
            let min_work = p.tracker.aggregate_work(prev_hash, p.params.target_lookbehind, true);
            let rate = &min_work / (p.params.share_period * p.params.target_lookbehind);
            let max_target_256 = (BigUint::from(1u32) << 256) - BigUint::from(1u32);
            let pre_target = if rate.is_zero() {
                max_target_256.clone()
            } else {
                let denom = BigUint::from(p.params.share_period) * &rate;
                if denom.is_zero() {
                    max_target_256.clone()
                } else {
                    (&max_target_256 / &denom).saturating_sub(&BigUint::from(1u32))
                }
            };
            let prev_max_target = previous_share.map(|s| s.max_target()).unwrap_or_else(|| p.params.max_target.clone());
            let lo = (&prev_max_target * 9u32) / 10u32;
            let hi = (&prev_max_target * 11u32) / 10u32;
            let clamped = clamp_biguint(pre_target, &lo, &hi);
            clamp_biguint(clamped, &p.params.min_target, &p.params.max_target)
        };

        let max_bits = Bits::from_target(&pre_target3);
        let bits_floor = &pre_target3 / 10u32;
        let desired_clamped = clamp_biguint(p.desired_target.clone(), &bits_floor, &pre_target3);
        let bits = Bits::from_target(&desired_clamped);

        // --- 3. weights ---
        let real_chain_length = height.min(p.params.real_chain_length);
        let weight_base =
            BigUint::from(65535u32) * p.params.spread * target_to_average_attempts(&p.block_target);
        let (weights_map, total_weight, _donation_weight) = match p.previous_share_hash {
            Some(prev_hash) if real_chain_length > 0 => {
                crate::weights::get_cumulative_weights(p.tracker, prev_hash, real_chain_length, weight_base)?
            }
            _ => (HashMap::new(), BigUint::zero(), BigUint::zero()),
        };

        // --- 4. amounts ---
        let subsidy_big = BigUint::from(p.subsidy);
        let mut amounts: HashMap<Vec<u8>, BigUint> = HashMap::new();
        if !total_weight.is_zero() {
            for (script_bytes, w) in &weights_map {
                let amt = (&subsidy_big * 199u32 * w) / (200u32 * &total_weight);
                if !amt.is_zero() {
                    amounts.insert(script_bytes.clone(), amt);
                }
            }
        }
        let pubkey_script = script::pubkey_script_for(&p.pubkey_hash);
        let pubkey_share = BigUint::from(p.subsidy / 200);
        *amounts.entry(pubkey_script.clone()).or_insert_with(BigUint::zero) += &pubkey_share;

        let distributed: BigUint = amounts.values().sum();
        if distributed > subsidy_big {
            return Err(ShareChainError::invariant("payout split exceeds subsidy"));
        }
        let donation_script = p.params.donation_script.clone();
        let residue = &subsidy_big - &distributed;
        *amounts.entry(donation_script.clone()).or_insert_with(BigUint::zero) += &residue;

        let total: BigUint = amounts.values().sum();
        if total != subsidy_big {
            return Err(ShareChainError::invariant("payout split does not sum to subsidy"));
        }

        // --- 5. sort and cap outputs ---
        let mut entries: Vec<(Vec<u8>, BigUint)> = amounts.into_iter().collect();
        entries.sort_by(|(script_a, amt_a), (script_b, amt_b)| {
            let donation_a = *script_a == donation_script;
            let donation_b = *script_b == donation_script;
            (donation_a, amt_a, script_a).cmp(&(donation_b, amt_b, script_b))
        });
        if entries.len() > MAX_OUTPUTS {
            entries = entries.split_off(entries.len() - MAX_OUTPUTS);
        }
        let outputs: Vec<TxOut> = entries
            .into_iter()
            .map(|(script_bytes, amount)| -> Result<TxOut, ShareChainError> {
                Ok(TxOut { value: biguint_to_u64(&amount)?, script: script_bytes })
            })
            .collect::<Result<Vec<_>, ShareChainError>>()?;

        // --- 6. transaction hash ref compression (V8/V9; harmless no-op
        // for V7, which never calls with non-empty desired_other_tx_hashes
        // per the design notes' V7::check caveat) ---
        let mut new_transaction_hashes = Vec::new();
        let mut transaction_hash_refs = Vec::new();
        let mut other_tx_hashes = Vec::new();
        let mut new_bytes_used = 0u64;
        'outer: for tx_hash in &p.desired_other_tx_hashes {
            if let Some(prev_hash) = p.previous_share_hash {
                let mut ancestor = Some(prev_hash);
                let mut back = 1u64;
                while let Some(a_hash) = ancestor {
                    if back > MAX_TX_REF_LOOKBACK {
                        break;
                    }
                    let Some(ancestor_share) = p.tracker.get(&a_hash) else { break };
                    if let Some(pos) = ancestor_share.new_transaction_hashes().iter().position(|h| h == tx_hash) {
                        transaction_hash_refs.push(TxHashRef { share_count: back, tx_count: pos as u64 });
                        other_tx_hashes.push(*tx_hash);
                        continue 'outer;
                    }
                    ancestor = ancestor_share.previous_hash();
                    back += 1;
                }
            }
            let size = p.known_tx_sizes.get(tx_hash).copied().unwrap_or(0);
            if new_bytes_used + size > MAX_NEW_TX_BYTES {
                break;
            }
            new_bytes_used += size;
            transaction_hash_refs.push(TxHashRef { share_count: 0, tx_count: new_transaction_hashes.len() as u64 });
            new_transaction_hashes.push(*tx_hash);
            other_tx_hashes.push(*tx_hash);
        }

        // --- 7. timestamp clamp ---
        let timestamp = match previous_share {
            Some(prev) => {
                let target_ts = prev.timestamp() as i64 + p.params.share_period as i64;
                let spread = p.params.share_period as i64 - 1;
                let lo = (target_ts - spread).max(0) as u32;
                let hi = (target_ts + spread).max(0) as u32;
                p.desired_timestamp.clamp(lo, hi)
            }
            None => p.desired_timestamp,
        };

        // --- 8. assemble share_info / gentx ---
        let far_share_hash = p
            .previous_share_hash
            .and_then(|prev_hash| p.tracker.get_nth_parent_hash(&prev_hash, 98));

        let share_data = ShareData {
            previous_share_hash: p.previous_share_hash,
            coinbase: p.coinbase,
            nonce: 0,
            pubkey_hash: p.pubkey_hash,
            subsidy: p.subsidy,
            donation: p.donation,
            stale_info: p.stale_info,
            desired_version: p.desired_version,
        };
        let share_info = ShareInfo {
            share_data,
            far_share_hash,
            max_bits,
            bits,
            timestamp,
            new_transaction_hashes,
            transaction_hash_refs,
        };

        let gentx = Gentx { coinbase: share_info.share_data.coinbase.clone(), outputs, lock_time: 0 };

        Ok(ShareBuilder { share_info, gentx, other_tx_hashes })
    }

    fn merkle_link_and_gentx_hash(&self, tail_script: Vec<u8>) -> (MerkleLink, Hash256, crate::hashlink::HashLink, Gentx) {
        let mut full_gentx = self.gentx.clone();
        full_gentx.outputs.push(TxOut { value: 0, script: tail_script });

        let prefix = full_gentx.input_prefix();
        let const_ending = crate::tx::SEQUENCE.to_le_bytes().to_vec();
        let hash_link = crate::hashlink::prefix_to_hash_link(&prefix, &const_ending)
            .expect("input_prefix always ends with its own sequence bytes");

        let gentx_hash = full_gentx.hash();

        let mut leaves = vec![Hash256::ZERO];
        leaves.extend(self.other_tx_hashes.iter().copied());
        let merkle_link = calculate_merkle_link(&leaves, 0).expect("leaf 0 always in range");

        (merkle_link, gentx_hash, hash_link, full_gentx)
    }

    fn ref_hash(&self, params: &Params) -> (Hash256, MerkleLink) {
        let mut ref_bytes = params.identifier.to_vec();
        self.share_info.pack(&mut ref_bytes);
        let leaf = hash256(&ref_bytes);
        // A single-leaf "tree": the ref hash is the leaf itself.
        (leaf, MerkleLink { branch: Vec::new(), index: 0 })
    }

    fn common(&self, params: &Params, min_header: MinHeader, tail_script: Vec<u8>) -> ShareCommon {
        let (merkle_link, gentx_hash, hash_link, ref_merkle_link, _full_gentx) = self.seal_fields(params, tail_script);
        ShareCommon {
            share_info: self.share_info.clone(),
            min_header,
            merkle_link,
            ref_merkle_link,
            hash_link,
            gentx_hash,
        }
    }

    /// Computes the version-specific links, hash-link and finished gentx
    /// from a placeholder tail script (real shape, zeroed ref hash). Shared
    /// by the version-specific `seal_*` constructors and by [`super::check`],
    /// which recomputes the same fields from a share's own recorded inputs
    /// to compare against what it actually stored.
    pub fn seal_fields(
        &self,
        params: &Params,
        tail_script_placeholder: Vec<u8>,
    ) -> (MerkleLink, Hash256, crate::hashlink::HashLink, MerkleLink, Gentx) {
        let (ref_hash, ref_merkle_link) = self.ref_hash(params);
        let tail_script = tail_script_with_ref(tail_script_placeholder, ref_hash);
        let (merkle_link, gentx_hash, hash_link, full_gentx) = self.merkle_link_and_gentx_hash(tail_script);
        (merkle_link, gentx_hash, hash_link, ref_merkle_link, full_gentx)
    }

    /// Finalizes into a V7 share, carrying `other_transactions` inline
    /// (`None` for the share1a stub).
    #[cfg(test)]
    pub fn seal_v7_for_test(self, other_transactions: Option<Vec<Vec<u8>>>) -> ShareV7 {
        let params = Params::test_params();
        let header = MinHeader {
            version: 1,
            previous_block: Hash256::ZERO,
            timestamp: self.share_info.timestamp,
            bits: self.share_info.bits,
            nonce: 0,
        };
        let tail_placeholder = script::ref_tail_script_v7_v8(&Hash256::ZERO);
        let common = self.common(&params, header, tail_placeholder);
        ShareV7 { common, other_transactions }
    }

    #[cfg(test)]
    pub fn seal_v8_for_test(self) -> ShareV8 {
        let params = Params::test_params();
        let header = MinHeader {
            version: 1,
            previous_block: Hash256::ZERO,
            timestamp: self.share_info.timestamp,
            bits: self.share_info.bits,
            nonce: 0,
        };
        let tail_placeholder = script::ref_tail_script_v7_v8(&Hash256::ZERO);
        let common = self.common(&params, header, tail_placeholder);
        ShareV8 { common }
    }

    #[cfg(test)]
    pub fn seal_v9_for_test(self, last_txout_nonce: u32) -> ShareV9 {
        let params = Params::test_params();
        let header = MinHeader {
            version: 1,
            previous_block: Hash256::ZERO,
            timestamp: self.share_info.timestamp,
            bits: self.share_info.bits,
            nonce: 0,
        };
        let tail_placeholder = script::ref_tail_script_v9(&Hash256::ZERO, last_txout_nonce);
        let common = self.common(&params, header, tail_placeholder);
        ShareV9 { common, last_txout_nonce }
    }
}

/// Rewrites a placeholder tail script (built with a zero ref hash, just to
/// get the right length/shape) to carry the real ref hash, preserving
/// whatever comes after the hash (V9's `last_txout_nonce`).
fn tail_script_with_ref(placeholder: Vec<u8>, ref_hash: Hash256) -> Vec<u8> {
    let mut out = placeholder;
    // `OP_RETURN push-n <32-byte hash> [...]`: hash starts at offset 2.
    out[2..34].copy_from_slice(ref_hash.as_bytes());
    out
}

fn biguint_to_u64(v: &BigUint) -> Result<u64, ShareChainError> {
    v.try_into()
        .map_err(|_| ShareChainError::invariant("output amount does not fit in 64 bits"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;

    #[test]
    fn genesis_share_splits_subsidy_per_spec_scenario_1() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, &params, &tracker);
        let builder = ShareBuilder::generate(gp).unwrap();

        let pubkey_script = script::pubkey_script_for(&[0u8; 20]);
        let pubkey_amt = builder.gentx.outputs.iter().find(|o| o.script == pubkey_script).unwrap();
        assert_eq!(pubkey_amt.value, 25_000_000);

        let donation_amt = builder.gentx.outputs.iter().find(|o| o.script == params.donation_script).unwrap();
        assert_eq!(donation_amt.value, 4_975_000_000);

        let total: u64 = builder.gentx.outputs.iter().map(|o| o.value).sum();
        assert_eq!(total, 5_000_000_000);
    }

    #[test]
    fn sealed_share_passes_its_own_pow_and_bounds_check() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, &params, &tracker);
        let builder = ShareBuilder::generate(gp).unwrap();
        let share = builder.seal_v9_for_test(0);
        let any = crate::share::AnyShare::V9(share);
        assert!(any.validate_common(&params).is_ok());
    }
}
