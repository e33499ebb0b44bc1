//! Deep, chain-context-dependent validation: re-derives a share's coinbase
//! from the (by-now-known) chain state via [`generate`] and compares it
//! against what the share actually committed to, then runs the
//! successor-upgrade vote check. Also home to `should_punish_reason`,
//! which judges an already-trusted share against the live parent chain.

use std::collections::HashMap;

use num_traits::Zero as _;

use crate::bits::Bits;
use crate::error::ShareChainError;
use crate::hash::Hash256;
use crate::params::Params;
use crate::script;
use crate::tracker::Tracker;
use crate::tx::Gentx;
use crate::work::target_to_average_attempts;

use super::generate::{GenerateParams, ShareBuilder};
use super::AnyShare;

/// Re-derives `share_info`/the gentx from chain state and checks it against
/// what `share` actually stored.
///
/// `block_target` sizes the payout window (`desired_weight` in
/// `generate_transaction` step 2), so it must match whatever the original
/// generator actually used or the re-derived `amounts`/gentx won't line up.
/// The live network difficulty at generation time isn't part of the wire
/// format, but the share's own header/bits target is exactly that value —
/// it's what the original `generate_transaction` call was given as
/// `block_target` — and it's right there on the wire, so any verifier can
/// reproduce it from the share alone without touching `max_bits`.
pub fn check(share: &AnyShare, tracker: &Tracker, params: &Params) -> Result<Gentx, ShareChainError> {
    let common = share.common();

    if let Some(prev_hash) = share.previous_hash() {
        let previous = tracker.get(&prev_hash).ok_or_else(|| {
            ShareChainError::invariant("checking a share whose parent is absent from the tracker")
        })?;
        let prev_version = previous.version();
        let this_version = share.version();
        if prev_version != this_version {
            if super::successor(prev_version) != Some(this_version) {
                return Err(ShareChainError::peer_misbehaving(
                    "share version is neither its parent's version nor its successor",
                ));
            }
            let height = tracker.get_height(&prev_hash).unwrap_or(0);
            if height < params.chain_length {
                return Err(ShareChainError::peer_misbehaving(
                    "successor share appears before the chain reached CHAIN_LENGTH depth",
                ));
            }
            verify_successor_vote(tracker, prev_hash, this_version, params)?;
        }
    }

    let other_tx_hashes = share.get_other_tx_hashes(tracker)?;

    let gp = GenerateParams {
        tracker,
        previous_share_hash: share.previous_hash(),
        coinbase: common.share_info.share_data.coinbase.clone(),
        pubkey_hash: common.pubkey_hash(),
        subsidy: common.subsidy(),
        donation: common.donation(),
        stale_info: common.share_info.share_data.stale_info,
        desired_version: share.desired_version(),
        block_target: common.target(),
        desired_timestamp: common.timestamp(),
        desired_target: common.target(),
        desired_other_tx_hashes: other_tx_hashes,
        known_tx_sizes: HashMap::new(),
        params,
    };

    let builder = ShareBuilder::generate(gp)?;

    if builder.share_info != common.share_info {
        return Err(ShareChainError::peer_misbehaving(
            "derived share_info does not match the share's stored share_info",
        ));
    }

    let tail_placeholder = match share {
        AnyShare::V7(_) | AnyShare::V8(_) => script::ref_tail_script_v7_v8(&Hash256::ZERO),
        AnyShare::V9(s) => script::ref_tail_script_v9(&Hash256::ZERO, s.last_txout_nonce),
    };
    let (merkle_link, gentx_hash, hash_link, ref_merkle_link, full_gentx) =
        builder.seal_fields(params, tail_placeholder);

    if gentx_hash != common.gentx_hash {
        return Err(ShareChainError::peer_misbehaving(
            "derived gentx hash does not match the share's stored gentx_hash",
        ));
    }
    // V7 inlines full transaction bodies rather than hash references, so its
    // merkle link isn't reconstructible from `get_other_tx_hashes` alone.
    if !matches!(share, AnyShare::V7(_)) && merkle_link != common.merkle_link {
        return Err(ShareChainError::peer_misbehaving(
            "derived merkle link does not match the share's stored merkle link",
        ));
    }
    if hash_link != common.hash_link {
        return Err(ShareChainError::peer_misbehaving(
            "derived hash_link does not match the share's stored hash_link",
        ));
    }
    if ref_merkle_link != common.ref_merkle_link {
        return Err(ShareChainError::peer_misbehaving(
            "derived ref_merkle_link does not match the share's stored ref_merkle_link",
        ));
    }

    Ok(full_gentx)
}

/// Among the last `CHAIN_LENGTH/10` shares of the window
/// `[9*CHAIN_LENGTH/10, CHAIN_LENGTH)` behind `prev_hash`, requires at least
/// 85% of the work-weighted vote to favor `desired_version == this_version`.
fn verify_successor_vote(
    tracker: &Tracker,
    prev_hash: Hash256,
    this_version: u32,
    params: &Params,
) -> Result<(), ShareChainError> {
    let window: Vec<&AnyShare> = tracker.get_chain(prev_hash, params.chain_length).map(|(_, s)| s).collect();
    let lo = (9 * params.chain_length / 10) as usize;
    let hi = (params.chain_length as usize).min(window.len());
    let segment: &[&AnyShare] = if lo < window.len() { &window[lo..hi] } else { &[] };

    let mut total = num_bigint::BigUint::zero();
    let mut voted = num_bigint::BigUint::zero();
    for s in segment {
        let weight = target_to_average_attempts(&s.target());
        if s.desired_version() == this_version as u64 {
            voted += &weight;
        }
        total += weight;
    }

    if total.is_zero() || &voted * 100u32 < &total * 85u32 {
        return Err(ShareChainError::peer_misbehaving(
            "successor version upgrade lacks an 85% weighted vote",
        ));
    }
    Ok(())
}

/// Judges an already-trusted share against the live parent chain (§4.3).
/// Returns `(level, reason)`: `level == -1` means the share is itself a
/// valid block solution (celebrate, don't punish); `level == 0` is fine;
/// `level == 1` asks the caller to punish the share's author.
pub fn should_punish_reason(
    share: &AnyShare,
    previous_block: Hash256,
    bits: Bits,
    tracker: &Tracker,
    known_txs: &HashMap<Hash256, usize>,
    is_local: bool,
) -> (i32, Option<String>) {
    let common = share.common();
    let header = &common.min_header;

    if (header.previous_block, header.bits) != (previous_block, bits) && share.hash() != previous_block && !is_local {
        return (1, Some("block-stale".to_string()));
    }

    if share.hash().to_biguint_le() <= bits.target() {
        return (-1, Some("block solution".to_string()));
    }

    if matches!(share, AnyShare::V7(_)) {
        return (0, None);
    }

    let other_tx_hashes = match share.get_other_tx_hashes(tracker) {
        Ok(hashes) => hashes,
        Err(_) => return (1, Some("not all txs present".to_string())),
    };

    let mut total_bytes = 0u64;
    for tx_hash in &other_tx_hashes {
        match known_txs.get(tx_hash) {
            Some(size) => total_bytes += *size as u64,
            None => return (1, Some("not all txs present".to_string())),
        }
    }
    if total_bytes > 1_000_000 {
        return (1, Some("over block size".to_string()));
    }

    let mut new_bytes = 0u64;
    for tx_ref in share.transaction_hash_refs() {
        if tx_ref.share_count != 0 {
            continue;
        }
        if let Some(tx_hash) = share.new_transaction_hashes().get(tx_ref.tx_count as usize) {
            if let Some(size) = known_txs.get(tx_hash) {
                new_bytes += *size as u64;
            }
        }
    }
    if new_bytes > 50_000 {
        return (1, Some("new txs over limit".to_string()));
    }

    (0, None)
}
