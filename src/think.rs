//! The head-selection algorithm (§4.6): verifies unverified heads against
//! chain context, extends the verified window, picks the best tail and the
//! best head within it, applies stale-share punishment, and reports which
//! ancestors are still missing.
//!
//! `think` never suspends and is invoked as a single synchronous unit (§5):
//! everything here is plain computation over the tracker passed in, never a
//! background task competing with `Tracker::add`.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::bits::Bits;
use crate::hash::Hash256;
use crate::params::Params;
use crate::tracker::{Tracker, VerifiedTracker};

/// How many ancestors below a head `attempt_verify` is willing to try in one
/// pass, bounding the cost of a single `think` call.
const MAX_VERIFY_DEPTH: u64 = 5;
/// How many trailing shares a verified head's recent-work score looks at
/// when breaking ties among heads of the same tail.
const RECENT_WORK_WINDOW: u64 = 6;

/// A share this core would like delivered, with enough context for the
/// caller to decide whether it's still worth asking a peer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedShare {
    pub hash: Hash256,
    /// Timestamp of the known share whose missing parent this is, used for
    /// the recency cutoff in step 6.
    pub timestamp: u32,
    /// Target of that known share, used for the difficulty cutoff in step 6.
    pub min_target: BigUint,
}

/// `think`'s full result: the chosen head to build on, the ancestors still
/// worth requesting, and every head of the winning tail ranked best-first.
#[derive(Debug, Clone)]
pub struct ThinkOutcome {
    pub best_head: Option<Hash256>,
    pub want: Vec<WantedShare>,
    pub ranked_heads: Vec<Hash256>,
}

/// Runs one full `think` pass.
///
/// `block_rel_height` maps a share hash to the underlying chain's height at
/// the time that share was built, when known; it is how step 3's hash-rate
/// estimate measures "how many real blocks did this span" without the core
/// knowing anything about the parent chain itself.
pub fn think(
    tracker: &mut Tracker,
    verified: &mut VerifiedTracker,
    params: &Params,
    block_rel_height: impl Fn(&Hash256) -> Option<u64>,
    previous_block: Hash256,
    bits: Bits,
    known_txs: &HashMap<Hash256, usize>,
    now: u32,
) -> ThinkOutcome {
    let mut desired: Vec<WantedShare> = Vec::new();

    attempt_verify_heads(tracker, verified, params, &mut desired);
    extend_verified_heads(tracker, verified, params, &mut desired);

    let best_tail = pick_best_tail(tracker, verified, params, &block_rel_height);

    let Some(best_tail) = best_tail else {
        return ThinkOutcome { best_head: None, want: desired, ranked_heads: Vec::new() };
    };

    let mut ranked_heads = heads_of_tail(tracker, verified, best_tail);
    rank_heads(tracker, verified, &mut ranked_heads, previous_block, bits, known_txs);

    let best_head = ranked_heads.first().copied();
    let best_head = best_head.map(|h| apply_punishment(tracker, h, previous_block, bits, known_txs));

    let (timestamp_cutoff, target_cutoff) =
        compute_cutoffs(tracker, verified, params, &block_rel_height, best_head, now);
    desired.retain(|w| w.timestamp >= timestamp_cutoff && w.min_target <= target_cutoff);

    ThinkOutcome { best_head, want: desired, ranked_heads }
}

/// §4.6 step 1. For every head not yet in the verified subset, tries
/// `check()` on ancestors from `min(5, height - CHAIN_LENGTH)` shares back up
/// to the head itself, deepest first, so a verified prefix is established
/// before the head is attempted. The first ancestor whose parent chain is
/// already verified, or whose own `check()` succeeds, extends the verified
/// set; a failure exactly at the head marks it bad and removes it; a missing
/// ancestor records a [`WantedShare`] instead of giving up silently.
fn attempt_verify_heads(
    tracker: &mut Tracker,
    verified: &mut VerifiedTracker,
    params: &Params,
    desired: &mut Vec<WantedShare>,
) {
    let heads: Vec<Hash256> = tracker.heads().filter(|h| !verified.contains(h)).copied().collect();

    for head in heads {
        if !tracker.contains(&head) {
            continue; // removed earlier in this same pass, e.g. as a bad ancestor
        }
        let Some(height) = tracker.get_height(&head) else { continue };
        let steps = MAX_VERIFY_DEPTH.min(height.saturating_sub(params.chain_length));

        let mut chain = Vec::with_capacity(steps as usize + 1);
        let mut missing = false;
        for i in (0..=steps).rev() {
            match tracker.get_nth_parent_hash(&head, i) {
                Some(hash) => chain.push(hash),
                None => {
                    missing = true;
                    break;
                }
            }
        }

        if missing {
            if let Some(share) = tracker.get(&head) {
                log::debug!(
                    "think: head {head} has an unknown ancestor within {steps} shares, requesting"
                );
                desired.push(WantedShare {
                    hash: head,
                    timestamp: share.timestamp(),
                    min_target: share.target(),
                });
            }
            continue;
        }

        for hash in chain {
            if verified.contains(&hash) {
                continue;
            }
            let Some(share) = tracker.get(&hash) else { break };
            match share.check(tracker, params) {
                Ok(_) => {
                    if let Err(e) = verified.add(tracker, hash) {
                        log::warn!("think: verified.add({hash}) failed after a passing check(): {e}");
                    }
                }
                Err(e) => {
                    if hash == head {
                        log::warn!("think: head {head} failed check(), marking bad: {e}");
                        tracker.remove(&head);
                    } else {
                        log::debug!("think: ancestor {hash} of head {head} failed check(): {e}");
                    }
                    break;
                }
            }
        }
    }
}

/// §4.6 step 2. A verified head shallower than `CHAIN_LENGTH` still wants
/// its next ancestor if the tracker doesn't already know it.
fn extend_verified_heads(
    tracker: &Tracker,
    verified: &VerifiedTracker,
    params: &Params,
    desired: &mut Vec<WantedShare>,
) {
    let heads: Vec<Hash256> = verified.heads().copied().collect();
    for head in heads {
        let Some(height) = tracker.get_height(&head) else { continue };
        if height >= params.chain_length {
            continue;
        }
        let Some(share) = tracker.get(&head) else { continue };
        if let Some(parent) = share.previous_hash() {
            if !tracker.contains(&parent) {
                desired.push(WantedShare { hash: parent, timestamp: share.timestamp(), min_target: share.target() });
            }
        }
    }
}

/// `score(share_hash)` from §4.6 step 3: `(min(height, CHAIN_LENGTH),
/// hash_rate_estimate)`. The estimate looks `CHAIN_LENGTH*15/16` shares back
/// and divides verified work by the real-chain height span over that
/// window; `BigUint::zero()` stands in for "no estimate available" (too
/// short a verified window, or the parent-chain height unknown for either
/// endpoint) so every tail has a total order to sort by.
fn score(
    tracker: &Tracker,
    verified: &VerifiedTracker,
    tail: Hash256,
    params: &Params,
    block_rel_height: &impl Fn(&Hash256) -> Option<u64>,
) -> (u64, BigUint) {
    let height = tracker.get_height(&tail).unwrap_or(0);
    let capped_height = height.min(params.chain_length);

    let lookback = (params.chain_length * 15 / 16).max(1);
    let ancestor = tracker.get_nth_parent_hash(&tail, lookback.min(height.saturating_sub(1)));

    let rate = ancestor.and_then(|anc| {
        let cur_h = block_rel_height(&tail)?;
        let anc_h = block_rel_height(&anc)?;
        if cur_h <= anc_h {
            return None;
        }
        let span = cur_h - anc_h;
        let work = verified.aggregate_work(tracker, tail, lookback + 1, false);
        let denom = BigUint::from(span) * params.parent_block_period;
        if denom.is_zero() {
            None
        } else {
            Some(work / denom)
        }
    });

    (capped_height, rate.unwrap_or_else(BigUint::zero))
}

/// §4.6 step 3: best tail by `(score, tail_hash)` ascending, last wins.
fn pick_best_tail(
    tracker: &Tracker,
    verified: &VerifiedTracker,
    params: &Params,
    block_rel_height: &impl Fn(&Hash256) -> Option<u64>,
) -> Option<Hash256> {
    verified
        .tails()
        .copied()
        .map(|tail| (score(tracker, verified, tail, params, block_rel_height), tail))
        .max_by(|(a_score, a_hash), (b_score, b_hash)| (a_score, a_hash).cmp(&(b_score, b_hash)))
        .map(|(_, tail)| tail)
}

/// Every verified head whose verified-subset tail is `tail`.
fn heads_of_tail(tracker: &Tracker, verified: &VerifiedTracker, tail: Hash256) -> Vec<Hash256> {
    verified
        .heads()
        .copied()
        .filter(|head| verified_tail_of(tracker, verified, *head) == tail)
        .collect()
}

fn verified_tail_of(tracker: &Tracker, verified: &VerifiedTracker, head: Hash256) -> Hash256 {
    let mut current = head;
    loop {
        let Some(share) = tracker.get(&current) else { return current };
        match share.previous_hash() {
            Some(parent) if verified.contains(&parent) => current = parent,
            _ => return current,
        }
    }
}

/// §4.6 step 4: sorts `heads` by `(verified_work_6_shares_back,
/// -punish_level, -time_seen)` descending, so the first element is the best.
fn rank_heads(
    tracker: &Tracker,
    verified: &VerifiedTracker,
    heads: &mut [Hash256],
    previous_block: Hash256,
    bits: Bits,
    known_txs: &HashMap<Hash256, usize>,
) {
    heads.sort_by(|a, b| {
        let key = |h: &Hash256| {
            let work = verified.aggregate_work(tracker, *h, RECENT_WORK_WINDOW, false);
            let share = tracker.get(h);
            let punish = share
                .map(|s| s.should_punish_reason(previous_block, bits, tracker, known_txs, false).0)
                .unwrap_or(0);
            let time_seen = tracker.time_seen(h).unwrap_or(0);
            (work, punish, time_seen)
        };
        let (work_a, punish_a, time_a) = key(a);
        let (work_b, punish_b, time_b) = key(b);
        // Higher work wins; among equal work, lower punish level wins; among
        // equal punish, the share seen first (lower time_seen) wins.
        work_b.cmp(&work_a).then_with(|| punish_a.cmp(&punish_b)).then_with(|| time_a.cmp(&time_b))
    });
}

/// §4.6 step 5: if the chosen head itself should be punished, fall back to
/// its parent instead (which, as the caller's previous pick, is already
/// known-good or at least not punished for the same reason).
fn apply_punishment(
    tracker: &Tracker,
    head: Hash256,
    previous_block: Hash256,
    bits: Bits,
    known_txs: &HashMap<Hash256, usize>,
) -> Hash256 {
    let Some(share) = tracker.get(&head) else { return head };
    let (level, reason) = share.should_punish_reason(previous_block, bits, tracker, known_txs, false);
    if level > 0 {
        log::debug!(
            "think: best head {head} punished ({}), backing off to its parent",
            reason.as_deref().unwrap_or("unknown")
        );
        share.previous_hash().unwrap_or(head)
    } else {
        head
    }
}

/// §4.6 step 6: `timestamp_cutoff = min(now, best.timestamp) - 3600` (or
/// `now - 86400` with no best); `target_cutoff = 2*2^256/(SHARE_PERIOD *
/// best_tail_rate + 1)` (or `2^256 - 1`).
fn compute_cutoffs(
    tracker: &Tracker,
    verified: &VerifiedTracker,
    params: &Params,
    block_rel_height: &impl Fn(&Hash256) -> Option<u64>,
    best_head: Option<Hash256>,
    now: u32,
) -> (u32, BigUint) {
    let max_target = (BigUint::from(1u32) << 256) - BigUint::from(1u32);

    let timestamp_cutoff = match best_head.and_then(|h| tracker.get(&h)) {
        Some(share) => now.min(share.timestamp()).saturating_sub(3600),
        None => now.saturating_sub(86_400),
    };

    let target_cutoff = match best_head {
        Some(head) => {
            let (_, rate) = score(tracker, verified, verified_tail_of(tracker, verified, head), params, block_rel_height);
            if rate.is_zero() {
                max_target
            } else {
                let denom = BigUint::from(params.share_period) * &rate + BigUint::from(1u32);
                (BigUint::from(2u32) * ((BigUint::from(1u32) << 256) / &denom)).min(max_target)
            }
        }
        None => max_target,
    };

    (timestamp_cutoff, target_cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::{AnyShare, GenerateParams, ShareBuilder};

    fn no_block_height(_: &Hash256) -> Option<u64> {
        None
    }

    /// Builds a chain, verifying each share while it is still the sole head
    /// — exactly as a live node would, calling `think` after every arrival.
    /// Verification only ever reaches down to a head's recent ancestors
    /// (§4.6 step 1), so a share that never got the chance to be verified
    /// while it was a head stays unverified once a sibling gives it a
    /// second child; tests that want a shared, already-verified ancestor
    /// beneath two competing heads must build the common prefix this way.
    fn build_chain(n: usize, params: &Params) -> (Tracker, VerifiedTracker, Vec<Hash256>) {
        let mut tracker = Tracker::new();
        let mut verified = VerifiedTracker::new();
        let mut hashes = Vec::new();
        let mut previous: Option<Hash256> = None;
        for i in 0..n {
            let gp = GenerateParams::test_default(previous, params, &tracker);
            let builder = ShareBuilder::generate(gp).unwrap();
            let share = AnyShare::V9(builder.seal_v9_for_test(i as u32));
            let hash = share.hash();
            tracker.add(share, i as u64);
            attempt_verify_heads(&mut tracker, &mut verified, params, &mut Vec::new());
            hashes.push(hash);
            previous = Some(hash);
        }
        (tracker, verified, hashes)
    }

    #[test]
    fn verifies_a_short_chain_up_to_its_head() {
        let params = Params::test_params();
        let (mut tracker, mut verified, hashes) = build_chain(3, &params);

        let known_txs = HashMap::new();
        let outcome = think(
            &mut tracker,
            &mut verified,
            &params,
            no_block_height,
            Hash256::ZERO,
            Bits::from_target(&params.max_target),
            &known_txs,
            2_000_000_000,
        );

        assert!(verified.contains(hashes.last().unwrap()));
        assert_eq!(outcome.best_head, Some(*hashes.last().unwrap()));
    }

    #[test]
    fn best_head_prefers_the_non_stale_fork() {
        let params = Params::test_params();
        let (mut tracker, mut verified, hashes) = build_chain(2, &params);

        // Two siblings off the same parent: `good` matches the live parent
        // chain, `stale` doesn't. `stale` is seen first (lower time_seen) so
        // that a correct implementation must prefer `good` for its punish
        // level, not because it arrived earlier.
        let gp = GenerateParams::test_default(Some(hashes[1]), &params, &tracker);
        let builder = ShareBuilder::generate(gp).unwrap();
        let good_share = AnyShare::V9(builder.clone().seal_v9_for_test(1));
        let good_hash = good_share.hash();
        let current_previous_block = good_share.common().min_header.previous_block;
        let current_bits = good_share.common().min_header.bits;
        tracker.add(good_share, 100);

        let mut stale = builder.seal_v9_for_test(2);
        stale.common.min_header.previous_block = Hash256::from_bytes([0xEE; 32]);
        let stale_share = AnyShare::V9(stale);
        let stale_hash = stale_share.hash();
        tracker.add(stale_share, 1); // seen first; must still lose to `good`

        let known_txs = HashMap::new();
        let outcome = think(
            &mut tracker,
            &mut verified,
            &params,
            no_block_height,
            current_previous_block,
            current_bits,
            &known_txs,
            2_000_000_000,
        );

        assert_ne!(outcome.best_head, Some(stale_hash));
        assert_eq!(outcome.best_head, Some(good_hash));
    }
}
