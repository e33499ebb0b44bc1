//! Per-script hash-rate weight aggregation over a contiguous window of the
//! share chain (§4.4). Walks the [`Tracker`] backward from a starting share,
//! combining one delta per share, until either `max_shares` shares have been
//! consumed or exactly `desired_weight` units of weight have accumulated.
//!
//! The design notes ask for a linked list of per-hop delta maps flattened
//! only at the end, to avoid repeatedly re-merging large maps while
//! walking; `Vec<WeightDelta>` plus a single finalizing fold plays that role
//! here.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::ShareChainError;
use crate::hash::Hash256;
use crate::tracker::Tracker;
use crate::work::target_to_average_attempts;

/// One share's contribution to the weight window.
#[derive(Debug, Clone)]
struct WeightDelta {
    count: u64,
    weights: HashMap<Vec<u8>, BigUint>,
    total: BigUint,
    donation: BigUint,
}

impl WeightDelta {
    /// `attempts = target_to_avg_attempts(target)`; the share's own output
    /// script receives `attempts * (65535 - donation)`, and
    /// `attempts * donation` out of 65535 is set aside as the donation
    /// weight (not yet assigned to the donation script itself — that
    /// happens once in [`get_cumulative_weights`]'s caller, generate.rs
    /// step 4, not here).
    fn for_share(script_bytes: Vec<u8>, target: &BigUint, donation: u16) -> WeightDelta {
        let attempts = target_to_average_attempts(target);
        let donation_units = BigUint::from(donation);
        let total = &attempts * 65535u32;
        let donation_weight = &attempts * donation_units;
        let script_weight = &total - &donation_weight;

        let mut weights = HashMap::new();
        weights.insert(script_bytes, script_weight);

        WeightDelta {
            count: 1,
            weights,
            total,
            donation: donation_weight,
        }
    }

    /// Scales a single-share delta down so its `total` becomes exactly
    /// `new_total` (a multiple of 65535, same as every delta's `total`).
    /// `scale = new_total / 65535`; `attempts = old_total / 65535`; every
    /// per-script and donation weight is `scale * (original / attempts)`.
    fn truncate_to(&self, new_total: BigUint) -> WeightDelta {
        debug_assert_eq!(self.count, 1);
        let attempts = &self.total / 65535u32;
        let scale = &new_total / 65535u32;

        let weights = self
            .weights
            .iter()
            .map(|(script, w)| (script.clone(), (&scale * w) / &attempts))
            .collect();
        let donation = (&scale * &self.donation) / &attempts;

        WeightDelta {
            count: 1,
            weights,
            total: new_total,
            donation,
        }
    }
}

/// `weights_by_script, total_weight, total_donation_weight`.
pub type CumulativeWeights = (HashMap<Vec<u8>, BigUint>, BigUint, BigUint);

/// Aggregates weights over the contiguous chain starting at `start`,
/// walking backward. `desired_weight` must be a multiple of 65535.
pub fn get_cumulative_weights(
    tracker: &Tracker,
    start: Hash256,
    max_shares: u64,
    desired_weight: BigUint,
) -> Result<CumulativeWeights, ShareChainError> {
    let mut deltas: Vec<WeightDelta> = Vec::new();
    let mut total_so_far = BigUint::zero();
    let mut count = 0u64;
    let mut current = Some(start);

    while count < max_shares && total_so_far < desired_weight {
        let Some(hash) = current else { break };
        let Some(share) = tracker.get(&hash) else {
            return Err(ShareChainError::invariant(
                "weight window walked past a share absent from the tracker",
            ));
        };

        let script_bytes = share.pubkey_script();
        let target = share.target();
        let donation = share.donation();
        let mut delta = WeightDelta::for_share(script_bytes, &target, donation);

        let projected = &total_so_far + &delta.total;
        if projected > desired_weight {
            let remaining = &desired_weight - &total_so_far;
            delta = delta.truncate_to(remaining);
        }

        total_so_far += &delta.total;
        count += 1;
        current = share.previous_hash();
        deltas.push(delta);
    }

    let mut weights = HashMap::new();
    let mut total = BigUint::zero();
    let mut donation = BigUint::zero();
    for delta in deltas {
        for (script_bytes, w) in delta.weights {
            *weights.entry(script_bytes).or_insert_with(BigUint::zero) += w;
        }
        total += delta.total;
        donation += delta.donation;
    }

    Ok((weights, total, donation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::share::{AnyShare, GenerateParams, ShareBuilder};

    /// Builds a chain of `n` shares whose shared `Params::test_params`
    /// `max_target` is wide enough that each share contributes exactly
    /// `65535` units of weight (`target_to_avg_attempts(max_target) == 1`
    /// would need `max_target == 2^256 - 2`; instead we pin each share's
    /// `bits`/`max_bits` to the actual `Params::MAX_TARGET`, which for
    /// `test_params` is `2^256 - 1` so attempts is exactly 1).
    fn test_chain(n: usize) -> (Tracker, Vec<Hash256>) {
        let params = Params::test_params();
        let mut tracker = Tracker::new();
        let mut hashes = Vec::new();
        let mut previous: Option<Hash256> = None;
        for i in 0..n {
            let gp = GenerateParams::test_default(previous, &params, &tracker);
            let builder = ShareBuilder::generate(gp).unwrap();
            let share = AnyShare::V9(builder.seal_v9_for_test(i as u32));
            let hash = share.hash();
            tracker.add(share, i as u64);
            hashes.push(hash);
            previous = Some(hash);
        }
        (tracker, hashes)
    }

    #[test]
    fn each_max_target_share_contributes_65535() {
        let (tracker, hashes) = test_chain(10);
        let (_, total, _) =
            get_cumulative_weights(&tracker, *hashes.last().unwrap(), 10, BigUint::from(655350u32)).unwrap();
        assert_eq!(total, BigUint::from(655350u32));
    }

    #[test]
    fn truncates_to_exact_desired_weight() {
        let (tracker, hashes) = test_chain(10);
        let desired = BigUint::from(65535u32 * 5);
        let (_, total, _) = get_cumulative_weights(&tracker, *hashes.last().unwrap(), 10, desired.clone()).unwrap();
        assert_eq!(total, desired);
    }

    #[test]
    fn stops_at_max_shares_when_chain_runs_short_of_weight() {
        let (tracker, hashes) = test_chain(3);
        let (_, total, _) =
            get_cumulative_weights(&tracker, *hashes.last().unwrap(), 3, BigUint::from(65535u32 * 100)).unwrap();
        assert_eq!(total, BigUint::from(65535u32 * 3));
    }

    #[test]
    fn single_script_receives_full_weight_minus_donation() {
        let params = Params::test_params();
        let mut tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, &params, &tracker);
        let builder = ShareBuilder::generate(gp).unwrap();
        let share = AnyShare::V9(builder.seal_v9_for_test(0));
        let hash = share.hash();
        let script_bytes = share.pubkey_script();
        tracker.add(share, 0);

        let (weights, total, donation) =
            get_cumulative_weights(&tracker, hash, 1, BigUint::from(65535u32)).unwrap();
        assert_eq!(total, BigUint::from(65535u32));
        assert_eq!(donation, BigUint::zero());
        assert_eq!(weights.get(&script_bytes), Some(&BigUint::from(65535u32)));
    }
}
