//! The append-only in-memory forest of shares ([`Tracker`]), and the subset
//! view over it holding only shares whose coinbase has been cryptographically
//! reconstructed and matched ([`VerifiedTracker`]).
//!
//! Both are pure child→parent forests: a share only ever points at its
//! `previous_share_hash`, never the reverse. The `reverse` index is the only
//! place a parent learns about its children, and it is maintained alongside
//! `items` rather than derived from share objects themselves — per the
//! design notes, nothing walks into children through a share directly.

use std::collections::{HashMap, HashSet};

use crate::error::ShareChainError;
use crate::hash::Hash256;
use crate::share::AnyShare;

/// An append-only forest of shares keyed by hash.
#[derive(Debug, Default)]
pub struct Tracker {
    items: HashMap<Hash256, AnyShare>,
    /// parent hash -> children hashes.
    reverse: HashMap<Hash256, HashSet<Hash256>>,
    /// Shares with no known child.
    heads: HashSet<Hash256>,
    /// Shares whose parent is absent or not present in `items`.
    tails: HashSet<Hash256>,
    /// Monotonic arrival order, used as `think`'s tiebreaker (§5 ordering
    /// guarantees: identical-work shares prefer the earlier-seen).
    time_seen: HashMap<Hash256, u64>,
    next_seq: u64,
    seq: HashMap<Hash256, u64>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.items.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&AnyShare> {
        self.items.get(hash)
    }

    pub fn time_seen(&self, hash: &Hash256) -> Option<u64> {
        self.time_seen.get(hash).copied()
    }

    /// Insertion order, used to break exact ties the caller can't otherwise
    /// resolve deterministically. Not part of the spec's data model; purely
    /// an implementation detail of tiebreaking.
    pub fn sequence(&self, hash: &Hash256) -> Option<u64> {
        self.seq.get(hash).copied()
    }

    pub fn heads(&self) -> impl Iterator<Item = &Hash256> {
        self.heads.iter()
    }

    pub fn tails(&self) -> impl Iterator<Item = &Hash256> {
        self.tails.iter()
    }

    pub fn is_head(&self, hash: &Hash256) -> bool {
        self.heads.contains(hash)
    }

    pub fn is_tail(&self, hash: &Hash256) -> bool {
        self.tails.contains(hash)
    }

    pub fn children(&self, hash: &Hash256) -> impl Iterator<Item = &Hash256> {
        self.reverse.get(hash).into_iter().flatten()
    }

    /// Inserts `share`, seen at `time_seen` (unix seconds). Returns `false`
    /// without modifying anything if the share's hash is already present —
    /// `add` is idempotent per §8's testable property.
    pub fn add(&mut self, share: AnyShare, time_seen: u64) -> bool {
        let hash = share.hash();
        if self.items.contains_key(&hash) {
            return false;
        }

        let previous = share.previous_hash();
        self.heads.insert(hash);
        match previous {
            Some(parent) if self.items.contains_key(&parent) => {
                self.reverse.entry(parent).or_default().insert(hash);
                self.heads.remove(&parent);
            }
            _ => {
                self.tails.insert(hash);
            }
        }

        // Children that arrived before their parent are re-homed: this
        // share is no longer a head if any already-known share names it as
        // `previous_share_hash`.
        let mut adopted_children = HashSet::new();
        for (child_hash, child) in self.items.iter() {
            if child.previous_hash() == Some(hash) {
                adopted_children.insert(*child_hash);
            }
        }
        if !adopted_children.is_empty() {
            self.heads.remove(&hash);
            self.reverse.entry(hash).or_default().extend(adopted_children.iter().copied());
            for child_hash in &adopted_children {
                self.tails.remove(child_hash);
            }
        }

        self.time_seen.insert(hash, time_seen);
        self.seq.insert(hash, self.next_seq);
        self.next_seq += 1;
        self.items.insert(hash, share);
        true
    }

    /// Removes a share no component still desires (§3 lifecycle: "shares
    /// may be removed ... once no component still desires them"). Does not
    /// recursively remove descendants; the caller decides ordering.
    pub fn remove(&mut self, hash: &Hash256) -> Option<AnyShare> {
        let share = self.items.remove(hash)?;
        if let Some(parent) = share.previous_hash() {
            if let Some(children) = self.reverse.get_mut(&parent) {
                children.remove(hash);
                if children.is_empty() {
                    self.reverse.remove(&parent);
                    if self.items.contains_key(&parent) {
                        self.heads.insert(parent);
                    }
                }
            }
        }
        self.reverse.remove(hash);
        self.heads.remove(hash);
        self.tails.remove(hash);
        self.time_seen.remove(hash);
        self.seq.remove(hash);
        Some(share)
    }

    /// Number of shares from `hash` back to (and including) its tail.
    pub fn get_height(&self, hash: &Hash256) -> Option<u64> {
        self.get_height_and_last(hash).map(|(h, _)| h)
    }

    /// `(height, tail_hash)`: height is the number of shares in the chain
    /// rooted at `hash`'s tail, counting `hash` itself.
    pub fn get_height_and_last(&self, hash: &Hash256) -> Option<(u64, Hash256)> {
        if !self.items.contains_key(hash) {
            return None;
        }
        let mut height = 1u64;
        let mut current = *hash;
        loop {
            let share = self.items.get(&current)?;
            match share.previous_hash() {
                Some(parent) if self.items.contains_key(&parent) => {
                    current = parent;
                    height += 1;
                }
                _ => break,
            }
        }
        Some((height, current))
    }

    /// The hash `n` generations above `hash` (`n == 0` returns `hash`
    /// itself). `None` if the chain runs out of known ancestors first.
    pub fn get_nth_parent_hash(&self, hash: &Hash256, n: u64) -> Option<Hash256> {
        let mut current = *hash;
        for _ in 0..n {
            let share = self.items.get(&current)?;
            current = share.previous_hash()?;
            if !self.items.contains_key(&current) {
                return None;
            }
        }
        if self.items.contains_key(&current) {
            Some(current)
        } else {
            None
        }
    }

    /// A lazy ancestor walk starting at (and including) `start`, yielding at
    /// most `n` shares and stopping early at an unknown ancestor.
    pub fn get_chain(&self, start: Hash256, n: u64) -> ChainIter<'_> {
        ChainIter {
            tracker: self,
            current: Some(start),
            remaining: n,
        }
    }

    /// Total and minimum work (§4.5: `work = target_to_avg_attempts(target)`,
    /// `min_work` from `max_target`) summed over the `n`-share window ending
    /// at `start`.
    pub fn aggregate_work(&self, start: Hash256, n: u64, min_work: bool) -> num_bigint::BigUint {
        let mut total = num_bigint::BigUint::from(0u32);
        for (_, share) in self.get_chain(start, n) {
            let target = if min_work { share.max_target() } else { share.target() };
            total += crate::work::target_to_average_attempts(&target);
        }
        total
    }
}

pub struct ChainIter<'a> {
    tracker: &'a Tracker,
    current: Option<Hash256>,
    remaining: u64,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (Hash256, &'a AnyShare);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let hash = self.current?;
        let share = self.tracker.get(&hash)?;
        self.remaining -= 1;
        self.current = share.previous_hash();
        Some((hash, share))
    }
}

/// The subset of a [`Tracker`]'s shares whose `check()` has succeeded.
/// Shares only ever enter through [`VerifiedTracker::add`], which refuses
/// anything not already present in the parent tracker — this is a view,
/// never an independent store of share data.
#[derive(Debug, Default)]
pub struct VerifiedTracker {
    verified: HashSet<Hash256>,
    reverse: HashMap<Hash256, HashSet<Hash256>>,
    heads: HashSet<Hash256>,
    tails: HashSet<Hash256>,
}

impl VerifiedTracker {
    pub fn new() -> Self {
        VerifiedTracker::default()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.verified.contains(hash)
    }

    pub fn heads(&self) -> impl Iterator<Item = &Hash256> {
        self.heads.iter()
    }

    pub fn tails(&self) -> impl Iterator<Item = &Hash256> {
        self.tails.iter()
    }

    pub fn len(&self) -> usize {
        self.verified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }

    /// Marks `hash` verified. `hash` must already be present in `tracker`;
    /// its parent need not be verified (a verified share may itself be a
    /// tail of the verified subset, even deep in the full tracker).
    pub fn add(&mut self, tracker: &Tracker, hash: Hash256) -> Result<(), ShareChainError> {
        let share = tracker
            .get(&hash)
            .ok_or_else(|| ShareChainError::invariant("verifying a share absent from the tracker"))?;
        if self.verified.contains(&hash) {
            return Ok(());
        }

        self.heads.insert(hash);
        match share.previous_hash() {
            Some(parent) if self.verified.contains(&parent) => {
                self.reverse.entry(parent).or_default().insert(hash);
                self.heads.remove(&parent);
            }
            _ => {
                self.tails.insert(hash);
            }
        }

        let mut adopted = HashSet::new();
        for child_hash in self.verified.iter() {
            if let Some(child) = tracker.get(child_hash) {
                if child.previous_hash() == Some(hash) {
                    adopted.insert(*child_hash);
                }
            }
        }
        if !adopted.is_empty() {
            self.heads.remove(&hash);
            self.reverse.entry(hash).or_default().extend(adopted.iter().copied());
            for child in &adopted {
                self.tails.remove(child);
            }
        }

        self.verified.insert(hash);
        Ok(())
    }

    pub fn remove(&mut self, hash: &Hash256) {
        self.verified.remove(hash);
        self.heads.remove(hash);
        self.tails.remove(hash);
        self.reverse.remove(hash);
    }

    /// Re-aggregates work over this subset's own topology (§4.5: "it
    /// re-aggregates its own work" rather than reusing the parent
    /// tracker's window, since the verified subset may skip shares the
    /// full tracker still carries unverified).
    pub fn aggregate_work(&self, tracker: &Tracker, start: Hash256, n: u64, min_work: bool) -> num_bigint::BigUint {
        let mut total = num_bigint::BigUint::from(0u32);
        let mut current = Some(start);
        let mut remaining = n;
        while remaining > 0 {
            let Some(hash) = current else { break };
            if !self.verified.contains(&hash) {
                break;
            }
            let Some(share) = tracker.get(&hash) else { break };
            let target = if min_work { share.max_target() } else { share.target() };
            total += crate::work::target_to_average_attempts(&target);
            current = share.previous_hash();
            remaining -= 1;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::{GenerateParams, ShareBuilder};
    use crate::params::Params;

    fn test_chain(n: usize) -> (Tracker, Vec<Hash256>, Params) {
        let params = Params::test_params();
        let mut tracker = Tracker::new();
        let mut hashes = Vec::new();
        let mut previous: Option<Hash256> = None;
        for i in 0..n {
            let builder = ShareBuilder::generate(GenerateParams::test_default(previous, &params, &tracker)).unwrap();
            let share = AnyShare::V9(builder.seal_v9_for_test(i as u32));
            let hash = share.hash();
            tracker.add(share, i as u64);
            hashes.push(hash);
            previous = Some(hash);
        }
        (tracker, hashes, params)
    }

    #[test]
    fn add_is_idempotent() {
        let (mut tracker, hashes, _params) = test_chain(3);
        let before = tracker.len();
        let share = tracker.get(&hashes[1]).unwrap().clone();
        assert!(!tracker.add(share, 999));
        assert_eq!(tracker.len(), before);
    }

    #[test]
    fn height_and_nth_parent_agree_with_manual_walk() {
        let (tracker, hashes, _params) = test_chain(5);
        let tip = hashes[4];
        let (height, tail) = tracker.get_height_and_last(&tip).unwrap();
        assert_eq!(height, 5);
        assert_eq!(tail, hashes[0]);
        assert_eq!(tracker.get_nth_parent_hash(&tip, height - 1).unwrap(), tail);
    }

    #[test]
    fn single_chain_has_one_head_and_one_tail() {
        let (tracker, hashes, _params) = test_chain(4);
        let heads: Vec<_> = tracker.heads().copied().collect();
        let tails: Vec<_> = tracker.tails().copied().collect();
        assert_eq!(heads, vec![hashes[3]]);
        assert_eq!(tails, vec![hashes[0]]);
    }

    #[test]
    fn get_chain_stops_at_requested_length() {
        let (tracker, hashes, _params) = test_chain(5);
        let walked: Vec<_> = tracker.get_chain(hashes[4], 3).map(|(h, _)| h).collect();
        assert_eq!(walked, vec![hashes[4], hashes[3], hashes[2]]);
    }
}
