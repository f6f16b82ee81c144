//! Fixed-length enumeration of best decompositions
//!
//! [`enumerate`] visits every subset `prefix ∪ S` where `S` is an
//! `(r - |prefix|)`-subset of the suffix pool and keeps, per reachable sum
//! that is not already resolved, the comparator-best subset.
//!
//! The pool is walked in descending weight order and subsets in
//! lexicographic index order, so candidates for any one sum arrive best
//! first: the first hit per sum is final. Debug builds re-check every later
//! hit against the comparator.

use crate::alphabet::{Target, Weight};
use crate::combinations::Combinations;
use crate::comparator::is_better;
use crate::decomposition::{BestKnownMap, Decomposition};
use crate::errors::{CoreError, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;

/// Dense bitset of targets that already have a decomposition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSet {
    words: Vec<u64>,
    len: usize,
}

impl ResolvedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let mut set = Self::new();
        for t in targets {
            set.insert(t);
        }
        set
    }

    pub fn insert(&mut self, target: Target) -> bool {
        let (word, bit) = Self::slot(target);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let fresh = self.words[word] & mask == 0;
        if fresh {
            self.words[word] |= mask;
            self.len += 1;
        }
        fresh
    }

    #[inline]
    pub fn contains(&self, target: Target) -> bool {
        let (word, bit) = Self::slot(target);
        self.words
            .get(word)
            .is_some_and(|w| w & (1u64 << bit) != 0)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolved targets in ascending order
    pub fn iter(&self) -> impl Iterator<Item = Target> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64u64)
                .filter(move |b| w & (1u64 << b) != 0)
                .map(move |b| i as Target * 64 + b)
        })
    }

    #[inline]
    fn slot(target: Target) -> (usize, u32) {
        ((target / 64) as usize, (target % 64) as u32)
    }
}

impl FromIterator<Target> for ResolvedSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        Self::from_targets(iter)
    }
}

/// Targets present both in `found` and in `resolved`, ascending.
///
/// A non-empty result means a target was resolved twice, which breaks the
/// monotone growth of the best-known map.
pub fn resolved_overlap(found: &BestKnownMap, resolved: &ResolvedSet) -> Vec<Target> {
    found
        .keys()
        .copied()
        .filter(|&t| resolved.contains(t))
        .collect()
}

/// Best decomposition of length `r` for every sum reachable as
/// `prefix ∪ S`, `S ⊆ suffix_pool`, skipping sums in `resolved`.
///
/// - `prefix` weights must be distinct; they are removed from the pool
/// - `|prefix| > r`, or a pool too small to complete `prefix`, yields an
///   empty map
/// - `|prefix| == r` yields `{sum(prefix): prefix}` unless already resolved
pub fn enumerate(
    r: usize,
    prefix: &[Weight],
    suffix_pool: &[Weight],
    resolved: &ResolvedSet,
) -> Result<BestKnownMap> {
    let mut prefix_desc = prefix.to_vec();
    prefix_desc.sort_unstable_by(|a, b| b.cmp(a));
    if let Some(pair) = prefix_desc.windows(2).find(|w| w[0] == w[1]) {
        return Err(CoreError::invalid_job(format!(
            "prefix repeats weight {}",
            pair[0]
        )));
    }

    if prefix_desc.len() > r {
        return Ok(BestKnownMap::new());
    }
    let prefix_sum: Target = prefix_desc.iter().map(|&w| Target::from(w)).sum();
    let k = r - prefix_desc.len();

    if k == 0 {
        let mut out = BestKnownMap::new();
        if !resolved.contains(prefix_sum) {
            out.insert(prefix_sum, Decomposition::from_descending(prefix_desc));
        }
        return Ok(out);
    }

    let mut pool: Vec<Weight> = suffix_pool
        .iter()
        .copied()
        .filter(|w| prefix_desc.binary_search_by(|p| w.cmp(p)).is_err())
        .collect();
    pool.sort_unstable_by(|a, b| b.cmp(a));
    pool.dedup();
    if pool.len() < k {
        return Ok(BestKnownMap::new());
    }

    let mut best: FxHashMap<Target, Decomposition> = FxHashMap::default();
    let mut subsets = Combinations::new(pool.len(), k);
    while let Some(indices) = subsets.next_subset() {
        let sum = prefix_sum
            + indices
                .iter()
                .map(|&i| Target::from(pool[i]))
                .sum::<Target>();
        if resolved.contains(sum) {
            continue;
        }
        match best.entry(sum) {
            Entry::Vacant(slot) => {
                slot.insert(merge_descending(&prefix_desc, &pool, indices));
            }
            Entry::Occupied(slot) => {
                if cfg!(debug_assertions) {
                    let candidate = merge_descending(&prefix_desc, &pool, indices);
                    debug_assert!(
                        !is_better(&candidate, Some(slot.get())),
                        "{} arrived after worse {} for sum {}",
                        candidate,
                        slot.get(),
                        sum
                    );
                }
            }
        }
    }

    Ok(best.into_iter().collect())
}

/// Merge the descending prefix with the selected (descending) pool entries.
fn merge_descending(prefix_desc: &[Weight], pool_desc: &[Weight], indices: &[usize]) -> Decomposition {
    let mut out = Vec::with_capacity(prefix_desc.len() + indices.len());
    let (mut p, mut s) = (0, 0);
    while p < prefix_desc.len() && s < indices.len() {
        let suffix = pool_desc[indices[s]];
        if prefix_desc[p] > suffix {
            out.push(prefix_desc[p]);
            p += 1;
        } else {
            out.push(suffix);
            s += 1;
        }
    }
    out.extend_from_slice(&prefix_desc[p..]);
    out.extend(indices[s..].iter().map(|&i| pool_desc[i]));
    Decomposition::from_descending(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::compare;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    const FIB: [Weight; 6] = [1, 2, 3, 5, 8, 13];

    fn d(w: &[Weight]) -> Decomposition {
        Decomposition::new(w.to_vec())
    }

    /// Reference: every r-subset, reduced with the comparator.
    fn brute_force(r: usize, alphabet: &[Weight], resolved: &ResolvedSet) -> BestKnownMap {
        let mut out = BestKnownMap::new();
        for idx in Combinations::new(alphabet.len(), r) {
            let cand = Decomposition::new(idx.iter().map(|&i| alphabet[i]).collect());
            let sum = cand.sum();
            if resolved.contains(sum) {
                continue;
            }
            if compare(Some(&cand), out.get(&sum)) == Ordering::Greater {
                out.insert(sum, cand);
            }
        }
        out
    }

    #[test]
    fn test_length_one_is_identity() {
        let out = enumerate(1, &[], &FIB, &ResolvedSet::new()).unwrap();
        let expected: BestKnownMap = FIB.iter().map(|&w| (w as Target, d(&[w]))).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_length_two_skips_resolved_and_prefers_large() {
        let resolved: ResolvedSet = FIB.iter().map(|&w| w as Target).collect();
        let out = enumerate(2, &[], &FIB, &resolved).unwrap();

        assert_eq!(out.get(&4), Some(&d(&[3, 1])));
        assert_eq!(out.get(&11), Some(&d(&[8, 3])));
        // 10 = 8 + 2, never 5 + 5
        assert_eq!(out.get(&10), Some(&d(&[8, 2])));
        assert_eq!(out.get(&16), Some(&d(&[13, 3])));
        assert!(!out.contains_key(&5));
        assert!(!out.contains_key(&13));
    }

    #[test]
    fn test_prefix_equal_to_length() {
        let out = enumerate(2, &[5, 3], &FIB, &ResolvedSet::new()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(&8), Some(&d(&[5, 3])));

        let resolved = ResolvedSet::from_targets([8]);
        assert!(enumerate(2, &[5, 3], &FIB, &resolved).unwrap().is_empty());
    }

    #[test]
    fn test_degenerate_inputs_yield_empty() {
        let none = ResolvedSet::new();
        assert!(enumerate(1, &[1, 2], &FIB, &none).unwrap().is_empty());
        assert!(enumerate(4, &[1], &[2, 3], &none).unwrap().is_empty());
        // pool only holds prefix weights
        assert!(enumerate(2, &[1], &[1], &none).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_prefix_is_rejected() {
        let err = enumerate(3, &[2, 2], &FIB, &ResolvedSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidJob(_)));
    }

    #[test]
    fn test_prefix_weights_are_removed_from_pool() {
        let out = enumerate(2, &[8], &FIB, &ResolvedSet::new()).unwrap();
        // 16 would need 8 twice
        assert!(!out.contains_key(&16));
        assert_eq!(out.get(&21), Some(&d(&[13, 8])));
        assert!(out.values().all(|dec| dec.contains(8)));
    }

    #[test]
    fn test_resolved_set_basics() {
        let mut set = ResolvedSet::new();
        assert!(set.insert(130));
        assert!(!set.insert(130));
        assert!(set.insert(2));
        assert!(set.contains(130));
        assert!(!set.contains(131));
        assert!(!set.contains(1 << 40));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 130]);
    }

    #[test]
    fn test_resolved_overlap() {
        let found: BestKnownMap = [(4, d(&[3, 1])), (5, d(&[3, 2]))].into_iter().collect();
        let resolved = ResolvedSet::from_targets([5, 8]);
        assert_eq!(resolved_overlap(&found, &resolved), vec![5]);
    }

    proptest! {
        #[test]
        fn prop_matches_brute_force(
            weights in proptest::collection::btree_set(1u32..60, 1..11),
            r in 1usize..5,
            resolved in proptest::collection::vec(0u64..200, 0..20),
        ) {
            let alphabet: Vec<Weight> = weights.into_iter().collect();
            let resolved = ResolvedSet::from_targets(resolved);
            let fast = enumerate(r, &[], &alphabet, &resolved).unwrap();
            prop_assert_eq!(fast.clone(), brute_force(r, &alphabet, &resolved));
            for (target, dec) in &fast {
                prop_assert_eq!(dec.sum(), *target);
                prop_assert_eq!(dec.len(), r);
            }
        }
    }
}
