//! Merge, comparison and histograms over best-known maps

use crate::alphabet::Target;
use crate::comparator::compare;
use crate::decomposition::BestKnownMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Combine maps, keeping the comparator-best decomposition per target.
///
/// Order independent: ties only happen between identical decompositions.
pub fn merge_best<'a>(maps: impl IntoIterator<Item = &'a BestKnownMap>) -> BestKnownMap {
    let mut best = BestKnownMap::new();
    for map in maps {
        merge_into(&mut best, map.clone());
    }
    best
}

/// Merge `other` into `best` in place; returns the number of entries that
/// were inserted or replaced.
pub fn merge_into(best: &mut BestKnownMap, other: BestKnownMap) -> usize {
    let mut changed = 0;
    for (target, dec) in other {
        if compare(Some(&dec), best.get(&target)) == Ordering::Greater {
            best.insert(target, dec);
            changed += 1;
        }
    }
    changed
}

/// Number of targets per decomposition length
pub fn count_by_length(map: &BestKnownMap) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for dec in map.values() {
        *counts.entry(dec.len()).or_insert(0) += 1;
    }
    counts
}

/// Running totals of [`count_by_length`]: targets resolved with at most `len`
/// weights.
pub fn cumulative_by_length(map: &BestKnownMap) -> BTreeMap<usize, usize> {
    let mut running = 0;
    count_by_length(map)
        .into_iter()
        .map(|(len, n)| {
            running += n;
            (len, running)
        })
        .collect()
}

/// Outcome counts of one length bucket in a map comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareCounts {
    pub better: usize,
    pub same: usize,
    pub worse: usize,
}

/// Per-length comparison of `a` against `b`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapComparison {
    /// Keyed by the length of `a`'s decomposition
    pub by_length: BTreeMap<usize, CompareCounts>,
    /// Targets present in `a` only
    pub only_in_a: usize,
    /// Targets present in `b` only
    pub only_in_b: usize,
}

/// Compare every target present in both maps.
pub fn compare_maps(a: &BestKnownMap, b: &BestKnownMap) -> MapComparison {
    let mut out = MapComparison::default();
    for (target, da) in a {
        let Some(db) = b.get(target) else {
            out.only_in_a += 1;
            continue;
        };
        let counts = out.by_length.entry(da.len()).or_default();
        match compare(Some(da), Some(db)) {
            Ordering::Greater => counts.better += 1,
            Ordering::Equal => counts.same += 1,
            Ordering::Less => counts.worse += 1,
        }
    }
    out.only_in_b = b.keys().filter(|t| !a.contains_key(t)).count();
    out
}

impl fmt::Display for MapComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>6} {:>10} {:>10} {:>10}", "Length", "Better#", "Same#", "Worse#")?;
        for (len, c) in &self.by_length {
            writeln!(f, "{:>6} {:>10} {:>10} {:>10}", len, c.better, c.same, c.worse)?;
        }
        write!(f, "Only in first: {}, only in second: {}", self.only_in_a, self.only_in_b)
    }
}

/// Smallest and largest resolved target
pub fn target_span(map: &BestKnownMap) -> Option<(Target, Target)> {
    Some((*map.keys().next()?, *map.keys().next_back()?))
}
