//! Ranking of candidate decompositions
//!
//! `Ordering::Greater` means "better":
//! - an absent decomposition is worse than any present one
//! - fewer weights is better
//! - for equal lengths, the descending weight sequence that is
//!   lexicographically greater wins (more large denominations)

use crate::decomposition::Decomposition;
use std::cmp::Ordering;

/// Compare two optional decompositions; `Greater` when `a` is better than `b`.
pub fn compare(a: Option<&Decomposition>, b: Option<&Decomposition>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => b
            .len()
            .cmp(&a.len())
            .then_with(|| a.weights().cmp(b.weights())),
    }
}

/// True when `candidate` strictly improves on `incumbent`.
pub fn is_better(candidate: &Decomposition, incumbent: Option<&Decomposition>) -> bool {
    compare(Some(candidate), incumbent) == Ordering::Greater
}
