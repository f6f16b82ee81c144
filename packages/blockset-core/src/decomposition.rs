use crate::alphabet::{Target, Weight};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Best decomposition found so far, keyed by target
pub type BestKnownMap = BTreeMap<Target, Decomposition>;

/// A set of weights in canonical (descending) order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decomposition(Vec<Weight>);

impl Decomposition {
    /// Canonicalize `weights` into descending order. Repeats are kept so that
    /// the validator can report them.
    pub fn new(mut weights: Vec<Weight>) -> Self {
        weights.sort_unstable_by(|a, b| b.cmp(a));
        Self(weights)
    }

    /// Wrap weights already sorted descending
    pub(crate) fn from_descending(weights: Vec<Weight>) -> Self {
        debug_assert!(weights.windows(2).all(|w| w[0] >= w[1]));
        Self(weights)
    }

    pub fn weights(&self) -> &[Weight] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> Target {
        self.0.iter().map(|&w| Target::from(w)).sum()
    }

    pub fn contains(&self, weight: Weight) -> bool {
        self.0.contains(&weight)
    }

    pub fn into_weights(self) -> Vec<Weight> {
        self.0
    }
}

impl From<Vec<Weight>> for Decomposition {
    fn from(weights: Vec<Weight>) -> Self {
        Self::new(weights)
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, w) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", w)?;
        }
        write!(f, ")")
    }
}
