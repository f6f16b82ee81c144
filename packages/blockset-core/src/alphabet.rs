//! The fixed weight alphabet
//!
//! Weights are fixed-point integers. The alphabet is frozen to ascending
//! order at construction; position `k` in that order is the bit index the
//! codec uses for the weight.

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// A single weight value (fixed-point, e.g. 1/10000 inch for gauge blocks)
pub type Weight = u32;

/// A quantity to decompose into distinct weights
pub type Target = u64;

/// Fixed-point scale of the gauge block set (1/10000 inch)
pub const GAUGE_SCALE: u32 = 10_000;

/// Immutable, ascending set of distinct positive weights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alphabet {
    weights: Vec<Weight>,
    scale: u32,
}

impl Alphabet {
    /// Build an alphabet from weights in any order.
    ///
    /// Rejects empty input, zero weights and repeated weights.
    pub fn new(weights: impl IntoIterator<Item = Weight>, scale: u32) -> Result<Self> {
        let mut weights: Vec<Weight> = weights.into_iter().collect();
        if weights.is_empty() {
            return Err(CoreError::invalid_alphabet("no weights"));
        }
        if scale == 0 {
            return Err(CoreError::invalid_alphabet("scale must be positive"));
        }
        weights.sort_unstable();
        if weights[0] == 0 {
            return Err(CoreError::invalid_alphabet("weights must be positive"));
        }
        if let Some(pair) = weights.windows(2).find(|w| w[0] == w[1]) {
            return Err(CoreError::invalid_alphabet(format!(
                "weight {} appears more than once",
                pair[0]
            )));
        }
        Ok(Self { weights, scale })
    }

    /// The standard 81-piece gauge block set, in 1/10000 inch:
    ///
    /// - `.1001" .. .1009"` (9 blocks)
    /// - `.1010" .. .1490"` in `.0010"` steps (49 blocks)
    /// - `.0500" .. .9500"` in `.0500"` steps (19 blocks)
    /// - `1" 2" 3" 4"` (4 blocks)
    pub fn gauge_81() -> Self {
        let mut weights: Vec<Weight> = (1001..=1009)
            .chain((1010..=1490).step_by(10))
            .chain((500..=9500).step_by(500))
            .chain([10_000, 20_000, 30_000, 40_000])
            .collect();
        weights.sort_unstable();
        Self {
            weights,
            scale: GAUGE_SCALE,
        }
    }

    /// Number of weights (`N`, also the per-target bit width in the codec)
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weights in ascending order
    pub fn weights(&self) -> &[Weight] {
        &self.weights
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn contains(&self, weight: Weight) -> bool {
        self.weights.binary_search(&weight).is_ok()
    }

    /// Codec bit index of `weight` (its rank in ascending order)
    pub fn index_of(&self, weight: Weight) -> Option<usize> {
        self.weights.binary_search(&weight).ok()
    }

    /// Weights strictly greater than `weight`, ascending
    pub fn above(&self, weight: Weight) -> &[Weight] {
        let start = self.weights.partition_point(|&w| w <= weight);
        &self.weights[start..]
    }

    /// Sum of every weight, i.e. the largest reachable target
    pub fn total(&self) -> Target {
        self.weights.iter().map(|&w| Target::from(w)).sum()
    }

    /// Human-readable label, e.g. `"0.1005"` for 1005 at scale 10000
    pub fn label(&self, weight: Weight) -> String {
        let digits = decimal_digits(self.scale);
        if digits == 0 {
            return weight.to_string();
        }
        format!(
            "{}.{:0width$}",
            weight / self.scale,
            weight % self.scale,
            width = digits
        )
    }

    /// Labels for every weight in codec index order
    pub fn labels(&self) -> Vec<String> {
        self.weights.iter().map(|&w| self.label(w)).collect()
    }
}

/// Number of decimal digits of a power-of-ten scale (0 for scale 1)
fn decimal_digits(scale: u32) -> usize {
    let mut digits = 0;
    let mut s = scale;
    while s >= 10 {
        s /= 10;
        digits += 1;
    }
    digits
}
