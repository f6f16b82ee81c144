//! Sanity checks for produced decompositions
//!
//! Used by tooling against stores and artifacts: a decomposition is valid for
//! a target when it is present, repeats no weight, only uses alphabet weights
//! and sums exactly to the target.

use crate::alphabet::{Alphabet, Target, Weight};
use crate::decomposition::BestKnownMap;
use rayon::prelude::*;
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a decomposition was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cannot resolve target {0}")]
    Unresolved(Target),

    #[error("weights used more than once: {0:?}")]
    Repeated(Vec<Weight>),

    #[error("weights not in the alphabet: {0:?}")]
    NotInAlphabet(Vec<Weight>),

    #[error("want: {want}, got: {got} (diff: {})", signed_diff(.want, .got))]
    SumMismatch { want: Target, got: Target },
}

fn signed_diff(want: &Target, got: &Target) -> i128 {
    i128::from(*want) - i128::from(*got)
}

/// No repeated weight, every weight in the alphabet.
pub fn sanity_check(weights: &[Weight], alphabet: &Alphabet) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for &w in weights {
        if !seen.insert(w) {
            repeated.insert(w);
        }
    }
    if !repeated.is_empty() {
        return Err(ValidationError::Repeated(repeated.into_iter().collect()));
    }
    let invalid: Vec<Weight> = seen.into_iter().filter(|&w| !alphabet.contains(w)).collect();
    if !invalid.is_empty() {
        return Err(ValidationError::NotInAlphabet(invalid));
    }
    Ok(())
}

/// Full check of one (optional) decomposition against its target.
pub fn validate(
    weights: Option<&[Weight]>,
    target: Target,
    alphabet: &Alphabet,
) -> Result<(), ValidationError> {
    let weights = weights.ok_or(ValidationError::Unresolved(target))?;
    sanity_check(weights, alphabet)?;
    let got: Target = weights.iter().map(|&w| Target::from(w)).sum();
    if got != target {
        return Err(ValidationError::SumMismatch { want: target, got });
    }
    Ok(())
}

/// Validate every entry of a map in parallel; failures sorted by target.
pub fn validate_map(map: &BestKnownMap, alphabet: &Alphabet) -> Vec<(Target, ValidationError)> {
    let mut failures: Vec<(Target, ValidationError)> = map
        .par_iter()
        .filter_map(|(&target, dec)| {
            validate(Some(dec.weights()), target, alphabet)
                .err()
                .map(|e| (target, e))
        })
        .collect();
    failures.sort_by_key(|(t, _)| *t);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::Decomposition;

    fn fib() -> Alphabet {
        Alphabet::new([1, 2, 3, 5, 8, 13], 1).unwrap()
    }

    #[test]
    fn test_valid_decomposition() {
        assert_eq!(validate(Some(&[8, 3][..]), 11, &fib()), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let a = fib();
        assert_eq!(validate(None, 4, &a), Err(ValidationError::Unresolved(4)));
        assert_eq!(
            validate(Some(&[2, 2][..]), 4, &a),
            Err(ValidationError::Repeated(vec![2]))
        );
        assert_eq!(
            validate(Some(&[4][..]), 4, &a),
            Err(ValidationError::NotInAlphabet(vec![4]))
        );
        assert_eq!(
            validate(Some(&[3, 2][..]), 4, &a),
            Err(ValidationError::SumMismatch { want: 4, got: 5 })
        );
    }

    #[test]
    fn test_sum_mismatch_message_has_signed_diff() {
        let err = ValidationError::SumMismatch { want: 4, got: 5 };
        assert_eq!(err.to_string(), "want: 4, got: 5 (diff: -1)");
    }

    #[test]
    fn test_validate_map_reports_sorted_failures() {
        let mut map = BestKnownMap::new();
        map.insert(11, Decomposition::new(vec![8, 3]));
        map.insert(9, Decomposition::new(vec![8, 2]));
        map.insert(4, Decomposition::new(vec![2, 2]));
        let failures = validate_map(&map, &fib());
        let targets: Vec<Target> = failures.iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, vec![4, 9]);
    }
}
