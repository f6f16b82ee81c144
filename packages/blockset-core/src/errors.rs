//! Error types for blockset-core

use crate::alphabet::{Target, Weight};
use thiserror::Error;

/// Main error type for core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Alphabet construction rejected the weight list
    #[error("Invalid alphabet: {0}")]
    InvalidAlphabet(String),

    /// A job description that cannot be enumerated
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A decomposition uses a weight that is not in the alphabet
    #[error("Target {target}: weight {weight} is not in the alphabet")]
    UnknownWeight { target: Target, weight: Weight },

    /// Artifact buffer does not match its range table
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bincode error
    #[error("Bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

impl CoreError {
    pub fn invalid_alphabet(msg: impl Into<String>) -> Self {
        CoreError::InvalidAlphabet(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        CoreError::InvalidJob(msg.into())
    }

    pub fn corrupt_artifact(msg: impl Into<String>) -> Self {
        CoreError::CorruptArtifact(msg.into())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_weight_display() {
        let err = CoreError::UnknownWeight {
            target: 4,
            weight: 7,
        };
        assert_eq!(err.to_string(), "Target 4: weight 7 is not in the alphabet");
    }

    #[test]
    fn test_helpers_build_expected_variants() {
        assert!(matches!(
            CoreError::invalid_job("prefix repeats 3"),
            CoreError::InvalidJob(ref m) if m == "prefix repeats 3"
        ));
        assert!(matches!(
            CoreError::invalid_alphabet("empty"),
            CoreError::InvalidAlphabet(_)
        ));
    }
}
