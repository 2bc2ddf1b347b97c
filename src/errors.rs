//! Error types for the collapsing subsystem.
//!
//! Data-quality disagreements never surface here: resolvable base conflicts
//! degrade to lower-confidence calls and indel-descriptor conflicts degrade
//! to structured outcomes. Errors are reserved for malformed input and
//! defended invariant violations.

use thiserror::Error;

use crate::grouper::Leg;

/// Result type alias for collapsing operations.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Error type for collapsing operations.
#[derive(Error, Debug)]
pub enum DedupError {
    /// A read's bases, qualities and CIGAR disagree on length.
    #[error("Malformed read '{name}': {reason}")]
    MalformedRead {
        /// Read identifier ("" when the read carries none).
        name: String,
        /// Explanation of the inconsistency.
        reason: String,
    },

    /// A CIGAR string could not be parsed.
    #[error("Invalid CIGAR '{cigar}': {reason}")]
    InvalidCigar {
        /// The offending CIGAR string.
        cigar: String,
        /// Explanation of the problem.
        reason: String,
    },

    /// UMI handling is enabled but a read carries no identifier.
    #[error("Read has no identifier to extract a UMI from")]
    MissingIdentifier,

    /// A read identifier is too short to hold a UMI of the established length.
    #[error("Identifier '{name}' is shorter than the established UMI length {umi_len}")]
    IdentifierTooShort {
        /// The offending identifier.
        name: String,
        /// UMI length established from the first read of the run.
        umi_len: usize,
    },

    /// A read arrived for a leg that has already been built and emitted.
    #[error("Read arrived for {leg:?} leg after it completed")]
    LegComplete {
        /// The leg that had already completed.
        leg: Leg,
    },

    /// A leg buffer would exceed the group's established fragment count.
    #[error("{leg:?} leg would exceed fragment count {fragment_count}")]
    LegOverflow {
        /// The overflowing leg.
        leg: Leg,
        /// The group's fixed fragment count.
        fragment_count: usize,
    },

    /// The external reference-base lookup failed.
    #[error("Reference lookup failed: {0}")]
    Reference(anyhow::Error),
}

impl From<anyhow::Error> for DedupError {
    fn from(error: anyhow::Error) -> Self {
        DedupError::Reference(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_overflow_message() {
        let error = DedupError::LegOverflow { leg: Leg::Mate, fragment_count: 3 };
        let msg = format!("{error}");
        assert!(msg.contains("Mate"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_malformed_read_message() {
        let error = DedupError::MalformedRead {
            name: "q17".to_string(),
            reason: "qualities shorter than bases".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("q17"));
        assert!(msg.contains("qualities shorter than bases"));
    }
}
