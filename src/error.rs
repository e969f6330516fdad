//! Error type shared by every container and the digest engine.
use thiserror::Error;

/// Errors raised by the centroid storage layer and the digest engine.
///
/// Container operations that fail with one of these leave the container untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DigestError {
    /// Input has the wrong shape, e.g. a negative weight or a non-finite value.
    #[error("invalid input: {what}")]
    Validation {
        /// What was rejected.
        what: &'static str,
    },

    /// Index is outside of the addressed range.
    #[error("index {index} out of bounds (limit {limit})")]
    Bounds {
        /// Requested index.
        index: usize,
        /// Exclusive upper limit that was violated.
        limit: usize,
    },

    /// Write past the current logical end of an array.
    #[error("out of order insert at index {index} (size {size})")]
    Ordering {
        /// Requested index.
        index: usize,
        /// Number of populated slots at the time of the call.
        size: usize,
    },

    /// Fixed-capacity container is full.
    #[error("container is full (capacity {capacity})")]
    Capacity {
        /// Capacity of the container.
        capacity: usize,
    },

    /// A collaborator handed back something the engine cannot work with.
    #[error("invalid state: {what}")]
    State {
        /// Description of the broken expectation.
        what: &'static str,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DigestError>;

#[cfg(test)]
mod tests {
    use super::DigestError;

    #[test]
    fn display() {
        assert_eq!(
            DigestError::Validation {
                what: "negative weight"
            }
            .to_string(),
            "invalid input: negative weight"
        );
        assert_eq!(
            DigestError::Bounds {
                index: 4,
                limit: 4
            }
            .to_string(),
            "index 4 out of bounds (limit 4)"
        );
        assert_eq!(
            DigestError::Ordering { index: 3, size: 1 }.to_string(),
            "out of order insert at index 3 (size 1)"
        );
        assert_eq!(
            DigestError::Capacity { capacity: 8 }.to_string(),
            "container is full (capacity 8)"
        );
    }
}
