use thiserror::Error;

/// Errors surfaced by the consistency layer.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// A strong read or write could not gather a majority of peer
    /// acknowledgements.
    #[error("quorum not reached: required {required}, acknowledged {acked}")]
    QuorumNotReached { required: usize, acked: usize },

    /// Serialization error while checksumming or storing a value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for consistency operations.
pub type Result<T> = std::result::Result<T, ConsistencyError>;
