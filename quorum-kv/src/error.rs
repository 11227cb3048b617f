use std::time::Duration;

use thiserror::Error;

/// Raised when an administrator asks for a quorum the cluster cannot provide.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("write quorum {requested} is out of range, expected 1..={replica_count}")]
    OutOfRange {
        requested: usize,
        replica_count: usize,
    },
}

/// Raised by a follower for records that can never be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("record key must not be empty")]
    EmptyKey,
    #[error("record for key '{key}' has version 0")]
    ZeroVersion { key: String },
}

/// Outcome of a single failed delivery attempt to a follower.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{follower} is unreachable: {reason}")]
    Unreachable { follower: String, reason: String },
    #[error("{follower} did not answer within {timeout:?}")]
    Timeout { follower: String, timeout: Duration },
    #[error("{follower} rejected the record: {reason}")]
    Rejected { follower: String, reason: String },
}

impl TransportError {
    /// Rejections are final; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected { .. })
    }
}
