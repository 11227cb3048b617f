use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::QuorumError;

/// Runtime-adjustable write quorum shared by the coordinator and the admin API.
///
/// The coordinator reads the value once per write, so a change only affects
/// writes submitted after [`QuorumConfig::set_write_quorum`] returns.
#[derive(Debug)]
pub struct QuorumConfig {
    write_quorum: AtomicUsize,
    replica_count: usize,
}

impl QuorumConfig {
    /// `replica_count` counts the leader plus every follower.
    pub fn new(replica_count: usize, write_quorum: usize) -> Result<Self, QuorumError> {
        check_range(write_quorum, replica_count)?;
        Ok(Self {
            write_quorum: AtomicUsize::new(write_quorum),
            replica_count,
        })
    }

    /// Quorum of `replica_count / 2 + 1`.
    pub fn majority(replica_count: usize) -> Self {
        Self {
            write_quorum: AtomicUsize::new(replica_count / 2 + 1),
            replica_count: replica_count.max(1),
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn write_quorum(&self) -> usize {
        self.write_quorum.load(Ordering::Acquire)
    }

    /// Replaces the quorum and returns the previous value. Out-of-range
    /// requests leave the current value untouched.
    pub fn set_write_quorum(&self, write_quorum: usize) -> Result<usize, QuorumError> {
        check_range(write_quorum, self.replica_count)?;
        Ok(self.write_quorum.swap(write_quorum, Ordering::AcqRel))
    }
}

fn check_range(requested: usize, replica_count: usize) -> Result<(), QuorumError> {
    if requested == 0 || requested > replica_count {
        return Err(QuorumError::OutOfRange {
            requested,
            replica_count,
        });
    }
    Ok(())
}
