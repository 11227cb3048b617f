use serde::{Deserialize, Serialize};

use crate::error::ApplyError;

/// Per-key write sequence number. The first write of a key gets version 1;
/// version 0 means the key was never written.
pub type Version = u64;

/// A single versioned write, shipped from the leader to every follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub version: Version,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>, version: Version) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
        }
    }

    /// Returns true if this record should replace state stored at `stored`.
    pub fn supersedes(&self, stored: Version) -> bool {
        self.version > stored
    }

    /// Rejects records no leader could have produced.
    pub fn validate(&self) -> Result<(), ApplyError> {
        if self.key.is_empty() {
            return Err(ApplyError::EmptyKey);
        }
        if self.version == 0 {
            return Err(ApplyError::ZeroVersion {
                key: self.key.clone(),
            });
        }
        Ok(())
    }
}

/// What a replica keeps for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: String,
    pub version: Version,
}

impl From<&Record> for VersionedValue {
    fn from(record: &Record) -> Self {
        Self {
            value: record.value.clone(),
            version: record.version,
        }
    }
}
