//! JSON bodies exchanged over HTTP.
//!
//! Client-facing shapes (`/set`, `/get/{key}`, `/config/write_quorum`,
//! `/health`) follow the contract existing tooling already speaks. The
//! leader-to-follower shape is the [`Record`](crate::record::Record) itself on
//! the way in and a [`ReplicateResponse`] on the way back.

use serde::{Deserialize, Serialize};

use crate::coordinator::{WriteOutcome, WriteStatus};
use crate::record::{Version, VersionedValue};
use crate::store::ApplyOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub role: Role,
}

impl HealthResponse {
    pub fn ok(role: Role) -> Self {
        Self {
            status: "ok".to_string(),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResponse {
    pub status: WriteStatus,
    pub version: Version,
    pub acks: usize,
    pub quorum: usize,
}

impl From<WriteOutcome> for SetResponse {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            status: outcome.status,
            version: outcome.version,
            acks: outcome.acks,
            quorum: outcome.quorum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: String,
    pub version: Version,
}

impl From<VersionedValue> for GetResponse {
    fn from(stored: VersionedValue) -> Self {
        Self {
            value: stored.value,
            version: stored.version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumRequest {
    pub write_quorum: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumResponse {
    pub write_quorum: usize,
    pub replica_count: usize,
}

/// A follower's answer to `/replicate`. `version` is what the follower holds
/// for the key after the apply, which is at least the offered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub outcome: ApplyOutcome,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerStatus {
    pub id: usize,
    pub url: String,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub role: Role,
    pub write_quorum: usize,
    pub replica_count: usize,
    pub keys: usize,
    pub followers: Vec<FollowerStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
}
