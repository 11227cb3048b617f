//! Leader to follower record delivery.
//!
//! The coordinator and the catch-up lanes only see the
//! [`ReplicationTransport`] trait. Production nodes use [`HttpTransport`],
//! which POSTs the record as JSON to the follower's `/replicate` endpoint;
//! unit tests swap in a scripted in-memory transport.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::protocol::ReplicateResponse;
use crate::record::Record;
use crate::store::ApplyOutcome;

/// Address book entry for one follower.
///
/// Ids start at 1; id 0 is reserved for the leader in logs and status output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FollowerHandle {
    id: usize,
    base_url: String,
}

impl FollowerHandle {
    pub fn new(id: usize, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Builds the ordered follower set from a list of base URLs.
    pub fn from_urls<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| Self::new(index + 1, url))
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl fmt::Display for FollowerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "follower-{} ({})", self.id, self.base_url)
    }
}

/// Delivers one record to one follower.
///
/// Implementations must bound every call by their own timeout and must be
/// safe to call concurrently for different followers.
#[async_trait]
pub trait ReplicationTransport: Send + Sync + 'static {
    async fn send(
        &self,
        follower: &FollowerHandle,
        record: &Record,
    ) -> Result<ApplyOutcome, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build replication http client")?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, follower: &FollowerHandle, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                follower: follower.to_string(),
                timeout: self.timeout,
            }
        } else {
            TransportError::Unreachable {
                follower: follower.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ReplicationTransport for HttpTransport {
    async fn send(
        &self,
        follower: &FollowerHandle,
        record: &Record,
    ) -> Result<ApplyOutcome, TransportError> {
        let response = self
            .client
            .post(follower.endpoint("/replicate"))
            .json(record)
            .send()
            .await
            .map_err(|err| self.classify(follower, err))?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(TransportError::Rejected {
                follower: follower.to_string(),
                reason,
            });
        }
        if !status.is_success() {
            return Err(TransportError::Unreachable {
                follower: follower.to_string(),
                reason: format!("unexpected status {status}"),
            });
        }

        let ack: ReplicateResponse = response
            .json()
            .await
            .map_err(|err| self.classify(follower, err))?;
        Ok(ack.outcome)
    }
}
