//! The leader's quorum write path.
//!
//! A write moves through four states:
//!
//! ```text
//! Allocated -> Replicating -> Committed
//!                          \-> TimedOut
//! ```
//!
//! The version is allocated before anything leaves the leader, the record is
//! applied to the leader's own store (the first acknowledgment), and then one
//! task per follower delivers it in parallel. The client is answered once the
//! configured quorum is reached or the deadline passes. Neither outcome rolls
//! anything back: replicas that applied the record keep it.
//!
//! A delivery task keeps retrying a retryable failure with backoff until the
//! write's deadline, so a follower that recovers inside the window still
//! counts toward the quorum. Once the window closes the task hands the record
//! to the follower's catch-up lane.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catch_up::{BackoffPolicy, CatchUpReconciler};
use crate::quorum::QuorumConfig;
use crate::record::{Record, Version, VersionedValue};
use crate::store::RecordStore;
use crate::transport::{FollowerHandle, ReplicationTransport};
use crate::version::VersionAllocator;

/// What the client is told about a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub status: WriteStatus,
    pub version: Version,
    /// Replicas (leader included) known to hold the record when the answer
    /// was produced.
    pub acks: usize,
    /// Quorum this write was held to.
    pub quorum: usize,
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        self.status == WriteStatus::Committed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentState {
    Allocated,
    Replicating,
    Committed,
    TimedOut,
}

/// Book-keeping for one in-progress write. Dropped once the client has its
/// answer; the record itself lives on in the stores.
struct WriteIntent {
    record: Record,
    quorum: usize,
    acked: Vec<usize>,
    deadline: Instant,
    state: IntentState,
}

impl WriteIntent {
    fn new(record: Record, quorum: usize, deadline: Instant) -> Self {
        Self {
            record,
            quorum,
            acked: Vec::new(),
            deadline,
            state: IntentState::Allocated,
        }
    }

    fn transition(&mut self, next: IntentState) {
        debug!(
            key = %self.record.key,
            version = self.record.version,
            from = ?self.state,
            to = ?next,
            "write state change"
        );
        self.state = next;
    }

    /// Replica 0 is the leader.
    fn acknowledge(&mut self, replica: usize) {
        if !self.acked.contains(&replica) {
            self.acked.push(replica);
        }
    }

    fn acks(&self) -> usize {
        self.acked.len()
    }

    fn is_satisfied(&self) -> bool {
        self.acks() >= self.quorum
    }

    fn finish(mut self) -> WriteOutcome {
        let status = if self.is_satisfied() {
            self.transition(IntentState::Committed);
            WriteStatus::Committed
        } else {
            self.transition(IntentState::TimedOut);
            WriteStatus::Failed
        };
        WriteOutcome {
            status,
            version: self.record.version,
            acks: self.acks(),
            quorum: self.quorum,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// How long a write may wait for its quorum.
    pub write_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct QuorumWriteCoordinator<T> {
    store: Arc<RecordStore>,
    versions: VersionAllocator,
    quorum: Arc<QuorumConfig>,
    followers: Arc<[FollowerHandle]>,
    transport: Arc<T>,
    catch_up: CatchUpReconciler,
    write_timeout: Duration,
    backoff: BackoffPolicy,
}

impl<T: ReplicationTransport> QuorumWriteCoordinator<T> {
    /// Builds the coordinator and starts its catch-up lanes, so this must run
    /// inside a tokio runtime.
    pub fn new(
        followers: Vec<FollowerHandle>,
        transport: Arc<T>,
        quorum: Arc<QuorumConfig>,
        settings: CoordinatorSettings,
    ) -> Self {
        let catch_up = CatchUpReconciler::spawn(&followers, Arc::clone(&transport), settings.backoff);
        Self {
            store: Arc::new(RecordStore::new()),
            versions: VersionAllocator::new(),
            quorum,
            followers: followers.into(),
            transport,
            catch_up,
            write_timeout: settings.write_timeout,
            backoff: settings.backoff,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn quorum(&self) -> &Arc<QuorumConfig> {
        &self.quorum
    }

    pub fn followers(&self) -> &[FollowerHandle] {
        &self.followers
    }

    pub fn catch_up(&self) -> &CatchUpReconciler {
        &self.catch_up
    }

    /// Authoritative read from the leader's store.
    pub fn read(&self, key: &str) -> Option<VersionedValue> {
        self.store.get(key)
    }

    /// Replicates `key = value` and waits for the write quorum in effect when
    /// the call starts; later quorum changes do not affect it.
    ///
    /// Fails before the deadline only when every follower has given a final
    /// answer and the quorum is still short.
    pub async fn write(&self, key: String, value: String) -> WriteOutcome {
        let quorum = self.quorum.write_quorum();
        let version = self.versions.next_version(&key);
        let record = Record::new(key, value, version);
        let mut intent = WriteIntent::new(record.clone(), quorum, Instant::now() + self.write_timeout);

        self.store.apply(&record);
        intent.acknowledge(0);

        intent.transition(IntentState::Replicating);
        let mut inflight: FuturesUnordered<JoinHandle<(usize, bool)>> = self
            .followers
            .iter()
            .map(|follower| self.dispatch(follower.clone(), record.clone(), intent.deadline))
            .collect();

        while !intent.is_satisfied() {
            match tokio::time::timeout_at(intent.deadline, inflight.next()).await {
                Ok(Some(result)) => record_result(&mut intent, result),
                // Every follower answered and the quorum is still short.
                Ok(None) | Err(_) => break,
            }
        }

        // Count acknowledgments that are already in without waiting for more.
        if intent.is_satisfied() {
            while let Some(Some(result)) = inflight.next().now_or_never() {
                record_result(&mut intent, result);
            }
        }

        // Dropping `inflight` detaches the remaining delivery tasks; they keep
        // retrying until the deadline and then report to the catch-up lanes.
        drop(inflight);

        let outcome = intent.finish();
        info!(
            key = %record.key,
            version = outcome.version,
            acks = outcome.acks,
            quorum = outcome.quorum,
            status = ?outcome.status,
            "write finished"
        );
        outcome
    }

    fn dispatch(
        &self,
        follower: FollowerHandle,
        record: Record,
        deadline: Instant,
    ) -> JoinHandle<(usize, bool)> {
        let transport = Arc::clone(&self.transport);
        let catch_up = self.catch_up.clone();
        let backoff = self.backoff;
        tokio::spawn(async move {
            let mut delay = backoff.initial;
            loop {
                match transport.send(&follower, &record).await {
                    Ok(outcome) => {
                        debug!(%follower, key = %record.key, version = record.version, ?outcome, "follower acknowledged");
                        catch_up.settle(follower.id(), &record);
                        return (follower.id(), true);
                    }
                    Err(err) if err.is_retryable() => {
                        if Instant::now() + delay >= deadline {
                            debug!(%err, key = %record.key, "handing record to catch-up");
                            catch_up.deliver(follower.id(), record);
                            return (follower.id(), false);
                        }
                        debug!(%err, key = %record.key, ?delay, "retrying inside write window");
                        tokio::time::sleep(delay).await;
                        delay = backoff.next(delay);
                    }
                    Err(err) => {
                        warn!(%err, key = %record.key, "follower rejected record");
                        return (follower.id(), false);
                    }
                }
            }
        })
    }
}

fn record_result(
    intent: &mut WriteIntent,
    result: Result<(usize, bool), tokio::task::JoinError>,
) {
    match result {
        Ok((follower_id, true)) => intent.acknowledge(follower_id),
        Ok((_, false)) => {}
        Err(err) => warn!(%err, "delivery task failed"),
    }
}
