//! Background reconciliation for followers that missed a fan-out.
//!
//! Every follower gets its own lane: a tokio task that owns the records still
//! owed to that follower and keeps offering them until the follower
//! acknowledges. Lanes never block the write path; the coordinator only pushes
//! commands into an unbounded channel.
//!
//! A lane keeps at most one record per key. A newer version replaces an older
//! pending one, and an acknowledgment that arrived through the regular
//! fan-out settles every pending version at or below it, so a follower that
//! was down for a burst of writes receives only the latest state of each key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::record::{Record, Version};
use crate::transport::{FollowerHandle, ReplicationTransport};

/// Capped exponential backoff between delivery rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
enum LaneCommand {
    /// The follower has not acknowledged this record yet.
    Deliver(Record),
    /// The follower acknowledged `version` of `key` through some other path.
    Settled { key: String, version: Version },
}

struct Lane {
    follower: FollowerHandle,
    commands: UnboundedSender<LaneCommand>,
    pending: Arc<AtomicUsize>,
}

/// Handle to the per-follower catch-up lanes. Cheap to clone.
#[derive(Clone)]
pub struct CatchUpReconciler {
    lanes: Arc<[Lane]>,
}

impl CatchUpReconciler {
    /// Starts one lane per follower. Must be called from within a tokio runtime.
    ///
    /// Lanes stop once every clone of the returned handle has been dropped.
    pub fn spawn<T: ReplicationTransport>(
        followers: &[FollowerHandle],
        transport: Arc<T>,
        backoff: BackoffPolicy,
    ) -> Self {
        let lanes: Vec<Lane> = followers
            .iter()
            .map(|follower| {
                let (commands, inbox) = mpsc::unbounded_channel();
                let pending = Arc::new(AtomicUsize::new(0));
                let worker = LaneWorker {
                    follower: follower.clone(),
                    transport: Arc::clone(&transport),
                    inbox,
                    pending: HashMap::new(),
                    gauge: Arc::clone(&pending),
                    backoff,
                };
                tokio::spawn(worker.run());
                Lane {
                    follower: follower.clone(),
                    commands,
                    pending,
                }
            })
            .collect();
        Self {
            lanes: lanes.into(),
        }
    }

    fn lane(&self, follower_id: usize) -> Option<&Lane> {
        self.lanes
            .iter()
            .find(|lane| lane.follower.id() == follower_id)
    }

    /// Hands `record` to the follower's lane for continued delivery.
    pub fn deliver(&self, follower_id: usize, record: Record) {
        self.send(follower_id, LaneCommand::Deliver(record));
    }

    /// Tells the follower's lane that `record` (or something newer) has landed.
    pub fn settle(&self, follower_id: usize, record: &Record) {
        self.send(
            follower_id,
            LaneCommand::Settled {
                key: record.key.clone(),
                version: record.version,
            },
        );
    }

    fn send(&self, follower_id: usize, command: LaneCommand) {
        let Some(lane) = self.lane(follower_id) else {
            warn!(follower_id, "no catch-up lane for follower, dropping command");
            return;
        };
        if lane.commands.send(command).is_err() {
            warn!(follower = %lane.follower, "catch-up lane has stopped");
        }
    }

    /// Number of records each follower is still owed.
    pub fn pending(&self) -> Vec<(FollowerHandle, usize)> {
        self.lanes
            .iter()
            .map(|lane| (lane.follower.clone(), lane.pending.load(Ordering::Acquire)))
            .collect()
    }

    /// True when no lane holds undelivered records.
    pub fn is_idle(&self) -> bool {
        self.lanes
            .iter()
            .all(|lane| lane.pending.load(Ordering::Acquire) == 0)
    }
}

struct LaneWorker<T> {
    follower: FollowerHandle,
    transport: Arc<T>,
    inbox: UnboundedReceiver<LaneCommand>,
    pending: HashMap<String, Record>,
    gauge: Arc<AtomicUsize>,
    backoff: BackoffPolicy,
}

impl<T: ReplicationTransport> LaneWorker<T> {
    async fn run(mut self) {
        let mut delay = self.backoff.initial;
        loop {
            if self.pending.is_empty() {
                match self.inbox.recv().await {
                    Some(command) => self.handle(command),
                    None => break,
                }
                delay = self.backoff.initial;
            }
            while let Ok(command) = self.inbox.try_recv() {
                self.handle(command);
            }
            if self.pending.is_empty() {
                continue;
            }

            if self.deliver_round().await {
                delay = self.backoff.initial;
                continue;
            }

            // Commands that arrive while backing off are absorbed without
            // cutting the wait short.
            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    command = self.inbox.recv() => match command {
                        Some(command) => self.handle(command),
                        None => {
                            self.stop();
                            return;
                        }
                    },
                }
            }
            delay = self.backoff.next(delay);
        }
        self.stop();
    }

    fn handle(&mut self, command: LaneCommand) {
        match command {
            LaneCommand::Deliver(record) => {
                let superseded = self
                    .pending
                    .get(&record.key)
                    .is_some_and(|queued| queued.version >= record.version);
                if !superseded {
                    self.pending.insert(record.key.clone(), record);
                }
            }
            LaneCommand::Settled { key, version } => {
                if self
                    .pending
                    .get(&key)
                    .is_some_and(|queued| queued.version <= version)
                {
                    self.pending.remove(&key);
                }
            }
        }
        self.gauge.store(self.pending.len(), Ordering::Release);
    }

    /// Offers every pending record once. Stops at the first retryable failure
    /// and returns whether the lane is now empty.
    async fn deliver_round(&mut self) -> bool {
        let mut batch: Vec<Record> = self.pending.values().cloned().collect();
        batch.sort_by(|a, b| a.key.cmp(&b.key));

        for record in batch {
            match self.transport.send(&self.follower, &record).await {
                Ok(outcome) => {
                    debug!(
                        follower = %self.follower,
                        key = %record.key,
                        version = record.version,
                        ?outcome,
                        "caught up"
                    );
                    self.pending.remove(&record.key);
                }
                Err(err) if err.is_retryable() => {
                    debug!(follower = %self.follower, %err, owed = self.pending.len(), "catch-up attempt failed");
                    self.gauge.store(self.pending.len(), Ordering::Release);
                    return false;
                }
                Err(err) => {
                    warn!(follower = %self.follower, key = %record.key, %err, "dropping rejected record");
                    self.pending.remove(&record.key);
                }
            }
        }
        self.gauge.store(self.pending.len(), Ordering::Release);
        if self.pending.is_empty() {
            info!(follower = %self.follower, "follower caught up");
        }
        self.pending.is_empty()
    }

    fn stop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                follower = %self.follower,
                owed = self.pending.len(),
                "catch-up lane stopping with undelivered records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::transport::testing::ScriptedTransport;

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let started = Instant::now();
        while !condition() {
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "condition not met in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(300),
        };
        let mut delay = policy.initial;
        let mut seen = vec![delay];
        for _ in 0..4 {
            delay = policy.next(delay);
            seen.push(delay);
        }
        assert_eq!(
            seen,
            [50, 100, 200, 300, 300].map(Duration::from_millis).to_vec()
        );
    }

    #[tokio::test]
    async fn delivers_once_follower_recovers() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_unreachable(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        reconciler.deliver(1, Record::new("k", "v", 1));
        wait_until(|| transport.follower(1).attempts.load(Ordering::SeqCst) >= 3).await;
        assert!(!reconciler.is_idle());
        assert!(transport.follower(1).store.is_empty());

        transport.follower(1).set_unreachable(false);
        wait_until(|| reconciler.is_idle()).await;
        assert_eq!(transport.follower(1).store.version_of("k"), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried_until_delivered() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_timing_out(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        reconciler.deliver(1, Record::new("k", "v", 1));
        wait_until(|| transport.follower(1).attempts.load(Ordering::SeqCst) >= 2).await;
        assert_eq!(reconciler.pending()[0].1, 1);

        transport.follower(1).set_timing_out(false);
        wait_until(|| reconciler.is_idle()).await;
        assert_eq!(transport.follower(1).store.version_of("k"), 1);
    }

    #[tokio::test]
    async fn only_latest_version_is_delivered_after_outage() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_unreachable(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        for version in 1..=5 {
            reconciler.deliver(1, Record::new("k", format!("v{version}"), version));
        }
        reconciler.deliver(1, Record::new("k", "late-old", 2));
        wait_until(|| reconciler.pending()[0].1 == 1).await;

        let attempts_before = transport.follower(1).attempts.load(Ordering::SeqCst);
        transport.follower(1).set_unreachable(false);
        wait_until(|| reconciler.is_idle()).await;

        let stored = transport.follower(1).store.get("k").unwrap();
        assert_eq!(stored.version, 5);
        assert_eq!(stored.value, "v5");
        let delivered = transport.follower(1).attempts.load(Ordering::SeqCst) - attempts_before;
        assert_eq!(delivered, 1, "superseded versions must not be resent");
    }

    #[tokio::test]
    async fn settle_cancels_older_pending_versions() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_unreachable(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        reconciler.deliver(1, Record::new("k", "v1", 1));
        wait_until(|| reconciler.pending()[0].1 == 1).await;
        reconciler.settle(1, &Record::new("k", "v2", 2));
        wait_until(|| reconciler.is_idle()).await;
        assert!(transport.follower(1).store.is_empty());
    }

    #[tokio::test]
    async fn settle_keeps_newer_pending_version() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_unreachable(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        reconciler.deliver(1, Record::new("k", "v3", 3));
        reconciler.settle(1, &Record::new("k", "v2", 2));
        wait_until(|| transport.follower(1).attempts.load(Ordering::SeqCst) >= 1).await;
        assert_eq!(reconciler.pending()[0].1, 1);

        transport.follower(1).set_unreachable(false);
        wait_until(|| reconciler.is_idle()).await;
        assert_eq!(transport.follower(1).store.version_of("k"), 3);
    }

    #[tokio::test]
    async fn rejected_records_are_dropped() {
        let transport = Arc::new(ScriptedTransport::new(1));
        transport.follower(1).set_rejecting(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        reconciler.deliver(1, Record::new("k", "v", 1));
        wait_until(|| transport.follower(1).attempts.load(Ordering::SeqCst) >= 1).await;
        wait_until(|| reconciler.is_idle()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.follower(1).attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lanes_are_independent() {
        let transport = Arc::new(ScriptedTransport::new(2));
        transport.follower(1).set_unreachable(true);
        let reconciler =
            CatchUpReconciler::spawn(&transport.handles(), Arc::clone(&transport), fast_backoff());

        let record = Record::new("k", "v", 1);
        reconciler.deliver(1, record.clone());
        reconciler.deliver(2, record);
        wait_until(|| transport.follower(2).store.version_of("k") == 1).await;

        let pending = reconciler.pending();
        assert_eq!(pending[1].1, 0);
        assert_eq!(pending[0].1, 1);
    }
}
