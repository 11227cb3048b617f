//! Leader-driven replicated key-value store with a tunable write quorum.
//!
//! One leader accepts every write, assigns it a per-key version, applies it
//! locally and fans it out to a fixed set of followers in parallel. The client
//! is answered as soon as `W` replicas (the leader included) have acknowledged
//! the record, or with a failure once the write deadline passes. Followers that
//! did not acknowledge in time keep receiving the record in the background
//! until they converge.
//!
//! # Architecture
//!
//! - **Leader**: an axum server backed by a [`coordinator::QuorumWriteCoordinator`]
//! - **Followers**: axum servers backed by a [`follower::ApplyEngine`]
//! - **Fan-out tasks**: one short-lived tokio task per follower per write
//! - **Catch-up lanes**: one long-lived tokio task per follower that retries
//!   records the fan-out could not deliver
//!
//! There is no election and no voting round. The leader's decisions are final;
//! follower acknowledgments are the only signal it trusts.
//!
//! # Modules
//!
//! - [`record`]: the replicated unit (`key`, `value`, `version`)
//! - [`store`]: thread-safe in-memory record storage with monotonic apply
//! - [`version`]: per-key version allocation on the leader
//! - [`quorum`]: the runtime-mutable write quorum cell
//! - [`transport`]: leader to follower delivery
//! - [`follower`]: idempotent apply on followers
//! - [`catch_up`]: background reconciliation of lagging followers
//! - [`coordinator`]: the quorum write path
//! - [`protocol`]: JSON request and response bodies
//! - [`api`]: HTTP routers for leader and follower roles
//! - [`runtime`]: spawning nodes and whole local clusters
//! - [`cli`]: command-line interface for the `quorum-kv` binary

pub mod api;
pub mod catch_up;
pub mod cli;
pub mod coordinator;
pub mod error;
pub mod follower;
pub mod protocol;
pub mod quorum;
pub mod record;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod version;
