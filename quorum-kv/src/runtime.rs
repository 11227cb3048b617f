//! Spawning leader and follower nodes.
//!
//! Each node is an axum server on its own tokio task. [`NodeHandle`] reports
//! the bound address (handy with port 0) and shuts the server down
//! gracefully. [`spawn_local_cluster`] starts a leader and its followers in
//! one process, which is what the `cluster` subcommand and the integration
//! tests use.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api;
use crate::catch_up::BackoffPolicy;
use crate::coordinator::{CoordinatorSettings, QuorumWriteCoordinator};
use crate::follower::ApplyEngine;
use crate::protocol::Role;
use crate::quorum::QuorumConfig;
use crate::store::RecordStore;
use crate::transport::{FollowerHandle, HttpTransport};

/// Tuning knobs for the leader's write path.
#[derive(Debug, Clone, Copy)]
pub struct LeaderSettings {
    /// Initial write quorum; `None` means a majority of all replicas.
    pub write_quorum: Option<usize>,
    pub write_timeout: Duration,
    /// Per-attempt timeout for a single delivery to a follower.
    pub replication_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for LeaderSettings {
    fn default() -> Self {
        Self {
            write_quorum: None,
            write_timeout: Duration::from_millis(2000),
            replication_timeout: Duration::from_millis(1000),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LeaderSettings {
    /// Rejects timings that would make every write or delivery fail at once.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.write_timeout.is_zero(), "write timeout must be greater than zero");
        ensure!(
            !self.replication_timeout.is_zero(),
            "replication timeout must be greater than zero"
        );
        ensure!(
            !self.backoff.initial.is_zero(),
            "catch-up initial delay must be greater than zero"
        );
        Ok(())
    }
}

pub struct LeaderConfig {
    pub listen: SocketAddr,
    /// Follower base URLs, e.g. `http://127.0.0.1:8001`. Order defines ids.
    pub followers: Vec<String>,
    pub settings: LeaderSettings,
}

pub struct FollowerConfig {
    pub listen: SocketAddr,
}

pub struct ClusterConfig {
    pub leader_listen: SocketAddr,
    pub followers: usize,
    /// First follower port; 0 gives every follower an ephemeral port.
    pub follower_base_port: u16,
    pub settings: LeaderSettings,
}

/// A running node.
pub struct NodeHandle {
    role: Role,
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops accepting connections and waits for the server task to finish.
    pub async fn shutdown(self) -> Result<()> {
        let role = self.role;
        let _ = self.shutdown.send(());
        self.server
            .await
            .map_err(|err| anyhow!("{role:?} server task failed: {err}"))?
    }
}

pub async fn spawn_leader(config: LeaderConfig) -> Result<NodeHandle> {
    config.settings.validate()?;
    let replica_count = config.followers.len() + 1;
    let quorum = match config.settings.write_quorum {
        Some(w) => QuorumConfig::new(replica_count, w)?,
        None => QuorumConfig::majority(replica_count),
    };
    let transport = Arc::new(HttpTransport::new(config.settings.replication_timeout)?);
    let followers = FollowerHandle::from_urls(config.followers);
    for follower in &followers {
        info!(%follower, "registered follower");
    }

    let coordinator = QuorumWriteCoordinator::new(
        followers,
        transport,
        Arc::new(quorum),
        CoordinatorSettings {
            write_timeout: config.settings.write_timeout,
            backoff: config.settings.backoff,
        },
    );
    let router = api::leader_router(Arc::new(coordinator));
    serve(Role::Leader, config.listen, router).await
}

pub async fn spawn_follower(config: FollowerConfig) -> Result<NodeHandle> {
    let engine = Arc::new(ApplyEngine::new(Arc::new(RecordStore::new())));
    serve(Role::Follower, config.listen, api::follower_router(engine)).await
}

async fn serve(role: Role, listen: SocketAddr, router: Router) -> Result<NodeHandle> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let addr = listener.local_addr()?;
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("http server failed")
    });

    info!(?role, %addr, "node listening");
    Ok(NodeHandle {
        role,
        addr,
        shutdown,
        server,
    })
}

/// A leader and its followers running in this process.
pub struct LocalCluster {
    pub leader: NodeHandle,
    pub followers: Vec<NodeHandle>,
}

impl LocalCluster {
    pub fn leader_url(&self) -> String {
        self.leader.base_url()
    }

    pub fn follower_urls(&self) -> Vec<String> {
        self.followers.iter().map(NodeHandle::base_url).collect()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.leader.shutdown().await?;
        for follower in self.followers {
            follower.shutdown().await?;
        }
        Ok(())
    }
}

/// Starts the followers first so the leader's first write can reach them.
pub async fn spawn_local_cluster(config: ClusterConfig) -> Result<LocalCluster> {
    let mut followers = Vec::with_capacity(config.followers);
    for index in 0..config.followers {
        let port = if config.follower_base_port == 0 {
            0
        } else {
            u16::try_from(index)
                .ok()
                .and_then(|offset| config.follower_base_port.checked_add(offset))
                .ok_or_else(|| anyhow!("follower port range overflows u16"))?
        };
        let listen = SocketAddr::new(config.leader_listen.ip(), port);
        followers.push(spawn_follower(FollowerConfig { listen }).await?);
    }

    let leader = spawn_leader(LeaderConfig {
        listen: config.leader_listen,
        followers: followers.iter().map(NodeHandle::base_url).collect(),
        settings: config.settings,
    })
    .await?;

    Ok(LocalCluster { leader, followers })
}
