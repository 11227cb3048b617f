use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::catch_up::BackoffPolicy;
use crate::runtime::{ClusterConfig, FollowerConfig, LeaderConfig, LeaderSettings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Leader-driven replicated key-value store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the leader, which accepts writes and replicates them.
    Leader(LeaderArgs),
    /// Run a follower, which applies replicated records and serves local reads.
    Follower(FollowerArgs),
    /// Run a leader and its followers in this process.
    Cluster(ClusterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Initial write quorum, leader included. Defaults to a majority of replicas.
    #[arg(long)]
    pub write_quorum: Option<usize>,

    /// How long a write may wait for its quorum before reporting failure.
    #[arg(long, default_value_t = 2000)]
    pub write_timeout_ms: u64,

    /// Timeout for a single delivery attempt to one follower.
    #[arg(long, default_value_t = 1000)]
    pub replication_timeout_ms: u64,

    /// First catch-up retry delay for a lagging follower.
    #[arg(long, default_value_t = 50)]
    pub catch_up_initial_ms: u64,

    /// Upper bound for the catch-up retry delay.
    #[arg(long, default_value_t = 500)]
    pub catch_up_max_ms: u64,
}

impl WriteArgs {
    pub fn settings(&self) -> LeaderSettings {
        let initial = Duration::from_millis(self.catch_up_initial_ms);
        LeaderSettings {
            write_quorum: self.write_quorum,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            replication_timeout: Duration::from_millis(self.replication_timeout_ms),
            backoff: BackoffPolicy {
                initial,
                max: Duration::from_millis(self.catch_up_max_ms).max(initial),
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LeaderArgs {
    /// Socket address the leader binds to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Follower base URLs, comma separated or repeated, e.g. http://127.0.0.1:8001
    #[arg(long = "follower", value_delimiter = ',')]
    pub followers: Vec<String>,

    #[command(flatten)]
    pub write: WriteArgs,
}

impl LeaderArgs {
    pub fn config(&self) -> LeaderConfig {
        LeaderConfig {
            listen: self.listen,
            followers: self.followers.clone(),
            settings: self.write.settings(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FollowerArgs {
    /// Socket address the follower binds to.
    #[arg(long, default_value = "127.0.0.1:8001")]
    pub listen: SocketAddr,
}

impl FollowerArgs {
    pub fn config(&self) -> FollowerConfig {
        FollowerConfig {
            listen: self.listen,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Socket address the leader binds to. Followers share its IP.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub leader_listen: SocketAddr,

    /// Number of followers to start.
    #[arg(long, default_value_t = 5)]
    pub followers: usize,

    /// Port of the first follower; the rest count up from it. Use 0 for ephemeral ports.
    #[arg(long, default_value_t = 8001)]
    pub follower_base_port: u16,

    #[command(flatten)]
    pub write: WriteArgs,
}

impl ClusterArgs {
    pub fn config(&self) -> ClusterConfig {
        ClusterConfig {
            leader_listen: self.leader_listen,
            followers: self.followers,
            follower_base_port: self.follower_base_port,
            settings: self.write.settings(),
        }
    }
}
