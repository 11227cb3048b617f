use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use quorum_kv::cli::{Cli, Command};
use quorum_kv::runtime::{spawn_follower, spawn_leader, spawn_local_cluster};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Leader(args) => {
            let node = spawn_leader(args.config()).await?;
            info!(url = %node.base_url(), followers = args.followers.len(), "leader ready");
            wait_for_ctrl_c().await;
            node.shutdown().await?;
        }
        Command::Follower(args) => {
            let node = spawn_follower(args.config()).await?;
            info!(url = %node.base_url(), "follower ready");
            wait_for_ctrl_c().await;
            node.shutdown().await?;
        }
        Command::Cluster(args) => {
            let cluster = spawn_local_cluster(args.config()).await?;
            info!(
                leader = %cluster.leader_url(),
                followers = ?cluster.follower_urls(),
                "cluster ready"
            );
            wait_for_ctrl_c().await;
            cluster.shutdown().await?;
        }
    }

    Ok(())
}
