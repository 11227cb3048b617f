//! A follower that is down while writes happen converges once it comes back.

use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use quorum_kv::catch_up::BackoffPolicy;
use quorum_kv::coordinator::WriteStatus;
use quorum_kv::protocol::{ClusterStatus, GetResponse, SetResponse};
use quorum_kv::runtime::{
    spawn_follower, spawn_leader, FollowerConfig, LeaderConfig, LeaderSettings,
};
use serde_json::json;

/// Grabs a free port, then releases it so a follower can bind it later.
fn reserve_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

async fn wait_for<F, Fut>(timeout: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let started = Instant::now();
    while !probe().await? {
        if started.elapsed() > timeout {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_follower_receives_latest_state() -> Result<()> {
    let live = spawn_follower(FollowerConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
    })
    .await?;
    let late_addr = reserve_addr()?;

    let leader = spawn_leader(LeaderConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        followers: vec![live.base_url(), format!("http://{late_addr}")],
        settings: LeaderSettings {
            write_quorum: Some(2),
            write_timeout: Duration::from_millis(500),
            replication_timeout: Duration::from_millis(200),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(20),
                max: Duration::from_millis(200),
            },
        },
    })
    .await?;
    let client = reqwest::Client::new();

    for value in ["v1", "v2", "v3"] {
        let response: SetResponse = client
            .post(format!("{}/set", leader.base_url()))
            .json(&json!({ "key": "lagging", "value": value }))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(response.status, WriteStatus::Committed);
        assert_eq!(response.acks, 2);
    }

    let status_url = format!("{}/status", leader.base_url());
    wait_for(Duration::from_secs(2), || {
        let client = client.clone();
        let status_url = status_url.clone();
        async move {
            let status: ClusterStatus = client.get(status_url).send().await?.json().await?;
            Ok(status.followers[1].pending == 1)
        }
    })
    .await?;

    let late = spawn_follower(FollowerConfig { listen: late_addr }).await?;
    let late_url = format!("{}/get/lagging", late.base_url());
    wait_for(Duration::from_secs(2), || {
        let client = client.clone();
        let late_url = late_url.clone();
        async move {
            let response = client.get(late_url).send().await?;
            if !response.status().is_success() {
                return Ok(false);
            }
            let record: GetResponse = response.json().await?;
            Ok(record
                == GetResponse {
                    value: "v3".into(),
                    version: 3,
                })
        }
    })
    .await?;

    leader.shutdown().await?;
    live.shutdown().await?;
    late.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_fails_when_quorum_is_unreachable() -> Result<()> {
    let missing = reserve_addr()?;
    let leader = spawn_leader(LeaderConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        followers: vec![format!("http://{missing}")],
        settings: LeaderSettings {
            write_quorum: Some(2),
            write_timeout: Duration::from_millis(300),
            replication_timeout: Duration::from_millis(100),
            ..LeaderSettings::default()
        },
    })
    .await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/set", leader.base_url()))
        .json(&json!({ "key": "k", "value": "v" }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: SetResponse = response.json().await?;
    assert_eq!(body.status, WriteStatus::Failed);
    assert_eq!(body.acks, 1);

    // The attempt is not rolled back on the leader.
    let record: GetResponse = client
        .get(format!("{}/get/k", leader.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record.version, body.version);

    leader.shutdown().await
}
