//! HTTP surface for leader and follower nodes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::{QuorumWriteCoordinator, WriteStatus};
use crate::error::{ApplyError, QuorumError};
use crate::follower::ApplyEngine;
use crate::protocol::{
    ClusterStatus, ErrorResponse, FollowerStatus, GetResponse, HealthResponse, QuorumRequest,
    QuorumResponse, ReplicateResponse, Role, SetRequest, SetResponse,
};
use crate::record::Record;
use crate::transport::ReplicationTransport;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error("key must not be empty")]
    EmptyKey,
    #[error(transparent)]
    Quorum(#[from] QuorumError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::KeyNotFound(_) => "not_found",
            ApiError::EmptyKey => "invalid_key",
            ApiError::Quorum(QuorumError::OutOfRange { .. }) => "out_of_range",
            ApiError::Apply(_) => "malformed_record",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code().to_string(),
            reason: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

type LeaderState<T> = State<Arc<QuorumWriteCoordinator<T>>>;

pub fn leader_router<T: ReplicationTransport>(coordinator: Arc<QuorumWriteCoordinator<T>>) -> Router {
    Router::new()
        .route("/health", get(leader_health))
        .route("/set", post(set_key::<T>))
        .route("/get/:key", get(get_leader_key::<T>))
        .route(
            "/config/write_quorum",
            get(get_write_quorum::<T>).post(set_write_quorum::<T>),
        )
        .route("/status", get(cluster_status::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

pub fn follower_router(engine: Arc<ApplyEngine>) -> Router {
    Router::new()
        .route("/health", get(follower_health))
        .route("/replicate", post(replicate))
        .route("/get/:key", get(get_follower_key))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn leader_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok(Role::Leader))
}

async fn follower_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok(Role::Follower))
}

async fn set_key<T: ReplicationTransport>(
    State(coordinator): LeaderState<T>,
    Json(request): Json<SetRequest>,
) -> Result<Response, ApiError> {
    if request.key.is_empty() {
        return Err(ApiError::EmptyKey);
    }
    let outcome = coordinator.write(request.key, request.value).await;
    let status = match outcome.status {
        WriteStatus::Committed => StatusCode::OK,
        WriteStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(SetResponse::from(outcome))).into_response())
}

async fn get_leader_key<T: ReplicationTransport>(
    State(coordinator): LeaderState<T>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>, ApiError> {
    coordinator
        .read(&key)
        .map(|stored| Json(stored.into()))
        .ok_or(ApiError::KeyNotFound(key))
}

async fn get_write_quorum<T: ReplicationTransport>(
    State(coordinator): LeaderState<T>,
) -> Json<QuorumResponse> {
    let quorum = coordinator.quorum();
    Json(QuorumResponse {
        write_quorum: quorum.write_quorum(),
        replica_count: quorum.replica_count(),
    })
}

async fn set_write_quorum<T: ReplicationTransport>(
    State(coordinator): LeaderState<T>,
    Json(request): Json<QuorumRequest>,
) -> Result<Json<QuorumResponse>, ApiError> {
    let quorum = coordinator.quorum();
    let previous = quorum.set_write_quorum(request.write_quorum)?;
    info!(previous, current = request.write_quorum, "write quorum updated");
    Ok(Json(QuorumResponse {
        write_quorum: request.write_quorum,
        replica_count: quorum.replica_count(),
    }))
}

async fn cluster_status<T: ReplicationTransport>(
    State(coordinator): LeaderState<T>,
) -> Json<ClusterStatus> {
    let followers = coordinator
        .catch_up()
        .pending()
        .into_iter()
        .map(|(follower, pending)| FollowerStatus {
            id: follower.id(),
            url: follower.base_url().to_string(),
            pending,
        })
        .collect();
    Json(ClusterStatus {
        role: Role::Leader,
        write_quorum: coordinator.quorum().write_quorum(),
        replica_count: coordinator.quorum().replica_count(),
        keys: coordinator.store().len(),
        followers,
    })
}

async fn replicate(
    State(engine): State<Arc<ApplyEngine>>,
    Json(record): Json<Record>,
) -> Result<Json<ReplicateResponse>, ApiError> {
    let outcome = engine.apply(&record)?;
    Ok(Json(ReplicateResponse {
        outcome,
        version: engine.store().version_of(&record.key),
    }))
}

async fn get_follower_key(
    State(engine): State<Arc<ApplyEngine>>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>, ApiError> {
    engine
        .store()
        .get(&key)
        .map(|stored| Json(stored.into()))
        .ok_or(ApiError::KeyNotFound(key))
}
