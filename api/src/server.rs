use axum::{extract::State, routing::get, Json, Router};
use consensus::{ClusterSnapshot, NodeId, Role, SharedClusterView};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use storage::{StorageEngine, StorageStats};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::replication::{FileRecord, ReplicationCoordinator};
use crate::{ApiError, ApiResult};

pub struct AdminState {
    pub view: SharedClusterView,
    pub replication: Arc<ReplicationCoordinator>,
    pub storage: Arc<StorageEngine>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub node_id: NodeId,
    pub role: Role,
    pub coordinator_id: Option<NodeId>,
    pub epoch: u64,
    pub storage: StorageStats,
}

/// Read-only HTTP status surface of a node.
pub struct AdminServer {
    address: SocketAddr,
    state: Arc<AdminState>,
}

impl AdminServer {
    pub fn new(address: SocketAddr, state: AdminState) -> Self {
        Self {
            address,
            state: Arc::new(state),
        }
    }

    pub async fn start(&self) -> ApiResult<()> {
        let app = self.create_router();

        tracing::info!("Starting admin server on {}", self.address);
        let listener = TcpListener::bind(self.address)
            .await
            .map_err(|e| {
                ApiError::InternalError(format!("Failed to bind to {}: {}", self.address, e))
            })?;

        axum::serve(listener, app)
            .await
            .map_err(|e| ApiError::InternalError(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn create_router(&self) -> Router {
        router(self.state.clone())
    }
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cluster", get(cluster))
        .route("/files", get(files))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn health(State(state): State<Arc<AdminState>>) -> Json<HealthResponse> {
    let (node_id, role, leadership) = {
        let view = state.view.read().await;
        (view.self_id(), view.role(), view.leadership())
    };

    Json(HealthResponse {
        node_id,
        role,
        coordinator_id: leadership.coordinator_id,
        epoch: leadership.epoch,
        storage: state.storage.stats().await,
    })
}

async fn cluster(State(state): State<Arc<AdminState>>) -> Json<ClusterSnapshot> {
    Json(state.view.read().await.snapshot())
}

async fn files(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Vec<FileRecord>>> {
    {
        let view = state.view.read().await;
        if !view.is_coordinator() {
            return Err(ApiError::NotCoordinator(view.coordinator_id()));
        }
    }
    Ok(Json(state.replication.files().await))
}
