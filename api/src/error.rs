use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use consensus::NodeId;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not coordinator: current coordinator is {0:?}")]
    NotCoordinator(Option<NodeId>),

    #[error("No storage node acknowledged the write of {0}")]
    ZeroReplicas(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No replica of {0} could be read")]
    ReplicasUnavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] network::NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotCoordinator(_) => (StatusCode::CONFLICT, "NotCoordinator"),
            ApiError::ZeroReplicas(_) => (StatusCode::SERVICE_UNAVAILABLE, "ZeroReplicas"),
            ApiError::FileNotFound(_) => (StatusCode::NOT_FOUND, "FileNotFound"),
            ApiError::ReplicasUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ReplicasUnavailable")
            }
            ApiError::Network(_) => (StatusCode::BAD_GATEWAY, "NetworkError"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StorageError"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
