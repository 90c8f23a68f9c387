use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the controller. Every fallible operation across the
/// components ultimately converts into one of these.
#[derive(Error, Debug)]
pub enum PlzError {
    /// Malformed request or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Snapshot build failed; any log events already emitted are preserved
    /// by the caller before this is returned.
    #[error("build error: {0}")]
    Build(String),

    /// No instance could be acquired for an execution.
    #[error("acquisition error: {0}")]
    Acquisition(String),

    /// Lost a race to bind an instance that another acquisition just claimed.
    #[error("instance already assigned")]
    InstanceAssigned,

    /// Container runtime or cloud API failure during a bound execution.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Unknown execution, snapshot, instance, or user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stop requested against an execution whose instance was already
    /// released; treated as a success by callers, not surfaced as this
    /// variant in the HTTP layer, but kept distinct for logging.
    #[error("already stopped: {0}")]
    AlreadyStopped(String),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for PlzError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PlzError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            PlzError::Build(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            PlzError::Acquisition(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            PlzError::InstanceAssigned => {
                (StatusCode::CONFLICT, "instance already assigned".to_string())
            }
            PlzError::Runtime(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            PlzError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            PlzError::AlreadyStopped(_) => (StatusCode::NO_CONTENT, String::new()),
            PlzError::Docker(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            PlzError::Redis(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            PlzError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            PlzError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        let body = Json(json!({
            "error": true,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, PlzError>;
