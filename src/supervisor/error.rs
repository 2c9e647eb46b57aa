//! Errors surfaced by supervisor operations. The IPC layer turns them into
//! HTTP responses, so each variant carries a status and a stable code.

use axum::http::StatusCode;

use crate::config::ConfigError;
use crate::supervisor::process::ProcessError;

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("{0} service is already running")]
    AlreadyRunning(String),

    #[error("{0} service has no configured port")]
    PortNotConfigured(String),

    #[error("Invalid port: {0} (valid range 1-65535)")]
    InvalidPort(u32),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRunning(_) => StatusCode::CONFLICT,
            Self::PortNotConfigured(_) => StatusCode::CONFLICT,
            Self::InvalidPort(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Config(ConfigError::ProjectRootNotSet) => StatusCode::PRECONDITION_FAILED,
            Self::Config(ConfigError::Invalid(_)) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SpawnFailed(_) | Self::Process(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::PortNotConfigured(_) => "PORT_NOT_CONFIGURED",
            Self::InvalidPort(_) => "INVALID_PORT",
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Config(ConfigError::ProjectRootNotSet) => "PROJECT_ROOT_NOT_SET",
            Self::Config(ConfigError::Invalid(_)) => "INVALID_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Process(_) => "PROCESS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, axum::Json(self.to_json())).into_response()
    }
}
