use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use crate::ipc::IPCServer;

#[derive(Debug, Deserialize)]
pub struct ProjectRootRequest {
    pub root: PathBuf,
}

/// GET /api/project
pub async fn get_project(State(state): State<IPCServer>) -> impl IntoResponse {
    let config = state.launcher.config().await;
    Json(json!({
        "root": config.project_root,
        "main_module": config.main_module,
    }))
}

/// PUT /api/project - { "root": "/path/to/gin-vue-admin" }
pub async fn set_root(
    State(state): State<IPCServer>,
    Json(payload): Json<ProjectRootRequest>,
) -> impl IntoResponse {
    match state.launcher.set_project_root(payload.root).await {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true, "services": state.launcher.services()}))).into_response(),
        Err(e) => e.into_response(),
    }
}
