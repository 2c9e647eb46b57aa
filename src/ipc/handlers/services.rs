use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::parse_kind;
use crate::ipc::IPCServer;

const DEFAULT_CONSOLE_COUNT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct PortRequest {
    pub port: u32,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    pub since: Option<u64>,
    pub count: Option<usize>,
}

/// GET /api/services - 두 서비스 상태 + 모니터 상태
pub async fn list_services(State(state): State<IPCServer>) -> impl IntoResponse {
    let supervisor = state.launcher.supervisor();
    Json(json!({
        "services": state.launcher.services(),
        "monitor": {
            "running": supervisor.monitor_running(),
            "paused": supervisor.is_paused(),
        },
        "frontend_url": state.launcher.frontend_url().await,
    }))
}

/// POST /api/services/start - backend, then frontend. Readiness can take a
/// minute on a cold `go run`, so the work continues in the background and
/// progress is visible through GET /api/services.
pub async fn start_all(State(state): State<IPCServer>) -> impl IntoResponse {
    if let Err(e) = state.launcher.project().await {
        return crate::supervisor::SupervisorError::from(e).into_response();
    }
    let launcher = state.launcher.clone();
    tokio::spawn(async move {
        match launcher.start_services().await {
            Ok(results) => {
                for r in results.iter().filter(|r| !r.success) {
                    tracing::warn!("{} failed to start: {}", r.kind, r.error.as_deref().unwrap_or("unknown"));
                }
            }
            Err(e) => tracing::error!("Failed to start services: {}", e),
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"success": true, "accepted": true}))).into_response()
}

/// POST /api/services/stop - 두 서비스 동시 중지
pub async fn stop_all(State(state): State<IPCServer>) -> impl IntoResponse {
    let services = state.launcher.stop_services().await;
    Json(json!({"success": true, "services": services}))
}

/// POST /api/service/:kind/start - waits for readiness
pub async fn start_one(Path(kind): Path<String>, State(state): State<IPCServer>) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.launcher.start_service(kind).await {
        Ok(snapshot) => (StatusCode::OK, Json(json!({"success": true, "service": snapshot}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/service/:kind/stop
pub async fn stop_one(Path(kind): Path<String>, State(state): State<IPCServer>) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let snapshot = state.launcher.stop_service(kind).await;
    (StatusCode::OK, Json(json!({"success": true, "service": snapshot}))).into_response()
}

/// PUT /api/service/:kind/port - { "port": 9000 }
pub async fn change_port(
    Path(kind): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<PortRequest>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.launcher.change_port(kind, payload.port).await {
        Ok(change) => (StatusCode::OK, Json(json!({"success": true, "change": change}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/service/:kind/console?since=0&count=100
pub async fn console(
    Path(kind): Path<String>,
    State(state): State<IPCServer>,
    Query(query): Query<ConsoleQuery>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let lines = state
        .launcher
        .console(kind, query.since, query.count.unwrap_or(DEFAULT_CONSOLE_COUNT))
        .await;
    (StatusCode::OK, Json(json!({"lines": lines}))).into_response()
}

/// POST /api/monitor/pause
pub async fn pause_monitor(State(state): State<IPCServer>) -> impl IntoResponse {
    state.launcher.supervisor().pause_monitor();
    Json(json!({"success": true, "paused": true}))
}

/// POST /api/monitor/resume
pub async fn resume_monitor(State(state): State<IPCServer>) -> impl IntoResponse {
    state.launcher.supervisor().resume_monitor();
    Json(json!({"success": true, "paused": false}))
}

/// GET /api/port/:port - 포트 점유 여부
pub async fn port_status(Path(port): Path<u32>, State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.is_port_occupied(port).await {
        Ok(occupied) => (StatusCode::OK, Json(json!({"port": port, "occupied": occupied}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/port/:port/kill - 포트를 점유한 프로세스 종료
pub async fn kill_port(Path(port): Path<u32>, State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.kill_by_port(port).await {
        Ok(killed) => (StatusCode::OK, Json(json!({"success": true, "port": port, "killed": killed}))).into_response(),
        Err(e) => e.into_response(),
    }
}
