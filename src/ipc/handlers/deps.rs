use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::config::Mirrors;
use crate::ipc::IPCServer;

/// GET /api/deps - frontend/backend 설치 여부
pub async fn status(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.check_dependencies().await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "frontend": status.frontend,
                "backend": status.backend,
                "overall": status.overall(),
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/deps/installed - backend module cache verdict only
pub async fn installed(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({"installed": state.launcher.check_dependencies_installed().await}))
}

/// POST /api/deps/install - 누락된 쪽만 설치
pub async fn install(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.install_dependencies().await {
        Ok(report) => {
            let success = report.errors.is_empty();
            (StatusCode::OK, Json(json!({"success": success, "report": report}))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /api/deps/clean - 서비스 중지 후 캐시 삭제
pub async fn clean(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.clean_caches().await {
        Ok(report) => {
            let tally = report.combined();
            (
                StatusCode::OK,
                Json(json!({
                    "success": tally.fail == 0,
                    "succeeded": tally.success,
                    "failed": tally.fail,
                    "report": report,
                })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/mirrors - saved mirrors and what the toolchains currently use
pub async fn get_mirrors(State(state): State<IPCServer>) -> impl IntoResponse {
    let saved = state.launcher.config().await.mirrors;
    let active = state.launcher.toolchain_mirrors().await.ok();
    Json(json!({"saved": saved, "active": active}))
}

/// PUT /api/mirrors
pub async fn save_mirrors(State(state): State<IPCServer>, Json(mirrors): Json<Mirrors>) -> impl IntoResponse {
    match state.launcher.set_mirrors(mirrors).await {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Err(e) => e.into_response(),
    }
}
