use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::config::StoreSettings;
use crate::ipc::IPCServer;

#[derive(Debug, Deserialize)]
pub struct StoreTestRequest {
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: u32,
}

/// POST /api/store/test - 단계별 연결 테스트
pub async fn test_connection(
    State(state): State<IPCServer>,
    Json(payload): Json<StoreTestRequest>,
) -> impl IntoResponse {
    match state
        .launcher
        .test_store_connection(&payload.address, &payload.password, payload.db)
        .await
    {
        Ok(report) => {
            let passed = report.summary.passed;
            (StatusCode::OK, Json(json!({"success": passed, "report": report}))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": e.to_string(), "error_code": "INVALID_INPUT"})),
        )
            .into_response(),
    }
}

/// GET /api/store/config - server/config.yaml 의 redis 설정
pub async fn get_settings(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.launcher.store_settings().await {
        Ok(settings) => (StatusCode::OK, Json(json!({"settings": settings}))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /api/store/config
pub async fn save_settings(
    State(state): State<IPCServer>,
    Json(settings): Json<StoreSettings>,
) -> impl IntoResponse {
    match state.launcher.save_store_settings(settings).await {
        Ok(stopped) => {
            (StatusCode::OK, Json(json!({"success": true, "services_stopped": stopped}))).into_response()
        }
        Err(e) => e.into_response(),
    }
}
