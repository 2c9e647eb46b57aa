pub mod deps;
pub mod project;
pub mod services;
pub mod store;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::supervisor::ServiceKind;

/// `:kind` path segment, or a 404 response naming the unknown service.
pub(crate) fn parse_kind(raw: &str) -> Result<ServiceKind, axum::response::Response> {
    raw.parse::<ServiceKind>().map_err(|e| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": e, "error_code": "UNKNOWN_SERVICE"})),
        )
            .into_response()
    })
}
