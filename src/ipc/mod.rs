//! Local HTTP API for the launcher UI.
//!
//! All state lives in the [`Launcher`]; handlers are thin translations
//! between JSON and launcher calls.

pub mod handlers;

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::launcher::Launcher;
use handlers::{deps, project, services, store};

#[derive(Clone)]
pub struct IPCServer {
    pub launcher: Arc<Launcher>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(launcher: Arc<Launcher>, listen_addr: &str) -> Self {
        Self {
            launcher,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            // services
            .route("/api/services", get(services::list_services))
            .route("/api/services/start", post(services::start_all))
            .route("/api/services/stop", post(services::stop_all))
            .route("/api/service/:kind/start", post(services::start_one))
            .route("/api/service/:kind/stop", post(services::stop_one))
            .route("/api/service/:kind/port", put(services::change_port))
            .route("/api/service/:kind/console", get(services::console))
            .route("/api/monitor/pause", post(services::pause_monitor))
            .route("/api/monitor/resume", post(services::resume_monitor))
            .route("/api/port/:port", get(services::port_status))
            .route("/api/port/:port/kill", post(services::kill_port))
            // dependencies
            .route("/api/deps", get(deps::status))
            .route("/api/deps/installed", get(deps::installed))
            .route("/api/deps/install", post(deps::install))
            .route("/api/deps/clean", post(deps::clean))
            .route("/api/mirrors", get(deps::get_mirrors).put(deps::save_mirrors))
            // store
            .route("/api/store/test", post(store::test_connection))
            .route("/api/store/config", get(store::get_settings).put(store::save_settings))
            // project
            .route("/api/project", get(project::get_project).put(project::set_root))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}
