use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gva_launcher::config::LauncherConfig;
use gva_launcher::ipc::IPCServer;
use gva_launcher::Launcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gva_launcher=info")))
        .init();
    tracing::info!("gva-launcher starting");

    let config_path = LauncherConfig::default_path();
    let config = LauncherConfig::load(&config_path);
    match &config.project_root {
        Some(root) => tracing::info!("Project root: {}", root.display()),
        None => tracing::warn!("Project root is not set; set it through PUT /api/project"),
    }
    let listen_addr = config.ipc_listen.clone();

    let launcher = Arc::new(Launcher::system(config, config_path));
    // 외부에서 이미 떠 있는 dev 서버도 바로 반영되도록 모니터 먼저 시작
    launcher.supervisor().start_monitor();

    let ipc_server = IPCServer::new(launcher.clone(), &listen_addr);

    // Graceful shutdown: Ctrl+C 시 모니터 정리. dev 서버는 그대로 둔다
    let shutdown_launcher = launcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, cleaning up...");
        shutdown_launcher.shutdown().await;
        tracing::info!("Cleanup complete, exiting");
        std::process::exit(0);
    });

    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    launcher.shutdown().await;
    tracing::info!("gva-launcher shutting down");
    Ok(())
}
