//! The launcher facade: one object the IPC layer (or any other front end)
//! talks to. It owns the settings, the supervisor, and the toolchains, and
//! turns "what the user asked for" into supervisor and filesystem calls.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ConfigError, LauncherConfig, Mirrors, ProjectLayout, StoreSettings, Timings};
use crate::deps::{CleanReport, DependencyManager, DependencyStatus, InstallReport};
use crate::port::{is_port_occupied_async, is_valid_port, local_ip};
use crate::protocol::{self, HealthCheckError, HealthReport};
use crate::supervisor::{
    system_killer, LaunchSpec, LogLine, PortKiller, ServiceKind, ServiceSnapshot, ServiceState, StartResult,
    Supervisor, SupervisorError,
};

#[derive(Debug, Clone, Serialize)]
pub struct PortChange {
    pub kind: ServiceKind,
    pub old_port: u16,
    pub new_port: u16,
    /// Services were running and have been stopped; the user restarts them.
    pub services_stopped: bool,
}

pub struct Launcher {
    config: RwLock<LauncherConfig>,
    config_path: PathBuf,
    supervisor: Supervisor,
    deps: DependencyManager,
}

/// Ports as currently written in the project; 0 where unknown.
fn project_ports(config: &LauncherConfig) -> (u16, u16) {
    let Ok(project) = config.project() else {
        return (0, 0);
    };
    match project.backend_port() {
        Ok(backend) => (backend.unwrap_or(0), project.frontend_port()),
        Err(e) => {
            // wrong directory picked, most likely
            tracing::warn!("Cannot read backend config: {}", e);
            (0, 0)
        }
    }
}

impl Launcher {
    pub fn new(
        config: LauncherConfig,
        config_path: PathBuf,
        killer: Arc<dyn PortKiller>,
        deps: DependencyManager,
    ) -> Self {
        let (backend, frontend) = project_ports(&config);
        let supervisor = Supervisor::new(killer, config.timings.clone(), backend, frontend);
        Self { config: RwLock::new(config), config_path, supervisor, deps }
    }

    /// Real process killer and real toolchains.
    pub fn system(config: LauncherConfig, config_path: PathBuf) -> Self {
        Self::new(config, config_path, system_killer(), DependencyManager::system())
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn config(&self) -> LauncherConfig {
        self.config.read().await.clone()
    }

    pub async fn project(&self) -> Result<ProjectLayout, ConfigError> {
        self.config.read().await.project()
    }

    async fn timings(&self) -> Timings {
        self.config.read().await.timings.clone()
    }

    pub async fn set_project_root(&self, root: PathBuf) -> Result<(), SupervisorError> {
        if !root.is_dir() {
            return Err(SupervisorError::InvalidInput(format!("{} is not a directory", root.display())));
        }
        {
            let mut cfg = self.config.write().await;
            cfg.project_root = Some(root.clone());
            cfg.save(&self.config_path)?;
        }
        tracing::info!("Project root set to {}", root.display());
        self.reload_ports().await;
        Ok(())
    }

    pub async fn set_mirrors(&self, mirrors: Mirrors) -> Result<(), SupervisorError> {
        let mut cfg = self.config.write().await;
        cfg.mirrors = mirrors;
        cfg.save(&self.config_path)?;
        Ok(())
    }

    /// Mirrors the toolchains currently use (`npm config get registry`,
    /// `go env GOPROXY`), not the ones saved in our settings.
    pub async fn toolchain_mirrors(&self) -> Result<Mirrors, SupervisorError> {
        let project = self.project().await?;
        let web = project.web_dir();
        let (npm_registry, goproxy) = tokio::join!(self.deps.npm().registry(&web), self.deps.go().proxy());
        Ok(Mirrors { npm_registry, goproxy })
    }

    /// Re-read both ports from the project files. Services that are not idle
    /// keep the port they were started on.
    pub async fn reload_ports(&self) {
        let (backend, frontend) = project_ports(&*self.config.read().await);
        for (kind, port) in [(ServiceKind::Backend, backend), (ServiceKind::Frontend, frontend)] {
            let state = self.supervisor.snapshot(kind).state;
            if matches!(state, ServiceState::Stopped | ServiceState::FailedToStart) {
                self.supervisor.set_port(kind, port);
            }
        }
    }

    pub fn services(&self) -> Vec<ServiceSnapshot> {
        self.supervisor.snapshots()
    }

    async fn launch_spec(&self, kind: ServiceKind) -> Result<LaunchSpec, ConfigError> {
        let cfg = self.config.read().await;
        let project = cfg.project()?;
        let (command, dir) = match kind {
            ServiceKind::Backend => (&cfg.backend, project.server_dir()),
            ServiceKind::Frontend => (&cfg.frontend, project.web_dir()),
        };
        Ok(LaunchSpec { program: command.program.clone(), args: command.args.clone(), working_dir: dir })
    }

    pub async fn start_services(&self) -> Result<Vec<StartResult>, SupervisorError> {
        let backend = self.launch_spec(ServiceKind::Backend).await?;
        let frontend = self.launch_spec(ServiceKind::Frontend).await?;
        self.reload_ports().await;
        Ok(self.supervisor.start_services(backend, frontend).await)
    }

    pub async fn start_service(&self, kind: ServiceKind) -> Result<ServiceSnapshot, SupervisorError> {
        let launch = self.launch_spec(kind).await?;
        self.reload_ports().await;
        self.supervisor.start_monitor();
        self.supervisor.start_service(kind, launch).await
    }

    pub async fn stop_services(&self) -> Vec<ServiceSnapshot> {
        self.supervisor.stop_services().await
    }

    pub async fn stop_service(&self, kind: ServiceKind) -> ServiceSnapshot {
        self.supervisor.stop_service(kind).await
    }

    pub async fn console(&self, kind: ServiceKind, since: Option<u64>, count: usize) -> Vec<LogLine> {
        self.supervisor.console(kind, since, count).await
    }

    fn any_active(&self) -> bool {
        self.supervisor
            .snapshots()
            .iter()
            .any(|s| matches!(s.state, ServiceState::Starting | ServiceState::Running))
    }

    /// Write a new port for one service. Running services are stopped first
    /// (both of them) and not restarted.
    ///
    /// A frontend port change makes the dev server hot-reload onto the new
    /// port, so the monitor is paused while that settles and whatever came
    /// up on the new port is killed before it resumes.
    pub async fn change_port(&self, kind: ServiceKind, port: u32) -> Result<PortChange, SupervisorError> {
        if !is_valid_port(port) {
            return Err(SupervisorError::InvalidPort(port));
        }
        let port = port as u16;
        let project = self.project().await?;
        let old_port = self.supervisor.port(kind);

        let was_running = self.any_active();
        if was_running {
            tracing::info!("Stopping services before changing the {} port", kind);
            self.supervisor.stop_services().await;
        }

        match kind {
            ServiceKind::Backend => {
                project.write_backend_port(port)?;
                self.supervisor.set_port(kind, port);
            }
            ServiceKind::Frontend => {
                self.supervisor.pause_monitor();
                if let Err(e) = project.write_frontend_port(port) {
                    self.supervisor.resume_monitor();
                    return Err(e.into());
                }
                self.supervisor.set_port(kind, port);

                if was_running {
                    let supervisor = self.supervisor.clone();
                    let timings = self.timings().await;
                    tokio::spawn(async move {
                        tokio::time::sleep(Timings::ms(timings.reload_settle_ms)).await;
                        if let Err(e) = supervisor.kill_by_port(port).await {
                            tracing::warn!("{}", e);
                        }
                        tokio::time::sleep(Timings::ms(timings.reload_kill_grace_ms)).await;
                        supervisor.resume_monitor();
                    });
                } else {
                    self.supervisor.resume_monitor();
                }
            }
        }

        tracing::info!("{} port changed {} -> {}", kind, old_port, port);
        Ok(PortChange { kind, old_port, new_port: port, services_stopped: was_running })
    }

    pub async fn is_port_occupied(&self, port: u32) -> Result<bool, SupervisorError> {
        if !is_valid_port(port) {
            return Err(SupervisorError::InvalidPort(port));
        }
        Ok(is_port_occupied_async(port as u16).await)
    }

    pub async fn kill_by_port(&self, port: u32) -> Result<usize, SupervisorError> {
        if !is_valid_port(port) {
            return Err(SupervisorError::InvalidPort(port));
        }
        Ok(self.supervisor.kill_by_port(port as u16).await?)
    }

    /// Backend module cache verdict. Anything that prevents a verdict
    /// (root unset, go missing, unreadable go.mod) reads as `false`.
    pub async fn check_dependencies_installed(&self) -> bool {
        match self.project().await {
            Ok(project) => self.deps.backend_installed(&project).await,
            Err(_) => false,
        }
    }

    pub async fn check_dependencies(&self) -> Result<DependencyStatus, SupervisorError> {
        let project = self.project().await?;
        Ok(self.deps.check(&project).await)
    }

    pub async fn install_dependencies(&self) -> Result<InstallReport, SupervisorError> {
        let project = self.project().await?;
        let mirrors = self.config.read().await.mirrors.clone();
        Ok(self.deps.install(&project, &mirrors).await)
    }

    /// Stop anything running, then delete the module cache entries and
    /// `web/node_modules`.
    pub async fn clean_caches(&self) -> Result<CleanReport, SupervisorError> {
        let project = self.project().await?;
        if self.any_active() {
            self.supervisor.stop_services().await;
        }
        let configured = self.config.read().await.main_module.clone();
        let main_module = DependencyManager::main_module(&project, configured.as_deref());
        Ok(self.deps.clean(&project, &main_module).await)
    }

    pub async fn test_store_connection(
        &self,
        address: &str,
        credential: &str,
        db: u32,
    ) -> Result<HealthReport, HealthCheckError> {
        protocol::test_store_connection(address, credential, db).await
    }

    pub async fn store_settings(&self) -> Result<StoreSettings, SupervisorError> {
        Ok(self.project().await?.store_settings()?)
    }

    /// Persist store settings. Returns whether running services had to be
    /// stopped for it.
    pub async fn save_store_settings(&self, settings: StoreSettings) -> Result<bool, SupervisorError> {
        settings.validate()?;
        let project = self.project().await?;
        let was_running = self.any_active();
        if was_running {
            self.supervisor.stop_services().await;
        }
        project.write_store_settings(&settings)?;
        tracing::info!("Store settings saved (enabled = {})", settings.enabled);
        Ok(was_running)
    }

    /// `http://<lan-ip>:<frontend port>`, when a root and port are known.
    pub async fn frontend_url(&self) -> Option<String> {
        self.project().await.ok()?;
        let port = self.supervisor.port(ServiceKind::Frontend);
        (port > 0).then(|| format!("http://{}:{}", local_ip(), port))
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ProcessError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NoopKiller {
        ports: Mutex<Vec<u16>>,
    }

    impl PortKiller for NoopKiller {
        fn find_owners(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
            self.ports.lock().unwrap().push(port);
            Ok(Vec::new())
        }

        fn terminate(&self, _pid: u32) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    fn write_project(root: &std::path::Path) {
        std::fs::create_dir_all(root.join("server")).unwrap();
        std::fs::create_dir_all(root.join("web")).unwrap();
        std::fs::write(
            root.join("server/config.yaml"),
            "system:\n  addr: 8888\n  use-redis: false\nredis:\n  addr: 127.0.0.1:6379\n  password: ''\n  db: 0\n",
        )
        .unwrap();
        std::fs::write(root.join("web/.env.development"), "ENV = 'development'\nVITE_CLI_PORT=8080\nVITE_SERVER_PORT=8888\n")
            .unwrap();
    }

    fn launcher(root: Option<PathBuf>, dir: &std::path::Path) -> (Launcher, Arc<NoopKiller>) {
        let mut config = LauncherConfig::default();
        config.project_root = root;
        config.timings.stop_grace_ms = 10;
        let killer = Arc::new(NoopKiller::default());
        let deps = DependencyManager::new(Arc::new(crate::deps::toolchain::testing::ScriptedRunner::new()));
        (Launcher::new(config, dir.join("launcher.toml"), killer.clone(), deps), killer)
    }

    #[tokio::test]
    async fn test_ports_come_from_project_files() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, _) = launcher(Some(dir.path().into()), dir.path());
        let snaps = launcher.services();
        assert_eq!(snaps[0].port, 8888);
        assert_eq!(snaps[1].port, 8080);
    }

    #[tokio::test]
    async fn test_missing_root_blocks_operations() {
        let dir = tempfile::tempdir().unwrap();
        let (launcher, _) = launcher(None, dir.path());
        assert!(matches!(
            launcher.start_services().await,
            Err(SupervisorError::Config(ConfigError::ProjectRootNotSet))
        ));
        assert!(matches!(launcher.clean_caches().await, Err(SupervisorError::Config(ConfigError::ProjectRootNotSet))));
        assert!(!launcher.check_dependencies_installed().await);
        assert_eq!(launcher.frontend_url().await, None);
        assert!(launcher.services().iter().all(|s| s.port == 0));
    }

    #[tokio::test]
    async fn test_change_backend_port_rewrites_files() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, _) = launcher(Some(dir.path().into()), dir.path());

        let change = launcher.change_port(ServiceKind::Backend, 9999).await.unwrap();
        assert_eq!(change.old_port, 8888);
        assert_eq!(change.new_port, 9999);
        assert!(!change.services_stopped);
        assert_eq!(launcher.supervisor().port(ServiceKind::Backend), 9999);

        let project = ProjectLayout::new(dir.path());
        assert_eq!(project.backend_port().unwrap(), Some(9999));
        let env = std::fs::read_to_string(project.env_development()).unwrap();
        assert!(env.contains("VITE_SERVER_PORT=9999"));
    }

    #[tokio::test]
    async fn test_change_frontend_port_when_idle_resumes_monitor() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, killer) = launcher(Some(dir.path().into()), dir.path());

        launcher.change_port(ServiceKind::Frontend, 3000).await.unwrap();
        assert!(!launcher.supervisor().is_paused());
        assert!(killer.ports.lock().unwrap().is_empty());
        assert_eq!(ProjectLayout::new(dir.path()).frontend_port(), 3000);
    }

    #[tokio::test]
    async fn test_change_port_validation() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, _) = launcher(Some(dir.path().into()), dir.path());
        assert!(matches!(
            launcher.change_port(ServiceKind::Backend, 0).await,
            Err(SupervisorError::InvalidPort(0))
        ));
        assert!(matches!(
            launcher.change_port(ServiceKind::Frontend, 70_000).await,
            Err(SupervisorError::InvalidPort(70_000))
        ));
        assert!(matches!(launcher.kill_by_port(0).await, Err(SupervisorError::InvalidPort(0))));
    }

    #[tokio::test]
    async fn test_store_settings_round_trip_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, _) = launcher(Some(dir.path().into()), dir.path());

        let mut settings = launcher.store_settings().await.unwrap();
        assert_eq!(settings.addr, "127.0.0.1:6379");
        settings.enabled = true;
        settings.db = 4;
        assert!(!launcher.save_store_settings(settings.clone()).await.unwrap());
        assert_eq!(launcher.store_settings().await.unwrap(), settings);

        settings.db = 16;
        assert!(launcher.save_store_settings(settings).await.is_err());
    }

    #[tokio::test]
    async fn test_frontend_url_uses_frontend_port() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (launcher, _) = launcher(Some(dir.path().into()), dir.path());
        let url = launcher.frontend_url().await.unwrap();
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":8080"));
    }

    #[tokio::test]
    async fn test_set_project_root_saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gva");
        write_project(&root);
        let (launcher, _) = launcher(None, dir.path());

        assert!(launcher.set_project_root(dir.path().join("missing")).await.is_err());
        launcher.set_project_root(root.clone()).await.unwrap();
        assert_eq!(launcher.supervisor().port(ServiceKind::Backend), 8888);

        let saved = std::fs::read_to_string(dir.path().join("launcher.toml")).unwrap();
        let saved: LauncherConfig = toml::from_str(&saved).unwrap();
        assert_eq!(saved.project_root, Some(root));
    }
}
