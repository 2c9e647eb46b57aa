//! End-to-end flows through the public `Launcher` API with fake toolchains
//! and a fake port killer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gva_launcher::config::{npm_program, LauncherConfig};
use gva_launcher::deps::{CommandOutput, CommandRunner, DependencyManager, ToolchainError};
use gva_launcher::supervisor::{PortKiller, ProcessError, ServiceKind, ServiceState};
use gva_launcher::Launcher;

/// Answers `go env GOMODCACHE`, `go list -m all` and `npm ls` from fixed text.
struct FakeToolchains {
    replies: HashMap<String, CommandOutput>,
}

impl FakeToolchains {
    fn new(cache_root: &Path, module_list: &str) -> Self {
        let ok = |stdout: &str| CommandOutput { success: true, stdout: stdout.to_string(), stderr: String::new() };
        let mut replies = HashMap::new();
        replies.insert("go env GOMODCACHE".to_string(), ok(&format!("{}\n", cache_root.display())));
        replies.insert("go list -m all".to_string(), ok(module_list));
        replies.insert(format!("{} ls --depth=0", npm_program()), ok(""));
        Self { replies }
    }
}

#[async_trait]
impl CommandRunner for FakeToolchains {
    async fn run(&self, program: &str, args: &[String], _cwd: Option<&Path>) -> Result<CommandOutput, ToolchainError> {
        let key = format!("{} {}", program, args.join(" "));
        self.replies.get(&key).cloned().ok_or_else(|| ToolchainError::Spawn {
            program: program.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
        })
    }
}

/// Holds listeners on behalf of "some other process"; asking for the owners
/// of a port closes it.
#[derive(Default)]
struct ListenerKiller {
    listeners: Mutex<HashMap<u16, TcpListener>>,
    terminated: Mutex<Vec<u32>>,
}

impl ListenerKiller {
    fn hold(&self) -> u16 {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        self.listeners.lock().unwrap().insert(port, listener);
        port
    }
}

impl PortKiller for ListenerKiller {
    fn find_owners(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        self.listeners.lock().unwrap().remove(&port);
        Ok(Vec::new())
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        self.terminated.lock().unwrap().push(pid);
        let _ = std::process::Command::new("kill").args(["-9", &pid.to_string()]).status();
        Ok(())
    }
}

fn write_project(root: &Path, backend_port: u16, frontend_port: u16) {
    std::fs::create_dir_all(root.join("server")).unwrap();
    std::fs::create_dir_all(root.join("web/node_modules/vue")).unwrap();
    std::fs::write(
        root.join("server/config.yaml"),
        format!("system:\n  addr: {}\n  use-redis: false\nredis:\n  addr: 127.0.0.1:6379\n  password: ''\n  db: 0\n", backend_port),
    )
    .unwrap();
    std::fs::write(root.join("server/go.mod"), GO_MOD).unwrap();
    std::fs::write(root.join("server/go.sum"), "").unwrap();
    std::fs::write(root.join("web/package.json"), r#"{"name":"gva-web","scripts":{"serve":"vite"}}"#).unwrap();
    std::fs::write(
        root.join("web/.env.development"),
        format!("VITE_CLI_PORT={}\nVITE_SERVER_PORT={}\n", frontend_port, backend_port),
    )
    .unwrap();
}

const GO_MOD: &str = "\
module github.com/flipped-aurora/gin-vue-admin/server

go 1.22

require (
\tgithub.com/BurntSushi/toml v1.3.2
\tgolang.org/x/text v0.14.0 // indirect
)
";

const MODULE_LIST: &str = "\
github.com/flipped-aurora/gin-vue-admin/server
github.com/BurntSushi/toml v1.3.2
golang.org/x/text v0.14.0
";

fn cached_module_dirs(cache: &Path) -> Vec<PathBuf> {
    vec![cache.join("github.com/!burnt!sushi/toml@v1.3.2"), cache.join("golang.org/x/text@v0.14.0")]
}

#[tokio::test]
async fn test_dependency_check_then_clean() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("gva");
    let cache = dir.path().join("gomodcache");
    write_project(&root, 8888, 8080);
    for d in cached_module_dirs(&cache) {
        std::fs::create_dir_all(d.join("src")).unwrap();
    }

    let mut config = LauncherConfig::default();
    config.project_root = Some(root.clone());
    let deps = DependencyManager::new(Arc::new(FakeToolchains::new(&cache, MODULE_LIST)));
    let launcher = Launcher::new(config, dir.path().join("launcher.toml"), Arc::new(ListenerKiller::default()), deps);

    let status = launcher.check_dependencies().await.unwrap();
    assert!(status.frontend);
    assert!(status.backend);
    assert!(launcher.check_dependencies_installed().await);

    let report = launcher.clean_caches().await.unwrap();
    assert_eq!(report.modules.success, 2);
    assert_eq!(report.modules.fail, 0);
    assert!(report.frontend_removed);
    assert!(report.is_clean());
    assert_eq!(report.combined().success, 3);

    for d in cached_module_dirs(&cache) {
        assert!(!d.exists(), "{} should be gone", d.display());
    }
    assert!(!root.join("web/node_modules").exists());
    assert!(!launcher.check_dependencies_installed().await);

    // 두 번째 청소: 이미 없는 경로도 성공으로 집계
    let report = launcher.clean_caches().await.unwrap();
    assert_eq!(report.modules.success, 2);
    assert!(!report.frontend_removed);
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_and_stop_both_services() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("gva");
    let killer = Arc::new(ListenerKiller::default());
    let backend_port = killer.hold();
    let frontend_port = killer.hold();
    write_project(&root, backend_port, frontend_port);

    let mut config = LauncherConfig::default();
    config.project_root = Some(root.clone());
    config.backend.program = "sh".into();
    config.backend.args = vec!["-c".into(), "sleep 30".into()];
    config.frontend = config.backend.clone();
    config.timings.backend_settle_ms = 10;
    config.timings.frontend_settle_ms = 10;
    config.timings.start_stagger_ms = 50;
    config.timings.stop_grace_ms = 50;
    config.timings.readiness_poll_ms = 20;
    config.timings.readiness_timeout_ms = 3_000;

    let deps = DependencyManager::new(Arc::new(FakeToolchains::new(dir.path(), "")));
    let launcher = Launcher::new(config, dir.path().join("launcher.toml"), killer.clone(), deps);

    let results = launcher.start_services().await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success), "{:?}", results);
    assert_eq!(results[0].kind, ServiceKind::Backend);
    assert_eq!(results[0].snapshot.port, backend_port);
    assert!(results.iter().all(|r| r.snapshot.owned));
    assert!(launcher.supervisor().monitor_running());

    let snaps = launcher.stop_services().await;
    for snap in &snaps {
        assert_eq!(snap.state, ServiceState::Stopped, "{:?}", snap);
        assert!(!snap.port_busy);
    }
    assert_eq!(killer.terminated.lock().unwrap().len(), 2);
    assert!(killer.listeners.lock().unwrap().is_empty());

    launcher.shutdown().await;
    assert!(!launcher.supervisor().monitor_running());
}

#[tokio::test]
async fn test_store_settings_persist_in_server_config() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("gva");
    write_project(&root, 8888, 8080);

    let mut config = LauncherConfig::default();
    config.project_root = Some(root.clone());
    let deps = DependencyManager::new(Arc::new(FakeToolchains::new(dir.path(), "")));
    let launcher = Launcher::new(config, dir.path().join("launcher.toml"), Arc::new(ListenerKiller::default()), deps);

    let mut settings = launcher.store_settings().await.unwrap();
    assert!(!settings.enabled);
    settings.enabled = true;
    settings.password = "s3cret".into();
    settings.db = 7;
    launcher.save_store_settings(settings).await.unwrap();

    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(root.join("server/config.yaml")).unwrap()).unwrap();
    assert_eq!(yaml["system"]["use-redis"], serde_yaml::Value::Bool(true));
    assert_eq!(yaml["redis"]["db"].as_u64(), Some(7));
    assert_eq!(yaml["redis"]["password"].as_str(), Some("s3cret"));
    // 포트 등 다른 키는 유지
    assert_eq!(yaml["system"]["addr"].as_u64(), Some(8888));
}
