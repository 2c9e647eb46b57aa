//! Launcher settings (`launcher.toml`) and the project-side files we edit.

pub mod project;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use project::{ProjectLayout, StoreSettings};

pub const DEFAULT_CONFIG_FILE: &str = "launcher.toml";
pub const DEFAULT_IPC_LISTEN: &str = "127.0.0.1:57475";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Project root is not set")]
    ProjectRootNotSet,

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }

    pub(crate) fn parse(path: &Path, reason: impl ToString) -> Self {
        Self::Parse { path: path.display().to_string(), reason: reason.to_string() }
    }
}

/// How to launch one dev server, relative to its project subdirectory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn default_backend() -> Self {
        Self { program: "go".into(), args: vec!["run".into(), "main.go".into()] }
    }

    pub fn default_frontend() -> Self {
        Self { program: npm_program().into(), args: vec!["run".into(), "serve".into()] }
    }
}

pub fn npm_program() -> &'static str {
    if cfg!(target_os = "windows") { "npm.cmd" } else { "npm" }
}

/// Delays and cadences, in milliseconds so the toml stays flat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timings {
    pub backend_settle_ms: u64,
    pub frontend_settle_ms: u64,
    pub start_stagger_ms: u64,
    pub stop_grace_ms: u64,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub monitor_fast_ms: u64,
    pub monitor_window_ms: u64,
    pub monitor_slow_ms: u64,
    pub reload_settle_ms: u64,
    pub reload_kill_grace_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            backend_settle_ms: 1_000,
            frontend_settle_ms: 2_000,
            start_stagger_ms: 2_000,
            stop_grace_ms: 500,
            // `go run` compiles first; a cold build easily takes a minute
            readiness_timeout_ms: 90_000,
            readiness_poll_ms: 500,
            monitor_fast_ms: 1_000,
            monitor_window_ms: 30_000,
            monitor_slow_ms: 5_000,
            reload_settle_ms: 4_000,
            reload_kill_grace_ms: 1_000,
        }
    }
}

impl Timings {
    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mirrors {
    /// npm registry used by `npm install`; empty means leave npm's setting alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npm_registry: Option<String>,
    /// GOPROXY used by `go mod download`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goproxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LauncherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    #[serde(default = "default_ipc_listen")]
    pub ipc_listen: String,
    /// Module path prefix of the project's own backend module, excluded from
    /// cache cleaning. Derived from `server/go.mod` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_module: Option<String>,
    #[serde(default = "LaunchCommand::default_backend")]
    pub backend: LaunchCommand,
    #[serde(default = "LaunchCommand::default_frontend")]
    pub frontend: LaunchCommand,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub mirrors: Mirrors,
}

fn default_ipc_listen() -> String {
    DEFAULT_IPC_LISTEN.to_string()
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            ipc_listen: default_ipc_listen(),
            main_module: None,
            backend: LaunchCommand::default_backend(),
            frontend: LaunchCommand::default_frontend(),
            timings: Timings::default(),
            mirrors: Mirrors::default(),
        }
    }
}

impl LauncherConfig {
    /// Config file location: `GVA_LAUNCHER_CONFIG`, else `launcher.toml`
    /// next to the executable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("GVA_LAUNCHER_CONFIG") {
            return PathBuf::from(path);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    /// Load settings. A missing or unreadable file yields defaults, which are
    /// written back so the user has something to edit. `GVA_ROOT` overrides
    /// the stored project root.
    pub fn load(path: &Path) -> Self {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Self>(&s) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("Invalid {} ({}), using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                let cfg = Self::default();
                if let Err(e) = cfg.save(path) {
                    tracing::warn!("Could not write default config: {}", e);
                }
                cfg
            }
        };

        if let Ok(root) = std::env::var("GVA_ROOT") {
            if !root.trim().is_empty() {
                cfg.project_root = Some(PathBuf::from(root));
            }
        }
        cfg
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let s = toml::to_string_pretty(self).map_err(|e| ConfigError::parse(path, e))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
            }
        }
        std::fs::write(path, s).map_err(|e| ConfigError::io(path, e))
    }

    /// Project layout, or the one fatal condition of the launcher.
    pub fn project(&self) -> Result<ProjectLayout, ConfigError> {
        match &self.project_root {
            Some(root) if !root.as_os_str().is_empty() => Ok(ProjectLayout::new(root.clone())),
            _ => Err(ConfigError::ProjectRootNotSet),
        }
    }
}
