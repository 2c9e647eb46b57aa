//! Dependency state of the two halves of the project: Go modules for the
//! backend, `node_modules` for the frontend. Checking never downloads,
//! installing fills only what is missing, cleaning removes both caches.

pub mod cleaner;
pub mod encode;
pub mod manifest;
pub mod toolchain;
pub mod verifier;

use serde::Serialize;
use std::sync::Arc;

use crate::config::{Mirrors, ProjectLayout};
pub use cleaner::CacheCleanTally;
pub use manifest::DependencyDescriptor;
pub use toolchain::{CommandOutput, CommandRunner, GoToolchain, NpmToolchain, SystemCommandRunner, ToolchainError};

/// Module path of the stock gin-vue-admin backend, used when go.mod has no
/// readable `module` line.
pub const DEFAULT_MAIN_MODULE: &str = "github.com/flipped-aurora/gin-vue-admin/server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Ok,
    Partial,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub frontend: bool,
    pub backend: bool,
}

impl DependencyStatus {
    pub fn overall(&self) -> Overall {
        match (self.frontend, self.backend) {
            (true, true) => Overall::Ok,
            (false, false) => Overall::Missing,
            _ => Overall::Partial,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub frontend_installed: bool,
    pub backend_installed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    /// Per-module result of the Go cache clean
    pub modules: CacheCleanTally,
    pub frontend_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_error: Option<String>,
}

impl CleanReport {
    /// Module tally with the frontend directory counted as one more item.
    pub fn combined(&self) -> CacheCleanTally {
        let frontend_failed = self.frontend_error.is_some();
        CacheCleanTally {
            success: self.modules.success + usize::from(!frontend_failed),
            fail: self.modules.fail + usize::from(frontend_failed),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.backend_error.is_none() && self.frontend_error.is_none()
    }
}

#[derive(Clone)]
pub struct DependencyManager {
    go: GoToolchain,
    npm: NpmToolchain,
}

impl DependencyManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { go: GoToolchain::new(runner.clone()), npm: NpmToolchain::new(runner) }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemCommandRunner))
    }

    pub fn go(&self) -> &GoToolchain {
        &self.go
    }

    pub fn npm(&self) -> &NpmToolchain {
        &self.npm
    }

    /// go.mod and go.sum present and at least 90% of the required
    /// `module@version` directories in the module cache. Any environment
    /// problem reads as "not installed".
    pub async fn backend_installed(&self, project: &ProjectLayout) -> bool {
        if !project.go_mod().is_file() || !project.go_sum().is_file() {
            return false;
        }
        let Some(cache_root) = self.go.mod_cache_root().await else {
            return false;
        };
        let deps = match manifest::read_manifest(&project.go_mod()) {
            Ok(deps) => deps,
            Err(e) => {
                tracing::warn!("{}", e);
                return false;
            }
        };
        verifier::verify(&cache_root, &deps).await.2
    }

    /// package.json and node_modules present and `npm ls` clean.
    pub async fn frontend_installed(&self, project: &ProjectLayout) -> bool {
        if !project.package_json().is_file() || !project.node_modules().is_dir() {
            return false;
        }
        self.npm.dependencies_resolve(&project.web_dir()).await
    }

    pub async fn check(&self, project: &ProjectLayout) -> DependencyStatus {
        let (frontend, backend) = tokio::join!(self.frontend_installed(project), self.backend_installed(project));
        DependencyStatus { frontend, backend }
    }

    /// Install whichever side is missing; the two sides run concurrently and
    /// one failing does not stop the other.
    pub async fn install(&self, project: &ProjectLayout, mirrors: &Mirrors) -> InstallReport {
        let status = self.check(project).await;

        let frontend = async {
            if status.frontend {
                return Ok(false);
            }
            let web = project.web_dir();
            if let Some(url) = mirrors.npm_registry.as_deref().filter(|u| !u.trim().is_empty()) {
                self.npm.set_registry(&web, url.trim()).await?;
            }
            tracing::info!("Running npm install in {}", web.display());
            self.npm.install(&web).await.map(|_| true)
        };

        let backend = async {
            if status.backend {
                return Ok(false);
            }
            if let Some(url) = mirrors.goproxy.as_deref().filter(|u| !u.trim().is_empty()) {
                self.go.set_proxy(url.trim()).await?;
            }
            tracing::info!("Running go mod download in {}", project.server_dir().display());
            self.go.download(&project.server_dir()).await.map(|_| true)
        };

        let (frontend, backend): (Result<bool, ToolchainError>, Result<bool, ToolchainError>) =
            tokio::join!(frontend, backend);

        let mut report = InstallReport::default();
        match frontend {
            Ok(done) => report.frontend_installed = done,
            Err(e) => report.errors.push(format!("frontend: {}", e)),
        }
        match backend {
            Ok(done) => report.backend_installed = done,
            Err(e) => report.errors.push(format!("backend: {}", e)),
        }
        report
    }

    /// Main-module prefix excluded from cleaning.
    pub fn main_module(project: &ProjectLayout, configured: Option<&str>) -> String {
        if let Some(m) = configured.filter(|m| !m.is_empty()) {
            return m.to_string();
        }
        std::fs::read_to_string(project.go_mod())
            .ok()
            .and_then(|s| manifest::parse_module_path(&s))
            .unwrap_or_else(|| DEFAULT_MAIN_MODULE.to_string())
    }

    /// Delete every resolved module from the Go cache and `web/node_modules`,
    /// concurrently.
    pub async fn clean(&self, project: &ProjectLayout, main_module: &str) -> CleanReport {
        let backend = async {
            let cache_root = self
                .go
                .mod_cache_root()
                .await
                .ok_or_else(|| "could not resolve the Go module cache".to_string())?;
            let listing = self.go.list_modules(&project.server_dir()).await.map_err(|e| e.to_string())?;
            let modules = manifest::parse_module_list(&listing, Some(main_module));
            tracing::info!("Deleting {} cached modules", modules.len());
            Ok::<_, String>(cleaner::clean_modules_async(cache_root, modules).await)
        };
        let frontend = cleaner::clean_frontend_cache(project.node_modules());

        let (backend, frontend) = tokio::join!(backend, frontend);

        let mut report = CleanReport::default();
        match backend {
            Ok(tally) => report.modules = tally,
            Err(e) => report.backend_error = Some(e),
        }
        match frontend {
            Ok(removed) => report.frontend_removed = removed,
            Err(e) => report.frontend_error = Some(e.to_string()),
        }
        report
    }
}
