//! External toolchains (`go`, `npm`) behind a small command-runner seam.
//!
//! Everything here is "run and capture"; interpreting the output is the
//! caller's job. Tests substitute a scripted runner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::npm_program;
use crate::utils::hidden_async_command;

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed: {output}")]
    Failed { command: String, output: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr joined, for error reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs a program to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput, ToolchainError>;
}

/// Spawns real processes (no console window on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput, ToolchainError> {
        let mut cmd = hidden_async_command(program);
        cmd.args(args).stdin(std::process::Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        tracing::debug!("Running {} {}", program, args.join(" "));
        let output = cmd
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn { program: program.to_string(), source })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CommandOutput, ToolchainError> {
    let output = runner.run(program, args, cwd).await?;
    if output.success {
        Ok(output)
    } else {
        Err(ToolchainError::Failed {
            command: format!("{} {}", program, args.join(" ")),
            output: output.combined(),
        })
    }
}

#[derive(Clone)]
pub struct GoToolchain {
    runner: Arc<dyn CommandRunner>,
}

impl GoToolchain {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `go env GOMODCACHE`. `None` when go is missing or prints nothing.
    pub async fn mod_cache_root(&self) -> Option<PathBuf> {
        match run_checked(self.runner.as_ref(), "go", &strings(&["env", "GOMODCACHE"]), None).await {
            Ok(out) => {
                let root = out.stdout.trim();
                if root.is_empty() { None } else { Some(PathBuf::from(root)) }
            }
            Err(e) => {
                tracing::warn!("Could not resolve the Go module cache: {}", e);
                None
            }
        }
    }

    /// Raw `go list -m all` output for the module in `server_dir`.
    pub async fn list_modules(&self, server_dir: &Path) -> Result<String, ToolchainError> {
        let out = run_checked(self.runner.as_ref(), "go", &strings(&["list", "-m", "all"]), Some(server_dir)).await?;
        Ok(out.stdout)
    }

    pub async fn download(&self, server_dir: &Path) -> Result<(), ToolchainError> {
        run_checked(self.runner.as_ref(), "go", &strings(&["mod", "download"]), Some(server_dir)).await?;
        Ok(())
    }

    pub async fn proxy(&self) -> Option<String> {
        run_checked(self.runner.as_ref(), "go", &strings(&["env", "GOPROXY"]), None)
            .await
            .ok()
            .map(|o| o.stdout.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub async fn set_proxy(&self, url: &str) -> Result<(), ToolchainError> {
        let args = vec!["env".to_string(), "-w".to_string(), format!("GOPROXY={}", url)];
        run_checked(self.runner.as_ref(), "go", &args, None).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct NpmToolchain {
    runner: Arc<dyn CommandRunner>,
}

impl NpmToolchain {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `npm ls --depth=0` exits 0 only when every declared dependency resolves.
    pub async fn dependencies_resolve(&self, web_dir: &Path) -> bool {
        match self.runner.run(npm_program(), &strings(&["ls", "--depth=0"]), Some(web_dir)).await {
            Ok(out) => out.success,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    pub async fn install(&self, web_dir: &Path) -> Result<(), ToolchainError> {
        run_checked(self.runner.as_ref(), npm_program(), &strings(&["install"]), Some(web_dir)).await?;
        Ok(())
    }

    pub async fn registry(&self, web_dir: &Path) -> Option<String> {
        run_checked(self.runner.as_ref(), npm_program(), &strings(&["config", "get", "registry"]), Some(web_dir))
            .await
            .ok()
            .map(|o| o.stdout.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub async fn set_registry(&self, web_dir: &Path, url: &str) -> Result<(), ToolchainError> {
        run_checked(
            self.runner.as_ref(),
            npm_program(),
            &strings(&["config", "set", "registry", url]),
            Some(web_dir),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Replies by matching the joined command line against scripted prefixes.
    #[derive(Default)]
    pub struct ScriptedRunner {
        replies: Vec<(String, CommandOutput)>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(mut self, prefix: &str, success: bool, stdout: &str) -> Self {
            self.replies.push((
                prefix.to_string(),
                CommandOutput { success, stdout: stdout.to_string(), stderr: String::new() },
            ));
            self
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _cwd: Option<&Path>,
        ) -> Result<CommandOutput, ToolchainError> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            self.replies
                .iter()
                .find(|(p, _)| line.starts_with(p.as_str()))
                .map(|(_, o)| o.clone())
                .ok_or_else(|| ToolchainError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[tokio::test]
    async fn test_mod_cache_root_trims_output() {
        let runner = Arc::new(ScriptedRunner::new().reply("go env GOMODCACHE", true, "/home/dev/go/pkg/mod\n"));
        let go = GoToolchain::new(runner);
        assert_eq!(go.mod_cache_root().await, Some(PathBuf::from("/home/dev/go/pkg/mod")));
    }

    #[tokio::test]
    async fn test_mod_cache_root_missing_go() {
        let go = GoToolchain::new(Arc::new(ScriptedRunner::new()));
        assert_eq!(go.mod_cache_root().await, None);

        let go = GoToolchain::new(Arc::new(ScriptedRunner::new().reply("go env GOMODCACHE", true, "  \n")));
        assert_eq!(go.mod_cache_root().await, None);
    }

    #[tokio::test]
    async fn test_failed_command_reports_output() {
        let runner = Arc::new(ScriptedRunner::new().reply("go mod download", false, "verifying module: checksum mismatch"));
        let go = GoToolchain::new(runner);
        let err = go.download(Path::new("/tmp")).await.unwrap_err();
        match err {
            ToolchainError::Failed { command, output } => {
                assert_eq!(command, "go mod download");
                assert!(output.contains("checksum mismatch"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_set_proxy_passes_single_assignment() {
        let runner = Arc::new(ScriptedRunner::new().reply("go env -w", true, ""));
        let go = GoToolchain::new(runner.clone());
        go.set_proxy("https://goproxy.cn,direct").await.unwrap();
        assert_eq!(runner.calls.lock().unwrap()[0], "go env -w GOPROXY=https://goproxy.cn,direct");
    }

    #[tokio::test]
    async fn test_npm_ls_exit_status() {
        let npm = format!("{} ls", npm_program());
        let ok = NpmToolchain::new(Arc::new(ScriptedRunner::new().reply(&npm, true, "web@0.0.0")));
        assert!(ok.dependencies_resolve(Path::new(".")).await);
        let missing = NpmToolchain::new(Arc::new(ScriptedRunner::new().reply(&npm, false, "UNMET DEPENDENCY")));
        assert!(!missing.dependencies_resolve(Path::new(".")).await);
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput { success: false, stdout: "a\n".into(), stderr: "b".into() };
        assert_eq!(out.combined(), "a\nb");
        let out = CommandOutput { success: false, stdout: "".into(), stderr: "only".into() };
        assert_eq!(out.combined(), "only");
    }
}
