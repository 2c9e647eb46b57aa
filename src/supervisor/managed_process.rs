//! Dev-server child processes spawned by the launcher.
//!
//! - stdout/stderr captured into a ring buffer (the presentation layer polls it)
//! - log level guessed from each line
//! - exit observed through a watch channel, so `owned` in snapshots reflects
//!   whether *our* child is still alive

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{watch, Mutex};
use serde::{Serialize, Deserialize};
use regex::Regex;

use crate::supervisor::error::SupervisorError;
use crate::utils::{current_timestamp, hidden_async_command};

const DEFAULT_LOG_BUFFER: usize = 2_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub id: u64,
    pub timestamp: u64,
    pub source: LogSource,
    pub content: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Messages from the launcher itself (spawn, exit)
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    fn with_capacity(max_size: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_size.min(256)),
            next_id: 0,
            max_size,
        }
    }

    fn push(&mut self, source: LogSource, content: String, level: LogLevel) {
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
            level,
        };
        self.next_id += 1;
        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn get_since(&self, since_id: u64) -> Vec<LogLine> {
        self.lines.iter().filter(|l| l.id > since_id).cloned().collect()
    }

    fn get_recent(&self, count: usize) -> Vec<LogLine> {
        self.lines.iter().rev().take(count).rev().cloned().collect()
    }
}

/// A running (or finished) dev-server child.
pub struct ServiceProcess {
    pub pid: u32,
    log_buffer: Arc<Mutex<LogBuffer>>,
    running_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for ServiceProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProcess")
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ServiceProcess {
    /// Spawn `program args...` in `working_dir`. Returns as soon as the OS
    /// has created the process; readiness is the supervisor's business.
    pub async fn spawn(program: &str, args: &[String], working_dir: &Path) -> Result<Self, SupervisorError> {
        let mut cmd = hidden_async_command(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::SpawnFailed(format!("'{}' in {}: {}", program, working_dir.display(), e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::SpawnFailed(format!("'{}' exited before reporting a PID", program)))?;

        let log_buffer = Arc::new(Mutex::new(LogBuffer::with_capacity(DEFAULT_LOG_BUFFER)));
        let (running_tx, running_rx) = watch::channel(true);

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, LogSource::Stdout, log_buffer.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, LogSource::Stderr, log_buffer.clone());
        }

        {
            let buf = log_buffer.clone();
            let label = program.to_string();
            tokio::spawn(async move {
                let exit_msg = match child.wait().await {
                    Ok(status) => format!("'{}' exited with {}", label, status),
                    Err(e) => format!("Failed to wait for '{}': {}", label, e),
                };
                tracing::info!("{}", exit_msg);
                buf.lock().await.push(LogSource::System, exit_msg, LogLevel::Info);
                let _ = running_tx.send(false);
            });
        }

        log_buffer
            .lock()
            .await
            .push(LogSource::System, format!("Started '{}' with PID {}", program, pid), LogLevel::Info);

        Ok(Self { pid, log_buffer, running_rx })
    }

    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    pub async fn wait_for_exit(&self) {
        let mut rx = self.running_rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub async fn get_console_since(&self, since_id: u64) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_since(since_id)
    }

    pub async fn get_recent_console(&self, count: usize) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_recent(count)
    }
}

fn spawn_reader<R>(stream: R, source: LogSource, buf: Arc<Mutex<LogBuffer>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let level = parse_log_level(&line);
            // stderr is at least a warning; vite and go both log progress there though
            let level = if source == LogSource::Stderr && level == LogLevel::Info { LogLevel::Warn } else { level };
            buf.lock().await.push(source, line, level);
        }
    });
}

fn level_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?P<level>INFO|WARN|WARNING|ERROR|FATAL|PANIC|DEBUG|TRACE)\b").expect("static regex")
    })
}

/// Guess a line's level from the first level keyword it contains (zap, gin,
/// and vite all print one somewhere in the line).
fn parse_log_level(line: &str) -> LogLevel {
    match level_regex().captures(line).and_then(|c| c.name("level")) {
        Some(m) => match m.as_str().to_uppercase().as_str() {
            "ERROR" | "FATAL" | "PANIC" => LogLevel::Error,
            "WARN" | "WARNING" => LogLevel::Warn,
            "DEBUG" | "TRACE" => LogLevel::Debug,
            _ => LogLevel::Info,
        },
        None => LogLevel::Info,
    }
}
