//! Lifecycle of the backend and frontend dev servers.
//!
//! The supervisor knows services by port. It spawns the dev tool, waits for
//! the port to become busy, stops by killing whatever listens on the port,
//! and keeps state honest with a background monitor.

pub mod error;
pub mod managed_process;
pub mod monitor;
pub mod process;
pub mod service;
pub mod state_machine;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Timings;
use crate::port::is_port_occupied_async;
use crate::utils::current_timestamp;

pub use error::SupervisorError;
pub use managed_process::{LogLevel, LogLine, LogSource, ServiceProcess};
pub use monitor::MonitorCadence;
pub use process::{system_killer, PortKiller, ProcessError};
pub use service::{ServiceKind, ServiceSnapshot, ServiceStore};
pub use state_machine::ServiceState;

/// What to run for a service, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    pub kind: ServiceKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub snapshot: ServiceSnapshot,
}

enum Readiness {
    Ready,
    Exited,
    TimedOut,
    Superseded,
}

struct Inner {
    store: ServiceStore,
    killer: Arc<dyn PortKiller>,
    timings: Timings,
    paused: AtomicBool,
    shutdown: CancellationToken,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(killer: Arc<dyn PortKiller>, timings: Timings, backend_port: u16, frontend_port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: ServiceStore::new(backend_port, frontend_port),
                killer,
                timings,
                paused: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self, kind: ServiceKind) -> ServiceSnapshot {
        self.inner.store.snapshot(kind)
    }

    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        self.inner.store.snapshots()
    }

    pub fn port(&self, kind: ServiceKind) -> u16 {
        self.inner.store.update(kind, |svc| svc.port)
    }

    /// Point a service at a new port. Does not restart anything.
    pub fn set_port(&self, kind: ServiceKind, port: u16) {
        self.inner.store.update(kind, |svc| {
            if svc.port != port {
                tracing::info!("{} port {} -> {}", kind, svc.port, port);
                svc.port = port;
                svc.port_busy = false;
            }
        });
    }

    pub fn timings(&self) -> &Timings {
        &self.inner.timings
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn pause_monitor(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::debug!("Monitor paused");
    }

    pub fn resume_monitor(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        tracing::debug!("Monitor resumed");
    }

    /// Kill every process listening on `port`, off the async workers.
    pub async fn kill_by_port(&self, port: u16) -> Result<usize, ProcessError> {
        let killer = self.inner.killer.clone();
        tokio::task::spawn_blocking(move || killer.kill_by_port(port))
            .await
            .map_err(|e| ProcessError::DiscoveryFailed { port, reason: e.to_string() })?
    }

    async fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let killer = self.inner.killer.clone();
        tokio::task::spawn_blocking(move || killer.terminate(pid))
            .await
            .map_err(|e| ProcessError::TerminationFailed { pid, reason: e.to_string() })?
    }

    fn settle_delay(&self, kind: ServiceKind) -> std::time::Duration {
        match kind {
            ServiceKind::Backend => Timings::ms(self.inner.timings.backend_settle_ms),
            ServiceKind::Frontend => Timings::ms(self.inner.timings.frontend_settle_ms),
        }
    }

    /// Spawn one service and wait until its port is busy, the child exits,
    /// or the readiness timeout passes. A port already held by an unrelated
    /// process reads as ready.
    pub async fn start_service(&self, kind: ServiceKind, launch: LaunchSpec) -> Result<ServiceSnapshot, SupervisorError> {
        let (generation, port) = self.inner.store.update(kind, |svc| {
            if !matches!(svc.state(), ServiceState::Stopped | ServiceState::FailedToStart) {
                return Err(SupervisorError::AlreadyRunning(kind.name().to_string()));
            }
            if svc.port == 0 {
                return Err(SupervisorError::PortNotConfigured(kind.name().to_string()));
            }
            svc.transition(ServiceState::Starting);
            svc.generation += 1;
            svc.process = None;
            Ok((svc.generation, svc.port))
        })?;

        tracing::info!(
            "Starting {} service: {} {} (port {})",
            kind,
            launch.program,
            launch.args.join(" "),
            port
        );

        let process = match ServiceProcess::spawn(&launch.program, &launch.args, &launch.working_dir).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                self.inner.store.update(kind, |svc| {
                    if svc.generation == generation {
                        svc.transition(ServiceState::FailedToStart);
                    }
                });
                tracing::error!("{} service failed to spawn: {}", kind, e);
                return Err(e);
            }
        };

        self.inner.store.update(kind, |svc| {
            if svc.generation == generation {
                svc.process = Some(process.clone());
                svc.started_at = Some(current_timestamp());
            }
        });

        tokio::time::sleep(self.settle_delay(kind)).await;
        let readiness = self.await_readiness(kind, generation, port, &process).await;

        let snapshot = self.inner.store.update(kind, |svc| {
            if svc.generation != generation || svc.state() != ServiceState::Starting {
                // stopped (or restarted) while we were waiting
                return svc.snapshot();
            }
            match readiness {
                Readiness::Ready => {
                    svc.transition(ServiceState::Running);
                    svc.port_busy = true;
                    tracing::info!("{} service is listening on port {}", kind, port);
                }
                Readiness::Exited => {
                    svc.transition(ServiceState::FailedToStart);
                    svc.port_busy = false;
                    tracing::warn!("{} service exited before opening port {}", kind, port);
                }
                Readiness::TimedOut => {
                    svc.transition(ServiceState::FailedToStart);
                    svc.port_busy = false;
                    tracing::warn!(
                        "{} service did not open port {} within {} ms",
                        kind,
                        port,
                        self.inner.timings.readiness_timeout_ms
                    );
                }
                Readiness::Superseded => {}
            }
            svc.snapshot()
        });
        Ok(snapshot)
    }

    fn superseded(&self, kind: ServiceKind, generation: u64) -> bool {
        self.inner.store.update(kind, |svc| svc.generation != generation || svc.state() != ServiceState::Starting)
    }

    async fn await_readiness(&self, kind: ServiceKind, generation: u64, port: u16, process: &ServiceProcess) -> Readiness {
        let deadline = Instant::now() + Timings::ms(self.inner.timings.readiness_timeout_ms);
        let poll = Timings::ms(self.inner.timings.readiness_poll_ms.max(10));
        loop {
            if self.superseded(kind, generation) {
                return Readiness::Superseded;
            }
            if is_port_occupied_async(port).await {
                return Readiness::Ready;
            }
            if !process.is_running() {
                return Readiness::Exited;
            }
            if Instant::now() >= deadline {
                return Readiness::TimedOut;
            }
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Readiness::Superseded,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Backend first, frontend after the stagger; neither waits for the
    /// other to become ready. Also (re)starts the monitor's fast window.
    pub async fn start_services(&self, backend: LaunchSpec, frontend: LaunchSpec) -> Vec<StartResult> {
        self.start_monitor();

        let this = self.clone();
        let backend_task = tokio::spawn(async move { this.start_service(ServiceKind::Backend, backend).await });

        tokio::time::sleep(Timings::ms(self.inner.timings.start_stagger_ms)).await;
        let frontend_result = self.start_service(ServiceKind::Frontend, frontend).await;

        let backend_result = match backend_task.await {
            Ok(result) => result,
            Err(e) => Err(SupervisorError::Internal(anyhow::anyhow!("backend start task failed: {}", e))),
        };

        vec![
            self.start_result(ServiceKind::Backend, backend_result),
            self.start_result(ServiceKind::Frontend, frontend_result),
        ]
    }

    fn start_result(&self, kind: ServiceKind, result: Result<ServiceSnapshot, SupervisorError>) -> StartResult {
        match result {
            Ok(snapshot) => {
                let success = snapshot.state == ServiceState::Running;
                let error = (!success).then(|| format!("{} did not open port {}", kind, snapshot.port));
                StartResult { kind, success, error, snapshot }
            }
            Err(e) => StartResult { kind, success: false, error: Some(e.to_string()), snapshot: self.snapshot(kind) },
        }
    }

    /// Kill whatever owns the service's port (and our own child's tree),
    /// wait the grace delay, then mark it Stopped. The port is checked right
    /// away, so a server that came up between monitor ticks (or while the
    /// monitor is paused) is stopped too. A service that is neither tracked
    /// as active nor found on its port is left alone.
    pub async fn stop_service(&self, kind: ServiceKind) -> ServiceSnapshot {
        let port = self.port(kind);
        let busy_now = port != 0 && is_port_occupied_async(port).await;

        let (generation, port, process, active) = self.inner.store.update(kind, |svc| {
            svc.generation += 1;
            let state = svc.state();
            let active = matches!(state, ServiceState::Starting | ServiceState::Running | ServiceState::Stopping)
                || busy_now
                || svc.port_busy
                || svc.process.as_ref().map(|p| p.is_running()).unwrap_or(false);
            if matches!(state, ServiceState::Starting | ServiceState::Running) {
                svc.transition(ServiceState::Stopping);
            }
            (svc.generation, svc.port, svc.process.clone(), active)
        });

        if !active {
            return self.snapshot(kind);
        }
        tracing::info!("Stopping {} service (port {})", kind, port);

        if port != 0 {
            match self.kill_by_port(port).await {
                Ok(n) => tracing::debug!("Killed {} process(es) on port {}", n, port),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        if let Some(process) = process.filter(|p| p.is_running()) {
            if let Err(e) = self.terminate(process.pid).await {
                tracing::warn!("{}", e);
            }
        }

        tokio::time::sleep(Timings::ms(self.inner.timings.stop_grace_ms)).await;
        let still_busy = port != 0 && is_port_occupied_async(port).await;
        if still_busy {
            tracing::warn!("Port {} is still in use after stopping the {} service", port, kind);
        }

        self.inner.store.update(kind, |svc| {
            if svc.generation == generation {
                svc.reset();
                svc.port_busy = still_busy;
            }
            svc.snapshot()
        })
    }

    pub async fn stop_services(&self) -> Vec<ServiceSnapshot> {
        let (backend, frontend) =
            tokio::join!(self.stop_service(ServiceKind::Backend), self.stop_service(ServiceKind::Frontend));
        vec![backend, frontend]
    }

    /// One monitor observation: check both ports and reconcile state.
    /// Returns whether both ports are busy.
    pub async fn refresh_from_ports(&self) -> bool {
        let mut all_busy = true;
        for kind in ServiceKind::ALL {
            let port = self.port(kind);
            let busy = port != 0 && is_port_occupied_async(port).await;
            all_busy &= busy;

            self.inner.store.update(kind, |svc| {
                if svc.port != port {
                    return;
                }
                svc.port_busy = busy;
                match (svc.state(), busy) {
                    (ServiceState::Stopped | ServiceState::FailedToStart, true) => {
                        if svc.transition(ServiceState::Running) {
                            svc.started_at.get_or_insert_with(current_timestamp);
                            tracing::info!("{} service detected on port {}", kind, port);
                        }
                    }
                    (ServiceState::Running, false) => {
                        tracing::info!("{} service on port {} is gone", kind, port);
                        svc.reset();
                    }
                    _ => {}
                }
            });
        }
        tracing::debug!("Monitor tick: {:?}", self.snapshots().iter().map(|s| (s.kind, s.state)).collect::<Vec<_>>());
        all_busy
    }

    /// Start the monitor, replacing a running one so the fast window begins
    /// again.
    pub fn start_monitor(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let t = &self.inner.timings;
        let cadence = MonitorCadence {
            fast: Timings::ms(t.monitor_fast_ms),
            window: Timings::ms(t.monitor_window_ms),
            slow: Timings::ms(t.monitor_slow_ms),
        };
        let token = self.inner.shutdown.child_token();
        let handle = tokio::spawn(monitor::run(self.clone(), cadence, token.clone()));

        let mut slot = self.inner.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((old, _)) = slot.replace((token, handle)) {
            old.cancel();
        }
    }

    pub fn monitor_running(&self) -> bool {
        let slot = self.inner.monitor.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|(_, h)| !h.is_finished()).unwrap_or(false)
    }

    /// Cancel the monitor and any readiness waits. Services keep running.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = {
            let mut slot = self.inner.monitor.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some((_, handle)) = handle {
            let _ = handle.await;
        }
        tracing::info!("Supervisor shut down");
    }

    /// Console lines of our child for `kind`: after `since` when given,
    /// else the most recent `count`.
    pub async fn console(&self, kind: ServiceKind, since: Option<u64>, count: usize) -> Vec<LogLine> {
        let process = self.inner.store.update(kind, |svc| svc.process.clone());
        match (process, since) {
            (Some(p), Some(id)) => p.get_console_since(id).await,
            (Some(p), None) => p.get_recent_console(count).await,
            (None, _) => Vec::new(),
        }
    }
}
