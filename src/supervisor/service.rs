//! Records for the two managed services, behind one mutex.
//!
//! All mutation goes through [`ServiceStore::update`]; everything outside the
//! supervisor sees [`ServiceSnapshot`] copies.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::managed_process::ServiceProcess;
use super::state_machine::{ServiceState, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Backend,
    Frontend,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Backend, ServiceKind::Frontend];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Backend => 0,
            Self::Frontend => 1,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backend" | "server" => Ok(Self::Backend),
            "frontend" | "web" => Ok(Self::Frontend),
            other => Err(format!("unknown service '{}'", other)),
        }
    }
}

#[derive(Debug)]
pub struct ManagedService {
    pub kind: ServiceKind,
    pub sm: StateMachine,
    /// 0 means "not configured"
    pub port: u16,
    pub started_at: Option<u64>,
    pub process: Option<Arc<ServiceProcess>>,
    /// Port observed occupied at the last check
    pub port_busy: bool,
    /// Bumped by every start and stop so an in-flight start can tell it was
    /// superseded.
    pub generation: u64,
}

impl ManagedService {
    fn new(kind: ServiceKind, port: u16) -> Self {
        Self { kind, sm: StateMachine::new(), port, started_at: None, process: None, port_busy: false, generation: 0 }
    }

    pub fn state(&self) -> ServiceState {
        self.sm.state
    }

    /// Apply a transition, logging instead of failing when it is not allowed.
    pub fn transition(&mut self, to: ServiceState) -> bool {
        match self.sm.transition(to) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{} service: {}", self.kind, e);
                false
            }
        }
    }

    /// Back to a clean Stopped record; the port is kept.
    pub fn reset(&mut self) {
        self.sm.state = ServiceState::Stopped;
        self.started_at = None;
        self.process = None;
        self.port_busy = false;
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let state = self.sm.state;
        ServiceSnapshot {
            kind: self.kind,
            state,
            is_running: state == ServiceState::Running,
            port: self.port,
            started_at: self.started_at,
            pid: self.process.as_ref().map(|p| p.pid),
            owned: self.process.as_ref().map(|p| p.is_running()).unwrap_or(false),
            port_busy: self.port_busy,
        }
    }
}

/// Point-in-time copy of a service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub kind: ServiceKind,
    pub state: ServiceState,
    pub is_running: bool,
    pub port: u16,
    pub started_at: Option<u64>,
    pub pid: Option<u32>,
    /// Our spawned child is alive
    pub owned: bool,
    /// Something listens on the port (ours or not)
    pub port_busy: bool,
}

#[derive(Debug)]
pub struct ServiceStore {
    services: Mutex<[ManagedService; 2]>,
}

impl ServiceStore {
    pub fn new(backend_port: u16, frontend_port: u16) -> Self {
        Self {
            services: Mutex::new([
                ManagedService::new(ServiceKind::Backend, backend_port),
                ManagedService::new(ServiceKind::Frontend, frontend_port),
            ]),
        }
    }

    /// Run `f` on one record under the lock. Never hold this across an await.
    pub fn update<R>(&self, kind: ServiceKind, f: impl FnOnce(&mut ManagedService) -> R) -> R {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut services[kind.index()])
    }

    pub fn snapshot(&self, kind: ServiceKind) -> ServiceSnapshot {
        self.update(kind, |svc| svc.snapshot())
    }

    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services.iter().map(ManagedService::snapshot).collect()
    }
}
