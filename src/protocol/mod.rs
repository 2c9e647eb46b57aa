//! Raw-protocol health check for the key-value store (Redis) the backend
//! is configured to use.

pub mod health;
pub mod resp;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use health::{test_store_connection, HealthCheckError, StoreHealthCheck};

/// Wire-level failures while talking to the store.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply within {0} ms")]
    Timeout(u64),

    #[error("connection closed by server")]
    Closed,

    #[error("malformed reply: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStep {
    Connect,
    Authenticate,
    SelectDatabase,
    Ping,
    ReadWrite,
}

impl CheckStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connect => "TCP connect",
            Self::Authenticate => "Authentication",
            Self::SelectDatabase => "Database selection",
            Self::Ping => "PING",
            Self::ReadWrite => "Read/write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCheckStep {
    pub step: CheckStep,
    pub outcome: StepOutcome,
    pub detail: String,
}

impl ProtocolCheckStep {
    pub fn passed(&self) -> bool {
        self.outcome == StepOutcome::Pass
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Server accepted the supplied password
    Password,
    /// Empty credential accepted by a server that has no password set
    NoPassword,
    /// Authentication did not complete
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub address: String,
    pub auth_mode: AuthMode,
    pub db: u32,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub steps: Vec<ProtocolCheckStep>,
    pub summary: HealthSummary,
}

impl HealthReport {
    pub fn failed_step(&self) -> Option<CheckStep> {
        self.steps.iter().find(|s| !s.passed()).map(|s| s.step)
    }

    /// Human-readable transcript, one line per step plus a summary line.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            let mark = if step.passed() { "OK  " } else { "FAIL" };
            out.push_str(&format!("[{}] {}. {}: {}\n", mark, i + 1, step.step.label(), step.detail));
        }
        let auth = match self.summary.auth_mode {
            AuthMode::Password => "password",
            AuthMode::NoPassword => "no password",
            AuthMode::Unknown => "unknown",
        };
        out.push_str(&format!(
            "{} | address {} | auth: {} | db {}",
            if self.summary.passed { "All checks passed" } else { "Check failed" },
            self.summary.address,
            auth,
            self.summary.db
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_and_failed_step() {
        let report = HealthReport {
            steps: vec![
                ProtocolCheckStep { step: CheckStep::Connect, outcome: StepOutcome::Pass, detail: "connected".into() },
                ProtocolCheckStep { step: CheckStep::Authenticate, outcome: StepOutcome::Fail, detail: "-WRONGPASS".into() },
            ],
            summary: HealthSummary { address: "127.0.0.1:6379".into(), auth_mode: AuthMode::Unknown, db: 0, passed: false },
        };
        assert_eq!(report.failed_step(), Some(CheckStep::Authenticate));
        let text = report.transcript();
        assert!(text.contains("[OK  ] 1. TCP connect: connected"));
        assert!(text.contains("[FAIL] 2. Authentication: -WRONGPASS"));
        assert!(text.ends_with("Check failed | address 127.0.0.1:6379 | auth: unknown | db 0"));
    }

    #[test]
    fn test_step_serializes_snake_case() {
        let json = serde_json::to_value(CheckStep::SelectDatabase).unwrap();
        assert_eq!(json, "select_database");
    }
}
