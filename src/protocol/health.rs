//! The store health check itself: connect, authenticate, select, ping,
//! write/read/delete, on one connection, stopping at the first failure.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::resp::{encode_command, read_reply, Reply};
use super::{AuthMode, CheckStep, HealthReport, HealthSummary, ProtocolCheckStep, ProtocolError, StepOutcome};
use crate::config::project::MAX_STORE_DB;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Input problems caught before any connection is attempted. Everything
/// that goes wrong on the wire is reported in the transcript instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("store address is empty")]
    EmptyAddress,
    #[error("database index {0} out of range 0-15")]
    InvalidDatabase(u32),
}

/// Replies meaning "AUTH sent but the server has no password configured"
/// (pre-6 and 6+ wording).
fn is_no_password_reply(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("no password is set") || lower.contains("without any password configured")
}

struct Connection {
    stream: BufReader<TcpStream>,
    read_timeout: Duration,
}

impl Connection {
    async fn request(&mut self, args: &[&[u8]]) -> Result<Reply, ProtocolError> {
        let frame = encode_command(args);
        self.stream.get_mut().write_all(&frame).await?;
        match tokio::time::timeout(self.read_timeout, read_reply(&mut self.stream)).await {
            Ok(reply) => reply,
            Err(_) => Err(ProtocolError::Timeout(self.read_timeout.as_millis() as u64)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreHealthCheck {
    address: String,
    credential: String,
    db: u32,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl StoreHealthCheck {
    pub fn new(address: &str, credential: &str, db: u32) -> Result<Self, HealthCheckError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(HealthCheckError::EmptyAddress);
        }
        if db > MAX_STORE_DB {
            return Err(HealthCheckError::InvalidDatabase(db));
        }
        Ok(Self {
            address: address.to_string(),
            credential: credential.to_string(),
            db,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub async fn run(&self) -> HealthReport {
        let mut steps = Vec::with_capacity(5);
        let mut auth_mode = AuthMode::Unknown;
        let passed = self.drive(&mut steps, &mut auth_mode).await;

        if passed {
            tracing::info!("Store check against {} passed", self.address);
        } else if let Some(step) = steps.last() {
            tracing::warn!("Store check against {} failed at {}: {}", self.address, step.step.label(), step.detail);
        }

        HealthReport {
            steps,
            summary: HealthSummary { address: self.address.clone(), auth_mode, db: self.db, passed },
        }
    }

    /// Runs the steps in order, pushing each outcome. Returns whether all
    /// passed. The connection is dropped on every return path.
    async fn drive(&self, steps: &mut Vec<ProtocolCheckStep>, auth_mode: &mut AuthMode) -> bool {
        // 1. connect
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return fail(steps, CheckStep::Connect, connect_failure(&self.address, &e.to_string())),
            Err(_) => {
                let reason = format!("timed out after {} ms", self.connect_timeout.as_millis());
                return fail(steps, CheckStep::Connect, connect_failure(&self.address, &reason));
            }
        };
        pass(steps, CheckStep::Connect, format!("connected to {}", self.address));
        let mut conn = Connection { stream: BufReader::new(stream), read_timeout: self.read_timeout };

        // 2. authenticate, always, so a server that demands a password is caught
        let reply = match conn.request(&[b"AUTH", self.credential.as_bytes()]).await {
            Ok(reply) => reply,
            Err(e) => return fail(steps, CheckStep::Authenticate, format!("no usable reply to AUTH: {}", e)),
        };
        match &reply {
            r if r.is_ok() => {
                if self.credential.is_empty() {
                    *auth_mode = AuthMode::NoPassword;
                    pass(steps, CheckStep::Authenticate, "authenticated with an empty password".into());
                } else {
                    *auth_mode = AuthMode::Password;
                    pass(steps, CheckStep::Authenticate, "password accepted".into());
                }
            }
            Reply::Error(text) if is_no_password_reply(text) => {
                if self.credential.is_empty() {
                    *auth_mode = AuthMode::NoPassword;
                    pass(steps, CheckStep::Authenticate, "server has no password configured".into());
                } else {
                    return fail(
                        steps,
                        CheckStep::Authenticate,
                        "server has no password configured but a password was supplied; clear the password field or set one on the server".into(),
                    );
                }
            }
            other => {
                return fail(
                    steps,
                    CheckStep::Authenticate,
                    format!("authentication rejected, server replied {}", other.render()),
                )
            }
        }

        // 3. select
        if self.db == 0 {
            pass(steps, CheckStep::SelectDatabase, "default database 0".into());
        } else {
            let index = self.db.to_string();
            match conn.request(&[b"SELECT", index.as_bytes()]).await {
                Ok(r) if r.is_ok() => {
                    pass(steps, CheckStep::SelectDatabase, format!("selected database {}", self.db));
                }
                Ok(other) => {
                    return fail(
                        steps,
                        CheckStep::SelectDatabase,
                        format!("SELECT {} rejected, server replied {}", self.db, other.render()),
                    )
                }
                Err(e) => return fail(steps, CheckStep::SelectDatabase, format!("no usable reply to SELECT: {}", e)),
            }
        }

        // 4. ping
        match conn.request(&[b"PING"]).await {
            Ok(Reply::Simple(s)) if s == "PONG" => {
                pass(steps, CheckStep::Ping, "PONG".into());
            }
            Ok(other) => return fail(steps, CheckStep::Ping, format!("expected +PONG, got {}", other.render())),
            Err(e) => return fail(steps, CheckStep::Ping, format!("no usable reply to PING: {}", e)),
        }

        // 5. read/write
        let key = format!("gva_launcher_test_{}", uuid::Uuid::new_v4().simple());
        let value = format!("test_{}", unix_nanos());
        let outcome = write_read(&mut conn, &key, &value).await;
        // best effort; the reply is read so the connection stays in sync
        let _ = conn.request(&[b"DEL", key.as_bytes()]).await;

        match outcome {
            Ok(()) => pass(steps, CheckStep::ReadWrite, format!("wrote and read back '{}'", value)),
            Err(detail) => fail(steps, CheckStep::ReadWrite, detail),
        }
    }
}

async fn write_read(conn: &mut Connection, key: &str, value: &str) -> Result<(), String> {
    match conn.request(&[b"SET", key.as_bytes(), value.as_bytes()]).await {
        Ok(r) if r.is_ok() => {}
        Ok(other) => return Err(format!("SET rejected, server replied {}", other.render())),
        Err(e) => return Err(format!("no usable reply to SET: {}", e)),
    }
    match conn.request(&[b"GET", key.as_bytes()]).await {
        Ok(Reply::Bulk(Some(bytes))) if bytes == value.as_bytes() => Ok(()),
        Ok(other) => Err(format!("read back {} but wrote \"{}\"", other.render(), value)),
        Err(e) => Err(format!("no usable reply to GET: {}", e)),
    }
}

fn pass(steps: &mut Vec<ProtocolCheckStep>, step: CheckStep, detail: String) -> bool {
    steps.push(ProtocolCheckStep { step, outcome: StepOutcome::Pass, detail });
    true
}

fn fail(steps: &mut Vec<ProtocolCheckStep>, step: CheckStep, detail: String) -> bool {
    steps.push(ProtocolCheckStep { step, outcome: StepOutcome::Fail, detail });
    false
}

fn connect_failure(address: &str, reason: &str) -> String {
    format!(
        "connection to {} failed: {}. Check the address, whether the store is running, firewall rules, and the network",
        address, reason
    )
}

fn unix_nanos() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default()
}

/// Validate input and run the check with the standard timeouts.
pub async fn test_store_connection(address: &str, credential: &str, db: u32) -> Result<HealthReport, HealthCheckError> {
    let check = StoreHealthCheck::new(address, credential, db)?;
    Ok(check.run().await)
}
