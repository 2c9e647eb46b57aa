//! Finding and killing whatever process owns a TCP port.
//!
//! The supervisor only knows ports, not processes, for services that were
//! started outside this launcher (or whose dev tool forked a child that does
//! the actual listening, like `go run`). Discovery goes through the platform
//! connection table and termination is always forceful and includes the
//! process tree.

use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::utils::hidden_command;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to inspect listeners on port {port}: {reason}")]
    DiscoveryFailed { port: u16, reason: String },
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
}

/// Platform capability: who listens on a port, and how to kill them.
pub trait PortKiller: Send + Sync {
    /// PIDs with a LISTEN socket on `port`. Empty when nothing listens.
    fn find_owners(&self, port: u16) -> Result<Vec<u32>, ProcessError>;

    /// Forcefully terminate `pid` together with its children.
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Kill every owner of `port`, returning how many were terminated.
    /// A free port is not an error.
    fn kill_by_port(&self, port: u16) -> Result<usize, ProcessError> {
        let owners = self.find_owners(port)?;
        if owners.is_empty() {
            tracing::info!("No process is listening on port {}", port);
            return Ok(0);
        }

        let mut killed = 0;
        for pid in owners {
            let name = crate::process_monitor::process_name(pid).unwrap_or_default();
            match self.terminate(pid) {
                Ok(()) => {
                    tracing::info!("Terminated PID {} {} (port {})", pid, name, port);
                    killed += 1;
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
        Ok(killed)
    }
}

/// The killer for the OS we were compiled for.
pub fn system_killer() -> Arc<dyn PortKiller> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(NetstatKiller)
    }
    #[cfg(not(target_os = "windows"))]
    {
        Arc::new(LsofKiller)
    }
}

// ─── Windows ─────────────────────────────────────────────────

/// `netstat -ano` + `taskkill /F /T`.
#[cfg(target_os = "windows")]
pub struct NetstatKiller;

#[cfg(target_os = "windows")]
impl PortKiller for NetstatKiller {
    fn find_owners(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        let output = hidden_command("netstat")
            .args(["-ano", "-p", "TCP"])
            .output()
            .map_err(|e| ProcessError::DiscoveryFailed { port, reason: e.to_string() })?;
        Ok(parse_netstat_listeners(&String::from_utf8_lossy(&output.stdout), port))
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let status = hidden_command("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status()
            .map_err(|e| ProcessError::TerminationFailed { pid, reason: e.to_string() })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::TerminationFailed { pid, reason: format!("taskkill exited with {}", status) })
        }
    }
}

// ─── Unix ────────────────────────────────────────────────────

/// `lsof` (falling back to `ss` on Linux) + SIGKILL over the process tree.
#[cfg(not(target_os = "windows"))]
pub struct LsofKiller;

#[cfg(not(target_os = "windows"))]
impl PortKiller for LsofKiller {
    fn find_owners(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        let lsof = hidden_command("lsof")
            .args(["-t", "-nP", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
            .output();

        match lsof {
            // lsof exits 1 when nothing matches; stdout is then empty.
            Ok(output) => Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout))),
            Err(lsof_err) => {
                tracing::debug!("lsof unavailable ({}), trying ss", lsof_err);
                let output = hidden_command("ss")
                    .args(["-Hltnp", &format!("sport = :{}", port)])
                    .output()
                    .map_err(|e| ProcessError::DiscoveryFailed {
                        port,
                        reason: format!("lsof: {}; ss: {}", lsof_err, e),
                    })?;
                Ok(parse_ss_listeners(&String::from_utf8_lossy(&output.stdout), port))
            }
        }
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        for child in crate::process_monitor::descendants(pid) {
            // Children may already be gone by the time we get to them.
            let _ = signal::kill(Pid::from_raw(child as i32), Signal::SIGKILL);
        }

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::TerminationFailed { pid, reason: e.to_string() }),
        }
    }
}

// ─── Parsers ─────────────────────────────────────────────────

/// Parse `netstat -ano` output: LISTENING rows whose *local* address ends in
/// `:port`, PID in the trailing column.
pub fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || !fields.iter().any(|f| f.eq_ignore_ascii_case("LISTENING")) {
            continue;
        }
        if !fields[1].ends_with(&suffix) {
            continue;
        }
        if let Some(pid) = fields.last().and_then(|p| p.parse::<u32>().ok()) {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// Parse one-PID-per-line output (`lsof -t`).
pub fn parse_pid_lines(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in output.lines().filter_map(|l| l.trim().parse::<u32>().ok()) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

fn ss_pid_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"pid=(\d+)").expect("static regex"))
}

/// Parse `ss -Hltnp` rows, e.g.
/// `LISTEN 0 4096 *:8888 *:* users:(("server",pid=4242,fd=7))`.
pub fn parse_ss_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || !fields[3].ends_with(&suffix) {
            continue;
        }
        for caps in ss_pid_regex().captures_iter(line) {
            if let Ok(pid) = caps[1].parse::<u32>() {
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const NETSTAT: &str = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:8888           0.0.0.0:0              LISTENING       4242
  TCP    [::]:8888              [::]:0                 LISTENING       4242
  TCP    127.0.0.1:52311        127.0.0.1:8888         ESTABLISHED     9000
  TCP    0.0.0.0:18888          0.0.0.0:0              LISTENING       7777
  TCP    0.0.0.0:8080           0.0.0.0:0              LISTENING       5151
";

    #[test]
    fn test_netstat_matches_local_listener_only() {
        assert_eq!(parse_netstat_listeners(NETSTAT, 8888), vec![4242]);
        assert_eq!(parse_netstat_listeners(NETSTAT, 8080), vec![5151]);
    }

    #[test]
    fn test_netstat_no_match() {
        assert!(parse_netstat_listeners(NETSTAT, 3000).is_empty());
        assert!(parse_netstat_listeners("", 8888).is_empty());
    }

    #[test]
    fn test_pid_lines() {
        assert_eq!(parse_pid_lines("123\n456\n123\n\n"), vec![123, 456]);
        assert!(parse_pid_lines("").is_empty());
    }

    #[test]
    fn test_ss_listeners() {
        let out = "LISTEN 0 4096 *:8888 *:* users:((\"server\",pid=4242,fd=7))\n\
                   LISTEN 0 511 0.0.0.0:8080 0.0.0.0:* users:((\"node\",pid=5151,fd=20),(\"node\",pid=5152,fd=20))\n";
        assert_eq!(parse_ss_listeners(out, 8888), vec![4242]);
        assert_eq!(parse_ss_listeners(out, 8080), vec![5151, 5152]);
        assert!(parse_ss_listeners(out, 9999).is_empty());
    }

    #[test]
    fn test_ss_pid_regex_is_shared() {
        assert!(std::ptr::eq(ss_pid_regex(), ss_pid_regex()));
        // IPv6 행과 중복 pid
        let out = "LISTEN 0 4096 [::]:8888 [::]:* users:((\"server\",pid=77,fd=3))\n\
                   LISTEN 0 4096 0.0.0.0:8888 0.0.0.0:* users:((\"server\",pid=77,fd=4))\n";
        for _ in 0..3 {
            assert_eq!(parse_ss_listeners(out, 8888), vec![77]);
        }
    }

    /// 테스트용 가짜 killer: 종료 요청을 기록만 함
    struct RecordingKiller {
        owners: Vec<u32>,
        fail_pid: Option<u32>,
        killed: Mutex<Vec<u32>>,
    }

    impl PortKiller for RecordingKiller {
        fn find_owners(&self, _port: u16) -> Result<Vec<u32>, ProcessError> {
            Ok(self.owners.clone())
        }

        fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
            if self.fail_pid == Some(pid) {
                return Err(ProcessError::TerminationFailed { pid, reason: "denied".into() });
            }
            self.killed.lock().unwrap().push(pid);
            Ok(())
        }
    }

    #[test]
    fn test_kill_by_port_free_port_is_ok() {
        let killer = RecordingKiller { owners: vec![], fail_pid: None, killed: Mutex::new(vec![]) };
        assert_eq!(killer.kill_by_port(8888).unwrap(), 0);
    }

    #[test]
    fn test_kill_by_port_continues_after_failure() {
        let killer = RecordingKiller { owners: vec![1, 2, 3], fail_pid: Some(2), killed: Mutex::new(vec![]) };
        assert_eq!(killer.kill_by_port(8888).unwrap(), 2);
        assert_eq!(*killer.killed.lock().unwrap(), vec![1, 3]);
    }
}
