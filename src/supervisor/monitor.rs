//! Periodic port observation for both services.
//!
//! Fast ticks while things are coming up, slow ticks once both ports are
//! busy or the startup window has passed. A paused monitor keeps ticking
//! but does not touch service state.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Supervisor;

#[derive(Debug, Clone, Copy)]
pub struct MonitorCadence {
    pub fast: Duration,
    pub window: Duration,
    pub slow: Duration,
}

impl MonitorCadence {
    /// Interval for the next tick. Once slow, the cadence stays slow.
    pub fn next(&self, current: Duration, started: Instant, both_busy: bool) -> Duration {
        if current == self.slow || both_busy || started.elapsed() >= self.window {
            self.slow
        } else {
            self.fast
        }
    }
}

pub(crate) async fn run(supervisor: Supervisor, cadence: MonitorCadence, cancel: CancellationToken) {
    let started = Instant::now();
    let mut interval = cadence.fast;
    tracing::debug!("Status monitor started ({:?} / {:?})", cadence.fast, cadence.slow);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if supervisor.is_paused() {
            tracing::debug!("Monitor paused, skipping tick");
            continue;
        }

        let both_busy = supervisor.refresh_from_ports().await;
        let next = cadence.next(interval, started, both_busy);
        if next != interval {
            tracing::debug!("Monitor interval {:?} -> {:?}", interval, next);
            interval = next;
        }
    }

    tracing::debug!("Status monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> MonitorCadence {
        MonitorCadence {
            fast: Duration::from_secs(1),
            window: Duration::from_secs(30),
            slow: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_switches_on_both_busy() {
        let c = cadence();
        let started = Instant::now();
        assert_eq!(c.next(c.fast, started, false), c.fast);
        assert_eq!(c.next(c.fast, started, true), c.slow);
        // 한 번 느려지면 유지
        assert_eq!(c.next(c.slow, started, false), c.slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_switches_after_window() {
        let c = cadence();
        let started = Instant::now();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(c.next(c.fast, started, false), c.fast);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(c.next(c.fast, started, false), c.slow);
    }
}
