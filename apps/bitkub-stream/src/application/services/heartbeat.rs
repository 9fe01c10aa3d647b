//! Heartbeat Monitor
//!
//! One recurring timer per registry probes every open connection with a
//! ping and terminates connections that did not answer the previous probe.
//!
//! Each tick, for every registered connection:
//!
//! - alive: clear the flag and ping (if the transport is open);
//! - not alive: no pong arrived since the last probe, so terminate the
//!   transport (if still open). Termination goes through the normal close
//!   path, so the registry and reconnect logic observe it.
//!
//! A connection therefore gets one full interval to answer a probe. This
//! catches half-open sockets that never surface a close at the transport.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::SubscriptionRegistry;
use crate::infrastructure::metrics;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between sweeps.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with a custom interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Connections probed.
    pub pinged: usize,
    /// Connections terminated for missing the previous probe.
    pub terminated: usize,
}

/// Starts heartbeat timers and implements the sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self { config }
    }

    /// Sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Spawn the recurring sweep over `registry`.
    ///
    /// The first sweep happens one full interval after start. The timer runs
    /// until the returned [`HeartbeatTimer`] is stopped or dropped, or the
    /// registry is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(&self, registry: Weak<SubscriptionRegistry>) -> HeartbeatTimer {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.config.interval, registry, cancel.clone()));
        HeartbeatTimer { cancel, task }
    }

    /// Probe or condemn every connection in `registry` once.
    ///
    /// Probe-send failures are logged and otherwise ignored: the connection
    /// keeps its cleared flag and is judged again on the next sweep.
    pub fn sweep(registry: &SubscriptionRegistry) -> SweepSummary {
        let mut summary = SweepSummary::default();

        registry.for_each(|endpoint, connection| {
            let transport = connection.transport();

            if connection.take_alive() {
                if transport.is_open() {
                    if let Err(e) = transport.ping() {
                        tracing::debug!(endpoint, error = %e, "Heartbeat ping failed");
                    }
                    summary.pinged += 1;
                }
            } else {
                tracing::warn!(endpoint, "Terminating inactive/broken WebSocket");
                if transport.is_open() {
                    transport.terminate();
                    metrics::record_heartbeat_termination();
                    summary.terminated += 1;
                }
            }
        });

        summary
    }
}

async fn run(period: Duration, registry: Weak<SubscriptionRegistry>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::trace!("Heartbeat timer cancelled");
                break;
            }
            _ = interval.tick() => {
                let Some(registry) = registry.upgrade() else {
                    tracing::trace!("Registry dropped, stopping heartbeat");
                    break;
                };
                let summary = HeartbeatMonitor::sweep(&registry);
                tracing::trace!(
                    pinged = summary.pinged,
                    terminated = summary.terminated,
                    "Heartbeat sweep"
                );
            }
        }
    }
}

/// A running heartbeat timer. Stops when dropped.
#[derive(Debug)]
pub struct HeartbeatTimer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatTimer {
    /// Stop the timer.
    pub fn stop(self) {
        drop(self);
    }

    /// Whether the timer task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
