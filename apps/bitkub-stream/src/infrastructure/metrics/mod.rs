//! Prometheus Metrics Module
//!
//! Counters and gauges for the stream manager.
//!
//! # Metrics Categories
//!
//! - **Frames**: received, forwarded, filtered and undecodable frames by
//!   stream class
//! - **Connections**: open connections and heartbeat timer state
//! - **Lifecycle**: reconnects, abandoned reconnects, heartbeat terminations
//!   and transport errors
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`],
//! so library users who do not want Prometheus pay nothing.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::subscription::StreamClass;

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Does nothing when `port` is zero or a recorder is already installed.
/// Returns the listen address when metrics are being served.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, BuildError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(Some(*INSTALLED.get_or_init(|| addr)))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "bitkub_stream_frames_received_total",
        "Frames received from Bitkub streams"
    );
    describe_counter!(
        "bitkub_stream_frames_forwarded_total",
        "Frames delivered to subscription callbacks"
    );
    describe_counter!(
        "bitkub_stream_frames_filtered_total",
        "Well-formed frames dropped by the stream filter"
    );
    describe_counter!(
        "bitkub_stream_decode_errors_total",
        "Frames dropped because they could not be decoded"
    );

    describe_gauge!(
        "bitkub_stream_open_connections",
        "Connections currently in the subscription registry"
    );
    describe_gauge!(
        "bitkub_stream_heartbeat_running",
        "1 while the shared heartbeat timer is running"
    );

    describe_counter!(
        "bitkub_stream_reconnects_total",
        "Subscriptions replayed after a close"
    );
    describe_counter!(
        "bitkub_stream_reconnects_abandoned_total",
        "Reconnects given up after exhausting attempts"
    );
    describe_counter!(
        "bitkub_stream_heartbeat_terminations_total",
        "Connections terminated for missing a heartbeat probe"
    );
    describe_counter!(
        "bitkub_stream_transport_errors_total",
        "WebSocket transport errors"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received on a stream of `class`.
pub fn record_frame_received(class: StreamClass) {
    counter!("bitkub_stream_frames_received_total", "class" => class.as_str()).increment(1);
}

/// Record a frame delivered to a callback.
pub fn record_frame_forwarded(class: StreamClass) {
    counter!("bitkub_stream_frames_forwarded_total", "class" => class.as_str()).increment(1);
}

/// Record a frame dropped by the filter policy.
pub fn record_frame_filtered(class: StreamClass) {
    counter!("bitkub_stream_frames_filtered_total", "class" => class.as_str()).increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_frame_decode_error(class: StreamClass) {
    counter!("bitkub_stream_decode_errors_total", "class" => class.as_str()).increment(1);
}

/// Update the registered connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_open_connections(count: usize) {
    gauge!("bitkub_stream_open_connections").set(count as f64);
}

/// Update the heartbeat timer state.
pub fn set_heartbeat_running(running: bool) {
    gauge!("bitkub_stream_heartbeat_running").set(if running { 1.0 } else { 0.0 });
}

/// Record a subscription replay.
pub fn record_reconnect() {
    counter!("bitkub_stream_reconnects_total").increment(1);
}

/// Record a reconnect given up for good.
pub fn record_reconnect_abandoned() {
    counter!("bitkub_stream_reconnects_abandoned_total").increment(1);
}

/// Record a heartbeat termination.
pub fn record_heartbeat_termination() {
    counter!("bitkub_stream_heartbeat_terminations_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error() {
    counter!("bitkub_stream_transport_errors_total").increment(1);
}
