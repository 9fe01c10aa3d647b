#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Bitkub Stream - WebSocket Subscription Manager
//!
//! Keeps any number of long-lived Bitkub market data streams open at once:
//! plain channel streams, combined multi-channel streams and order-book
//! streams. Connections are probed by one shared heartbeat and replayed
//! after a close.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and transforms
//!   - `subscription`: Stream classes, descriptors and caller options
//!   - `symbol`: Display symbol to channel-name mapping
//!   - `streaming`: Frame decoding and per-class filtering
//!
//! - **Application**: Lifecycle and port definitions
//!   - `ports`: The transport interface
//!   - `services`: Registry, heartbeat, reconnect backoff, stream manager
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `bitkub`: `tokio-tungstenite` transport
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing subscriber and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐  events   ┌─────────────┐  frames
//! Bitkub WS ─────►│  Transport   │──────────►│  Connection │──────────► callback
//!                 └──────────────┘           │    task     │
//!                        ▲                   └─────────────┘
//!                        │ ping / terminate         │ open / close
//!                 ┌──────────────┐           ┌─────────────┐
//!                 │  Heartbeat   │◄──────────│  Registry   │
//!                 └──────────────┘  sweeps   └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Subscription and frame types with no I/O.
pub mod domain;

/// Application layer - Lifecycle services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{DecodeError, DecodeOptions, FrameDecoder, OrderBookEvent, StreamFrame};
pub use domain::subscription::{
    ConnectionState, EndpointId, MessageCallback, OpenedCallback, StreamClass, StreamOptions,
    SubscriptionDescriptor, SymbolSelection,
};
pub use domain::symbol::{BitkubSymbolMapper, ChannelKind, SymbolMapper};

// Ports
pub use application::ports::{
    ReadyState, TransportConnector, TransportError, TransportEvent, TransportHandle, TransportPair,
};

// Services
pub use application::services::{
    HeartbeatConfig, ReconnectConfig, StreamError, StreamManager, StreamManagerConfig,
    SubscriptionHandle, SubscriptionRegistry,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, StartupSubscriptions, WebSocketSettings};

// Transport
pub use infrastructure::bitkub::{DEFAULT_STREAM_URL, WsConnector};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
