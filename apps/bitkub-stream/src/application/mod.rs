//! Application Layer - Lifecycle services and port definitions.
//!
//! This layer owns the connection lifecycle: the subscription registry, the
//! shared heartbeat, the reconnect policy and the stream manager that ties
//! them to the transport port.

/// Port interfaces for external systems (transport).
pub mod ports;

/// Registry, heartbeat, reconnect and lifecycle services.
pub mod services;
