//! Application Services
//!
//! - `SubscriptionRegistry`: open connections keyed by endpoint, owner of the
//!   shared heartbeat timer
//! - `HeartbeatMonitor`: liveness sweep over the registry
//! - `ReconnectBackoff`: per-endpoint delay before a subscription is replayed
//! - `StreamManager`: open, close, reconnect and terminate subscriptions

mod heartbeat;
mod lifecycle;
mod reconnect;
mod registry;

pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatTimer, SweepSummary};
pub use lifecycle::{StreamError, StreamManager, StreamManagerConfig, SubscriptionHandle};
pub use reconnect::{ReconnectBackoff, ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use registry::{Connection, ConnectionId, SubscriptionRegistry};
