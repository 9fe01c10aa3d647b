//! Subscription Registry
//!
//! Maps endpoint identifiers to open connections and owns the heartbeat
//! timer of those connections.
//!
//! # Design
//!
//! The timer is alive exactly while the registry is non-empty. Emptiness
//! transitions are computed inside the same critical section as the insert
//! or remove that causes them, and the timer is started or stopped before
//! the lock is released. A concurrent open and close can therefore neither
//! start two timers nor leave a non-empty registry without one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::heartbeat::{HeartbeatMonitor, HeartbeatTimer};
use crate::application::ports::TransportHandle;
use crate::domain::subscription::{ConnectionState, EndpointId, SubscriptionDescriptor};
use crate::infrastructure::metrics;

/// Serial number distinguishing successive connections to one endpoint.
pub type ConnectionId = u64;

// =============================================================================
// Connection
// =============================================================================

/// One logical streaming subscription and its transport.
pub struct Connection {
    id: ConnectionId,
    endpoint_id: EndpointId,
    descriptor: SubscriptionDescriptor,
    transport: Arc<dyn TransportHandle>,
    state: RwLock<ConnectionState>,
    is_alive: AtomicBool,
    auto_reconnect: AtomicBool,
    messages_attached: AtomicBool,
}

impl Connection {
    /// Create a connection in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new(
        id: ConnectionId,
        descriptor: SubscriptionDescriptor,
        transport: Arc<dyn TransportHandle>,
        auto_reconnect: bool,
    ) -> Self {
        Self {
            id,
            endpoint_id: descriptor.endpoint_id(),
            descriptor,
            transport,
            state: RwLock::new(ConnectionState::Connecting),
            is_alive: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(auto_reconnect),
            messages_attached: AtomicBool::new(true),
        }
    }

    /// Connection serial number.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Registry key.
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// The descriptor replayed on reconnect.
    #[must_use]
    pub const fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    /// The owned transport.
    #[must_use]
    pub fn transport(&self) -> &dyn TransportHandle {
        self.transport.as_ref()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Whether a pong arrived since the last heartbeat probe.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    /// Record a probe acknowledgment (or the open event).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag, returning its previous value.
    pub(crate) fn take_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::SeqCst)
    }

    /// Whether a close should trigger a reconnect.
    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    pub(crate) fn disable_reconnect(&self) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
    }

    /// Whether inbound frames are still delivered to the callback.
    #[must_use]
    pub fn messages_attached(&self) -> bool {
        self.messages_attached.load(Ordering::SeqCst)
    }

    pub(crate) fn detach_messages(&self) {
        self.messages_attached.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint_id", &self.endpoint_id)
            .field("class", &self.descriptor.class())
            .field("state", &self.state())
            .field("is_alive", &self.is_alive())
            .field("auto_reconnect", &self.auto_reconnect())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<EndpointId, Arc<Connection>>,
    timer: Option<HeartbeatTimer>,
}

/// Open connections of one stream manager, keyed by endpoint identifier.
///
/// Constructed behind an `Arc` so the heartbeat task can hold a weak
/// reference back to the registry it sweeps.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    monitor: HeartbeatMonitor,
    self_ref: Weak<Self>,
}

impl SubscriptionRegistry {
    /// Create an empty registry whose heartbeat uses `monitor`.
    #[must_use]
    pub fn new(monitor: HeartbeatMonitor) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            inner: Mutex::new(RegistryInner::default()),
            monitor,
            self_ref: self_ref.clone(),
        })
    }

    /// Insert `connection` under its endpoint identifier.
    ///
    /// An existing entry for the same endpoint is replaced and returned.
    /// Starts the heartbeat when the registry was empty.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut inner = self.inner.lock();
        let was_empty = inner.entries.is_empty();
        let previous = inner
            .entries
            .insert(connection.endpoint_id().to_string(), connection);

        if was_empty {
            inner.timer = Some(self.monitor.start(self.self_ref.clone()));
            metrics::set_heartbeat_running(true);
            tracing::debug!("Heartbeat started");
        }
        metrics::set_open_connections(inner.entries.len());

        previous
    }

    /// Remove the entry for `endpoint_id` if it belongs to connection `id`.
    ///
    /// Returns whether an entry was removed. A missing entry, or one owned by
    /// a newer connection to the same endpoint, is left alone. Stops the
    /// heartbeat when the registry becomes empty.
    pub fn remove(&self, endpoint_id: &str, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        let owned = inner
            .entries
            .get(endpoint_id)
            .is_some_and(|connection| connection.id() == id);
        if !owned {
            return false;
        }

        inner.entries.remove(endpoint_id);
        if inner.entries.is_empty()
            && let Some(timer) = inner.timer.take()
        {
            timer.stop();
            metrics::set_heartbeat_running(false);
            tracing::debug!("Heartbeat stopped");
        }
        metrics::set_open_connections(inner.entries.len());

        true
    }

    /// Connection registered under `endpoint_id`.
    #[must_use]
    pub fn get(&self, endpoint_id: &str) -> Option<Arc<Connection>> {
        self.inner.lock().entries.get(endpoint_id).cloned()
    }

    /// Whether `endpoint_id` is registered.
    #[must_use]
    pub fn contains(&self, endpoint_id: &str) -> bool {
        self.inner.lock().entries.contains_key(endpoint_id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Whether the heartbeat timer is currently running.
    #[must_use]
    pub fn heartbeat_running(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Registered endpoint identifiers, in no particular order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Point-in-time copy of the registry.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<EndpointId, Arc<Connection>> {
        self.inner.lock().entries.clone()
    }

    /// Visit every registered connection while holding the registry lock.
    ///
    /// `f` must not call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Arc<Connection>)) {
        let inner = self.inner.lock();
        for (endpoint_id, connection) in &inner.entries {
            f(endpoint_id, connection);
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("endpoints", &inner.entries.keys().collect::<Vec<_>>())
            .field("heartbeat_running", &inner.timer.is_some())
            .finish()
    }
}
