//! Stream Manager
//!
//! Opens subscriptions through the transport port, drives each connection's
//! event stream, and replays closed subscriptions.
//!
//! # Connection Lifecycle
//!
//! ```text
//! subscribe ──► Connecting ──Open──► Open ──Close──► Closed
//!                   │                                  │
//!                   └─────────────Close────────────────┤
//!                                                      ▼
//!                                   reconnect? ──► (backoff) ──► subscribe
//! ```
//!
//! A connection enters the registry when its transport opens and leaves it
//! when the transport closes. Each connection has one task that consumes its
//! transport events in order, so frames reach the callback in arrival order.
//!
//! Manual termination detaches the callback and disables reconnection before
//! the transport is torn down. The registry entry is removed immediately; the
//! close event that follows finds nothing left to do.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use super::reconnect::{ReconnectBackoff, ReconnectConfig};
use super::registry::{Connection, ConnectionId, SubscriptionRegistry};
use crate::application::ports::{TransportConnector, TransportError, TransportEvent};
use crate::domain::streaming::FrameDecoder;
use crate::domain::subscription::{
    ConnectionState, EndpointId, MessageCallback, OpenedCallback, StreamClass, StreamOptions,
    SubscriptionDescriptor, SymbolSelection, find_duplicate,
};
use crate::domain::symbol::{BitkubSymbolMapper, ChannelKind, SymbolMapper};
use crate::infrastructure::bitkub::DEFAULT_STREAM_URL;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned to callers of [`StreamManager`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A multi-symbol selection named the same symbol twice.
    #[error("{operation}: \"symbols\" cannot contain duplicate elements (`{symbol}`)")]
    DuplicateSymbols {
        /// Operation that rejected the selection.
        operation: &'static str,
        /// The repeated symbol.
        symbol: String,
    },

    /// A multi-symbol selection was empty.
    #[error("{operation}: \"symbols\" cannot be empty")]
    EmptySelection {
        /// Operation that rejected the selection.
        operation: &'static str,
    },

    /// The transport could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The manager has been shut down.
    #[error("stream manager has been shut down")]
    ShutDown,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a [`StreamManager`].
#[derive(Debug, Clone)]
pub struct StreamManagerConfig {
    /// Base URL; the endpoint identifier is appended to it.
    pub base_url: String,
    /// Initial caller options.
    pub options: StreamOptions,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Backoff between a close and the replay.
    pub reconnect: ReconnectConfig,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_STREAM_URL.to_string(),
            options: StreamOptions::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Caller's view of one connection.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    connection: Arc<Connection>,
}

impl SubscriptionHandle {
    const fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Registry key of the subscription.
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        self.connection.endpoint_id()
    }

    /// Serial number of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Stream class.
    #[must_use]
    pub fn stream_class(&self) -> StreamClass {
        self.connection.descriptor().class()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.transport().is_open()
    }

    /// Whether a pong arrived since the last heartbeat probe.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }
}

// =============================================================================
// Stream Manager
// =============================================================================

struct Inner {
    base_url: String,
    options: RwLock<StreamOptions>,
    registry: Arc<SubscriptionRegistry>,
    connecting: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    pending_reconnects: Mutex<HashMap<EndpointId, CancellationToken>>,
    connector: Arc<dyn TransportConnector>,
    mapper: Arc<dyn SymbolMapper>,
    backoff: ReconnectBackoff,
    cancel: CancellationToken,
    next_connection_id: AtomicU64,
}

/// Manages the streaming subscriptions of one client.
///
/// Cheap to clone; clones share state. Every operation that opens a
/// connection must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

impl StreamManager {
    /// Create a manager using the Bitkub channel naming rules.
    #[must_use]
    pub fn new(config: StreamManagerConfig, connector: Arc<dyn TransportConnector>) -> Self {
        Self::with_mapper(config, connector, Arc::new(BitkubSymbolMapper::new()))
    }

    /// Create a manager with a custom symbol mapper.
    #[must_use]
    pub fn with_mapper(
        config: StreamManagerConfig,
        connector: Arc<dyn TransportConnector>,
        mapper: Arc<dyn SymbolMapper>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: config.base_url,
                options: RwLock::new(config.options),
                registry: SubscriptionRegistry::new(HeartbeatMonitor::new(config.heartbeat)),
                connecting: Mutex::new(HashMap::new()),
                pending_reconnects: Mutex::new(HashMap::new()),
                connector,
                mapper,
                backoff: ReconnectBackoff::new(config.reconnect),
                cancel: CancellationToken::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Options
    // -------------------------------------------------------------------------

    /// Current options.
    #[must_use]
    pub fn options(&self) -> StreamOptions {
        *self.inner.options.read()
    }

    /// Replace all options. Live streams pick up the decode options with
    /// their next frame.
    pub fn set_options(&self, options: StreamOptions) {
        *self.inner.options.write() = options;
    }

    /// Modify options in place.
    pub fn update_options(&self, f: impl FnOnce(&mut StreamOptions)) {
        f(&mut self.inner.options.write());
    }

    /// The registry of open connections.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    // -------------------------------------------------------------------------
    // Raw subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe to a single-channel stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the manager has
    /// been shut down.
    pub fn subscribe(
        &self,
        endpoint: impl Into<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Result<SubscriptionHandle, StreamError> {
        self.open(SubscriptionDescriptor::single(
            endpoint,
            callback,
            auto_reconnect,
            opened,
        ))
    }

    /// Subscribe to one combined stream over `channels`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the manager has
    /// been shut down.
    pub fn subscribe_combined(
        &self,
        channels: Vec<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Result<SubscriptionHandle, StreamError> {
        self.open(SubscriptionDescriptor::combined(
            channels,
            callback,
            auto_reconnect,
            opened,
        ))
    }

    /// Subscribe to an order-book stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the manager has
    /// been shut down.
    pub fn subscribe_order_book(
        &self,
        endpoint: impl Into<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Result<SubscriptionHandle, StreamError> {
        self.open(SubscriptionDescriptor::order_book(
            endpoint,
            callback,
            auto_reconnect,
            opened,
        ))
    }

    // -------------------------------------------------------------------------
    // Convenience subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe to ticker updates for one or several symbols.
    ///
    /// Returns the endpoint identifier of the new subscription.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::DuplicateSymbols`] if a multi-symbol selection
    /// repeats a symbol; nothing is opened in that case.
    pub fn tickers(
        &self,
        symbols: impl Into<SymbolSelection>,
        callback: MessageCallback,
    ) -> Result<EndpointId, StreamError> {
        self.subscribe_symbols("tickers", ChannelKind::Ticker, symbols.into(), callback)
    }

    /// Subscribe to trades for one or several symbols.
    ///
    /// Returns the endpoint identifier of the new subscription.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::DuplicateSymbols`] if a multi-symbol selection
    /// repeats a symbol; nothing is opened in that case.
    pub fn trades(
        &self,
        symbols: impl Into<SymbolSelection>,
        callback: MessageCallback,
    ) -> Result<EndpointId, StreamError> {
        self.subscribe_symbols("trades", ChannelKind::Trade, symbols.into(), callback)
    }

    /// Subscribe to the order book of `symbol_id`.
    ///
    /// Returns the endpoint identifier of the new subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL is invalid or the manager has
    /// been shut down.
    pub fn order_book(
        &self,
        symbol_id: u32,
        callback: MessageCallback,
    ) -> Result<EndpointId, StreamError> {
        let endpoint = self.inner.mapper.order_book_channel(symbol_id);
        let handle = self.subscribe_order_book(endpoint, callback, true, None)?;
        Ok(handle.endpoint_id().to_string())
    }

    fn subscribe_symbols(
        &self,
        operation: &'static str,
        kind: ChannelKind,
        selection: SymbolSelection,
        callback: MessageCallback,
    ) -> Result<EndpointId, StreamError> {
        let sanitize = self.inner.options.read().sanitize;
        let mapper = &self.inner.mapper;

        let handle = match selection {
            SymbolSelection::Single(symbol) => {
                self.subscribe(mapper.channel(kind, &symbol, sanitize), callback, true, None)?
            }
            SymbolSelection::Many(symbols) => {
                if let Some(symbol) = find_duplicate(&symbols) {
                    return Err(StreamError::DuplicateSymbols {
                        operation,
                        symbol: symbol.to_string(),
                    });
                }
                if symbols.is_empty() {
                    return Err(StreamError::EmptySelection { operation });
                }
                let channels = symbols
                    .iter()
                    .map(|symbol| mapper.channel(kind, symbol, sanitize))
                    .collect();
                self.subscribe_combined(channels, callback, true, None)?
            }
        };

        Ok(handle.endpoint_id().to_string())
    }

    // -------------------------------------------------------------------------
    // Termination
    // -------------------------------------------------------------------------

    /// Terminate the subscription registered under `endpoint_id`.
    ///
    /// Stops frame delivery and disables reconnection before tearing the
    /// transport down. A pending reconnect of the endpoint is cancelled.
    /// Unknown identifiers are ignored.
    pub fn terminate(&self, endpoint_id: &str) {
        if let Some(pending) = self.inner.pending_reconnects.lock().remove(endpoint_id) {
            pending.cancel();
            tracing::debug!(endpoint = %endpoint_id, "Pending reconnect cancelled");
        }
        self.inner.backoff.reset(endpoint_id);

        let connection = self.inner.registry.get(endpoint_id).or_else(|| {
            self.inner
                .connecting
                .lock()
                .values()
                .find(|connection| connection.endpoint_id() == endpoint_id)
                .cloned()
        });

        let Some(connection) = connection else {
            tracing::debug!(endpoint = %endpoint_id, "Terminate ignored, no such subscription");
            return;
        };

        if self.inner.options.read().verbose {
            tracing::info!(endpoint = %endpoint_id, "Terminating WebSocket");
        }

        self.close_manually(&connection);
    }

    /// Current subscriptions, keyed by endpoint identifier.
    #[must_use]
    pub fn subscriptions(&self) -> HashMap<EndpointId, SubscriptionHandle> {
        self.inner
            .registry
            .snapshot()
            .into_iter()
            .map(|(endpoint_id, connection)| (endpoint_id, SubscriptionHandle::new(connection)))
            .collect()
    }

    /// Terminate every connection and cancel pending reconnects.
    ///
    /// Subscribing after shutdown fails with [`StreamError::ShutDown`].
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.pending_reconnects.lock().clear();
        self.inner.backoff.clear();

        let connecting: Vec<_> = self.inner.connecting.lock().values().cloned().collect();
        let open = self.inner.registry.snapshot().into_values();

        let mut count = 0usize;
        for connection in connecting.into_iter().chain(open) {
            self.close_manually(&connection);
            count += 1;
        }

        tracing::info!(connections = count, "Stream manager shut down");
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn close_manually(&self, connection: &Arc<Connection>) {
        connection.detach_messages();
        connection.disable_reconnect();
        connection.transport().terminate();
        self.inner.connecting.lock().remove(&connection.id());
        self.inner
            .registry
            .remove(connection.endpoint_id(), connection.id());
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn open(&self, descriptor: SubscriptionDescriptor) -> Result<SubscriptionHandle, StreamError> {
        if self.is_shut_down() {
            return Err(StreamError::ShutDown);
        }

        let endpoint_id = descriptor.endpoint_id();
        let url = format!("{}{endpoint_id}", self.inner.base_url);
        let pair = self.inner.connector.open(&url)?;

        let options = self.options();
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let auto_reconnect = descriptor.auto_reconnect() && options.reconnect;
        let decoder = FrameDecoder::new(descriptor.class(), Arc::clone(&self.inner.mapper));
        let connection = Arc::new(Connection::new(id, descriptor, pair.handle, auto_reconnect));

        if options.verbose {
            tracing::info!(endpoint = %endpoint_id, "Subscribed to {endpoint_id}");
        }

        self.inner
            .connecting
            .lock()
            .insert(id, Arc::clone(&connection));

        tokio::spawn(
            self.clone()
                .drive(Arc::clone(&connection), pair.events, decoder),
        );

        Ok(SubscriptionHandle::new(connection))
    }

    async fn drive(
        self,
        connection: Arc<Connection>,
        mut events: mpsc::Receiver<TransportEvent>,
        decoder: FrameDecoder,
    ) {
        let class = decoder.class();

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Open => self.handle_open(&connection),
                TransportEvent::Message(text) => {
                    if !connection.messages_attached() {
                        continue;
                    }
                    metrics::record_frame_received(class);
                    let options = self.inner.options.read().decode_options();
                    match decoder.decode(&text, options) {
                        Ok(Some(frame)) => {
                            metrics::record_frame_forwarded(class);
                            let callback = connection.descriptor().callback();
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(frame))) {
                                log_callback_panic(connection.endpoint_id(), "message", &*panic);
                            }
                        }
                        Ok(None) => metrics::record_frame_filtered(class),
                        Err(e) => {
                            metrics::record_frame_decode_error(class);
                            tracing::warn!(
                                endpoint = %connection.endpoint_id(),
                                error = %e,
                                "Parse error"
                            );
                        }
                    }
                }
                TransportEvent::Pong => connection.mark_alive(),
                TransportEvent::Error(error) => {
                    metrics::record_transport_error();
                    tracing::warn!(
                        endpoint = %connection.endpoint_id(),
                        error = %error,
                        "WebSocket error"
                    );
                }
                TransportEvent::Close { code, reason } => {
                    self.handle_close(&connection, code, &reason);
                    return;
                }
            }
        }

        self.handle_close(&connection, None, "");
    }

    fn handle_open(&self, connection: &Arc<Connection>) {
        self.inner.connecting.lock().remove(&connection.id());

        if !connection.messages_attached() {
            // Terminated while connecting; the close event is on its way.
            return;
        }

        connection.set_state(ConnectionState::Open);
        connection.mark_alive();

        let endpoint_id = connection.endpoint_id();
        if let Some(previous) = self.inner.registry.insert(Arc::clone(connection))
            && previous.id() != connection.id()
        {
            tracing::warn!(
                endpoint = %endpoint_id,
                replaced = previous.id(),
                "Replaced an existing subscription for the same endpoint"
            );
        }
        self.inner.backoff.reset(endpoint_id);
        tracing::debug!(endpoint = %endpoint_id, connection = connection.id(), "WebSocket opened");

        if let Some(opened) = connection.descriptor().opened()
            && let Err(panic) = catch_unwind(AssertUnwindSafe(|| opened(endpoint_id)))
        {
            log_callback_panic(endpoint_id, "opened", &*panic);
        }
    }

    fn handle_close(&self, connection: &Arc<Connection>, code: Option<u16>, reason: &str) {
        connection.set_state(ConnectionState::Closed);
        self.inner.connecting.lock().remove(&connection.id());
        let endpoint_id = connection.endpoint_id();
        self.inner.registry.remove(endpoint_id, connection.id());

        tracing::info!(
            endpoint = %endpoint_id,
            code = ?code,
            reason = %reason,
            "WebSocket closed"
        );

        let reconnect = self.inner.options.read().reconnect
            && connection.auto_reconnect()
            && !self.is_shut_down();
        if reconnect {
            self.schedule_reconnect(connection.descriptor().clone());
        }
    }

    fn schedule_reconnect(&self, descriptor: SubscriptionDescriptor) {
        let endpoint_id = descriptor.endpoint_id();

        let delay = match self.inner.backoff.next_delay(&endpoint_id) {
            Ok(delay) => delay,
            Err(e) => {
                self.inner.backoff.reset(&endpoint_id);
                metrics::record_reconnect_abandoned();
                tracing::error!(endpoint = %endpoint_id, error = %e, "WebSocket reconnect error");
                return;
            }
        };

        tracing::info!(
            endpoint = %endpoint_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "WebSocket reconnecting"
        );

        let cancel = self.inner.cancel.child_token();
        if let Some(previous) = self
            .inner
            .pending_reconnects
            .lock()
            .insert(endpoint_id.clone(), cancel.clone())
        {
            previous.cancel();
        }

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() {
                return;
            }
            manager.inner.pending_reconnects.lock().remove(&endpoint_id);

            metrics::record_reconnect();
            if let Err(e) = manager.open(descriptor) {
                tracing::error!(endpoint = %endpoint_id, error = %e, "WebSocket reconnect error");
            }
        });
    }
}

/// A panicking callback loses its frame, not its connection.
fn log_callback_panic(endpoint_id: &str, callback: &'static str, panic: &(dyn Any + Send)) {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    tracing::error!(endpoint = %endpoint_id, callback, panic = message, "Callback panicked");
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("base_url", &self.inner.base_url)
            .field("options", &*self.inner.options.read())
            .field("registry", &self.inner.registry)
            .field("connecting", &self.inner.connecting.lock().len())
            .finish_non_exhaustive()
    }
}
