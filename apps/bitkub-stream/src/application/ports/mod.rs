//! Port Interfaces
//!
//! The transport port: how the lifecycle controller opens, probes and
//! terminates a socket without depending on a WebSocket library.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TransportConnector`]: opens a transport for a URL, returning
//!   immediately with a handle and the ordered event stream of that transport
//! - [`TransportHandle`]: ping, terminate and open-state query on one
//!   transport
//!
//! Events are delivered through a per-transport channel in arrival order.
//! Every transport ends its event stream with [`TransportEvent::Close`],
//! including after errors and after [`TransportHandle::terminate`].

use std::sync::Arc;

use tokio::sync::mpsc;

/// Close code reported when a transport is torn down without a close
/// handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket finished opening.
    Open,
    /// A data frame arrived.
    Message(String),
    /// A ping acknowledgment arrived.
    Pong,
    /// A transport-level error. A `Close` follows.
    Error(String),
    /// The socket closed.
    Close {
        /// Close code, if the peer or transport supplied one.
        code: Option<u16>,
        /// Close reason; empty when none was given.
        reason: String,
    },
}

/// Socket ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Opening.
    Connecting,
    /// Open and able to send.
    Open,
    /// Termination requested.
    Closing,
    /// Fully closed.
    Closed,
}

/// Transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The endpoint URL could not be turned into a connection request.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// The operation needs an open transport.
    #[error("transport is not open")]
    NotOpen,

    /// The transport's I/O task has gone away.
    #[error("transport task has stopped")]
    ChannelClosed,
}

/// Operations on one open or opening transport.
#[cfg_attr(test, mockall::automock)]
pub trait TransportHandle: Send + Sync {
    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Whether the transport can send.
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Send a liveness probe. Its acknowledgment arrives as
    /// [`TransportEvent::Pong`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open or its I/O task is gone.
    fn ping(&self) -> Result<(), TransportError>;

    /// Tear the transport down immediately. Emits [`TransportEvent::Close`]
    /// through the normal event stream. Idempotent.
    fn terminate(&self);
}

/// A freshly opened transport: its handle and its event stream.
pub struct TransportPair {
    /// Handle for probes and termination.
    pub handle: Arc<dyn TransportHandle>,
    /// Ordered events of this transport.
    pub events: mpsc::Receiver<TransportEvent>,
}

impl TransportPair {
    /// Bundle a handle with its event stream.
    #[must_use]
    pub fn new(handle: Arc<dyn TransportHandle>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self { handle, events }
    }
}

impl std::fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPair")
            .field("ready_state", &self.handle.ready_state())
            .finish_non_exhaustive()
    }
}

/// Opens transports.
pub trait TransportConnector: Send + Sync {
    /// Start opening a transport to `url`.
    ///
    /// Returns without waiting for the socket to open; the outcome is
    /// reported through the returned event stream.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` cannot be used to build a connection request.
    fn open(&self, url: &str) -> Result<TransportPair, TransportError>;
}
