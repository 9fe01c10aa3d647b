//! WebSocket Transport
//!
//! [`TransportConnector`] backed by `tokio-tungstenite`. Each opened
//! transport runs one I/O task that owns the socket, forwards inbound frames
//! as [`TransportEvent`]s and executes ping and terminate commands from its
//! [`WsHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::application::ports::{
    ABNORMAL_CLOSURE, ReadyState, TransportConnector, TransportError, TransportEvent,
    TransportHandle, TransportPair,
};

/// Default Bitkub stream base URL.
pub const DEFAULT_STREAM_URL: &str = "wss://api.bitkub.com/websocket-api/";

const DEFAULT_EVENT_BUFFER: usize = 1024;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

const fn ready_state(raw: u8) -> ReadyState {
    match raw {
        CONNECTING => ReadyState::Connecting,
        OPEN => ReadyState::Open,
        CLOSING => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Ping,
    Terminate,
}

// =============================================================================
// Connector
// =============================================================================

/// Opens `tokio-tungstenite` WebSocket transports.
#[derive(Debug, Clone)]
pub struct WsConnector {
    event_buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Bound on undelivered events per transport. A slow consumer applies
    /// backpressure to the socket read.
    #[must_use]
    pub const fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }
}

impl TransportConnector for WsConnector {
    fn open(&self, url: &str) -> Result<TransportPair, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(self.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(CONNECTING));

        tokio::spawn(run_socket(
            request,
            Arc::clone(&state),
            event_tx,
            command_rx,
        ));

        let handle = WsHandle {
            state,
            commands: command_tx,
        };
        Ok(TransportPair::new(Arc::new(handle), event_rx))
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle of one WebSocket transport.
#[derive(Debug)]
pub struct WsHandle {
    state: Arc<AtomicU8>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TransportHandle for WsHandle {
    fn ready_state(&self) -> ReadyState {
        ready_state(self.state.load(Ordering::SeqCst))
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.commands
            .send(Command::Ping)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn terminate(&self) {
        let requested = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                (raw == CONNECTING || raw == OPEN).then_some(CLOSING)
            })
            .is_ok();
        if requested {
            let _ = self.commands.send(Command::Terminate);
        }
    }
}

// =============================================================================
// I/O Task
// =============================================================================

const fn abnormal_closure() -> TransportEvent {
    TransportEvent::Close {
        code: Some(ABNORMAL_CLOSURE),
        reason: String::new(),
    }
}

async fn run_socket(
    request: Request,
    state: Arc<AtomicU8>,
    events: mpsc::Sender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let close = drive_socket(request, &state, &events, &mut commands).await;
    state.store(CLOSED, Ordering::SeqCst);
    let _ = events.send(close).await;
}

async fn drive_socket(
    request: Request,
    state: &AtomicU8,
    events: &mpsc::Sender<TransportEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> TransportEvent {
    let connect = tokio_tungstenite::connect_async(request);
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string())).await;
                    return abnormal_closure();
                }
            },
            command = commands.recv() => match command {
                // Probes are only sent to open sockets.
                Some(Command::Ping) => {}
                Some(Command::Terminate) | None => return abnormal_closure(),
            },
        }
    };

    if state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return abnormal_closure();
    }
    if events.send(TransportEvent::Open).await.is_err() {
        return abnormal_closure();
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Ping) => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        return abnormal_closure();
                    }
                }
                Some(Command::Terminate) | None => return abnormal_closure(),
            },
            message = read.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => TransportEvent::Message(text.to_owned()),
                        Err(e) => TransportEvent::Error(format!("binary frame is not UTF-8: {e}")),
                    },
                    Some(Ok(Message::Pong(_))) => TransportEvent::Pong,
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                            return abnormal_closure();
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => TransportEvent::Close {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => TransportEvent::Close {
                                code: None,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        return abnormal_closure();
                    }
                    None => return abnormal_closure(),
                };

                if events.send(event).await.is_err() {
                    return abnormal_closure();
                }
            }
        }
    }
}
