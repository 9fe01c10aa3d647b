//! Bitkub WebSocket adapter.
//!
//! - [`WsConnector`]: opens streams against `wss://api.bitkub.com/websocket-api/`
//! - [`WsHandle`]: probe and terminate one open stream

mod transport;

pub use transport::{DEFAULT_STREAM_URL, WsConnector, WsHandle};
