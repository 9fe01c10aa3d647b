//! Market Data Streaming Types
//!
//! Inbound frames and the decode/filter pipeline applied to them before they
//! reach a subscription callback.
//!
//! Decoding is a side channel: its only observable outcomes are "forward the
//! frame" or "drop it". It never touches connection lifecycle state.

mod decoder;
mod frame;

pub use decoder::{DecodeError, DecodeOptions, FrameDecoder};
pub use frame::{OrderBookEvent, StreamFrame};
