//! Subscription Domain Types
//!
//! Types describing what a caller asked to stream and how frames of that
//! stream are treated.
//!
//! # Design
//!
//! A subscription is captured once, at subscribe time, as a
//! [`SubscriptionDescriptor`]. The descriptor is a plain owned value: the
//! lifecycle controller replays it to re-establish an equivalent stream after
//! a close, so reconnection never needs an opaque captured closure.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::streaming::{DecodeOptions, StreamFrame};

// =============================================================================
// Types
// =============================================================================

/// Registry key for a connection: a single channel name, or the
/// comma-joined channel list of a combined stream.
pub type EndpointId = String;

/// Callback receiving every forwarded frame of a subscription.
pub type MessageCallback = Arc<dyn Fn(StreamFrame) + Send + Sync>;

/// Callback invoked with the endpoint identifier once a connection opens.
pub type OpenedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Stream class, resolved at subscribe time.
///
/// Each class carries its own forwarding policy in the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamClass {
    /// A single ticker or trade channel.
    Plain,
    /// Several channels multiplexed over one connection.
    Combined,
    /// An order-book stream filtered by event tag.
    OrderBook,
}

impl StreamClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Combined => "combined",
            Self::OrderBook => "order_book",
        }
    }
}

/// Lifecycle state of a single connection.
///
/// There is no reconnecting state: reconnection starts a fresh connection
/// in [`ConnectionState::Connecting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport requested, open event not yet received.
    Connecting,
    /// Open event received; present in the registry.
    Open,
    /// Close event received, or terminated manually.
    Closed,
}

// =============================================================================
// Options
// =============================================================================

/// Caller-facing options read by the lifecycle controller and decoder.
///
/// Options are read when an event is handled, so changes made through
/// the manager apply to streams that are already open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct StreamOptions {
    /// Global switch for automatic reconnection.
    pub reconnect: bool,
    /// Emit verbose diagnostics (subscribe and terminate notices).
    pub verbose: bool,
    /// Derive display symbols from channel names and build channel names
    /// from display symbols.
    pub sanitize: bool,
    /// Drop per-symbol `ticker` events on order-book streams.
    pub ignore_tickers: bool,
    /// Drop `global.ticker` events on order-book streams.
    pub ignore_global_tickers: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            verbose: false,
            sanitize: false,
            ignore_tickers: false,
            ignore_global_tickers: true,
        }
    }
}

impl StreamOptions {
    /// The subset of options consumed by the frame decoder.
    #[must_use]
    pub const fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            sanitize: self.sanitize,
            ignore_tickers: self.ignore_tickers,
            ignore_global_tickers: self.ignore_global_tickers,
        }
    }
}

// =============================================================================
// Symbol Selection
// =============================================================================

/// One symbol or a batch of symbols passed to the convenience operations.
///
/// A single symbol subscribes a plain stream; a batch subscribes one
/// combined stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolSelection {
    /// A single symbol.
    Single(String),
    /// Several symbols, which must be unique.
    Many(Vec<String>),
}

impl SymbolSelection {
    /// Returns the first symbol that appears more than once, if any.
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&str> {
        match self {
            Self::Single(_) => None,
            Self::Many(symbols) => find_duplicate(symbols),
        }
    }
}

impl From<&str> for SymbolSelection {
    fn from(symbol: &str) -> Self {
        Self::Single(symbol.to_string())
    }
}

impl From<String> for SymbolSelection {
    fn from(symbol: String) -> Self {
        Self::Single(symbol)
    }
}

impl From<Vec<String>> for SymbolSelection {
    fn from(symbols: Vec<String>) -> Self {
        Self::Many(symbols)
    }
}

impl From<&[&str]> for SymbolSelection {
    fn from(symbols: &[&str]) -> Self {
        Self::Many(symbols.iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SymbolSelection {
    fn from(symbols: [&str; N]) -> Self {
        Self::Many(symbols.iter().map(ToString::to_string).collect())
    }
}

/// Returns the first element of `items` that already appeared earlier.
#[must_use]
pub fn find_duplicate(items: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .find(|item| !seen.insert(item.as_str()))
        .map(String::as_str)
}

// =============================================================================
// Subscription Descriptor
// =============================================================================

/// Everything needed to (re-)establish one logical subscription.
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    class: StreamClass,
    channels: Vec<String>,
    callback: MessageCallback,
    opened: Option<OpenedCallback>,
    auto_reconnect: bool,
}

impl SubscriptionDescriptor {
    /// Describe a single-channel stream.
    #[must_use]
    pub fn single(
        endpoint: impl Into<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Self {
        Self {
            class: StreamClass::Plain,
            channels: vec![endpoint.into()],
            callback,
            opened,
            auto_reconnect,
        }
    }

    /// Describe a combined stream over `channels`, in the given order.
    #[must_use]
    pub fn combined(
        channels: Vec<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Self {
        Self {
            class: StreamClass::Combined,
            channels,
            callback,
            opened,
            auto_reconnect,
        }
    }

    /// Describe an order-book stream.
    #[must_use]
    pub fn order_book(
        endpoint: impl Into<String>,
        callback: MessageCallback,
        auto_reconnect: bool,
        opened: Option<OpenedCallback>,
    ) -> Self {
        Self {
            class: StreamClass::OrderBook,
            channels: vec![endpoint.into()],
            callback,
            opened,
            auto_reconnect,
        }
    }

    /// The registry key of this subscription.
    #[must_use]
    pub fn endpoint_id(&self) -> EndpointId {
        self.channels.join(",")
    }

    /// Stream class.
    #[must_use]
    pub const fn class(&self) -> StreamClass {
        self.class
    }

    /// Channels in subscription order.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Frame callback.
    #[must_use]
    pub const fn callback(&self) -> &MessageCallback {
        &self.callback
    }

    /// Opened callback, if one was supplied.
    #[must_use]
    pub const fn opened(&self) -> Option<&OpenedCallback> {
        self.opened.as_ref()
    }

    /// Whether the caller asked for automatic reconnection.
    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }
}

impl fmt::Debug for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("class", &self.class)
            .field("channels", &self.channels)
            .field("has_opened_callback", &self.opened.is_some())
            .field("auto_reconnect", &self.auto_reconnect)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> MessageCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn default_options_match_client_defaults() {
        let options = StreamOptions::default();
        assert!(options.reconnect);
        assert!(!options.verbose);
        assert!(!options.sanitize);
        assert!(!options.ignore_tickers);
        assert!(options.ignore_global_tickers);
    }

    #[test]
    fn decode_options_copy_filter_flags() {
        let options = StreamOptions {
            sanitize: true,
            ignore_tickers: true,
            ignore_global_tickers: false,
            ..StreamOptions::default()
        };
        let decode = options.decode_options();
        assert!(decode.sanitize);
        assert!(decode.ignore_tickers);
        assert!(!decode.ignore_global_tickers);
    }

    #[test]
    fn combined_endpoint_joins_channels_in_order() {
        let descriptor = SubscriptionDescriptor::combined(
            vec![
                "market.ticker.thb_eth".to_string(),
                "market.ticker.thb_btc".to_string(),
            ],
            noop(),
            true,
            None,
        );
        assert_eq!(
            descriptor.endpoint_id(),
            "market.ticker.thb_eth,market.ticker.thb_btc"
        );
        assert_eq!(descriptor.class(), StreamClass::Combined);
    }

    #[test]
    fn single_endpoint_is_channel_name() {
        let descriptor = SubscriptionDescriptor::single("market.trade.thb_btc", noop(), false, None);
        assert_eq!(descriptor.endpoint_id(), "market.trade.thb_btc");
        assert!(!descriptor.auto_reconnect());
        assert!(descriptor.opened().is_none());
    }

    #[test]
    fn duplicate_detection() {
        let unique: SymbolSelection = ["BTC/THB", "ETH/THB"].into();
        assert_eq!(unique.first_duplicate(), None);

        let duplicated: SymbolSelection = ["BTC/THB", "ETH/THB", "BTC/THB"].into();
        assert_eq!(duplicated.first_duplicate(), Some("BTC/THB"));

        let single: SymbolSelection = "BTC/THB".into();
        assert_eq!(single.first_duplicate(), None);
    }

    #[test]
    fn debug_omits_callbacks() {
        let descriptor = SubscriptionDescriptor::order_book("orderbook/1", noop(), true, None);
        let debug = format!("{descriptor:?}");
        assert!(debug.contains("OrderBook"));
        assert!(debug.contains("orderbook/1"));
    }
}
