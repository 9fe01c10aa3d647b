//! Stream Frame Types
//!
//! Bitkub frames are JSON objects whose shape depends on the channel. Ticker
//! and trade frames carry the channel name in `stream`; order-book frames
//! carry an `event` tag and a nested `data` object. Frames are kept as JSON
//! maps so fields the client does not interpret reach the caller untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event tags on order-book streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderBookEvent {
    /// Bid side changed.
    BidsChanged,
    /// Ask side changed.
    AsksChanged,
    /// Recent trades changed.
    TradesChanged,
    /// Per-symbol ticker.
    Ticker,
    /// Market-wide ticker.
    GlobalTicker,
}

impl OrderBookEvent {
    /// Parse a wire tag. Unknown tags yield `None`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bidschanged" => Some(Self::BidsChanged),
            "askschanged" => Some(Self::AsksChanged),
            "tradeschanged" => Some(Self::TradesChanged),
            "ticker" => Some(Self::Ticker),
            "global.ticker" => Some(Self::GlobalTicker),
            _ => None,
        }
    }

    /// The wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BidsChanged => "bidschanged",
            Self::AsksChanged => "askschanged",
            Self::TradesChanged => "tradeschanged",
            Self::Ticker => "ticker",
            Self::GlobalTicker => "global.ticker",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamFrame {
    fields: Map<String, Value>,
}

impl StreamFrame {
    /// Wrap a decoded JSON object.
    #[must_use]
    pub const fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Channel name (`stream` field) of ticker and trade frames.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.fields.get("stream").and_then(Value::as_str)
    }

    /// Raw `event` tag of order-book frames.
    #[must_use]
    pub fn event_tag(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }

    /// Parsed `event` tag of order-book frames.
    #[must_use]
    pub fn event(&self) -> Option<OrderBookEvent> {
        self.event_tag().and_then(OrderBookEvent::from_tag)
    }

    /// Display symbol added by sanitization.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.fields.get("symbol").and_then(Value::as_str)
    }

    /// Nested `data` object of order-book frames.
    #[must_use]
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.fields.get("data").and_then(Value::as_object)
    }

    /// Any top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All top-level fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the frame into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub(crate) fn set_symbol(&mut self, symbol: String) {
        self.fields.insert("symbol".to_string(), Value::String(symbol));
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.fields.get_mut("data").and_then(Value::as_object_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> StreamFrame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn event_tags_round_trip() {
        for event in [
            OrderBookEvent::BidsChanged,
            OrderBookEvent::AsksChanged,
            OrderBookEvent::TradesChanged,
            OrderBookEvent::Ticker,
            OrderBookEvent::GlobalTicker,
        ] {
            assert_eq!(OrderBookEvent::from_tag(event.as_str()), Some(event));
        }
        assert_eq!(OrderBookEvent::from_tag("unknown"), None);
    }

    #[test]
    fn accessors_read_wire_fields() {
        let ticker = frame(json!({"stream": "market.ticker.thb_btc", "last": 1_000_000}));
        assert_eq!(ticker.channel(), Some("market.ticker.thb_btc"));
        assert_eq!(ticker.event(), None);
        assert_eq!(ticker.get("last"), Some(&json!(1_000_000)));

        let book = frame(json!({"event": "bidschanged", "data": [], "pairing_id": 1}));
        assert_eq!(book.event(), Some(OrderBookEvent::BidsChanged));
        assert!(book.data().is_none());
    }

    #[test]
    fn set_symbol_adds_field() {
        let mut ticker = frame(json!({"stream": "market.ticker.thb_btc"}));
        ticker.set_symbol("BTC/THB".to_string());
        assert_eq!(ticker.symbol(), Some("BTC/THB"));
        assert_eq!(
            ticker.into_value(),
            json!({"stream": "market.ticker.thb_btc", "symbol": "BTC/THB"})
        );
    }
}
