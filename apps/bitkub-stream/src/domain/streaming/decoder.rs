//! Frame Decoder
//!
//! Turns a raw text frame into a [`StreamFrame`] and applies the forwarding
//! policy of the subscription's [`StreamClass`]:
//!
//! - **Plain / Combined**: every frame is forwarded. With sanitization a
//!   `symbol` field is derived from the `stream` channel.
//! - **Order book**: frames are filtered by `event` tag. `bidschanged`,
//!   `askschanged` and `tradeschanged` always pass; `ticker` passes unless
//!   tickers are ignored; `global.ticker` passes only when global tickers are
//!   not ignored, and is sanitized from `data.stream`.

use std::sync::Arc;

use serde_json::Value;

use super::frame::{OrderBookEvent, StreamFrame};
use crate::domain::subscription::StreamClass;
use crate::domain::symbol::SymbolMapper;

/// Decode errors. The frame is dropped; the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("expected JSON object, got: {0}")]
    NotAnObject(String),

    /// Sanitization needs a channel field the frame does not carry.
    #[error("frame has no `{0}` field to derive a symbol from")]
    MissingChannel(&'static str),

    /// The channel name does not encode a currency pair.
    #[error("cannot derive symbol from channel: {0}")]
    UnrecognisedChannel(String),
}

/// Options consulted per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Derive display symbols.
    pub sanitize: bool,
    /// Drop order-book `ticker` events.
    pub ignore_tickers: bool,
    /// Drop order-book `global.ticker` events.
    pub ignore_global_tickers: bool,
}

/// Per-subscription decoder bound to a stream class.
#[derive(Clone)]
pub struct FrameDecoder {
    class: StreamClass,
    mapper: Arc<dyn SymbolMapper>,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

impl FrameDecoder {
    /// Create a decoder for `class`.
    #[must_use]
    pub fn new(class: StreamClass, mapper: Arc<dyn SymbolMapper>) -> Self {
        Self { class, mapper }
    }

    /// Stream class this decoder filters for.
    #[must_use]
    pub const fn class(&self) -> StreamClass {
        self.class
    }

    /// Decode `text` and decide whether to forward it.
    ///
    /// Returns `Ok(None)` for a well-formed frame the policy drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, or if
    /// sanitization cannot derive a symbol.
    pub fn decode(
        &self,
        text: &str,
        options: DecodeOptions,
    ) -> Result<Option<StreamFrame>, DecodeError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotAnObject(preview(text)));
        };
        let frame = StreamFrame::from_map(fields);

        match self.class {
            StreamClass::Plain | StreamClass::Combined => {
                self.filter_channel_frame(frame, options).map(Some)
            }
            StreamClass::OrderBook => self.filter_order_book_frame(frame, options),
        }
    }

    fn filter_channel_frame(
        &self,
        mut frame: StreamFrame,
        options: DecodeOptions,
    ) -> Result<StreamFrame, DecodeError> {
        if options.sanitize {
            let channel = frame
                .channel()
                .ok_or(DecodeError::MissingChannel("stream"))?;
            let symbol = self
                .mapper
                .display_symbol(channel)
                .ok_or_else(|| DecodeError::UnrecognisedChannel(channel.to_string()))?;
            frame.set_symbol(symbol);
        }
        Ok(frame)
    }

    fn filter_order_book_frame(
        &self,
        mut frame: StreamFrame,
        options: DecodeOptions,
    ) -> Result<Option<StreamFrame>, DecodeError> {
        match frame.event() {
            Some(
                OrderBookEvent::BidsChanged
                | OrderBookEvent::AsksChanged
                | OrderBookEvent::TradesChanged,
            ) => Ok(Some(frame)),
            Some(OrderBookEvent::Ticker) if !options.ignore_tickers => Ok(Some(frame)),
            Some(OrderBookEvent::GlobalTicker) if !options.ignore_global_tickers => {
                if options.sanitize {
                    self.sanitize_global_ticker(&mut frame)?;
                }
                Ok(Some(frame))
            }
            _ => Ok(None),
        }
    }

    fn sanitize_global_ticker(&self, frame: &mut StreamFrame) -> Result<(), DecodeError> {
        let data = frame
            .data_mut()
            .ok_or(DecodeError::MissingChannel("data"))?;
        let channel = data
            .get("stream")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DecodeError::MissingChannel("data.stream"))?;
        let symbol = self
            .mapper
            .display_symbol(&channel)
            .ok_or(DecodeError::UnrecognisedChannel(channel))?;
        data.insert("symbol".to_string(), Value::String(symbol));
        Ok(())
    }
}

fn preview(text: &str) -> String {
    text.trim().chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::BitkubSymbolMapper;
    use test_case::test_case;

    fn decoder(class: StreamClass) -> FrameDecoder {
        FrameDecoder::new(class, Arc::new(BitkubSymbolMapper::new()))
    }

    const fn options(ignore_tickers: bool, ignore_global_tickers: bool) -> DecodeOptions {
        DecodeOptions {
            sanitize: false,
            ignore_tickers,
            ignore_global_tickers,
        }
    }

    #[test_case(StreamClass::Plain ; "plain")]
    #[test_case(StreamClass::Combined ; "combined")]
    fn channel_frames_always_forwarded(class: StreamClass) {
        let frame = decoder(class)
            .decode(
                r#"{"stream":"market.trade.thb_btc","amt":0.5}"#,
                DecodeOptions::default(),
            )
            .unwrap()
            .expect("frame should be forwarded");
        assert_eq!(frame.channel(), Some("market.trade.thb_btc"));
        assert_eq!(frame.symbol(), None);
    }

    #[test]
    fn sanitize_derives_display_symbol() {
        let options = DecodeOptions {
            sanitize: true,
            ..DecodeOptions::default()
        };
        let frame = decoder(StreamClass::Plain)
            .decode(r#"{"stream":"market.ticker.thb_btc","last":1}"#, options)
            .unwrap()
            .unwrap();
        assert_eq!(frame.symbol(), Some("BTC/THB"));
    }

    #[test]
    fn sanitize_without_channel_is_error() {
        let options = DecodeOptions {
            sanitize: true,
            ..DecodeOptions::default()
        };
        let result = decoder(StreamClass::Combined).decode(r#"{"last":1}"#, options);
        assert!(matches!(result, Err(DecodeError::MissingChannel("stream"))));
    }

    #[test_case("bidschanged", false, false, true ; "bids with defaults")]
    #[test_case("bidschanged", true, true, true ; "bids with everything ignored")]
    #[test_case("askschanged", true, true, true ; "asks with everything ignored")]
    #[test_case("tradeschanged", true, false, true ; "trades with tickers ignored")]
    #[test_case("ticker", false, true, true ; "ticker forwarded")]
    #[test_case("ticker", true, true, false ; "ticker ignored")]
    #[test_case("global.ticker", false, true, false ; "global ticker ignored")]
    #[test_case("global.ticker", false, false, true ; "global ticker forwarded")]
    #[test_case("something.else", false, false, false ; "unknown event dropped")]
    fn order_book_policy(
        event: &str,
        ignore_tickers: bool,
        ignore_global_tickers: bool,
        forwarded: bool,
    ) {
        let text = format!(
            r#"{{"event":"{event}","pairing_id":1,"data":{{"stream":"market.ticker.thb_btc"}}}}"#
        );
        let result = decoder(StreamClass::OrderBook)
            .decode(&text, options(ignore_tickers, ignore_global_tickers))
            .unwrap();
        assert_eq!(result.is_some(), forwarded);
    }

    #[test]
    fn order_book_frame_without_event_dropped() {
        let result = decoder(StreamClass::OrderBook)
            .decode(r#"{"data":[]}"#, options(false, false))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn global_ticker_sanitized_from_nested_stream() {
        let options = DecodeOptions {
            sanitize: true,
            ignore_tickers: false,
            ignore_global_tickers: false,
        };
        let frame = decoder(StreamClass::OrderBook)
            .decode(
                r#"{"event":"global.ticker","data":{"stream":"market.ticker.thb_eth","last":90000}}"#,
                options,
            )
            .unwrap()
            .unwrap();
        assert_eq!(frame.symbol(), None);
        assert_eq!(
            frame.data().and_then(|d| d.get("symbol")),
            Some(&Value::String("ETH/THB".to_string()))
        );
    }

    #[test]
    fn malformed_json_is_error() {
        let result = decoder(StreamClass::Plain).decode("{not json", DecodeOptions::default());
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn non_object_is_error() {
        let result = decoder(StreamClass::Plain).decode("[1,2,3]", DecodeOptions::default());
        assert!(matches!(result, Err(DecodeError::NotAnObject(_))));
    }
}
