//! Symbol Mapping
//!
//! Pure string transforms between display symbols (`BTC/THB`) and Bitkub
//! channel names (`market.ticker.thb_btc`). The transform is injected into the
//! stream manager through [`SymbolMapper`], so exchanges with other naming
//! rules can reuse the lifecycle engine.

/// Channel family used by the convenience subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// `market.ticker.*` channels.
    Ticker,
    /// `market.trade.*` channels.
    Trade,
}

impl ChannelKind {
    /// Channel name prefix, without the trailing separator.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Ticker => "market.ticker",
            Self::Trade => "market.trade",
        }
    }
}

/// Maps between display symbols and wire channel names.
pub trait SymbolMapper: Send + Sync {
    /// Channel name for `symbol`.
    ///
    /// With `sanitize` the symbol is a display pair (`BTC/THB`); without it
    /// the symbol already is the channel name.
    fn channel(&self, kind: ChannelKind, symbol: &str, sanitize: bool) -> String;

    /// Endpoint for the order book of `symbol_id`.
    fn order_book_channel(&self, symbol_id: u32) -> String;

    /// Display symbol derived from a wire channel name, or `None` if the
    /// channel does not encode a currency pair.
    fn display_symbol(&self, channel: &str) -> Option<String>;
}

/// Bitkub naming rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitkubSymbolMapper;

impl BitkubSymbolMapper {
    /// Create the mapper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SymbolMapper for BitkubSymbolMapper {
    fn channel(&self, kind: ChannelKind, symbol: &str, sanitize: bool) -> String {
        if !sanitize {
            return symbol.to_lowercase();
        }

        // Display pairs are BASE/QUOTE, channels encode quote_base.
        match symbol.split_once('/') {
            Some((base, quote)) => format!("{}.{quote}_{base}", kind.prefix()).to_lowercase(),
            None => format!("{}.{}", kind.prefix(), symbol.to_lowercase()),
        }
    }

    fn order_book_channel(&self, symbol_id: u32) -> String {
        format!("orderbook/{symbol_id}")
    }

    fn display_symbol(&self, channel: &str) -> Option<String> {
        let pair = channel.rsplit('.').next()?;
        let (quote, base) = pair.split_once('_')?;
        if quote.is_empty() || base.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}",
            base.to_uppercase(),
            quote.to_uppercase()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ticker_channel_from_display_symbol() {
        let mapper = BitkubSymbolMapper::new();
        assert_eq!(
            mapper.channel(ChannelKind::Ticker, "BTC/THB", true),
            "market.ticker.thb_btc"
        );
        assert_eq!(
            mapper.channel(ChannelKind::Trade, "ETH/THB", true),
            "market.trade.thb_eth"
        );
    }

    #[test]
    fn unsanitized_symbol_is_lowercased_channel() {
        let mapper = BitkubSymbolMapper::new();
        assert_eq!(
            mapper.channel(ChannelKind::Ticker, "Market.Ticker.THB_BTC", false),
            "market.ticker.thb_btc"
        );
    }

    #[test]
    fn display_symbol_from_channel() {
        let mapper = BitkubSymbolMapper::new();
        assert_eq!(
            mapper.display_symbol("market.ticker.thb_btc").as_deref(),
            Some("BTC/THB")
        );
        assert_eq!(
            mapper.display_symbol("market.trade.thb_eth").as_deref(),
            Some("ETH/THB")
        );
        assert_eq!(mapper.display_symbol("thb_ada").as_deref(), Some("ADA/THB"));
    }

    #[test]
    fn display_symbol_rejects_channels_without_pair() {
        let mapper = BitkubSymbolMapper::new();
        assert_eq!(mapper.display_symbol("market.ticker.btc"), None);
        assert_eq!(mapper.display_symbol("market.ticker.thb_"), None);
        assert_eq!(mapper.display_symbol(""), None);
    }

    #[test]
    fn order_book_endpoint() {
        assert_eq!(BitkubSymbolMapper::new().order_book_channel(1), "orderbook/1");
    }

    proptest! {
        #[test]
        fn sanitized_channel_maps_back_to_display_symbol(
            base in "[A-Z]{2,6}",
            quote in "[A-Z]{3,4}",
        ) {
            let mapper = BitkubSymbolMapper::new();
            let display = format!("{base}/{quote}");
            let channel = mapper.channel(ChannelKind::Ticker, &display, true);
            prop_assert_eq!(mapper.display_symbol(&channel), Some(display));
        }
    }
}
