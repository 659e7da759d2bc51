//! Market data provider port.

use crate::domain::bar::Bar;

/// Failure reported by a market data source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("unknown symbol '{symbol}' at interval '{interval}'")]
    UnknownSymbol { symbol: String, interval: String },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("no data available: {0}")]
    Unavailable(String),
}

/// Supplies OHLCV bars, oldest first.
///
/// `get_bars` returns at most `count` of the most recent bars for the pair.
/// Implementations must be shareable across independent strategy runs.
pub trait MarketDataProvider: Send + Sync {
    fn get_bars(&self, symbol: &str, interval: &str, count: usize)
    -> Result<Vec<Bar>, ProviderError>;
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for &P {
    fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Bar>, ProviderError> {
        (**self).get_bars(symbol, interval, count)
    }
}
