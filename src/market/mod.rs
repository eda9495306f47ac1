pub mod yahoo;

pub use yahoo::YahooClient;

use async_trait::async_trait;

use crate::types::Candle;

/// Source of historical OHLCV bars.
///
/// `period` and `interval` use the data provider's range notation
/// (`60d`, `1y`, `5y` and `1m`, `1h`, `1d`). An unknown ticker yields an
/// empty vector rather than an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch(&self, ticker: &str, period: &str, interval: &str) -> anyhow::Result<Vec<Candle>>;
}
