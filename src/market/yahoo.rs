use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::HistoricalSource;
use crate::config::DataSettings;
use crate::types::Candle;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance chart API client
pub struct YahooClient {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl YahooClient {
    pub fn new(settings: &DataSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to build HTTP client")?;
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn chart_url(&self, ticker: &str) -> String {
        format!("{}/v8/finance/chart/{}", self.base_url, ticker)
    }
}

#[async_trait]
impl HistoricalSource for YahooClient {
    async fn fetch(&self, ticker: &str, period: &str, interval: &str) -> Result<Vec<Candle>> {
        self.limiter.until_ready().await;

        let url = self.chart_url(ticker);
        debug!("Fetching {} range={} interval={}", url, period, interval);

        let resp = self
            .client
            .get(&url)
            .query(&[("range", period), ("interval", interval)])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = resp.status();
        let body = resp.text().await.context("Failed to read chart response")?;

        // unknown tickers come back as 404 with a chart.error payload
        let candles = match parse_chart(&body) {
            Ok(candles) => candles,
            Err(e) if status.is_success() => return Err(e),
            Err(_) => return Err(anyhow!("Chart request for {} failed with status {}", ticker, status)),
        };

        info!("Fetched {} candles for {} ({} @ {})", candles.len(), ticker, period, interval);
        Ok(candles)
    }
}

/// Decode a chart payload, dropping bars with any missing field
fn parse_chart(body: &str) -> Result<Vec<Candle>> {
    let resp: ChartResponse = serde_json::from_str(body).context("Malformed chart payload")?;

    if let Some(err) = resp.chart.error {
        warn!(
            "Chart API returned {}: {}",
            err.code,
            err.description.unwrap_or_default()
        );
    }

    let result = match resp.chart.result.and_then(|r| r.into_iter().next()) {
        Some(result) => result,
        None => return Ok(Vec::new()),
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let field = |values: &Vec<Option<f64>>| values.get(i).copied().flatten();
        let row = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
            field(&quote.volume),
        );
        let timestamp = Utc.timestamp_opt(ts, 0).single();

        match (timestamp, row) {
            (Some(timestamp), (Some(open), Some(high), Some(low), Some(close), Some(volume))) => {
                candles.push(Candle { timestamp, open, high, low, close, volume });
            }
            _ => debug!("Skipping incomplete bar at index {}", i),
        }
    }

    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "currency": "USD"},
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, null, 182.15],
                        "high":   [188.44, 185.88, 183.09],
                        "low":    [183.89, 183.43, 180.88],
                        "close":  [185.64, 184.25, 181.91],
                        "volume": [82488700, 58414500, 71983600]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_skips_incomplete_rows() {
        let candles = parse_chart(CHART).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 185.64);
        assert_eq!(candles[0].volume, 82_488_700.0);
        assert_eq!(candles[1].open, 182.15);
        assert_eq!(candles[1].timestamp.timestamp(), 1704378600);
    }

    #[test]
    fn test_unknown_ticker_is_empty() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(parse_chart(body).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(parse_chart("<html>rate limited</html>").is_err());
    }

    #[test]
    fn test_chart_url() {
        let settings = DataSettings {
            base_url: "https://query1.finance.yahoo.com/".to_string(),
            requests_per_second: 0,
            timeout_secs: 5,
        };
        let client = YahooClient::new(&settings).unwrap();
        assert_eq!(
            client.chart_url("MSFT"),
            "https://query1.finance.yahoo.com/v8/finance/chart/MSFT"
        );
    }
}
