pub mod file;
#[cfg(test)]
pub mod memory;

pub use file::FileArtifactStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::metrics::RegressionMetrics;
use super::model::StackedLstm;
use super::scaler::ScalerBank;
use crate::error::ForecastError;

/// Identifies the artifact trained for one ticker at one bar interval
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    ticker: String,
    interval: String,
}

impl ArtifactKey {
    /// Tickers are upper-cased; both parts are restricted to characters that
    /// are safe inside a single path component
    pub fn new(ticker: &str, interval: &str) -> Result<Self, ForecastError> {
        let ticker = ticker.trim().to_uppercase();
        let interval = interval.trim().to_string();

        let ticker_ok = !ticker.is_empty()
            && ticker.chars().any(|c| c.is_ascii_alphanumeric())
            && ticker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'));
        if !ticker_ok {
            return Err(ForecastError::InvalidTicker(ticker));
        }
        if interval.is_empty() || !interval.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ForecastError::UnknownInterval(interval));
        }

        Ok(Self { ticker, interval })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    /// Directory name used by file-backed stores
    pub fn slug(&self) -> String {
        format!("{}_{}", self.ticker, self.interval)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker, self.interval)
    }
}

/// Model metadata and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub run_id: Uuid,
    pub ticker: String,
    pub interval: String,
    pub window: usize,
    pub hidden_sizes: Vec<usize>,
    pub trained_at: DateTime<Utc>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub final_loss: Option<f64>,
    pub metrics: Option<RegressionMetrics>,
}

/// A trained model plus the scalers fitted alongside it
#[derive(Debug, Clone)]
pub struct Artifact {
    pub model: StackedLstm,
    pub scalers: ScalerBank,
    pub metadata: ArtifactMetadata,
}

/// Storage for trained artifacts. `save` must replace the previous artifact
/// for the key as a whole; readers never observe a mix of old and new files.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool>;
    async fn load(&self, key: &ArtifactKey) -> Result<Option<Artifact>>;
    async fn save(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalises_ticker() {
        let key = ArtifactKey::new(" aapl ", "1d").unwrap();
        assert_eq!(key.ticker(), "AAPL");
        assert_eq!(key.interval(), "1d");
        assert_eq!(key.slug(), "AAPL_1d");
        assert_eq!(key.to_string(), "AAPL@1d");
    }

    #[test]
    fn test_key_accepts_exchange_suffixes() {
        assert!(ArtifactKey::new("RELIANCE.NS", "1d").is_ok());
        assert!(ArtifactKey::new("^GSPC", "1h").is_ok());
        assert!(ArtifactKey::new("BRK-B", "5m").is_ok());
        assert!(ArtifactKey::new("EURUSD=X", "1d").is_ok());
    }

    #[test]
    fn test_key_rejects_path_tricks() {
        assert!(matches!(ArtifactKey::new("..", "1d"), Err(ForecastError::InvalidTicker(_))));
        assert!(matches!(ArtifactKey::new("a/b", "1d"), Err(ForecastError::InvalidTicker(_))));
        assert!(matches!(ArtifactKey::new("", "1d"), Err(ForecastError::InvalidTicker(_))));
        assert!(matches!(ArtifactKey::new("AAPL", "1/d"), Err(ForecastError::UnknownInterval(_))));
    }
}
