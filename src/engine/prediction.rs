use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info};

use super::period::{prediction_period, step_count};
use super::summary::ForecastResponse;
use crate::config::DEFAULT_MAX_STEPS;
use crate::error::ForecastError;
use crate::market::HistoricalSource;
use crate::ml::{feature_matrix, forecast, inference_window, ArtifactKey, ArtifactStore};
use crate::types::CandleSeries;

/// Serves multi-step forecasts from persisted artifacts
pub struct ForecastService {
    source: Arc<dyn HistoricalSource>,
    store: Arc<dyn ArtifactStore>,
    max_steps: usize,
}

impl ForecastService {
    pub fn new(source: Arc<dyn HistoricalSource>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { source, store, max_steps: DEFAULT_MAX_STEPS }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub async fn predict(&self, ticker: &str, timeframe: &str, interval: &str) -> Result<ForecastResponse, ForecastError> {
        let steps = step_count(interval, timeframe)?;
        if steps > self.max_steps {
            return Err(ForecastError::HorizonTooLong { requested: steps, max: self.max_steps });
        }
        let key = ArtifactKey::new(ticker, interval)?;

        let artifact = self.store.load(&key).await?.ok_or_else(|| ForecastError::ArtifactNotFound {
            ticker: key.ticker().to_string(),
            interval: key.interval().to_string(),
        })?;
        let window = artifact.metadata.window;

        let period = prediction_period(key.interval());
        let series = CandleSeries::new(self.source.fetch(key.ticker(), period, key.interval()).await?);
        let current_price = match series.last() {
            Some(candle) => candle.close,
            None => return Err(ForecastError::NoData { ticker: key.ticker().to_string() }),
        };

        // scalers are reused exactly as fitted at training time
        let scaled = artifact.scalers.transform(&feature_matrix(&series.candles));
        let input = inference_window(&scaled, window)?;
        debug!("Forecasting {} steps for {} from {} candles", steps, key, series.len());

        let model = artifact.model;
        let close_scaler = artifact.scalers.close;
        let result = tokio::task::spawn_blocking(move || forecast(&model, &input, steps, &close_scaler))
            .await
            .map_err(|e| anyhow!("Forecast task failed: {}", e))??;
        debug!("Scaled predictions for {}: {:?}", key, result.scaled);
        let response = ForecastResponse::build(key.ticker(), timeframe, key.interval(), result.prices, current_price)
            .ok_or_else(|| ForecastError::Internal(anyhow!("Forecast for {} produced no predictions", key)))?;

        info!(
            "{} {} over {}: {} ({})",
            key, response.trend, timeframe, response.predicted_price_range, response.projected_change
        );
        Ok(response)
    }
}
