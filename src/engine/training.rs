use anyhow::anyhow;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::period::{interval_minutes, training_period};
use crate::config::ModelSettings;
use crate::database::{Database, TrainingRunRecord};
use crate::error::ForecastError;
use crate::market::HistoricalSource;
use crate::ml::scaler::NUM_CHANNELS;
use crate::ml::{
    feature_matrix, training_pairs, Artifact, ArtifactKey, ArtifactMetadata, ArtifactStore,
    RegressionMetrics, ScalerBank, StackedLstm,
};
use crate::types::CandleSeries;

/// Outcome of one training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub ticker: String,
    pub interval: String,
    pub period: String,
    pub candles: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub final_loss: Option<f64>,
    pub metrics: Option<RegressionMetrics>,
}

/// Fetches history, fits scalers and an LSTM, evaluates on the held-out tail
/// and persists the result
pub struct TrainingJob {
    source: Arc<dyn HistoricalSource>,
    store: Arc<dyn ArtifactStore>,
    registry: Option<Arc<Database>>,
    settings: ModelSettings,
}

impl TrainingJob {
    pub fn new(
        source: Arc<dyn HistoricalSource>,
        store: Arc<dyn ArtifactStore>,
        registry: Option<Arc<Database>>,
        settings: ModelSettings,
    ) -> Self {
        Self { source, store, registry, settings }
    }

    pub async fn run(&self, ticker: &str, interval: &str) -> Result<TrainingReport, ForecastError> {
        let key = ArtifactKey::new(ticker, interval)?;
        if interval_minutes(key.interval()).is_none() {
            return Err(ForecastError::UnknownInterval(key.interval().to_string()));
        }
        let window = self.settings.window;
        let period = training_period(key.interval());

        info!("━━━ Step 1: Fetching {} of {} data for {} ━━━", period, key.interval(), key.ticker());
        let series = CandleSeries::new(self.source.fetch(key.ticker(), period, key.interval()).await?);
        if series.is_empty() {
            return Err(ForecastError::NoData { ticker: key.ticker().to_string() });
        }
        let n = series.len();
        let required = window + min_pairs(self.settings.test_split);
        if n < required {
            return Err(ForecastError::InsufficientData { required, actual: n });
        }
        info!("✓ Fetched {} candles", n);

        info!("━━━ Step 2: Scaling and windowing (L = {}) ━━━", window);
        let features = feature_matrix(&series.candles);
        let scalers = ScalerBank::fit(&features)?;
        let scaled = scalers.transform(&features);
        let pairs = training_pairs(&scaled, window);
        let (train, test) = pairs.split(self.settings.test_split);
        info!("✓ {} training pairs, {} held out", train.len(), test.len());

        info!("━━━ Step 3: Training LSTM {:?} for {} epochs ━━━", self.settings.hidden_sizes, self.settings.epochs);
        let hidden_sizes = self.settings.hidden_sizes.clone();
        let options = self.settings.fit_options();
        let (model, fit, test_predictions, test) = tokio::task::spawn_blocking(move || {
            let mut model = StackedLstm::new(NUM_CHANNELS, &hidden_sizes, options.seed)?;
            let fit = model.fit(&train, &options)?;
            let predictions = model.predict_batch(&test);
            Ok::<_, anyhow::Error>((model, fit, predictions, test))
        })
        .await
        .map_err(|e| anyhow!("Training task failed: {}", e))??;
        info!("✓ Training finished on {} samples", fit.samples);

        info!("━━━ Step 4: Evaluating on held-out data ━━━");
        let actual = scalers.inverse_close(&test.targets.to_vec());
        let predicted = scalers.inverse_close(&test_predictions);
        let metrics = RegressionMetrics::compute(&actual, &predicted);
        match &metrics {
            Some(m) => info!(
                "Model accuracy for {}: MAE {:.4}, RMSE {:.4}, R² {:.4}",
                key, m.mae, m.rmse, m.r2
            ),
            None => warn!("No held-out samples for {}; metrics unavailable", key),
        }

        info!("━━━ Step 5: Saving artifact ━━━");
        let metadata = ArtifactMetadata {
            run_id: Uuid::new_v4(),
            ticker: key.ticker().to_string(),
            interval: key.interval().to_string(),
            window,
            hidden_sizes: model.hidden_sizes(),
            trained_at: Utc::now(),
            train_samples: fit.samples,
            test_samples: test.len(),
            final_loss: fit.final_loss(),
            metrics,
        };
        if self.store.exists(&key).await? {
            info!("Replacing existing artifact for {}", key);
        }
        let artifact = Artifact { model, scalers, metadata };
        self.store.save(&key, &artifact).await?;

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.record_training_run(&TrainingRunRecord::from(&artifact.metadata)).await {
                warn!("Failed to record training run {}: {}", artifact.metadata.run_id, e);
            }
        }
        info!("✓ Artifact {} saved (run {})", key, artifact.metadata.run_id);

        let meta = artifact.metadata;
        Ok(TrainingReport {
            run_id: meta.run_id,
            ticker: meta.ticker,
            interval: meta.interval,
            period: period.to_string(),
            candles: n,
            train_samples: meta.train_samples,
            test_samples: meta.test_samples,
            final_loss: meta.final_loss,
            metrics: meta.metrics,
        })
    }
}

/// Smallest pair count that leaves at least one training pair after the split
fn min_pairs(test_split: f64) -> usize {
    let test_split = test_split.clamp(0.0, 0.99);
    let mut pairs = 1;
    while pairs - ((pairs as f64) * test_split).ceil() as usize == 0 {
        pairs += 1;
    }
    pairs
}
