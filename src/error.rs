use thiserror::Error;

/// Failure taxonomy of the forecasting pipeline.
///
/// Everything except `NonFinitePrediction` and `Internal` is a recoverable,
/// client-facing condition.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("No trained model found for {ticker} with interval {interval}")]
    ArtifactNotFound { ticker: String, interval: String },

    #[error("No data available for {ticker}")]
    NoData { ticker: String },

    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid timeframe '{0}': expected '<integer> <minutes|hours|days>'")]
    InvalidTimeframe(String),

    #[error("Unknown interval '{0}'")]
    UnknownInterval(String),

    #[error("Invalid ticker '{0}'")]
    InvalidTicker(String),

    #[error("Forecast horizon of {requested} steps exceeds the limit of {max}")]
    HorizonTooLong { requested: usize, max: usize },

    #[error("Model produced a non-finite prediction at step {step}")]
    NonFinitePrediction { step: usize },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ForecastError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ForecastError::ArtifactNotFound { .. }
                | ForecastError::NoData { .. }
                | ForecastError::InsufficientData { .. }
                | ForecastError::InvalidTimeframe(_)
                | ForecastError::UnknownInterval(_)
                | ForecastError::InvalidTicker(_)
                | ForecastError::HorizonTooLong { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let missing = ForecastError::ArtifactNotFound {
            ticker: "AAPL".into(),
            interval: "1d".into(),
        };
        assert!(missing.is_client_error());
        assert_eq!(missing.to_string(), "No trained model found for AAPL with interval 1d");

        assert!(ForecastError::InsufficientData { required: 60, actual: 12 }.is_client_error());
        assert!(ForecastError::HorizonTooLong { requested: 525_600, max: 2_000 }.is_client_error());
        assert!(!ForecastError::NonFinitePrediction { step: 2 }.is_client_error());
        assert!(!ForecastError::Internal(anyhow::anyhow!("disk on fire")).is_client_error());
    }
}
