use anyhow::{anyhow, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Column order of every feature matrix and window
pub const OPEN: usize = 0;
pub const CLOSE: usize = 1;
pub const VOLUME: usize = 2;
pub const NUM_CHANNELS: usize = 3;

/// Per-channel min-max scaler mapping the fitted range onto [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a f64>) -> Result<Self> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut seen = 0usize;

        for &v in values {
            if !v.is_finite() {
                return Err(anyhow!("Cannot fit scaler on non-finite value {}", v));
            }
            min = min.min(v);
            max = max.max(v);
            seen += 1;
        }

        if seen == 0 {
            return Err(anyhow!("Cannot fit scaler on an empty channel"));
        }

        Ok(Self { min, max })
    }

    /// Width of the fitted range; a constant channel scales by 1 instead of 0
    fn scale(&self) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 {
            1.0
        } else {
            range
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.min) / self.scale()
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.scale() + self.min
    }

    pub fn inverse_transform_all(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&s| self.inverse_transform(s)).collect()
    }
}

/// The three independent channel scalers fitted for one (ticker, interval)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerBank {
    pub open: MinMaxScaler,
    pub close: MinMaxScaler,
    pub volume: MinMaxScaler,
}

impl ScalerBank {
    /// Fit on an `(N, 3)` matrix laid out as open, close, volume
    pub fn fit(features: &Array2<f64>) -> Result<Self> {
        if features.ncols() != NUM_CHANNELS {
            return Err(anyhow!(
                "Expected {} feature columns, got {}",
                NUM_CHANNELS,
                features.ncols()
            ));
        }

        Ok(Self {
            open: MinMaxScaler::fit(features.column(OPEN))?,
            close: MinMaxScaler::fit(features.column(CLOSE))?,
            volume: MinMaxScaler::fit(features.column(VOLUME))?,
        })
    }

    fn channel(&self, index: usize) -> &MinMaxScaler {
        match index {
            OPEN => &self.open,
            CLOSE => &self.close,
            _ => &self.volume,
        }
    }

    /// Scale every column with its own scaler
    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        let mut scaled = features.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let scaler = self.channel(j);
            column.mapv_inplace(|v| scaler.transform(v));
        }
        scaled
    }

    pub fn inverse_close(&self, scaled: &[f64]) -> Vec<f64> {
        self.close.inverse_transform_all(scaled)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
