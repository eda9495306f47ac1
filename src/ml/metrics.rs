use serde::{Deserialize, Serialize};

/// Regression error metrics on price-scale values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    pub samples: usize,
}

impl RegressionMetrics {
    /// `None` when the slices are empty or of different lengths
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }
        let n = actual.len() as f64;

        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for (a, p) in actual.iter().zip(predicted) {
            let err = a - p;
            abs_sum += err.abs();
            sq_sum += err * err;
        }

        let mean = actual.iter().sum::<f64>() / n;
        let total: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        // a constant target makes R² undefined; report a perfect fit only when errors vanish
        let r2 = if total > 0.0 {
            1.0 - sq_sum / total
        } else if sq_sum == 0.0 {
            1.0
        } else {
            0.0
        };

        Some(Self {
            mae: abs_sum / n,
            rmse: (sq_sum / n).sqrt(),
            r2,
            samples: actual.len(),
        })
    }
}
