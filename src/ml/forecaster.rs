use anyhow::anyhow;
use ndarray::{s, Array2};
use tracing::debug;

use super::model::SequenceModel;
use super::scaler::{MinMaxScaler, CLOSE, NUM_CHANNELS, OPEN, VOLUME};
use crate::error::ForecastError;

/// Output of an autoregressive rollout
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    /// Predictions in the model's scaled close space
    pub scaled: Vec<f64>,
    /// The same predictions mapped back to prices
    pub prices: Vec<f64>,
}

/// Roll `model` forward `steps` bars from `window`.
///
/// Each prediction becomes the close of a synthetic bar appended to the
/// window after dropping the oldest row. Open and volume of every synthetic
/// bar are frozen at the last real bar of the initial window; the model only
/// ever updates the close channel.
pub fn forecast(
    model: &dyn SequenceModel,
    window: &Array2<f64>,
    steps: usize,
    close_scaler: &MinMaxScaler,
) -> Result<Forecast, ForecastError> {
    if steps == 0 {
        return Err(ForecastError::Internal(anyhow!("Forecast requires at least one step")));
    }
    if window.nrows() == 0 || window.ncols() != NUM_CHANNELS {
        return Err(ForecastError::Internal(anyhow!(
            "Forecast window must be (L, {}) with L > 0, got {:?}",
            NUM_CHANNELS,
            window.dim()
        )));
    }

    let last_row = window.nrows() - 1;
    let held_open = window[[last_row, OPEN]];
    let held_volume = window[[last_row, VOLUME]];

    let mut current = window.clone();
    let mut scaled = Vec::new();

    for step in 0..steps {
        let p = model.predict(current.view());
        if !p.is_finite() {
            return Err(ForecastError::NonFinitePrediction { step });
        }
        scaled.push(p);
        debug!("Rollout step {}/{}: scaled close {:.6}", step + 1, steps, p);

        let mut next = Array2::zeros(current.raw_dim());
        next.slice_mut(s![..last_row, ..]).assign(&current.slice(s![1.., ..]));
        next[[last_row, OPEN]] = held_open;
        next[[last_row, CLOSE]] = p;
        next[[last_row, VOLUME]] = held_volume;
        current = next;
    }

    let prices = close_scaler.inverse_transform_all(&scaled);
    Ok(Forecast { scaled, prices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayView2;
    use std::sync::Mutex;

    /// Returns a scripted sequence of outputs and records every window it sees
    struct RecordingModel {
        outputs: Vec<f64>,
        seen: Mutex<Vec<Array2<f64>>>,
    }

    impl RecordingModel {
        fn new(outputs: Vec<f64>) -> Self {
            Self { outputs, seen: Mutex::new(Vec::new()) }
        }

        fn windows(&self) -> Vec<Array2<f64>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl SequenceModel for RecordingModel {
        fn predict(&self, window: ArrayView2<'_, f64>) -> f64 {
            let mut seen = self.seen.lock().unwrap();
            let idx = seen.len();
            seen.push(window.to_owned());
            self.outputs[idx % self.outputs.len()]
        }
    }

    /// Window whose every cell is unique so shifts are easy to trace
    fn initial_window(len: usize) -> Array2<f64> {
        Array2::from_shape_fn((len, NUM_CHANNELS), |(i, j)| (i as f64) * 0.01 + (j as f64) * 0.001)
    }

    fn unit_scaler() -> MinMaxScaler {
        MinMaxScaler { min: 0.0, max: 1.0 }
    }

    #[test]
    fn test_output_length_matches_steps() {
        let model = RecordingModel::new(vec![0.2, 0.4, 0.6]);
        let result = forecast(&model, &initial_window(60), 3, &unit_scaler()).unwrap();
        assert_eq!(result.scaled, vec![0.2, 0.4, 0.6]);
        assert_eq!(result.prices.len(), 3);
        assert_eq!(model.windows().len(), 3);
    }

    #[test]
    fn test_open_and_volume_held_at_last_real_bar() {
        let window = initial_window(60);
        let held_open = window[[59, OPEN]];
        let held_volume = window[[59, VOLUME]];
        let model = RecordingModel::new(vec![0.11, 0.22, 0.33]);

        forecast(&model, &window, 3, &unit_scaler()).unwrap();
        let windows = model.windows();

        // window k carries k synthetic rows at its tail
        for (k, seen) in windows.iter().enumerate() {
            assert_eq!(seen.dim(), (60, 3));
            for synthetic in 0..k {
                let row = 60 - k + synthetic;
                assert_eq!(seen[[row, OPEN]], held_open);
                assert_eq!(seen[[row, VOLUME]], held_volume);
                assert_eq!(seen[[row, CLOSE]], [0.11, 0.22, 0.33][synthetic]);
            }
            // the real rows are the original tail shifted left by k
            assert_eq!(seen[[0, CLOSE]], window[[k, CLOSE]]);
        }
    }

    #[test]
    fn test_predictions_are_inverse_scaled_through_close() {
        let model = RecordingModel::new(vec![0.5]);
        let scaler = MinMaxScaler { min: 100.0, max: 200.0 };
        let result = forecast(&model, &initial_window(10), 4, &scaler).unwrap();
        assert_eq!(result.prices, vec![150.0; 4]);
    }

    #[test]
    fn test_non_finite_prediction_fails_fast() {
        let model = RecordingModel::new(vec![0.3, f64::NAN]);
        match forecast(&model, &initial_window(10), 5, &unit_scaler()) {
            Err(ForecastError::NonFinitePrediction { step }) => assert_eq!(step, 1),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(model.windows().len(), 2);
    }

    #[test]
    fn test_zero_steps_rejected() {
        let model = RecordingModel::new(vec![0.3]);
        assert!(forecast(&model, &initial_window(10), 0, &unit_scaler()).is_err());
    }

    #[test]
    fn test_single_row_window() {
        let model = RecordingModel::new(vec![0.7]);
        let window = initial_window(1);
        forecast(&model, &window, 2, &unit_scaler()).unwrap();
        let windows = model.windows();
        assert_eq!(windows[1][[0, CLOSE]], 0.7);
        assert_eq!(windows[1][[0, OPEN]], window[[0, OPEN]]);
    }
}
