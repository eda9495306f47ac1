use ndarray::{s, Array1, Array2, Array3};

use super::scaler::{CLOSE, NUM_CHANNELS};
use crate::error::ForecastError;
use crate::types::Candle;

/// Stack candles into an `(N, 3)` matrix of open, close, volume
pub fn feature_matrix(candles: &[Candle]) -> Array2<f64> {
    let mut features = Array2::<f64>::zeros((candles.len(), NUM_CHANNELS));
    for (i, c) in candles.iter().enumerate() {
        features[[i, 0]] = c.open;
        features[[i, 1]] = c.close;
        features[[i, 2]] = c.volume;
    }
    features
}

/// Supervised windows cut from a scaled series
#[derive(Debug, Clone)]
pub struct TrainingSet {
    /// `(pairs, window, channels)`
    pub inputs: Array3<f64>,
    /// Scaled close following each window
    pub targets: Array1<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Chronological split: the first `1 - test_fraction` of pairs train, the rest test
    pub fn split(&self, test_fraction: f64) -> (TrainingSet, TrainingSet) {
        let n = self.len();
        let test_len = ((n as f64) * test_fraction).ceil() as usize;
        let train_len = n.saturating_sub(test_len);

        let train = TrainingSet {
            inputs: self.inputs.slice(s![..train_len, .., ..]).to_owned(),
            targets: self.targets.slice(s![..train_len]).to_owned(),
        };
        let test = TrainingSet {
            inputs: self.inputs.slice(s![train_len.., .., ..]).to_owned(),
            targets: self.targets.slice(s![train_len..]).to_owned(),
        };
        (train, test)
    }
}

/// Build `N - window` (input, target) pairs; pair `i` sees rows `i..i+window`
/// and targets the close at `i+window`. Yields an empty set when `N <= window`.
pub fn training_pairs(scaled: &Array2<f64>, window: usize) -> TrainingSet {
    let n = scaled.nrows();
    let pairs = n.saturating_sub(window);
    let channels = scaled.ncols();

    let mut inputs = Array3::<f64>::zeros((pairs, window, channels));
    let mut targets = Array1::<f64>::zeros(pairs);

    for i in 0..pairs {
        inputs
            .slice_mut(s![i, .., ..])
            .assign(&scaled.slice(s![i..i + window, ..]));
        targets[i] = scaled[[i + window, CLOSE]];
    }

    TrainingSet { inputs, targets }
}

/// The most recent `window` rows, ready to feed the model
pub fn inference_window(scaled: &Array2<f64>, window: usize) -> Result<Array2<f64>, ForecastError> {
    let n = scaled.nrows();
    if n < window {
        return Err(ForecastError::InsufficientData {
            required: window,
            actual: n,
        });
    }
    Ok(scaled.slice(s![n - window.., ..]).to_owned())
}
