use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::lstm::{hidden_states, LayerGrads, LstmLayer, StepCache};
use super::optimizer::Adam;
use super::sequence::TrainingSet;

/// Anything that maps one scaled `(window, channels)` input to a scaled next close
pub trait SequenceModel: Send + Sync {
    fn predict(&self, window: ArrayView2<'_, f64>) -> f64;
}

/// Hyperparameters for a single fit
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub clip_norm: f64,
    pub seed: u64,
}

/// Training report after model fit
#[derive(Debug, Clone)]
pub struct FitReport {
    pub samples: usize,
    pub epoch_losses: Vec<f64>,
}

impl FitReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Stacked LSTM regressor: recurrent layers followed by a linear head on the
/// last hidden state of the top layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedLstm {
    pub(crate) layers: Vec<LstmLayer>,
    pub(crate) head_w: Array1<f64>,
    pub(crate) head_b: f64,
}

/// Gradients for every parameter of a `StackedLstm`
#[derive(Debug, Clone)]
pub struct ModelGrads {
    pub layers: Vec<LayerGrads>,
    pub head_w: Array1<f64>,
    pub head_b: f64,
}

impl ModelGrads {
    pub fn zeros_like(model: &StackedLstm) -> Self {
        Self {
            layers: model.layers.iter().map(LayerGrads::zeros_like).collect(),
            head_w: Array1::zeros(model.head_w.raw_dim()),
            head_b: 0.0,
        }
    }

    fn global_norm(&self) -> f64 {
        let layers: f64 = self.layers.iter().map(LayerGrads::sum_of_squares).sum();
        let head: f64 = self.head_w.iter().map(|g| g * g).sum();
        (layers + head + self.head_b * self.head_b).sqrt()
    }

    /// Rescale so the global L2 norm does not exceed `max_norm`
    fn clip(&mut self, max_norm: f64) {
        let norm = self.global_norm();
        if norm > max_norm && norm > 0.0 {
            let factor = max_norm / norm;
            for layer in &mut self.layers {
                layer.scale(factor);
            }
            self.head_w *= factor;
            self.head_b *= factor;
        }
    }
}

impl StackedLstm {
    pub fn new(input_size: usize, hidden_sizes: &[usize], seed: u64) -> Result<Self> {
        if hidden_sizes.is_empty() || hidden_sizes.contains(&0) {
            return Err(anyhow!("Hidden sizes must be non-empty and positive: {:?}", hidden_sizes));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(hidden_sizes.len());
        let mut fan_in = input_size;
        for &hidden in hidden_sizes {
            layers.push(LstmLayer::new(fan_in, hidden, &mut rng));
            fan_in = hidden;
        }

        let k = 1.0 / (fan_in as f64).sqrt();
        let head_w = Array1::from_shape_fn(fan_in, |_| rng.gen_range(-k..k));

        Ok(Self { layers, head_w, head_b: 0.0 })
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(LstmLayer::input_size).unwrap_or(0)
    }

    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(LstmLayer::hidden_size).collect()
    }

    /// Check that deserialized weights are mutually consistent
    pub fn validate(&self) -> Result<()> {
        let top = self
            .layers
            .last()
            .ok_or_else(|| anyhow!("Model has no recurrent layers"))?;

        let mut fan_in = self.input_size();
        for (idx, layer) in self.layers.iter().enumerate() {
            let hs = layer.hidden_size();
            if layer.w.dim() != (4 * hs, fan_in) || layer.u.dim() != (4 * hs, hs) || layer.b.len() != 4 * hs {
                return Err(anyhow!("Layer {} has inconsistent weight shapes", idx));
            }
            fan_in = hs;
        }

        if self.head_w.len() != top.hidden_size() {
            return Err(anyhow!(
                "Head expects {} inputs but top layer has {} units",
                self.head_w.len(),
                top.hidden_size()
            ));
        }
        Ok(())
    }

    fn forward_cached(&self, window: ArrayView2<'_, f64>) -> (f64, Vec<Vec<StepCache>>) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut seq: Array2<f64> = window.to_owned();

        for layer in &self.layers {
            let layer_caches = layer.forward_sequence(seq.view());
            seq = hidden_states(&layer_caches, layer.hidden_size());
            caches.push(layer_caches);
        }

        let y = match seq.outer_iter().last() {
            Some(last_h) => self.head_w.dot(&last_h) + self.head_b,
            None => self.head_b,
        };
        (y, caches)
    }

    fn backward(&self, caches: &[Vec<StepCache>], dy: f64, grads: &mut ModelGrads) {
        let top = match caches.last() {
            Some(top) if !top.is_empty() => top,
            _ => {
                grads.head_b += dy;
                return;
            }
        };
        let steps = top.len();

        if let Some(last) = top.last() {
            grads.head_w.scaled_add(dy, &last.h);
        }
        grads.head_b += dy;

        let top_hidden = self.head_w.len();
        let mut dh_out = Array2::zeros((steps, top_hidden));
        dh_out.row_mut(steps - 1).scaled_add(dy, &self.head_w);

        for (idx, layer) in self.layers.iter().enumerate().rev() {
            dh_out = layer.backward(&caches[idx], &dh_out, &mut grads.layers[idx]);
        }
    }

    /// Minimise mean squared error over `train` with Adam. Mini-batches are
    /// drawn in a seeded shuffled order.
    pub fn fit(&mut self, train: &TrainingSet, options: &FitOptions) -> Result<FitReport> {
        let n = train.len();
        if train.is_empty() {
            return Err(anyhow!("Cannot fit on an empty training set"));
        }
        if train.inputs.len_of(Axis(2)) != self.input_size() {
            return Err(anyhow!(
                "Training inputs have {} channels, model expects {}",
                train.inputs.len_of(Axis(2)),
                self.input_size()
            ));
        }

        let batch_size = options.batch_size.max(1);
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut optimizer = Adam::new(self, options.learning_rate);
        let mut order: Vec<usize> = (0..n).collect();
        let mut epoch_losses = Vec::with_capacity(options.epochs);

        for epoch in 0..options.epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;

            for batch in order.chunks(batch_size) {
                let mut grads = ModelGrads::zeros_like(self);
                for &idx in batch {
                    let (y, caches) = self.forward_cached(train.inputs.index_axis(Axis(0), idx));
                    let err = y - train.targets[idx];
                    total += err * err;
                    self.backward(&caches, 2.0 * err / batch.len() as f64, &mut grads);
                }
                grads.clip(options.clip_norm);
                optimizer.step(self, &grads);
            }

            let epoch_loss = total / n as f64;
            if !epoch_loss.is_finite() {
                return Err(anyhow!("Training diverged at epoch {}", epoch + 1));
            }
            debug!("Epoch {}/{}: mse={:.6}", epoch + 1, options.epochs, epoch_loss);
            if (epoch + 1) % 5 == 0 || epoch + 1 == options.epochs {
                info!("Epoch {}/{} - loss {:.6}", epoch + 1, options.epochs, epoch_loss);
            }
            epoch_losses.push(epoch_loss);
        }

        Ok(FitReport { samples: n, epoch_losses })
    }

    /// Predict every window of a training set
    pub fn predict_batch(&self, set: &TrainingSet) -> Vec<f64> {
        set.inputs
            .outer_iter()
            .map(|window| self.predict(window))
            .collect()
    }

    /// Serialize model to JSON string for persistence
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load model from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let model: StackedLstm = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    /// A model whose output is always `value`: every weight is zero
    #[cfg(test)]
    pub fn constant(input_size: usize, hidden_sizes: &[usize], value: f64) -> Self {
        let mut model = Self::new(input_size, hidden_sizes, 0).expect("valid sizes");
        for layer in &mut model.layers {
            layer.w.fill(0.0);
            layer.u.fill(0.0);
            layer.b.fill(0.0);
        }
        model.head_w.fill(0.0);
        model.head_b = value;
        model
    }
}

impl SequenceModel for StackedLstm {
    fn predict(&self, window: ArrayView2<'_, f64>) -> f64 {
        self.forward_cached(window).0
    }
}
