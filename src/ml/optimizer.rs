use ndarray::{Array, Dimension, Zip};

use super::model::{ModelGrads, StackedLstm};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// First and second moment estimates for one parameter tensor
struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros_like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn update(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, step_size: f64) {
        Zip::from(param)
            .and(grad)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= step_size * *m / (v.sqrt() + EPSILON);
            });
    }
}

struct LayerMoments {
    w: Moments<ndarray::Ix2>,
    u: Moments<ndarray::Ix2>,
    b: Moments<ndarray::Ix1>,
}

/// Adam optimizer state for a `StackedLstm`
pub struct Adam {
    learning_rate: f64,
    t: i32,
    layers: Vec<LayerMoments>,
    head_w: Moments<ndarray::Ix1>,
    head_b: (f64, f64),
}

impl Adam {
    pub fn new(model: &StackedLstm, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            t: 0,
            layers: model
                .layers
                .iter()
                .map(|layer| LayerMoments {
                    w: Moments::zeros_like(&layer.w),
                    u: Moments::zeros_like(&layer.u),
                    b: Moments::zeros_like(&layer.b),
                })
                .collect(),
            head_w: Moments::zeros_like(&model.head_w),
            head_b: (0.0, 0.0),
        }
    }

    /// Apply one bias-corrected update
    pub fn step(&mut self, model: &mut StackedLstm, grads: &ModelGrads) {
        self.t += 1;
        let step_size = self.learning_rate * (1.0 - BETA2.powi(self.t)).sqrt() / (1.0 - BETA1.powi(self.t));

        for ((layer, moments), g) in model.layers.iter_mut().zip(&mut self.layers).zip(&grads.layers) {
            moments.w.update(&mut layer.w, &g.w, step_size);
            moments.u.update(&mut layer.u, &g.u, step_size);
            moments.b.update(&mut layer.b, &g.b, step_size);
        }
        self.head_w.update(&mut model.head_w, &grads.head_w, step_size);

        let (m, v) = &mut self.head_b;
        *m = BETA1 * *m + (1.0 - BETA1) * grads.head_b;
        *v = BETA2 * *v + (1.0 - BETA2) * grads.head_b * grads.head_b;
        model.head_b -= step_size * *m / (v.sqrt() + EPSILON);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_step_moves_against_gradient() {
        let mut model = StackedLstm::new(2, &[3], 1).unwrap();
        let before_w = model.layers[0].w.clone();
        let before_b = model.head_b;

        let mut grads = ModelGrads::zeros_like(&model);
        grads.layers[0].w = Array2::ones(before_w.raw_dim());
        grads.head_b = -1.0;

        let mut adam = Adam::new(&model, 0.1);
        adam.step(&mut model, &grads);

        // first bias-corrected Adam step moves each parameter by ~lr
        let delta = &before_w - &model.layers[0].w;
        assert!(delta.iter().all(|d| (d - 0.1).abs() < 1e-6));
        assert!((model.head_b - before_b - 0.1).abs() < 1e-6);
        assert_eq!(adam.t, 1);
    }
}
