use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One LSTM layer. Gate blocks in `w`, `u` and `b` are stacked in the order
/// input, forget, cell candidate, output; each block is `hidden` rows tall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    /// Input weights `(4H, I)`
    pub w: Array2<f64>,
    /// Recurrent weights `(4H, H)`
    pub u: Array2<f64>,
    /// Bias `(4H)`
    pub b: Array1<f64>,
}

/// Activations kept from the forward pass for backpropagation through time
#[derive(Debug, Clone)]
pub struct StepCache {
    pub x: Array1<f64>,
    pub h_prev: Array1<f64>,
    pub c_prev: Array1<f64>,
    pub i: Array1<f64>,
    pub f: Array1<f64>,
    pub g: Array1<f64>,
    pub o: Array1<f64>,
    pub tanh_c: Array1<f64>,
    pub h: Array1<f64>,
    pub c: Array1<f64>,
}

/// Accumulated gradients, same shapes as the layer
#[derive(Debug, Clone)]
pub struct LayerGrads {
    pub w: Array2<f64>,
    pub u: Array2<f64>,
    pub b: Array1<f64>,
}

impl LayerGrads {
    pub fn zeros_like(layer: &LstmLayer) -> Self {
        Self {
            w: Array2::zeros(layer.w.raw_dim()),
            u: Array2::zeros(layer.u.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    pub fn sum_of_squares(&self) -> f64 {
        self.w.iter().chain(self.u.iter()).chain(self.b.iter()).map(|g| g * g).sum()
    }

    pub fn scale(&mut self, factor: f64) {
        self.w *= factor;
        self.u *= factor;
        self.b *= factor;
    }
}

impl LstmLayer {
    /// Uniform `[-1/sqrt(H), 1/sqrt(H)]` initialisation with forget bias 1.0
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut impl Rng) -> Self {
        let k = 1.0 / (hidden_size as f64).sqrt();
        let w = Array2::from_shape_fn((4 * hidden_size, input_size), |_| rng.gen_range(-k..k));
        let u = Array2::from_shape_fn((4 * hidden_size, hidden_size), |_| rng.gen_range(-k..k));
        let mut b = Array1::zeros(4 * hidden_size);
        b.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);
        Self { w, u, b }
    }

    pub fn hidden_size(&self) -> usize {
        self.u.ncols()
    }

    pub fn input_size(&self) -> usize {
        self.w.ncols()
    }

    fn step(&self, x: ArrayView1<'_, f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> StepCache {
        let hs = self.hidden_size();
        let z = self.w.dot(&x) + self.u.dot(h_prev) + &self.b;

        let i = z.slice(s![0..hs]).mapv(sigmoid);
        let f = z.slice(s![hs..2 * hs]).mapv(sigmoid);
        let g = z.slice(s![2 * hs..3 * hs]).mapv(f64::tanh);
        let o = z.slice(s![3 * hs..4 * hs]).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let tanh_c = c.mapv(f64::tanh);
        let h = &o * &tanh_c;

        StepCache {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            tanh_c,
            h,
            c,
        }
    }

    /// Run over a `(T, I)` sequence from a zero state
    pub fn forward_sequence(&self, inputs: ArrayView2<'_, f64>) -> Vec<StepCache> {
        let hs = self.hidden_size();
        let mut h = Array1::zeros(hs);
        let mut c = Array1::zeros(hs);
        let mut caches = Vec::with_capacity(inputs.nrows());

        for x in inputs.axis_iter(Axis(0)) {
            let cache = self.step(x, &h, &c);
            h = cache.h.clone();
            c = cache.c.clone();
            caches.push(cache);
        }
        caches
    }

    /// Backpropagate `dh_out` (gradient w.r.t. each timestep's hidden output,
    /// shape `(T, H)`) through time. Accumulates into `grads` and returns the
    /// gradient w.r.t. the layer inputs, shape `(T, I)`.
    pub fn backward(&self, caches: &[StepCache], dh_out: &Array2<f64>, grads: &mut LayerGrads) -> Array2<f64> {
        let hs = self.hidden_size();
        let steps = caches.len();

        let mut dx = Array2::zeros((steps, self.input_size()));
        let mut dh_next = Array1::<f64>::zeros(hs);
        let mut dc_next = Array1::<f64>::zeros(hs);
        let mut dz = Array1::<f64>::zeros(4 * hs);

        for t in (0..steps).rev() {
            let cache = &caches[t];
            let dh = &dh_out.row(t) + &dh_next;

            let d_o = &dh * &cache.tanh_c;
            let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let d_i = &dc * &cache.g;
            let d_g = &dc * &cache.i;
            let d_f = &dc * &cache.c_prev;
            dc_next = &dc * &cache.f;

            dz.slice_mut(s![0..hs]).assign(&(d_i * &cache.i.mapv(sigmoid_grad)));
            dz.slice_mut(s![hs..2 * hs]).assign(&(d_f * &cache.f.mapv(sigmoid_grad)));
            dz.slice_mut(s![2 * hs..3 * hs]).assign(&(d_g * &cache.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * hs..4 * hs]).assign(&(d_o * &cache.o.mapv(sigmoid_grad)));

            let dz_col = dz.view().insert_axis(Axis(1));
            general_mat_mul(1.0, &dz_col, &cache.x.view().insert_axis(Axis(0)), 1.0, &mut grads.w);
            general_mat_mul(1.0, &dz_col, &cache.h_prev.view().insert_axis(Axis(0)), 1.0, &mut grads.u);
            grads.b += &dz;

            dx.row_mut(t).assign(&self.w.t().dot(&dz));
            dh_next = self.u.t().dot(&dz);
        }

        dx
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of the sigmoid expressed through its output
fn sigmoid_grad(s: f64) -> f64 {
    s * (1.0 - s)
}

/// Stack the hidden outputs of a cached sequence into `(T, H)`
pub fn hidden_states(caches: &[StepCache], hidden_size: usize) -> Array2<f64> {
    let mut out = Array2::zeros((caches.len(), hidden_size));
    for (t, cache) in caches.iter().enumerate() {
        out.row_mut(t).assign(&cache.h);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn loss(layer: &LstmLayer, inputs: &Array2<f64>) -> f64 {
        let caches = layer.forward_sequence(inputs.view());
        caches.iter().map(|c| c.h.sum()).sum()
    }

    #[test]
    fn test_layer_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = LstmLayer::new(3, 5, &mut rng);
        assert_eq!(layer.w.dim(), (20, 3));
        assert_eq!(layer.u.dim(), (20, 5));
        assert_eq!(layer.b.len(), 20);
        assert_eq!(layer.b[5], 1.0);

        let inputs = Array2::from_elem((4, 3), 0.5);
        let caches = layer.forward_sequence(inputs.view());
        assert_eq!(caches.len(), 4);
        assert_eq!(hidden_states(&caches, 5).dim(), (4, 5));
        assert!(caches.iter().all(|c| c.h.iter().all(|v| v.abs() < 1.0)));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let layer = LstmLayer::new(2, 3, &mut rng);
        let inputs = Array2::from_shape_fn((4, 2), |(t, j)| 0.3 * t as f64 - 0.2 * j as f64);

        let caches = layer.forward_sequence(inputs.view());
        let dh_out = Array2::ones((4, 3));
        let mut grads = LayerGrads::zeros_like(&layer);
        let dx = layer.backward(&caches, &dh_out, &mut grads);

        let eps = 1e-6;
        for &(r, c) in &[(0usize, 0usize), (4, 1), (7, 0), (11, 1)] {
            let mut plus = layer.clone();
            plus.w[[r, c]] += eps;
            let mut minus = layer.clone();
            minus.w[[r, c]] -= eps;
            let numeric = (loss(&plus, &inputs) - loss(&minus, &inputs)) / (2.0 * eps);
            assert!((numeric - grads.w[[r, c]]).abs() < 1e-5, "w[{},{}]", r, c);
        }

        for &(r, c) in &[(1usize, 2usize), (9, 0)] {
            let mut plus = layer.clone();
            plus.u[[r, c]] += eps;
            let mut minus = layer.clone();
            minus.u[[r, c]] -= eps;
            let numeric = (loss(&plus, &inputs) - loss(&minus, &inputs)) / (2.0 * eps);
            assert!((numeric - grads.u[[r, c]]).abs() < 1e-5, "u[{},{}]", r, c);
        }

        let mut plus = inputs.clone();
        plus[[2, 1]] += eps;
        let mut minus = inputs.clone();
        minus[[2, 1]] -= eps;
        let numeric = (loss(&layer, &plus) - loss(&layer, &minus)) / (2.0 * eps);
        assert!((numeric - dx[[2, 1]]).abs() < 1e-5);
    }
}
