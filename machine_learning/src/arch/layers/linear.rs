use std::ops::Range;

use ndarray::{Array2, ArrayView1, ArrayView2, linalg};

use crate::{
    MlErr, Result,
    params::{ParamInit, ParamLayout, join_key},
};

/// A fully connected layer, `y = x · Wᵀ + b`.
///
/// Weights are stored `[out, in]`, the same way checkpoints store them.
#[derive(Debug, Clone)]
pub struct Linear {
    dim: (usize, usize),
    weight: Range<usize>,
    bias: Range<usize>,
}

impl Linear {
    /// Creates a new `Linear` registering its parameters under `prefix`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `prefix` - The module's name, e.g. `fc` or `classifier.1`.
    /// * `dim` - The `(in, out)` features.
    pub fn new(layout: &mut ParamLayout, prefix: &str, dim: (usize, usize)) -> Self {
        let (n, m) = dim;
        let bound = 1. / (n.max(1) as f32).sqrt();

        let weight = layout.push(join_key(prefix, "weight"), &[m, n], ParamInit::Uniform { bound });
        let bias = layout.push(join_key(prefix, "bias"), &[m], ParamInit::Uniform { bound });

        Self { dim, weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.dim.0
    }

    /// Returns the width of this layer's output.
    pub fn out_features(&self) -> usize {
        self.dim.1
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - The network's flat parameter buffer.
    /// * `x` - The input, shaped `[batch, in]`.
    ///
    /// # Returns
    /// The output shaped `[batch, out]`.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "linear input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut z);
        z += &b;

        Ok(z)
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let (n, m) = self.dim;
        let weights = ArrayView2::from_shape((m, n), &params[self.weight.clone()])?;
        let biases = ArrayView1::from_shape(m, &params[self.bias.clone()])?;
        Ok((weights, biases))
    }
}
