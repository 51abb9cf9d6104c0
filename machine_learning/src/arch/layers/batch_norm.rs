use std::ops::Range;

use ndarray::{Array4, Axis};
use rayon::prelude::*;

use crate::{
    MlErr, Result,
    params::{ParamInit, ParamLayout, join_key},
};

const DEFAULT_EPS: f32 = 1e-5;

/// Per-channel batch normalization over `[batch, channels, h, w]` tensors.
///
/// In eval mode the running statistics are used, in training mode the statistics of the
/// incoming batch are. The running statistics are never updated, this crate doesn't train.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    channels: usize,
    eps: f32,
    weight: Range<usize>,
    bias: Range<usize>,
    running_mean: Range<usize>,
    running_var: Range<usize>,
}

impl BatchNorm2d {
    /// Creates a new `BatchNorm2d` registering its parameters and buffers under `prefix`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `prefix` - The module's name, e.g. `bn1`.
    /// * `channels` - The amount of channels to normalize.
    pub fn new(layout: &mut ParamLayout, prefix: &str, channels: usize) -> Self {
        let weight = layout.push(join_key(prefix, "weight"), &[channels], ParamInit::Ones);
        let bias = layout.push(join_key(prefix, "bias"), &[channels], ParamInit::Zeros);
        let running_mean = layout.push(join_key(prefix, "running_mean"), &[channels], ParamInit::Zeros);
        let running_var = layout.push(join_key(prefix, "running_var"), &[channels], ParamInit::Ones);
        layout.push(join_key(prefix, "num_batches_tracked"), &[], ParamInit::Zeros);

        Self {
            channels,
            eps: DEFAULT_EPS,
            weight,
            bias,
            running_mean,
            running_var,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Normalizes `x` in place.
    ///
    /// # Arguments
    /// * `params` - The network's flat parameter buffer.
    /// * `x` - The input, shaped `[batch, channels, h, w]`.
    /// * `training` - Whether to use the batch statistics instead of the running ones.
    pub fn forward(&self, params: &[f32], mut x: Array4<f32>, training: bool) -> Result<Array4<f32>> {
        let channels = x.len_of(Axis(1));
        if channels != self.channels {
            return Err(MlErr::SizeMismatch {
                what: "batch norm channels",
                got: channels,
                expected: self.channels,
            });
        }

        let gamma = &params[self.weight.clone()];
        let beta = &params[self.bias.clone()];
        let running_mean = &params[self.running_mean.clone()];
        let running_var = &params[self.running_var.clone()];
        let eps = self.eps;

        x.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(c, mut plane)| {
                let (mean, var) = if training {
                    let n = plane.len().max(1) as f32;
                    let mean = plane.sum() / n;
                    let var = plane.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / n;
                    (mean, var)
                } else {
                    (running_mean[c], running_var[c])
                };

                let scale = gamma[c] / (var + eps).sqrt();
                let shift = beta[c] - mean * scale;
                plane.mapv_inplace(|v| v * scale + shift);
            });

        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn registers_buffers_like_pytorch() {
        let mut layout = ParamLayout::new();
        BatchNorm2d::new(&mut layout, "bn1", 4);

        let names: Vec<_> = layout.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "bn1.weight",
                "bn1.bias",
                "bn1.running_mean",
                "bn1.running_var",
                "bn1.num_batches_tracked"
            ]
        );
        assert!(layout.get("bn1.num_batches_tracked").unwrap().shape.is_empty());
    }

    #[test]
    fn eval_uses_running_statistics() {
        let mut layout = ParamLayout::new();
        let bn = BatchNorm2d::new(&mut layout, "bn", 2);

        // gamma, beta, mean, var, num_batches_tracked
        let params = [2.0, 1.0, 0.0, 1.0, 1.0, 3.0, 4.0, 0.0, 0.0];
        assert_eq!(params.len(), layout.size());

        let mut x = Array4::zeros((1, 2, 2, 2));
        x.slice_mut(s![0, 0, .., ..]).fill(2.0);
        x.slice_mut(s![0, 1, .., ..]).fill(5.0);

        let y = bn.forward(&params, x, false).unwrap();
        let eps_scale = |var: f32| 1.0 / (var + DEFAULT_EPS).sqrt();

        let expected0 = 2.0 * 1.0 * eps_scale(4.0) + 0.0;
        let expected1 = (5.0 - 3.0) * 1.0 * eps_scale(0.0) + 1.0;
        assert!((y[[0, 0, 1, 1]] - expected0).abs() < 1e-4);
        assert!((y[[0, 1, 0, 0]] - expected1).abs() < 1e-2);
    }

    #[test]
    fn training_uses_batch_statistics() {
        let mut layout = ParamLayout::new();
        let bn = BatchNorm2d::new(&mut layout, "bn", 1);
        let params = [1.0, 0.0, 100.0, 100.0, 0.0];

        let x = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = bn.forward(&params, x, true).unwrap();

        assert!(y.sum().abs() < 1e-5);
        assert!(y[[0, 0, 0, 0]] < 0.0 && y[[0, 0, 1, 1]] > 0.0);
    }
}
