use ndarray::{Array2, Array4, ArrayView4, Axis};
use rayon::prelude::*;

use crate::{MlErr, Result};

/// Averages every channel plane, `[b, c, h, w] -> [b, c]`.
pub fn global_avg_pool(x: ArrayView4<f32>) -> Array2<f32> {
    let (_, _, h, w) = x.dim();
    let area = (h * w).max(1) as f32;
    x.sum_axis(Axis(3)).sum_axis(Axis(2)) / area
}

/// Max pooling with a square window, padded positions never win.
///
/// # Arguments
/// * `x` - The input, shaped `[batch, channels, h, w]`.
/// * `kernel` - The window size.
/// * `stride` - The window step.
/// * `padding` - The implicit padding on every border.
pub fn max_pool2d(x: ArrayView4<f32>, kernel: usize, stride: usize, padding: usize) -> Result<Array4<f32>> {
    let (batch, channels, h, w) = x.dim();
    let out = |size: usize| {
        let padded = size + 2 * padding;
        if padded < kernel || stride == 0 {
            return Err(MlErr::InputTooSmall {
                what: "max_pool2d",
                size: padded,
                kernel,
            });
        }
        Ok((padded - kernel) / stride + 1)
    };
    let (oh, ow) = (out(h)?, out(w)?);

    let mut y = Array4::from_elem((batch, channels, oh, ow), f32::NEG_INFINITY);
    for (x, mut y) in x.outer_iter().zip(y.outer_iter_mut()) {
        y.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut plane, xc)| {
                for ((oy, ox), v) in plane.indexed_iter_mut() {
                    for ki in 0..kernel {
                        let Some(iy) = (oy * stride + ki).checked_sub(padding).filter(|&iy| iy < h)
                        else {
                            continue;
                        };
                        for kj in 0..kernel {
                            if let Some(ix) = (ox * stride + kj).checked_sub(padding).filter(|&ix| ix < w) {
                                *v = v.max(xc[[iy, ix]]);
                            }
                        }
                    }
                }
            });
    }

    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    #[test]
    fn global_average() {
        let x = Array::from_shape_vec((1, 2, 2, 2), vec![1., 2., 3., 4., 0., 0., 0., 8.]).unwrap();
        assert_eq!(global_avg_pool(x.view()), array![[2.5, 2.0]]);
    }

    #[test]
    fn max_pool_halves_with_padding() {
        let x = Array::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| -((i * 4 + j) as f32));
        let y = max_pool2d(x.view(), 3, 2, 1).unwrap();

        assert_eq!(y.dim(), (1, 1, 2, 2));
        // all values are non positive, padding must not leak a 0 or -inf
        assert_eq!(y[[0, 0, 0, 0]], 0.0);
        assert_eq!(y[[0, 0, 1, 1]], -5.0);
    }
}
