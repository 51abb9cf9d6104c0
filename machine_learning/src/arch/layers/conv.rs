use std::ops::Range;

use ndarray::{
    Array2, Array4, ArrayView2, ArrayView3, ArrayView4, ArrayViewMut2, ArrayViewMut3, Axis, linalg,
    s,
};
use rayon::prelude::*;

use crate::{
    MlErr, Result,
    params::{ParamInit, ParamLayout, join_key},
};

/// The hyper parameters of a 2D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    pub bias: bool,
}

impl ConvSpec {
    /// Creates a new `ConvSpec` with stride 1, "same" padding, a single group and no bias.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: 1,
            padding: kernel.saturating_sub(1) / 2,
            groups: 1,
            bias: false,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// A depthwise convolution has one group per channel.
    pub fn depthwise(self) -> Self {
        let groups = self.in_channels;
        self.groups(groups)
    }

    pub fn with_bias(mut self) -> Self {
        self.bias = true;
        self
    }

    fn is_depthwise(&self) -> bool {
        self.groups == self.in_channels && self.groups == self.out_channels
    }

    fn is_pointwise(&self) -> bool {
        self.kernel == 1 && self.stride == 1 && self.padding == 0
    }
}

/// A 2D convolution over `[batch, channels, height, width]` tensors.
///
/// Weights follow the `[out, in / groups, k, k]` layout.
#[derive(Debug, Clone)]
pub struct Conv2d {
    spec: ConvSpec,
    weight: Range<usize>,
    bias: Option<Range<usize>>,
}

impl Conv2d {
    /// Creates a new `Conv2d` registering its parameters under `prefix`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `prefix` - The module's name, e.g. `layer1.0.conv1`.
    /// * `spec` - The convolution's hyper parameters.
    ///
    /// # Returns
    /// A new `Conv2d` or an error if the channels aren't divisible by the groups.
    pub fn new(layout: &mut ParamLayout, prefix: &str, spec: ConvSpec) -> Result<Self> {
        let ConvSpec {
            in_channels,
            out_channels,
            kernel,
            groups,
            ..
        } = spec;

        if groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
            return Err(MlErr::InvalidConfig(format!(
                "{prefix}: channels ({in_channels} -> {out_channels}) not divisible by {groups} groups"
            )));
        }

        if kernel == 0 || spec.stride == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "{prefix}: kernel and stride must be greater than 0"
            )));
        }

        let fan_out = out_channels / groups * kernel * kernel;
        let weight = layout.push(
            join_key(prefix, "weight"),
            &[out_channels, in_channels / groups, kernel, kernel],
            ParamInit::KaimingNormal { fan_out },
        );

        let bias = spec
            .bias
            .then(|| layout.push(join_key(prefix, "bias"), &[out_channels], ParamInit::Zeros));

        Ok(Self { spec, weight, bias })
    }

    pub fn spec(&self) -> &ConvSpec {
        &self.spec
    }

    /// Returns the output height and width for an input of the given size.
    pub fn output_size(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let ConvSpec {
            kernel,
            stride,
            padding,
            ..
        } = self.spec;

        let out = |size: usize| {
            let padded = size + 2 * padding;
            if padded < kernel {
                return Err(MlErr::InputTooSmall {
                    what: "conv2d",
                    size: padded,
                    kernel,
                });
            }

            Ok((padded - kernel) / stride + 1)
        };

        Ok((out(h)?, out(w)?))
    }

    /// Makes a forward pass through the convolution.
    ///
    /// # Arguments
    /// * `params` - The network's flat parameter buffer.
    /// * `x` - The input, shaped `[batch, in_channels, h, w]`.
    ///
    /// # Returns
    /// The output shaped `[batch, out_channels, h', w']`.
    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, h, w) = x.dim();
        if channels != self.spec.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input channels",
                got: channels,
                expected: self.spec.in_channels,
            });
        }

        let (oh, ow) = self.output_size(h, w)?;
        let mut out = Array4::zeros((batch, self.spec.out_channels, oh, ow));

        for (x, mut y) in x.outer_iter().zip(out.outer_iter_mut()) {
            if self.spec.is_depthwise() {
                self.depthwise(params, x, y.view_mut())?;
            } else {
                let mut y = y.view_mut().into_shape_with_order((self.spec.out_channels, oh * ow))?;
                self.grouped(params, x, (oh, ow), &mut y)?;
            }
        }

        if let Some(bias) = &self.bias {
            let b = &params[bias.clone()];
            out.axis_iter_mut(Axis(1))
                .into_par_iter()
                .zip(b.par_iter())
                .for_each(|(mut plane, &b)| plane += b);
        }

        Ok(out)
    }

    /// Grouped (or dense, with a single group) convolution as an im2col matrix product per group.
    fn grouped(
        &self,
        params: &[f32],
        x: ArrayView3<f32>,
        (oh, ow): (usize, usize),
        y: &mut ArrayViewMut2<f32>,
    ) -> Result<()> {
        let ConvSpec {
            in_channels,
            out_channels,
            kernel,
            groups,
            ..
        } = self.spec;

        let cin = in_channels / groups;
        let cout = out_channels / groups;
        let weights = ArrayView2::from_shape(
            (out_channels, cin * kernel * kernel),
            &params[self.weight.clone()],
        )?;

        for g in 0..groups {
            let xg = x.slice(s![g * cin..(g + 1) * cin, .., ..]);
            let wg = weights.slice(s![g * cout..(g + 1) * cout, ..]);
            let mut yg = y.slice_mut(s![g * cout..(g + 1) * cout, ..]);

            if self.spec.is_pointwise() {
                let xg = xg.to_shape((cin, oh * ow))?;
                linalg::general_mat_mul(1.0, &wg, &xg, 0.0, &mut yg);
            } else {
                let cols = self.im2col(xg, (oh, ow));
                linalg::general_mat_mul(1.0, &wg, &cols, 0.0, &mut yg);
            }
        }

        Ok(())
    }

    /// Unfolds the input so that each column holds the receptive field of one output pixel.
    fn im2col(&self, x: ArrayView3<f32>, (oh, ow): (usize, usize)) -> Array2<f32> {
        let ConvSpec {
            kernel,
            stride,
            padding,
            ..
        } = self.spec;

        let (channels, h, w) = x.dim();
        let mut cols = Array2::zeros((channels * kernel * kernel, oh * ow));

        cols.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut col)| {
                let c = row / (kernel * kernel);
                let ki = (row / kernel) % kernel;
                let kj = row % kernel;

                for oy in 0..oh {
                    let Some(iy) = (oy * stride + ki).checked_sub(padding).filter(|&iy| iy < h)
                    else {
                        continue;
                    };

                    for ox in 0..ow {
                        if let Some(ix) = (ox * stride + kj).checked_sub(padding).filter(|&ix| ix < w) {
                            col[oy * ow + ox] = x[[c, iy, ix]];
                        }
                    }
                }
            });

        cols
    }

    /// One filter per channel, computed directly over the padded window.
    fn depthwise(
        &self,
        params: &[f32],
        x: ArrayView3<f32>,
        mut y: ArrayViewMut3<f32>,
    ) -> Result<()> {
        let ConvSpec {
            out_channels,
            kernel,
            stride,
            padding,
            ..
        } = self.spec;

        let weights = ArrayView3::from_shape(
            (out_channels, kernel, kernel),
            &params[self.weight.clone()],
        )?;
        let (_, h, w) = x.dim();

        y.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(c, mut plane)| {
                let xc = x.index_axis(Axis(0), c);
                let wc = weights.index_axis(Axis(0), c);
                let (oh, ow) = plane.dim();

                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut acc = 0.0;
                        for ki in 0..kernel {
                            let Some(iy) =
                                (oy * stride + ki).checked_sub(padding).filter(|&iy| iy < h)
                            else {
                                continue;
                            };

                            for kj in 0..kernel {
                                if let Some(ix) =
                                    (ox * stride + kj).checked_sub(padding).filter(|&ix| ix < w)
                                {
                                    acc += xc[[iy, ix]] * wc[[ki, kj]];
                                }
                            }
                        }
                        plane[[oy, ox]] = acc;
                    }
                }
            });

        Ok(())
    }
}
