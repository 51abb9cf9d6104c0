use ndarray::{Array4, ArrayView4};

use super::{BatchNorm2d, Conv2d, ConvSpec};
use crate::{Result, arch::activations::ActFn, params::ParamLayout};

/// A bias-free convolution followed by batch norm and an optional activation.
#[derive(Debug, Clone)]
pub struct ConvNormAct {
    conv: Conv2d,
    bn: BatchNorm2d,
    act: Option<ActFn>,
}

impl ConvNormAct {
    /// Creates a new `ConvNormAct`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `(conv_key, bn_key)` - The parameter prefixes of the convolution and the norm.
    /// * `spec` - The convolution's hyper parameters.
    /// * `act` - The activation applied after the norm, if any.
    pub fn new(
        layout: &mut ParamLayout,
        (conv_key, bn_key): (&str, &str),
        spec: ConvSpec,
        act: Option<ActFn>,
    ) -> Result<Self> {
        let conv = Conv2d::new(layout, conv_key, spec)?;
        let bn = BatchNorm2d::new(layout, bn_key, spec.out_channels);

        Ok(Self { conv, bn, act })
    }

    pub fn out_channels(&self) -> usize {
        self.conv.spec().out_channels
    }

    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>, training: bool) -> Result<Array4<f32>> {
        let y = self.conv.forward(params, x)?;
        let mut y = self.bn.forward(params, y, training)?;
        if let Some(act) = &self.act {
            act.apply(&mut y);
        }

        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamInit, init};
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn fresh_block_applies_relu() {
        let mut layout = ParamLayout::new();
        let block = ConvNormAct::new(
            &mut layout,
            ("features.0.0", "features.0.1"),
            ConvSpec::new(1, 2, 3).stride(2),
            Some(ActFn::relu()),
        )
        .unwrap();

        let mut params = vec![0.0; layout.size()];
        let mut rng = StdRng::seed_from_u64(1);
        for spec in layout.specs() {
            init::fill(spec.init, &mut rng, &mut params[spec.range.clone()]).unwrap();
        }
        assert!(matches!(
            layout.get("features.0.0.weight").unwrap().init,
            ParamInit::KaimingNormal { fan_out: 18 }
        ));

        let x = Array4::from_shape_fn((1, 1, 8, 8), |(_, _, i, j)| (i as f32 - j as f32) * 0.1);
        let y = block.forward(&params, x.view(), false).unwrap();

        assert_eq!(y.dim(), (1, 2, 4, 4));
        assert!(y.iter().all(|&v| v >= 0.0));
        assert_eq!(block.out_channels(), 2);
    }
}
