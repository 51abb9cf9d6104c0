use ndarray::{Array4, Axis};

use super::{Conv2d, ConvSpec, global_avg_pool};
use crate::{Result, arch::activations::ActFn, params::ParamLayout};

/// Channel attention: pool, reduce, activate, expand, gate and rescale.
#[derive(Debug, Clone)]
pub struct SqueezeExcitation {
    reduce: Conv2d,
    expand: Conv2d,
    act: ActFn,
    gate: ActFn,
}

impl SqueezeExcitation {
    /// Creates a new `SqueezeExcitation`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `keys` - The names of the reducing and expanding convolutions.
    /// * `channels` - The channels being rescaled.
    /// * `squeezed` - The channels of the bottleneck.
    pub fn new(
        layout: &mut ParamLayout,
        (reduce_key, expand_key): (&str, &str),
        channels: usize,
        squeezed: usize,
    ) -> Result<Self> {
        let reduce = Conv2d::new(layout, reduce_key, ConvSpec::new(channels, squeezed, 1).with_bias())?;
        let expand = Conv2d::new(layout, expand_key, ConvSpec::new(squeezed, channels, 1).with_bias())?;

        Ok(Self {
            reduce,
            expand,
            act: ActFn::silu(),
            gate: ActFn::sigmoid(),
        })
    }

    pub fn forward(&self, params: &[f32], mut x: Array4<f32>) -> Result<Array4<f32>> {
        let pooled = global_avg_pool(x.view()).insert_axis(Axis(2)).insert_axis(Axis(3));

        let mut s = self.reduce.forward(params, pooled.view())?;
        self.act.apply(&mut s);
        let mut s = self.expand.forward(params, s.view())?;
        self.gate.apply(&mut s);

        x *= &s;
        Ok(x)
    }
}
