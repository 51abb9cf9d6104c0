use ndarray::{Array2, Array4, ArrayView4};

use super::{
    activations::ActFn,
    layers::{ConvNormAct, ConvSpec, global_avg_pool, max_pool2d},
};
use crate::{Result, params::ParamLayout};

/// `(channels, stride)` of each of the four residual stages.
const STAGES: [(usize, usize); 4] = [(64, 1), (128, 2), (256, 2), (512, 2)];
const BLOCKS_PER_STAGE: usize = 2;

/// Two 3x3 convolutions with an identity (or projected) shortcut.
#[derive(Debug, Clone)]
struct BasicBlock {
    conv1: ConvNormAct,
    conv2: ConvNormAct,
    downsample: Option<ConvNormAct>,
}

impl BasicBlock {
    fn new(
        layout: &mut ParamLayout,
        prefix: &str,
        (in_channels, out_channels): (usize, usize),
        stride: usize,
    ) -> Result<Self> {
        let key = |name: &str| format!("{prefix}.{name}");

        let conv1 = ConvNormAct::new(
            layout,
            (key("conv1").as_str(), key("bn1").as_str()),
            ConvSpec::new(in_channels, out_channels, 3).stride(stride),
            Some(ActFn::relu()),
        )?;
        let conv2 = ConvNormAct::new(
            layout,
            (key("conv2").as_str(), key("bn2").as_str()),
            ConvSpec::new(out_channels, out_channels, 3),
            None,
        )?;

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(ConvNormAct::new(
                layout,
                (key("downsample.0").as_str(), key("downsample.1").as_str()),
                ConvSpec::new(in_channels, out_channels, 1).stride(stride),
                None,
            )?)
        } else {
            None
        };

        Ok(Self {
            conv1,
            conv2,
            downsample,
        })
    }

    fn forward(&self, params: &[f32], x: Array4<f32>, training: bool) -> Result<Array4<f32>> {
        let h = self.conv1.forward(params, x.view(), training)?;
        let mut h = self.conv2.forward(params, h.view(), training)?;

        match &self.downsample {
            Some(downsample) => h += &downsample.forward(params, x.view(), training)?,
            None => h += &x,
        }

        ActFn::relu().apply(&mut h);
        Ok(h)
    }
}

/// The ResNet18 feature extractor.
#[derive(Debug, Clone)]
pub struct ResNet18 {
    stem: ConvNormAct,
    blocks: Vec<BasicBlock>,
}

impl ResNet18 {
    /// Creates a new `ResNet18` registering every parameter in `layout`.
    pub fn new(layout: &mut ParamLayout) -> Result<Self> {
        let stem = ConvNormAct::new(
            layout,
            ("conv1", "bn1"),
            ConvSpec::new(3, 64, 7).stride(2).padding(3),
            Some(ActFn::relu()),
        )?;

        let mut blocks = Vec::with_capacity(STAGES.len() * BLOCKS_PER_STAGE);
        let mut in_channels = 64;
        for (i, &(channels, stride)) in STAGES.iter().enumerate() {
            for b in 0..BLOCKS_PER_STAGE {
                let prefix = format!("layer{}.{b}", i + 1);
                let stride = if b == 0 { stride } else { 1 };
                blocks.push(BasicBlock::new(layout, &prefix, (in_channels, channels), stride)?);
                in_channels = channels;
            }
        }

        Ok(Self { stem, blocks })
    }

    pub fn num_features(&self) -> usize {
        STAGES[STAGES.len() - 1].0
    }

    /// Computes the pooled features, `[batch, 3, h, w] -> [batch, 512]`.
    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>, training: bool) -> Result<Array2<f32>> {
        let h = self.stem.forward(params, x, training)?;
        let mut h = max_pool2d(h.view(), 3, 2, 1)?;
        for block in &self.blocks {
            h = block.forward(params, h, training)?;
        }

        Ok(global_avg_pool(h.view()))
    }
}
