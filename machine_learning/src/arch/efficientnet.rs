use ndarray::{Array2, Array4, ArrayView4};

use super::{
    activations::ActFn,
    layers::{ConvNormAct, ConvSpec, SqueezeExcitation, global_avg_pool},
};
use crate::{Result, params::ParamLayout};

/// `(expand_ratio, kernel, stride, in_channels, out_channels, layers)` of every MBConv stage.
const STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

const STEM_CHANNELS: usize = 32;
const CHANNEL_DIVISOR: usize = 8;

/// How the parameters of an EfficientNet are named, which depends on the toolkit that
/// trained it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// `features.{stage}.{block}.block.{i}`, head `features.8`, classifier `classifier.1`.
    Torchvision,
    /// `conv_stem`, `blocks.{stage}.{block}`, `conv_head`, classifier `classifier`.
    Timm,
}

/// The compound scaling coefficients of an EfficientNet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub width: f64,
    pub depth: f64,
}

impl Scaling {
    pub const B0: Scaling = Scaling {
        width: 1.0,
        depth: 1.0,
    };

    pub const B2: Scaling = Scaling {
        width: 1.1,
        depth: 1.2,
    };

    pub fn channels(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width, CHANNEL_DIVISOR)
    }

    pub fn layers(&self, layers: usize) -> usize {
        (layers as f64 * self.depth).ceil() as usize
    }
}

/// Rounds `v` to the nearest multiple of `divisor`, never going below 90% of `v`.
pub fn make_divisible(v: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((v + d / 2.0) as usize) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded + divisor
    } else {
        rounded
    }
}

/// The parameter names of one MBConv block.
struct BlockKeys {
    expand: Option<(String, String)>,
    depthwise: (String, String),
    se: (String, String),
    project: (String, String),
}

impl Naming {
    fn stem(&self) -> (String, String) {
        match self {
            Naming::Torchvision => ("features.0.0".into(), "features.0.1".into()),
            Naming::Timm => ("conv_stem".into(), "bn1".into()),
        }
    }

    fn head(&self) -> (String, String) {
        match self {
            Naming::Torchvision => {
                let last = STAGES.len() + 1;
                (format!("features.{last}.0"), format!("features.{last}.1"))
            }
            Naming::Timm => ("conv_head".into(), "bn2".into()),
        }
    }

    /// The key of the classifier's linear layer.
    pub fn classifier(&self) -> &'static str {
        match self {
            Naming::Torchvision => "classifier.1",
            Naming::Timm => "classifier",
        }
    }

    /// # Arguments
    /// * `stage` - The 0-based MBConv stage.
    /// * `block` - The block within the stage.
    /// * `expands` - Whether the block has an expansion convolution.
    fn block(&self, stage: usize, block: usize, expands: bool) -> BlockKeys {
        let pair = |a: String, b: String| (a, b);

        match self {
            Naming::Torchvision => {
                let p = format!("features.{}.{block}.block", stage + 1);
                let mut i = 0;
                let mut next = || {
                    let key = format!("{p}.{i}");
                    i += 1;
                    key
                };

                let expand = expands.then(|| {
                    let k = next();
                    pair(format!("{k}.0"), format!("{k}.1"))
                });
                let dw = next();
                let se = next();
                let project = next();

                BlockKeys {
                    expand,
                    depthwise: pair(format!("{dw}.0"), format!("{dw}.1")),
                    se: pair(format!("{se}.fc1"), format!("{se}.fc2")),
                    project: pair(format!("{project}.0"), format!("{project}.1")),
                }
            }
            Naming::Timm => {
                let p = format!("blocks.{stage}.{block}");
                let se = pair(format!("{p}.se.conv_reduce"), format!("{p}.se.conv_expand"));

                if expands {
                    BlockKeys {
                        expand: Some(pair(format!("{p}.conv_pw"), format!("{p}.bn1"))),
                        depthwise: pair(format!("{p}.conv_dw"), format!("{p}.bn2")),
                        se,
                        project: pair(format!("{p}.conv_pwl"), format!("{p}.bn3")),
                    }
                } else {
                    BlockKeys {
                        expand: None,
                        depthwise: pair(format!("{p}.conv_dw"), format!("{p}.bn1")),
                        se,
                        project: pair(format!("{p}.conv_pw"), format!("{p}.bn2")),
                    }
                }
            }
        }
    }
}

fn as_refs(keys: &(String, String)) -> (&str, &str) {
    (keys.0.as_str(), keys.1.as_str())
}

/// Mobile inverted bottleneck: expand, depthwise, squeeze-excite, project.
#[derive(Debug, Clone)]
struct MbConv {
    expand: Option<ConvNormAct>,
    depthwise: ConvNormAct,
    se: SqueezeExcitation,
    project: ConvNormAct,
    residual: bool,
}

impl MbConv {
    fn new(
        layout: &mut ParamLayout,
        keys: &BlockKeys,
        (expand_ratio, kernel, stride): (usize, usize, usize),
        (in_channels, out_channels): (usize, usize),
    ) -> Result<Self> {
        let hidden = in_channels * expand_ratio;

        let expand = match &keys.expand {
            Some(k) => Some(ConvNormAct::new(
                layout,
                as_refs(k),
                ConvSpec::new(in_channels, hidden, 1),
                Some(ActFn::silu()),
            )?),
            None => None,
        };

        let depthwise = ConvNormAct::new(
            layout,
            as_refs(&keys.depthwise),
            ConvSpec::new(hidden, hidden, kernel).stride(stride).depthwise(),
            Some(ActFn::silu()),
        )?;

        let squeezed = (in_channels / 4).max(1);
        let se = SqueezeExcitation::new(layout, as_refs(&keys.se), hidden, squeezed)?;

        let project = ConvNormAct::new(
            layout,
            as_refs(&keys.project),
            ConvSpec::new(hidden, out_channels, 1),
            None,
        )?;

        Ok(Self {
            expand,
            depthwise,
            se,
            project,
            residual: stride == 1 && in_channels == out_channels,
        })
    }

    fn forward(&self, params: &[f32], x: Array4<f32>, training: bool) -> Result<Array4<f32>> {
        let h = match &self.expand {
            Some(expand) => {
                let e = expand.forward(params, x.view(), training)?;
                self.depthwise.forward(params, e.view(), training)?
            }
            None => self.depthwise.forward(params, x.view(), training)?,
        };
        let h = self.se.forward(params, h)?;
        let mut h = self.project.forward(params, h.view(), training)?;

        if self.residual {
            h += &x;
        }

        Ok(h)
    }
}

/// An EfficientNet feature extractor, from the stem to the globally pooled head.
#[derive(Debug, Clone)]
pub struct EfficientNet {
    stem: ConvNormAct,
    blocks: Vec<MbConv>,
    head: ConvNormAct,
}

impl EfficientNet {
    /// Creates a new `EfficientNet` registering every parameter in `layout`.
    ///
    /// # Arguments
    /// * `layout` - The network's parameter layout.
    /// * `naming` - How the parameters are named.
    /// * `scaling` - The width and depth multipliers.
    pub fn new(layout: &mut ParamLayout, naming: Naming, scaling: Scaling) -> Result<Self> {
        let stem_channels = scaling.channels(STEM_CHANNELS);
        let stem = ConvNormAct::new(
            layout,
            as_refs(&naming.stem()),
            ConvSpec::new(3, stem_channels, 3).stride(2),
            Some(ActFn::silu()),
        )?;

        let mut blocks = Vec::new();
        let mut last = stem_channels;
        for (stage, &(expand_ratio, kernel, stride, cin, cout, layers)) in STAGES.iter().enumerate() {
            let (cin, cout) = (scaling.channels(cin), scaling.channels(cout));

            for block in 0..scaling.layers(layers) {
                let (cin, stride) = if block == 0 { (cin, stride) } else { (cout, 1) };
                let keys = naming.block(stage, block, expand_ratio != 1);
                blocks.push(MbConv::new(layout, &keys, (expand_ratio, kernel, stride), (cin, cout))?);
            }
            last = cout;
        }

        let head = ConvNormAct::new(
            layout,
            as_refs(&naming.head()),
            ConvSpec::new(last, 4 * last, 1),
            Some(ActFn::silu()),
        )?;

        Ok(Self { stem, blocks, head })
    }

    /// The width of the pooled features.
    pub fn num_features(&self) -> usize {
        self.head.out_channels()
    }

    /// Computes the pooled features, `[batch, 3, h, w] -> [batch, num_features]`.
    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>, training: bool) -> Result<Array2<f32>> {
        let mut h = self.stem.forward(params, x, training)?;
        for block in &self.blocks {
            h = block.forward(params, h, training)?;
        }
        let h = self.head.forward(params, h.view(), training)?;

        Ok(global_avg_pool(h.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b2_channels_round_to_eights() {
        let widths: Vec<_> = [32, 16, 24, 40, 80, 112, 192, 320]
            .iter()
            .map(|&c| Scaling::B2.channels(c))
            .collect();
        assert_eq!(widths, [32, 16, 24, 48, 88, 120, 208, 352]);

        let depths: Vec<_> = STAGES.iter().map(|s| Scaling::B2.layers(s.5)).collect();
        assert_eq!(depths, [2, 3, 3, 4, 4, 5, 2]);
    }

    #[test]
    fn make_divisible_keeps_ninety_percent() {
        assert_eq!(make_divisible(3.0, 8), 8);
        assert_eq!(make_divisible(12.0, 8), 16);
        assert_eq!(make_divisible(19.0, 8), 24);
        assert_eq!(make_divisible(1408.0, 8), 1408);
    }

    #[test]
    fn torchvision_block_keys() {
        let keys = Naming::Torchvision.block(1, 0, true);
        assert_eq!(keys.expand.unwrap().0, "features.2.0.block.0.0");
        assert_eq!(keys.depthwise.1, "features.2.0.block.1.1");
        assert_eq!(keys.se.0, "features.2.0.block.2.fc1");
        assert_eq!(keys.project.0, "features.2.0.block.3.0");

        let keys = Naming::Torchvision.block(0, 0, false);
        assert!(keys.expand.is_none());
        assert_eq!(keys.depthwise.0, "features.1.0.block.0.0");
        assert_eq!(keys.project.1, "features.1.0.block.2.1");
    }

    #[test]
    fn timm_block_keys() {
        let keys = Naming::Timm.block(0, 0, false);
        assert_eq!(keys.depthwise, ("blocks.0.0.conv_dw".into(), "blocks.0.0.bn1".into()));
        assert_eq!(keys.project, ("blocks.0.0.conv_pw".into(), "blocks.0.0.bn2".into()));

        let keys = Naming::Timm.block(3, 2, true);
        assert_eq!(keys.expand.unwrap().0, "blocks.3.2.conv_pw");
        assert_eq!(keys.depthwise.1, "blocks.3.2.bn2");
        assert_eq!(keys.se.1, "blocks.3.2.se.conv_expand");
        assert_eq!(keys.project.1, "blocks.3.2.bn3");
    }

    #[test]
    fn b0_layout_matches_torchvision() {
        let mut layout = ParamLayout::new();
        let net = EfficientNet::new(&mut layout, Naming::Torchvision, Scaling::B0).unwrap();

        assert_eq!(net.num_features(), 1280);
        assert_eq!(layout.get("features.0.0.weight").unwrap().shape, vec![32, 3, 3, 3]);
        assert_eq!(layout.get("features.1.0.block.1.fc1.weight").unwrap().shape, vec![8, 32, 1, 1]);
        assert_eq!(layout.get("features.6.3.block.1.0.weight").unwrap().shape, vec![1152, 1, 5, 5]);
        assert_eq!(layout.get("features.8.0.weight").unwrap().shape, vec![1280, 320, 1, 1]);
        assert!(layout.get("features.6.4.block.0.0.weight").is_none());
    }

    #[test]
    fn b2_timm_head_width() {
        let mut layout = ParamLayout::new();
        let net = EfficientNet::new(&mut layout, Naming::Timm, Scaling::B2).unwrap();

        assert_eq!(net.num_features(), 1408);
        assert!(layout.get("blocks.0.1.conv_dw.weight").is_some());
        assert_eq!(layout.get("conv_head.weight").unwrap().shape, vec![1408, 352, 1, 1]);
    }
}
