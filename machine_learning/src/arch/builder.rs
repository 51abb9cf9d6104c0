use std::{
    fmt::{self, Display},
    str::FromStr,
};

use rand::Rng;

use super::{
    Network,
    efficientnet::{EfficientNet, Naming, Scaling},
    network::Backbone,
    resnet::ResNet18,
};
use crate::{MlErr, Result, params::ParamLayout};

/// The architecture families a checkpoint can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchitectureTag {
    EfficientNetB0,
    EfficientNetB2,
    ResNet18,
}

/// A concrete network layout. The EfficientNet families come in two incompatible parameter
/// namings depending on the toolkit that produced the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    EfficientNetB0Torchvision,
    EfficientNetB0Timm,
    EfficientNetB2Torchvision,
    EfficientNetB2Timm,
    ResNet18,
}

impl ArchitectureTag {
    pub const ALL: [ArchitectureTag; 3] = [
        ArchitectureTag::EfficientNetB0,
        ArchitectureTag::EfficientNetB2,
        ArchitectureTag::ResNet18,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureTag::EfficientNetB0 => "efficientnet_b0",
            ArchitectureTag::EfficientNetB2 => "efficientnet_b2",
            ArchitectureTag::ResNet18 => "resnet18",
        }
    }

    /// The layouts this family is known to come in, the first one is the default.
    pub fn variants(&self) -> &'static [Architecture] {
        match self {
            ArchitectureTag::EfficientNetB0 => &[
                Architecture::EfficientNetB0Torchvision,
                Architecture::EfficientNetB0Timm,
            ],
            ArchitectureTag::EfficientNetB2 => &[
                Architecture::EfficientNetB2Torchvision,
                Architecture::EfficientNetB2Timm,
            ],
            ArchitectureTag::ResNet18 => &[Architecture::ResNet18],
        }
    }

    pub fn default_variant(&self) -> Architecture {
        self.variants()[0]
    }

    /// Builds the default variant of this family with a freshly initialized network.
    pub fn build(&self, num_classes: usize) -> Result<Network> {
        self.default_variant().build(num_classes)
    }
}

impl FromStr for ArchitectureTag {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");

        ArchitectureTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| MlErr::UnsupportedArchitecture(s.to_string()))
    }
}

impl Display for ArchitectureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Architecture {
    pub fn tag(&self) -> ArchitectureTag {
        match self {
            Architecture::EfficientNetB0Torchvision | Architecture::EfficientNetB0Timm => {
                ArchitectureTag::EfficientNetB0
            }
            Architecture::EfficientNetB2Torchvision | Architecture::EfficientNetB2Timm => {
                ArchitectureTag::EfficientNetB2
            }
            Architecture::ResNet18 => ArchitectureTag::ResNet18,
        }
    }

    /// The key prefix only checkpoints of this layout carry.
    pub fn signature_prefix(&self) -> &'static str {
        match self {
            Architecture::EfficientNetB0Torchvision | Architecture::EfficientNetB2Torchvision => {
                "features."
            }
            Architecture::EfficientNetB0Timm | Architecture::EfficientNetB2Timm => "conv_stem",
            Architecture::ResNet18 => "layer1.",
        }
    }

    /// Builds a network with every parameter set to zero, ready to receive a state dict.
    ///
    /// # Arguments
    /// * `num_classes` - The width of the classifier.
    ///
    /// # Returns
    /// The network or an error if `num_classes` is 0.
    pub fn build_shell(&self, num_classes: usize) -> Result<Network> {
        let mut layout = ParamLayout::new();

        let efficientnet = |layout: &mut ParamLayout, naming: Naming, scaling: Scaling| {
            let net = EfficientNet::new(layout, naming, scaling)?;
            Ok::<_, MlErr>((Backbone::EfficientNet(net), naming.classifier()))
        };

        let (backbone, classifier_key) = match self {
            Architecture::EfficientNetB0Torchvision => {
                efficientnet(&mut layout, Naming::Torchvision, Scaling::B0)?
            }
            Architecture::EfficientNetB0Timm => efficientnet(&mut layout, Naming::Timm, Scaling::B0)?,
            Architecture::EfficientNetB2Torchvision => {
                efficientnet(&mut layout, Naming::Torchvision, Scaling::B2)?
            }
            Architecture::EfficientNetB2Timm => efficientnet(&mut layout, Naming::Timm, Scaling::B2)?,
            Architecture::ResNet18 => (Backbone::ResNet18(ResNet18::new(&mut layout)?), "fc"),
        };

        Network::new(*self, layout, backbone, classifier_key, num_classes)
    }

    /// Builds a network with randomly initialized parameters.
    pub fn build(&self, num_classes: usize) -> Result<Network> {
        self.build_with_rng(num_classes, &mut rand::rng())
    }

    /// Same as `build` but drawing the initial parameters from `rng`.
    pub fn build_with_rng<R>(&self, num_classes: usize, rng: &mut R) -> Result<Network>
    where
        R: Rng + ?Sized,
    {
        let mut network = self.build_shell(num_classes)?;
        network.init(rng)?;
        Ok(network)
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let naming = match self {
            Architecture::EfficientNetB0Torchvision | Architecture::EfficientNetB2Torchvision => {
                "torchvision"
            }
            Architecture::EfficientNetB0Timm | Architecture::EfficientNetB2Timm => "timm",
            Architecture::ResNet18 => "torchvision",
        };

        write!(f, "{} ({naming})", self.tag())
    }
}

/// Builds the default variant of `tag` with a classifier of `num_classes` outputs.
pub fn build(tag: ArchitectureTag, num_classes: usize) -> Result<Network> {
    tag.build(num_classes)
}
