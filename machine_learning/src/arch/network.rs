use log::debug;
use ndarray::{Array2, ArrayD, ArrayView4, Axis, IxDyn};
use rand::Rng;

use super::{Architecture, efficientnet::EfficientNet, layers::Linear, resnet::ResNet18};
use crate::{
    MlErr, Result,
    error::ShapeMismatch,
    params::{ParamLayout, ParamSpec, StateDict, init},
};

/// The feature extractor in front of the classifier.
#[derive(Debug, Clone)]
pub(super) enum Backbone {
    EfficientNet(EfficientNet),
    ResNet18(ResNet18),
}

impl Backbone {
    fn num_features(&self) -> usize {
        match self {
            Backbone::EfficientNet(net) => net.num_features(),
            Backbone::ResNet18(net) => net.num_features(),
        }
    }

    fn forward(&self, params: &[f32], x: ArrayView4<f32>, training: bool) -> Result<Array2<f32>> {
        match self {
            Backbone::EfficientNet(net) => net.forward(params, x, training),
            Backbone::ResNet18(net) => net.forward(params, x, training),
        }
    }
}

/// A classification network: a backbone followed by a single linear classifier.
///
/// Every parameter and buffer lives in one flat buffer described by the network's
/// `ParamLayout`, the layers only keep the ranges they own.
#[derive(Debug, Clone)]
pub struct Network {
    architecture: Architecture,
    layout: ParamLayout,
    params: Vec<f32>,
    backbone: Backbone,
    classifier: Linear,
    classifier_key: &'static str,
    training: bool,
}

impl Network {
    /// Creates a new `Network` whose parameters are all zeros.
    ///
    /// # Arguments
    /// * `architecture` - The architecture variant being built.
    /// * `layout` - The layout the backbone registered its parameters in.
    /// * `backbone` - The feature extractor.
    /// * `classifier_key` - The name of the classifier layer.
    /// * `num_classes` - The width of the classifier's output.
    pub(super) fn new(
        architecture: Architecture,
        mut layout: ParamLayout,
        backbone: Backbone,
        classifier_key: &'static str,
        num_classes: usize,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(MlErr::InvalidConfig(
                "a classifier needs at least one class".into(),
            ));
        }

        let classifier = Linear::new(
            &mut layout,
            classifier_key,
            (backbone.num_features(), num_classes),
        );
        let params = vec![0.0; layout.size()];

        Ok(Self {
            architecture,
            layout,
            params,
            backbone,
            classifier,
            classifier_key,
            training: true,
        })
    }

    /// Fills every parameter following its registered initialization.
    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        for spec in self.layout.specs() {
            init::fill(spec.init, rng, &mut self.params[spec.range.clone()])?;
        }

        Ok(())
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// The output width of the classifier.
    pub fn num_classes(&self) -> usize {
        self.classifier.out_features()
    }

    /// The name of the classifier layer, e.g. `fc` or `classifier.1`.
    pub fn classifier_key(&self) -> &'static str {
        self.classifier_key
    }

    pub fn param_specs(&self) -> &[ParamSpec] {
        self.layout.specs()
    }

    /// The amount of scalars in the network, buffers included.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Switches the network to inference mode: batch norms use their running statistics.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Strictly loads `state` into the network.
    ///
    /// Every key of the network must be present with the same shape and `state` can't hold
    /// any other key. Nothing is written unless the whole state dict matches.
    ///
    /// # Returns
    /// `MlErr::StateDict` listing the missing, unexpected and mismatched keys.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        for spec in self.layout.specs() {
            match state.get(&spec.name) {
                None => missing.push(spec.name.clone()),
                Some(tensor) if tensor.shape() != spec.shape.as_slice() => {
                    mismatched.push(ShapeMismatch {
                        key: spec.name.clone(),
                        expected: spec.shape.clone(),
                        got: tensor.shape().to_vec(),
                    });
                }
                Some(_) => {}
            }
        }

        let unexpected: Vec<String> = state
            .keys()
            .filter(|k| self.layout.get(k).is_none())
            .map(String::from)
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() || !mismatched.is_empty() {
            return Err(MlErr::StateDict {
                missing,
                unexpected,
                mismatched,
            });
        }

        for spec in self.layout.specs() {
            if let Some(tensor) = state.get(&spec.name) {
                self.params[spec.range.clone()]
                    .iter_mut()
                    .zip(tensor.iter())
                    .for_each(|(dst, &src)| *dst = src);
            }
        }

        debug!(
            architecture:% = self.architecture,
            tensors = state.len();
            "loaded state dict"
        );
        Ok(())
    }

    /// Exports every parameter and buffer as a named tensor.
    pub fn state_dict(&self) -> Result<StateDict> {
        self.layout
            .specs()
            .iter()
            .map(|spec| -> Result<(String, ArrayD<f32>)> {
                let values = self.params[spec.range.clone()].to_vec();
                let tensor = ArrayD::from_shape_vec(IxDyn(&spec.shape), values)?;
                Ok((spec.name.clone(), tensor))
            })
            .collect()
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - A batch of images shaped `[batch, 3, h, w]`.
    ///
    /// # Returns
    /// The logits shaped `[batch, num_classes]`.
    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let channels = x.len_of(Axis(1));
        if channels != 3 {
            return Err(MlErr::SizeMismatch {
                what: "network input channels",
                got: channels,
                expected: 3,
            });
        }

        let features = self.backbone.forward(&self.params, x, self.training)?;
        self.classifier.forward(&self.params, features.view())
    }
}
