use std::{
    fmt::{self, Debug},
    path::{Path, PathBuf},
};

use machine_learning::{Architecture, Network};
use ndarray::{Array2, ArrayView4};

/// Anything that turns a batch of images into class logits.
pub trait Classifier: Send + Sync {
    /// The width of the logits.
    fn num_classes(&self) -> usize;

    /// Computes the logits of `x`, shaped `[batch, 3, h, w]`, as `[batch, num_classes]`.
    fn logits(&self, x: ArrayView4<f32>) -> machine_learning::Result<Array2<f32>>;
}

impl Classifier for Network {
    fn num_classes(&self) -> usize {
        Network::num_classes(self)
    }

    fn logits(&self, x: ArrayView4<f32>) -> machine_learning::Result<Array2<f32>> {
        self.forward(x)
    }
}

/// A ready to infer model, immutable once loaded.
pub struct LoadedModel {
    name: String,
    path: PathBuf,
    architecture: Architecture,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        architecture: Architecture,
        classifier: impl Classifier + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            architecture,
            classifier: Box::new(classifier),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the weights were read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The variant the checkpoint was resolved to.
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}

impl Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("architecture", &self.architecture)
            .field("num_classes", &self.num_classes())
            .finish_non_exhaustive()
    }
}
