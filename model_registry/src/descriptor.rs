use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A checkpoint the registry should try to load, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    /// The friendly name, unique within a registry.
    pub name: String,
    /// The checkpoint's path, relative to one of the base directories unless absolute.
    pub path: PathBuf,
    /// The architecture tag, e.g. `efficientnet_b0`.
    pub architecture: String,
    /// The classifier width, defaults to the size of the label table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
}

impl CheckpointDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, architecture: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            architecture: architecture.into(),
            num_classes: None,
        }
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = Some(num_classes);
        self
    }

    /// The checkpoints deployed with the service.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "baseline",
                "checkpoints/baseline_b0/best_model.safetensors",
                "efficientnet_b0",
            ),
            Self::new(
                "distilled",
                "checkpoints/distilled_b0/best_model.safetensors",
                "efficientnet_b0",
            ),
            Self::new(
                "large_b2",
                "checkpoints/large_b2/best_model.safetensors",
                "efficientnet_b2",
            ),
            Self::new(
                "resnet18",
                "checkpoints/resnet18/best_model.safetensors",
                "resnet18",
            ),
        ]
    }
}
