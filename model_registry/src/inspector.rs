use std::path::Path;

use log::{debug, warn};
use machine_learning::{Architecture, ArchitectureTag, StateDict};

use crate::{
    checkpoint,
    error::{LoadCause, LoadError},
    labels::LabelTable,
    model::LoadedModel,
};

/// Picks the layout of `tag` the checkpoint was trained with by looking at its key prefixes.
///
/// Families with several layouts are told apart by a prefix only one of them uses
/// (`features.` for torchvision, `conv_stem` for timm). When none is present the default
/// layout is used and a warning is logged.
pub fn select_variant(tag: ArchitectureTag, state: &StateDict) -> Architecture {
    let variants = tag.variants();
    if let [only] = variants {
        return *only;
    }

    match variants
        .iter()
        .find(|variant| state.has_prefix(variant.signature_prefix()))
    {
        Some(variant) => *variant,
        None => {
            let fallback = tag.default_variant();
            warn!("no known key prefix for {tag} in checkpoint, assuming {fallback}");
            fallback
        }
    }
}

/// Loads a checkpoint into a freshly built network of the right layout.
///
/// # Arguments
/// * `name` - The model's friendly name, used for diagnostics.
/// * `path` - The checkpoint's resolved path.
/// * `tag` - The configured architecture tag.
/// * `num_classes` - The width of the network's classifier.
/// * `labels` - The label table the classifier's width is checked against.
///
/// # Returns
/// The model in inference mode, or a `LoadError` wrapping whatever went wrong. A classifier
/// whose width doesn't match the label table is only a warning.
pub fn inspect_and_load(
    name: &str,
    path: &Path,
    tag: &str,
    num_classes: usize,
    labels: &LabelTable,
) -> Result<LoadedModel, LoadError> {
    let fail = |cause: LoadCause| LoadError::new(name, path, cause);

    let tag = tag
        .parse::<ArchitectureTag>()
        .map_err(|e| fail(e.into()))?;
    let state = checkpoint::read_state_dict(path).map_err(|e| fail(e.into()))?;
    let architecture = select_variant(tag, &state);
    debug!(model = name, architecture:% = architecture; "resolved checkpoint layout");

    let mut network = architecture
        .build_shell(num_classes)
        .map_err(|e| fail(e.into()))?;
    network.load_state_dict(&state).map_err(|e| fail(e.into()))?;
    network.eval();

    let width = network.num_classes();
    if width != labels.len() {
        warn!(
            model = name,
            classifier = width,
            labels = labels.len();
            "classifier width doesn't match the label table, some classes will have no name"
        );
    }

    Ok(LoadedModel::new(name, path, architecture, network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn keys(keys: &[&str]) -> StateDict {
        keys.iter()
            .map(|k| (k.to_string(), ArrayD::zeros(IxDyn(&[1]))))
            .collect()
    }

    #[test]
    fn prefixes_pick_the_layout() {
        let torchvision = keys(&["features.0.0.weight", "classifier.1.weight"]);
        let timm = keys(&["conv_stem.weight", "bn1.weight", "classifier.weight"]);

        assert_eq!(
            select_variant(ArchitectureTag::EfficientNetB0, &torchvision),
            Architecture::EfficientNetB0Torchvision
        );
        assert_eq!(
            select_variant(ArchitectureTag::EfficientNetB0, &timm),
            Architecture::EfficientNetB0Timm
        );
        assert_eq!(
            select_variant(ArchitectureTag::EfficientNetB2, &timm),
            Architecture::EfficientNetB2Timm
        );
    }

    #[test]
    fn unknown_prefixes_fall_back_to_the_default() {
        let odd = keys(&["backbone.stem.weight"]);
        assert_eq!(
            select_variant(ArchitectureTag::EfficientNetB2, &odd),
            Architecture::EfficientNetB2Torchvision
        );
        assert_eq!(
            select_variant(ArchitectureTag::ResNet18, &odd),
            Architecture::ResNet18
        );
    }

    #[test]
    fn unsupported_tags_fail_before_reading() {
        let err = inspect_and_load(
            "vgg",
            Path::new("does/not/matter.safetensors"),
            "vgg16",
            10,
            &LabelTable::cifar100(),
        )
        .unwrap_err();

        assert_eq!(err.name, "vgg");
        assert!(matches!(err.cause, LoadCause::UnsupportedArchitecture(_)));
    }
}
