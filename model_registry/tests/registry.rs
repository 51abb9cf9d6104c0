use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{DynamicImage, Rgb, RgbImage};
use machine_learning::{Architecture, StateDict};
use model_registry::{
    CheckpointDescriptor, ImageTransform, LabelTable, LoadCause, ModelRegistry,
    PreprocessSelector, TOP_K, checkpoint, inspect_and_load, predict,
    preprocess::{Filter, Resize},
};
use rand::{SeedableRng, rngs::StdRng};
use tempfile::TempDir;

const CLASSES: [&str; 3] = ["cat", "dog", "bird"];

/// Writes a randomly initialized checkpoint of `architecture` under `dir/checkpoints`.
fn write_checkpoint(
    dir: &Path,
    file: &str,
    architecture: Architecture,
    num_classes: usize,
    nested: Option<&str>,
) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(7);
    let network = architecture.build_with_rng(num_classes, &mut rng).unwrap();
    let state: StateDict = network
        .state_dict()
        .unwrap()
        .into_iter()
        .map(|(k, v)| (format!("{}{k}", nested.unwrap_or_default()), v))
        .collect();

    let path = dir.join("checkpoints").join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    checkpoint::write_state_dict(&state, &path).unwrap();
    path
}

fn relative(file: &str) -> PathBuf {
    Path::new("checkpoints").join(file)
}

fn image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(24, 24, |x, y| {
        Rgb([(x * 10) as u8, (y * 10) as u8, ((x + y) * 5) as u8])
    }))
}

fn selector() -> PreprocessSelector {
    PreprocessSelector::new(ImageTransform::new([Resize::new(32, Filter::Bilinear)]))
}

#[test]
fn empty_configuration_builds_an_empty_registry() {
    let report = ModelRegistry::build(&[], &[], &LabelTable::cifar100());

    assert!(report.registry.is_empty());
    assert!(report.failures.is_empty());
}

#[test]
fn missing_checkpoints_are_reported_with_every_searched_path() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let base_dirs = [first.path().to_path_buf(), second.path().to_path_buf()];

    let report = ModelRegistry::build(
        &CheckpointDescriptor::defaults(),
        &base_dirs,
        &LabelTable::cifar100(),
    );

    assert!(report.registry.is_empty());
    assert_eq!(report.failures.len(), CheckpointDescriptor::defaults().len());
    for failure in &report.failures {
        let LoadCause::PathNotFound { searched } = &failure.cause else {
            panic!("unexpected failure: {failure}");
        };
        assert_eq!(searched.len(), base_dirs.len());
    }
}

#[test]
fn detects_both_efficientnet_layouts() {
    let dir = TempDir::new().unwrap();
    write_checkpoint(dir.path(), "tv.safetensors", Architecture::EfficientNetB0Torchvision, 3, None);
    write_checkpoint(dir.path(), "timm.safetensors", Architecture::EfficientNetB0Timm, 3, None);

    let descriptors = [
        CheckpointDescriptor::new("tv", relative("tv.safetensors"), "efficientnet_b0"),
        CheckpointDescriptor::new("timm", relative("timm.safetensors"), "EfficientNet-B0"),
    ];
    let labels = LabelTable::new(CLASSES);
    let report = ModelRegistry::build(&descriptors, &[dir.path().to_path_buf()], &labels);

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let registry = report.registry;
    assert_eq!(registry.names().collect::<Vec<_>>(), ["tv", "timm"]);
    assert_eq!(
        registry.get("tv").unwrap().architecture(),
        Architecture::EfficientNetB0Torchvision
    );
    assert_eq!(
        registry.get("timm").unwrap().architecture(),
        Architecture::EfficientNetB0Timm
    );

    let predictions = predict(&image(), &registry, &selector(), &labels, TOP_K);
    for (_, ranked) in predictions.iter() {
        assert_eq!(ranked.len(), CLASSES.len());
        let total: f64 = ranked.iter().map(|p| p.probability).sum();
        assert!((total - 100.0).abs() <= 0.02, "{total}");
    }
}

#[test]
fn one_checkpoint_can_back_several_models() {
    let dir = TempDir::new().unwrap();
    write_checkpoint(dir.path(), "shared.safetensors", Architecture::EfficientNetB0Timm, 3, None);

    let descriptors = [
        CheckpointDescriptor::new("a", relative("shared.safetensors"), "efficientnet_b0"),
        CheckpointDescriptor::new("b", relative("shared.safetensors"), "efficientnet_b0"),
    ];
    let report = ModelRegistry::build(
        &descriptors,
        &[dir.path().to_path_buf()],
        &LabelTable::new(CLASSES),
    );

    assert!(report.failures.is_empty());
    assert_eq!(report.registry.names().collect::<Vec<_>>(), ["a", "b"]);
}

#[test]
fn nested_checkpoints_are_unwrapped() {
    let dir = TempDir::new().unwrap();
    let path = write_checkpoint(
        dir.path(),
        "nested.safetensors",
        Architecture::EfficientNetB0Timm,
        3,
        Some("model_state_dict."),
    );

    let model = inspect_and_load("nested", &path, "efficientnet_b0", 3, &LabelTable::new(CLASSES))
        .unwrap();

    assert_eq!(model.architecture(), Architecture::EfficientNetB0Timm);
    assert_eq!(model.num_classes(), 3);
}

#[test]
fn broken_descriptors_never_abort_the_build() {
    let dir = TempDir::new().unwrap();
    write_checkpoint(dir.path(), "good.safetensors", Architecture::EfficientNetB0Timm, 3, None);
    fs::write(dir.path().join("checkpoints/garbage.safetensors"), b"not a checkpoint").unwrap();

    let descriptors = [
        CheckpointDescriptor::new("good", relative("good.safetensors"), "efficientnet_b0"),
        CheckpointDescriptor::new("good", relative("good.safetensors"), "efficientnet_b0"),
        CheckpointDescriptor::new("vgg", relative("good.safetensors"), "vgg16"),
        CheckpointDescriptor::new("wrong_family", relative("good.safetensors"), "resnet18"),
        CheckpointDescriptor::new("garbage", relative("garbage.safetensors"), "resnet18"),
        CheckpointDescriptor::new("missing", relative("missing.safetensors"), "resnet18"),
    ];
    let report = ModelRegistry::build(
        &descriptors,
        &[dir.path().to_path_buf()],
        &LabelTable::new(CLASSES),
    );

    assert_eq!(report.registry.names().collect::<Vec<_>>(), ["good"]);

    let causes: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.name.as_str(), &f.cause))
        .collect();
    assert_eq!(causes.len(), 5);
    assert!(matches!(causes[0], ("good", LoadCause::DuplicateName)));
    assert!(matches!(causes[1], ("vgg", LoadCause::UnsupportedArchitecture(_))));
    assert!(matches!(causes[2], ("wrong_family", LoadCause::WeightLoad(_))));
    assert!(matches!(causes[3], ("garbage", LoadCause::Checkpoint(_))));
    assert!(matches!(causes[4], ("missing", LoadCause::PathNotFound { .. })));
}

#[test]
fn checkpoints_of_another_size_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_checkpoint(
        dir.path(),
        "b0_timm.safetensors",
        Architecture::EfficientNetB0Timm,
        3,
        None,
    );

    let err = inspect_and_load("b2", &path, "efficientnet_b2", 3, &LabelTable::new(CLASSES))
        .unwrap_err();

    assert_eq!(err.name, "b2");
    assert!(matches!(err.cause, LoadCause::WeightLoad(_)));
}

#[test]
fn label_mismatch_still_loads() {
    let dir = TempDir::new().unwrap();
    write_checkpoint(dir.path(), "wide.safetensors", Architecture::EfficientNetB0Timm, 7, None);

    let descriptors = [
        CheckpointDescriptor::new("wide", relative("wide.safetensors"), "efficientnet_b0")
            .with_num_classes(7),
    ];
    let labels = LabelTable::new(CLASSES);
    let report = ModelRegistry::build(&descriptors, &[dir.path().to_path_buf()], &labels);

    let model = report.registry.get("wide").unwrap();
    assert_eq!(model.num_classes(), 7);

    let predictions = predict(&image(), &report.registry, &selector(), &labels, TOP_K);
    let ranked = predictions.get("wide").unwrap();
    assert_eq!(ranked.len(), TOP_K);
    assert!(ranked.iter().filter(|p| p.class_id >= CLASSES.len()).all(|p| p.class_name.starts_with("Unknown")));
}

#[test]
fn loading_twice_gives_the_same_predictions() {
    let dir = TempDir::new().unwrap();
    let path = write_checkpoint(dir.path(), "m.safetensors", Architecture::EfficientNetB0Timm, 3, None);
    let labels = LabelTable::new(CLASSES);

    let registry: ModelRegistry = ["first", "second"]
        .into_iter()
        .map(|name| inspect_and_load(name, &path, "efficientnet_b0", 3, &labels).unwrap())
        .collect();

    let predictions = predict(&image(), &registry, &selector(), &labels, TOP_K);
    assert_eq!(predictions.get("first"), predictions.get("second"));
    assert!(!predictions.get("first").unwrap().is_empty());
}
