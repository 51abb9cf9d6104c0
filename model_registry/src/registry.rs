use std::{
    path::{MAIN_SEPARATOR_STR, Path, PathBuf},
    slice,
};

use log::{info, warn};

use crate::{
    descriptor::CheckpointDescriptor,
    error::{LoadCause, LoadError},
    inspector,
    labels::LabelTable,
    model::LoadedModel,
};

/// The models ready to serve, in configuration order.
///
/// Built once at startup and only read afterwards, share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<LoadedModel>,
}

/// The outcome of building a registry: what loaded and what didn't.
#[derive(Debug, Default)]
pub struct RegistryReport {
    pub registry: ModelRegistry,
    pub failures: Vec<LoadError>,
}

impl ModelRegistry {
    /// Creates a new empty `ModelRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every descriptor it can, one at a time.
    ///
    /// A descriptor that fails for any reason is logged and left out, the build itself never
    /// fails and may end with an empty registry.
    ///
    /// # Arguments
    /// * `descriptors` - The configured checkpoints.
    /// * `base_dirs` - Where relative checkpoint paths are searched, in priority order.
    /// * `labels` - The label table classifiers are checked against.
    pub fn build(
        descriptors: &[CheckpointDescriptor],
        base_dirs: &[PathBuf],
        labels: &LabelTable,
    ) -> RegistryReport {
        let report = descriptors
            .iter()
            .fold(RegistryReport::default(), |mut report, descriptor| {
                match load(descriptor, base_dirs, labels, &report.registry) {
                    Ok(model) => {
                        info!(
                            model = model.name(),
                            path:% = model.path().display(),
                            architecture:% = model.architecture();
                            "model loaded"
                        );
                        report.registry.models.push(model);
                    }
                    Err(e) if e.is_path_not_found() => {
                        info!("skipping model: {e}");
                        report.failures.push(e);
                    }
                    Err(e) => {
                        warn!("skipping model: {e}");
                        report.failures.push(e);
                    }
                }

                report
            });

        if report.registry.is_empty() {
            warn!("no model could be loaded, predictions will be mocked");
        }

        report
    }

    pub fn get(&self, name: &str) -> Option<&LoadedModel> {
        self.models.iter().find(|m| m.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The names of the loaded models, in registry order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(LoadedModel::name)
    }

    pub fn iter(&self) -> slice::Iter<'_, LoadedModel> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Builds a registry out of already loaded models, later duplicates are dropped.
impl FromIterator<LoadedModel> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = LoadedModel>>(iter: I) -> Self {
        let mut registry = Self::new();
        for model in iter {
            if registry.contains(model.name()) {
                warn!(model = model.name(); "duplicate model name, keeping the first one");
                continue;
            }
            registry.models.push(model);
        }

        registry
    }
}

impl<'a> IntoIterator for &'a ModelRegistry {
    type Item = &'a LoadedModel;
    type IntoIter = slice::Iter<'a, LoadedModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn load(
    descriptor: &CheckpointDescriptor,
    base_dirs: &[PathBuf],
    labels: &LabelTable,
    loaded: &ModelRegistry,
) -> Result<LoadedModel, LoadError> {
    let CheckpointDescriptor {
        name,
        path,
        architecture,
        num_classes,
    } = descriptor;

    if loaded.contains(name) {
        return Err(LoadError::new(name, path, LoadCause::DuplicateName));
    }

    let resolved = resolve_path(path, base_dirs)
        .map_err(|searched| LoadError::new(name, path, LoadCause::PathNotFound { searched }))?;

    let num_classes = num_classes.unwrap_or(labels.len());
    inspector::inspect_and_load(name, &resolved, architecture, num_classes, labels)
}

/// Rewrites both `/` and `\` as the platform's separator.
pub fn normalize_separators(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let normalized = raw.replace(['/', '\\'], MAIN_SEPARATOR_STR);
    PathBuf::from(normalized)
}

/// Finds the first base directory holding `path`.
///
/// Absolute paths are only checked as they are.
///
/// # Returns
/// The existing file, or every candidate that was tried.
pub fn resolve_path(path: &Path, base_dirs: &[PathBuf]) -> Result<PathBuf, Vec<PathBuf>> {
    let path = normalize_separators(path);

    let candidates: Vec<PathBuf> = if path.is_absolute() {
        vec![path]
    } else {
        base_dirs.iter().map(|base| base.join(&path)).collect()
    };

    match candidates.iter().find(|candidate| candidate.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(candidates),
    }
}
