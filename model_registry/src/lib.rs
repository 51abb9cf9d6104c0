pub mod checkpoint;
mod descriptor;
pub mod dispatch;
pub mod error;
pub mod inspector;
mod labels;
mod model;
pub mod preprocess;
mod registry;

pub use descriptor::CheckpointDescriptor;
pub use dispatch::{Prediction, Predictions, TOP_K, mock_predictions, predict};
pub use error::{CheckpointError, InferenceError, LoadCause, LoadError, TransformError};
pub use inspector::inspect_and_load;
pub use labels::{LabelTable, humanize};
pub use model::{Classifier, LoadedModel};
pub use preprocess::{ImageTransform, PreprocessSelector};
pub use registry::{ModelRegistry, RegistryReport, normalize_separators, resolve_path};
