use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use machine_learning::MlErr;
use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// A failure while reading or writing a checkpoint file.
#[derive(Debug)]
pub enum CheckpointError {
    Io(io::Error),
    Format(SafeTensorError),
    UnsupportedDtype { key: String, dtype: String },
    Shape(ShapeError),
}

impl Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "io error: {e}"),
            CheckpointError::Format(e) => write!(f, "malformed checkpoint: {e}"),
            CheckpointError::UnsupportedDtype { key, dtype } => {
                write!(f, "tensor '{key}' has an unsupported dtype {dtype}")
            }
            CheckpointError::Shape(e) => write!(f, "tensor shape error: {e}"),
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointError::Io(e) => Some(e),
            CheckpointError::Format(e) => Some(e),
            CheckpointError::Shape(e) => Some(e),
            CheckpointError::UnsupportedDtype { .. } => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for CheckpointError {
    fn from(value: SafeTensorError) -> Self {
        Self::Format(value)
    }
}

impl From<ShapeError> for CheckpointError {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

/// Why a model couldn't make it into the registry.
#[derive(Debug)]
pub enum LoadCause {
    /// No base directory holds the checkpoint.
    PathNotFound { searched: Vec<PathBuf> },
    UnsupportedArchitecture(String),
    /// Another model was already registered under the same name.
    DuplicateName,
    Checkpoint(CheckpointError),
    /// The checkpoint doesn't match the network key for key and shape for shape.
    WeightLoad(MlErr),
    Build(MlErr),
}

impl Display for LoadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadCause::PathNotFound { searched } => {
                write!(f, "checkpoint not found, searched {searched:?}")
            }
            LoadCause::UnsupportedArchitecture(tag) => {
                write!(f, "unsupported architecture '{tag}'")
            }
            LoadCause::DuplicateName => write!(f, "a model with the same name is already loaded"),
            LoadCause::Checkpoint(e) => write!(f, "failed to read checkpoint: {e}"),
            LoadCause::WeightLoad(e) => write!(f, "weights don't fit the network: {e}"),
            LoadCause::Build(e) => write!(f, "failed to build the network: {e}"),
        }
    }
}

impl From<CheckpointError> for LoadCause {
    fn from(value: CheckpointError) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<MlErr> for LoadCause {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::UnsupportedArchitecture(tag) => Self::UnsupportedArchitecture(tag),
            e if e.is_state_dict_mismatch() => Self::WeightLoad(e),
            e => Self::Build(e),
        }
    }
}

/// A model that failed to load, with enough context to diagnose it from the logs.
#[derive(Debug)]
pub struct LoadError {
    pub name: String,
    pub path: PathBuf,
    pub cause: LoadCause,
}

impl LoadError {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, cause: impl Into<LoadCause>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn is_path_not_found(&self) -> bool {
        matches!(self.cause, LoadCause::PathNotFound { .. })
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to load model '{}' from {}: {}",
            self.name,
            self.path.display(),
            self.cause
        )
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            LoadCause::Checkpoint(e) => Some(e),
            LoadCause::WeightLoad(e) | LoadCause::Build(e) => Some(e),
            _ => None,
        }
    }
}

/// The image given to a transform can't be turned into a tensor.
#[derive(Debug)]
pub enum TransformError {
    EmptyImage { width: u32, height: u32 },
    Shape(ShapeError),
}

impl Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::EmptyImage { width, height } => {
                write!(f, "can't transform an image of {width}x{height} pixels")
            }
            TransformError::Shape(e) => write!(f, "shape error: {e}"),
        }
    }
}

impl Error for TransformError {}

impl From<ShapeError> for TransformError {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

/// Why a single model produced no predictions for an image.
#[derive(Debug)]
pub enum InferenceError {
    Transform(TransformError),
    Forward(MlErr),
    Panicked,
    UnexpectedBatch(usize),
}

impl Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Transform(e) => write!(f, "preprocessing failed: {e}"),
            InferenceError::Forward(e) => write!(f, "forward pass failed: {e}"),
            InferenceError::Panicked => write!(f, "forward pass panicked"),
            InferenceError::UnexpectedBatch(rows) => {
                write!(f, "expected a single row of logits, got {rows}")
            }
        }
    }
}

impl Error for InferenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InferenceError::Transform(e) => Some(e),
            InferenceError::Forward(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransformError> for InferenceError {
    fn from(value: TransformError) -> Self {
        Self::Transform(value)
    }
}

impl From<MlErr> for InferenceError {
    fn from(value: MlErr) -> Self {
        Self::Forward(value)
    }
}
