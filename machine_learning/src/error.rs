use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// How many keys of each kind are shown when displaying a state dict mismatch.
const MAX_LISTED_KEYS: usize = 5;

/// A parameter whose shape in a state dict differs from the one the network expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub key: String,
    pub expected: Vec<usize>,
    pub got: Vec<usize>,
}

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InputTooSmall {
        what: &'static str,
        size: usize,
        kernel: usize,
    },
    Shape(ShapeError),
    InvalidConfig(String),
    Init(String),
    UnsupportedArchitecture(String),
    StateDict {
        missing: Vec<String>,
        unexpected: Vec<String>,
        mismatched: Vec<ShapeMismatch>,
    },
}

impl MlErr {
    /// Whether this error comes from a strict state dict load.
    pub fn is_state_dict_mismatch(&self) -> bool {
        matches!(self, MlErr::StateDict { .. })
    }
}

fn list_keys<I>(f: &mut fmt::Formatter<'_>, label: &str, total: usize, keys: I) -> fmt::Result
where
    I: Iterator<Item = String>,
{
    if total == 0 {
        return Ok(());
    }

    let shown: Vec<String> = keys.take(MAX_LISTED_KEYS).collect();
    write!(f, "; {total} {label}: [{}", shown.join(", "))?;
    if total > MAX_LISTED_KEYS {
        write!(f, ", ...")?;
    }
    write!(f, "]")
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InputTooSmall { what, size, kernel } => write!(
                f,
                "The input of {what} is too small, a padded size of {size} can't fit a kernel of {kernel}"
            ),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            MlErr::Init(msg) => write!(f, "failed to initialize parameters: {msg}"),
            MlErr::UnsupportedArchitecture(tag) => {
                write!(f, "unsupported architecture '{tag}'")
            }
            MlErr::StateDict {
                missing,
                unexpected,
                mismatched,
            } => {
                write!(f, "state dict does not match the network")?;
                list_keys(f, "missing", missing.len(), missing.iter().cloned())?;
                list_keys(f, "unexpected", unexpected.len(), unexpected.iter().cloned())?;
                list_keys(
                    f,
                    "shape mismatches",
                    mismatched.len(),
                    mismatched
                        .iter()
                        .map(|m| format!("{} {:?} != {:?}", m.key, m.got, m.expected)),
                )
            }
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
