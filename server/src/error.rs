use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use image::ImageError;
use serde_json::json;
use tokio::task::JoinError;

/// Failures while reading the server's configuration.
#[derive(Debug)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    Io(PathBuf, io::Error),
    Json(PathBuf, serde_json::Error),
}

impl ConfigError {
    pub fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid value '{value}' for {var}: {reason}")
            }
            ConfigError::Io(path, e) => write!(f, "failed to read {}: {e}", path.display()),
            ConfigError::Json(path, e) => write!(f, "malformed json in {}: {e}", path.display()),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Json(_, e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Boundary conversion for the binary.
impl From<ConfigError> for io::Error {
    fn from(value: ConfigError) -> Self {
        io::Error::other(value)
    }
}

/// A request that couldn't be served, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    MissingFile,
    Multipart(MultipartError),
    InvalidImage(ImageError),
    Inference(JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile | ApiError::Multipart(_) | ApiError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::MissingFile => write!(f, "missing multipart field 'file'"),
            ApiError::Multipart(e) => write!(f, "malformed multipart body: {e}"),
            ApiError::InvalidImage(e) => write!(f, "invalid image file: {e}"),
            ApiError::Inference(e) => write!(f, "inference task failed: {e}"),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Multipart(e) => Some(e),
            ApiError::InvalidImage(e) => Some(e),
            ApiError::Inference(e) => Some(e),
            ApiError::MissingFile => None,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        Self::Multipart(value)
    }
}

impl From<ImageError> for ApiError {
    fn from(value: ImageError) -> Self {
        Self::InvalidImage(value)
    }
}

impl From<JoinError> for ApiError {
    fn from(value: JoinError) -> Self {
        Self::Inference(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_bad_requests() {
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);

        let err = image::load_from_memory(b"definitely not an image").unwrap_err();
        let err = ApiError::from(err);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("invalid image file"));
    }

    #[test]
    fn config_errors_name_the_variable() {
        let err = ConfigError::invalid("PORT", "x", "not a number");
        assert_eq!(err.to_string(), "invalid value 'x' for PORT: not a number");
        assert!(err.source().is_none());
    }
}
