use std::fmt::{self, Display};

/// Errors produced by model constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidUrl { url: String, reason: String },
    InvalidKey { key: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidUrl { url, reason } => {
                write!(f, "invalid media url '{url}': {reason}")
            }
            ModelError::InvalidKey { key } => {
                write!(f, "'{key}' is not a media cache key")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
