#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::path::PathBuf;

use thiserror::Error;

/// Structured error domain for the authz engine.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("config source not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("failed to parse config at {source_desc}:{line}: {message}")]
    ConfigParse {
        source_desc: String,
        line: usize,
        message: String,
    },

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("illegal URL target '{url}': {reason}")]
    IllegalTarget { url: String, reason: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        AuthzError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AuthzError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn config_parse(source_desc: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        AuthzError::ConfigParse {
            source_desc: source_desc.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthzError>;
