use std::path::PathBuf;
use thiserror::Error;

use crate::pkg::PkgError;

/// Core error type for grove operations outside the resolution engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    ConfigValue { key: &'static str, value: String },

    #[error(transparent)]
    Pkg(#[from] PkgError),
}
