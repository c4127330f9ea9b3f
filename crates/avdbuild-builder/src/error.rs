//! Error types for avdbuild-builder

use thiserror::Error;

/// Result type alias for builder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating configuration
#[derive(Error, Debug)]
pub enum Error {
    /// Conflicting data between hosts, e.g. two hosts claiming one node id
    #[error("duplicate data: {message}")]
    DuplicateData {
        /// Description of the conflict
        message: String,
    },

    /// A required input key is missing
    #[error("{hostname}: missing required key '{key}'")]
    MissingKey {
        /// Host whose inputs are incomplete
        hostname: String,
        /// The missing key
        key: String,
    },

    /// An input value has the wrong type or an out-of-range value
    #[error("{hostname}: {message}")]
    InvalidValue {
        /// Host whose inputs are invalid
        hostname: String,
        /// Description of the error
        message: String,
    },

    /// Device config template rendering failed
    #[error("render error: {0}")]
    Render(#[from] minijinja::Error),
}
