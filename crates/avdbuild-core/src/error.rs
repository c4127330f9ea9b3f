//! Error types for avdbuild-core

use thiserror::Error;

/// Result type alias for avdbuild-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in avdbuild-core
#[derive(Error, Debug)]
pub enum Error {
    /// Inventory file could not be found
    #[error("inventory file not found: {path}")]
    InventoryNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse inventory YAML
    #[error("failed to parse inventory: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Structurally invalid inventory
    #[error("invalid inventory: {message}")]
    InvalidInventory {
        /// Description of what's invalid
        message: String,
    },

    /// Unknown host requested from the inventory
    #[error("host '{hostname}' not found in inventory")]
    UnknownHost {
        /// The hostname that was looked up
        hostname: String,
    },

    /// Invalid limit pattern
    #[error("invalid host pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern term
        pattern: String,
        /// Description of the error
        message: String,
    },

    /// Vault setup or decryption error
    #[error("vault error: {message}")]
    Vault {
        /// Description of the error
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a vault error with a formatted message.
    pub(crate) fn vault(message: impl Into<String>) -> Self {
        Error::Vault {
            message: message.into(),
        }
    }
}
