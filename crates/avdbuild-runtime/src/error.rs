//! Runtime error types

/// Result type for build engine operations
pub type Result<T> = anyhow::Result<T>;

/// Build engine error (re-export anyhow for application-level errors)
pub type Error = anyhow::Error;
