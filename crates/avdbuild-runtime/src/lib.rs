//! avd-build Runtime
//!
//! This crate provides the build engine for avd-build: input validation
//! across all fabric hosts, fabric-facts generation, and bounded parallel
//! per-host configuration builds with artifact writing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use avdbuild_runtime::{BuildEngine, BuildOptions};
//!
//! let engine = BuildEngine::new(builder, options);
//! let report = engine.build(all_hostvars, &target_hosts).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;

pub use engine::{BuildEngine, BuildOptions, BuildReport, HostFailure};
pub use error::{Error, Result};
