//! avd-build Builder Library
//!
//! This crate defines the seam between the build orchestrator and the
//! configuration generator: the [`ConfigBuilder`] trait covers the five
//! build stages (input validation, fabric facts, structured config,
//! structured-config validation, device config rendering).
//!
//! [`EosBuilder`] is the built-in deterministic implementation used by the
//! CLI; an alternative generator can be plugged in by implementing the trait.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eos;
pub mod error;
pub mod validation;

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

pub use eos::EosBuilder;
pub use error::{Error, Result};
pub use validation::ValidationResult;

/// Resolved, interpolated variables for every host, keyed by hostname.
pub type Hostvars = BTreeMap<String, Mapping>;

/// The configuration-generation seam.
///
/// One call sequence per run: `validate_inputs` for every host, one
/// `fabric_facts` over all hosts, then per target host `structured_config`,
/// `validate_structured_config`, and `device_config`. Implementations must be
/// stateless across hosts so builds can run in parallel.
pub trait ConfigBuilder: Send + Sync {
    /// Validate the input variables of a single host.
    fn validate_inputs(&self, hostname: &str, hostvars: &Mapping) -> ValidationResult;

    /// Derive fabric-wide facts from the variables of all fabric hosts.
    ///
    /// The returned value carries an `avd_switch_facts` mapping keyed by
    /// hostname. Conflicting data between hosts (for example a duplicate
    /// node id) is an error.
    fn fabric_facts(&self, all_hostvars: &Hostvars) -> Result<Value>;

    /// Produce the structured configuration of one host.
    fn structured_config(
        &self,
        hostname: &str,
        hostvars: &Mapping,
        facts: &Value,
    ) -> Result<Value>;

    /// Validate a host's structured configuration before rendering.
    fn validate_structured_config(&self, hostname: &str, structured: &Value) -> ValidationResult;

    /// Render the final device configuration text.
    fn device_config(&self, structured: &Value) -> Result<String>;
}

/// The switch facts of one host, looked up inside a facts document.
pub fn switch_facts<'a>(facts: &'a Value, hostname: &str) -> Result<&'a Value> {
    facts
        .get("avd_switch_facts")
        .and_then(|f| f.get(hostname))
        .ok_or_else(|| Error::MissingKey {
            hostname: hostname.to_string(),
            key: format!("avd_switch_facts.{hostname}"),
        })
}
