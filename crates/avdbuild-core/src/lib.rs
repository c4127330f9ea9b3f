//! avd-build Core Library
//!
//! This crate provides the inventory side of avd-build:
//! - YAML inventory parsing and group/host modeling
//! - Host variable resolution with Ansible-style precedence
//! - Ansible Vault (AES256) decryption of files and tagged values
//! - Host limit pattern matching
//! - Jinja-style interpolation of host variables
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Inventory  │────▶│   Resolved   │────▶│ Interpolated │
//! │   (YAML)    │     │   hostvars   │     │   hostvars   │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use avdbuild_core::{Inventory, VaultSecrets};
//!
//! let inventory = Inventory::load("inventory.yml", &VaultSecrets::default())?;
//! for host in inventory.hosts_in("FABRIC") {
//!     let vars = inventory.resolved_vars(&host)?;
//!     println!("{host}: {} vars", vars.len());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod inventory;
pub mod pattern;
pub mod template;
pub mod vault;

pub use error::{Error, Result};
pub use inventory::Inventory;
pub use pattern::match_pattern;
pub use vault::{VaultId, VaultSecrets};
