//! Inventory parsing and host variable resolution
//!
//! This module loads an Ansible-style YAML inventory into a group/host model
//! and resolves per-host variables with the standard precedence rules.
//!
//! # Inventory shape
//!
//! ```yaml
//! all:
//!   children:
//!     FABRIC:
//!       children:
//!         SPINES:
//!           hosts:
//!             spine1:
//!               ansible_host: 10.0.0.1
//!           vars:
//!             type: spine
//!       vars:
//!         fabric_name: FABRIC
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::template;
use crate::vault::{self, VaultSecrets};

/// A single inventory group
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Group variables
    pub vars: Mapping,

    /// Hosts defined directly on this group, with their inline host vars
    pub hosts: BTreeMap<String, Mapping>,

    /// Names of child groups
    pub children: Vec<String>,

    /// Distance from the `all` group, used for variable precedence
    pub depth: usize,
}

/// Parsed inventory: groups, hosts, and their variables
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    groups: BTreeMap<String, Group>,
    hosts: BTreeMap<String, Mapping>,
}

impl Inventory {
    /// Load an inventory from a YAML file.
    ///
    /// A vault-encrypted file body is decrypted before parsing, and any
    /// `!vault` tagged values are decrypted in place afterwards.
    pub fn load<P: AsRef<Path>>(path: P, secrets: &VaultSecrets) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::InventoryNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let contents = if vault::is_vault_data(&contents) {
            vault::decrypt_file(&contents, secrets)?
        } else {
            contents
        };

        let mut doc: Value = serde_yaml::from_str(&contents)?;
        vault::decrypt_value(&mut doc, secrets)?;

        Self::from_value(doc)
    }

    /// Build an inventory from an already-parsed YAML document.
    pub fn from_value(doc: Value) -> Result<Self> {
        let root = doc.as_mapping().ok_or_else(|| Error::InvalidInventory {
            message: "top level must be a mapping of group names".to_string(),
        })?;

        let mut inventory = Inventory::default();
        for (name, node) in root {
            let name = group_key(name)?;
            let depth = usize::from(name != "all");
            inventory.parse_group(&name, node, depth)?;
        }

        // Implicit root: every explicit top-level group is a child of `all`.
        let top_level: Vec<String> = root
            .iter()
            .filter_map(|(name, _)| name.as_str().map(str::to_string))
            .filter(|name| name != "all")
            .collect();
        let all = inventory.groups.entry("all".to_string()).or_default();
        for name in top_level {
            if !all.children.contains(&name) {
                all.children.push(name);
            }
        }

        Ok(inventory)
    }

    fn parse_group(&mut self, name: &str, node: &Value, depth: usize) -> Result<()> {
        let mapping = match node {
            Value::Null => {
                self.register_group(name, depth);
                return Ok(());
            }
            Value::Mapping(m) => m,
            _ => {
                return Err(Error::InvalidInventory {
                    message: format!("group '{name}' must be a mapping or null"),
                })
            }
        };

        let mut vars = Mapping::new();
        let mut hosts: BTreeMap<String, Mapping> = BTreeMap::new();
        let mut children: Vec<(String, &Value)> = Vec::new();

        for (key, value) in mapping {
            match key.as_str() {
                Some("hosts") => hosts = parse_hosts_node(name, value)?,
                Some("vars") => {
                    vars = value
                        .as_mapping()
                        .cloned()
                        .ok_or_else(|| Error::InvalidInventory {
                            message: format!("vars of group '{name}' must be a mapping"),
                        })?;
                }
                Some("children") => match value {
                    Value::Null => {}
                    Value::Mapping(m) => {
                        for (child_name, child_node) in m {
                            children.push((group_key(child_name)?, child_node));
                        }
                    }
                    _ => {
                        return Err(Error::InvalidInventory {
                            message: format!("children of group '{name}' must be a mapping"),
                        })
                    }
                },
                Some(other) => {
                    return Err(Error::InvalidInventory {
                        message: format!("unexpected key '{other}' in group '{name}'"),
                    })
                }
                None => {
                    return Err(Error::InvalidInventory {
                        message: format!("non-string key in group '{name}'"),
                    })
                }
            }
        }

        let group = self.register_group(name, depth);
        for (k, v) in vars {
            group.vars.insert(k, v);
        }
        for hostname in hosts.keys() {
            group.hosts.entry(hostname.clone()).or_default();
        }
        for (child_name, _) in &children {
            if !group.children.contains(child_name) {
                group.children.push(child_name.clone());
            }
        }

        for (hostname, hostvars) in hosts {
            let merged = self.hosts.entry(hostname).or_default();
            for (k, v) in hostvars {
                merged.insert(k, v);
            }
        }
        for (child_name, child_node) in children {
            self.parse_group(&child_name, child_node, depth + 1)?;
        }

        Ok(())
    }

    fn register_group(&mut self, name: &str, depth: usize) -> &mut Group {
        let group = self.groups.entry(name.to_string()).or_insert_with(|| Group {
            depth,
            ..Group::default()
        });
        group.depth = group.depth.min(depth);
        group
    }

    /// All hostnames in the inventory, sorted.
    pub fn all_hosts(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// Whether a group with this name exists.
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// All group names, sorted.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Hosts reachable from a group through its `children` closure, sorted.
    ///
    /// Unknown groups yield an empty set; the caller decides whether that is
    /// fatal.
    pub fn hosts_in(&self, group: &str) -> Vec<String> {
        let mut seen_groups = BTreeSet::new();
        let mut hosts = BTreeSet::new();
        self.collect_hosts(group, &mut seen_groups, &mut hosts);
        hosts.into_iter().collect()
    }

    fn collect_hosts(
        &self,
        group: &str,
        seen: &mut BTreeSet<String>,
        hosts: &mut BTreeSet<String>,
    ) {
        if !seen.insert(group.to_string()) {
            return;
        }
        let Some(g) = self.groups.get(group) else {
            return;
        };
        hosts.extend(g.hosts.keys().cloned());
        for child in &g.children {
            self.collect_hosts(child, seen, hosts);
        }
    }

    /// Groups whose closure contains the host, as `(depth, name)` pairs
    /// ordered by precedence (shallowest first, ties by name).
    fn groups_of(&self, hostname: &str) -> Vec<(usize, &str)> {
        let mut result: Vec<(usize, &str)> = self
            .groups
            .iter()
            .filter(|(name, _)| self.hosts_in(name).iter().any(|h| h == hostname))
            .map(|(name, group)| (group.depth, name.as_str()))
            .collect();
        result.sort();
        result
    }

    /// Resolve the variables of a single host.
    ///
    /// Precedence follows Ansible: `all` vars, then ancestor group vars from
    /// shallowest to deepest (ties broken by group name), then the host's own
    /// vars. Later values replace earlier ones wholesale; there is no deep
    /// merge. The magic `inventory_hostname` variable is always present.
    pub fn resolved_vars(&self, hostname: &str) -> Result<Mapping> {
        let host_vars = self
            .hosts
            .get(hostname)
            .ok_or_else(|| Error::UnknownHost {
                hostname: hostname.to_string(),
            })?;

        let mut merged = Mapping::new();
        for (_, group_name) in self.groups_of(hostname) {
            let group = &self.groups[group_name];
            for (k, v) in &group.vars {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in host_vars {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            Value::from("inventory_hostname"),
            Value::from(hostname.to_string()),
        );

        Ok(merged)
    }

    /// Resolve and interpolate variables for every host under a group.
    ///
    /// This is the full input-loading step: group precedence merge followed by
    /// Jinja-style interpolation of the merged variables.
    pub fn hostvars_in(&self, group: &str) -> Result<BTreeMap<String, Mapping>> {
        let mut all_hostvars = BTreeMap::new();
        for hostname in self.hosts_in(group) {
            let vars = self.resolved_vars(&hostname)?;
            all_hostvars.insert(hostname, template::interpolate(&vars));
        }
        Ok(all_hostvars)
    }
}

fn parse_hosts_node(group_name: &str, node: &Value) -> Result<BTreeMap<String, Mapping>> {
    let hosts = match node {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Mapping(m) => m,
        _ => {
            return Err(Error::InvalidInventory {
                message: format!("hosts of group '{group_name}' must be a mapping"),
            })
        }
    };

    let mut parsed = BTreeMap::new();
    for (hostname, hostvars) in hosts {
        let hostname = hostname
            .as_str()
            .ok_or_else(|| Error::InvalidInventory {
                message: format!("non-string hostname in group '{group_name}'"),
            })?
            .to_string();

        let vars = match hostvars {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m.clone(),
            _ => {
                return Err(Error::InvalidInventory {
                    message: format!("vars of host '{hostname}' must be a mapping"),
                })
            }
        };
        parsed.insert(hostname, vars);
    }

    Ok(parsed)
}

fn group_key(name: &Value) -> Result<String> {
    name.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInventory {
            message: "group names must be strings".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::VaultSecrets;

    const INVENTORY: &str = r#"
all:
  children:
    FABRIC:
      children:
        SPINES:
          hosts:
            spine1:
              id: 1
            spine2:
              id: 2
          vars:
            type: spine
        LEAFS:
          hosts:
            leaf1:
              id: 11
              type: l2leaf
          vars:
            type: l3leaf
      vars:
        fabric_name: FABRIC
        mtu: 9214
    SERVERS:
      hosts:
        server1:
  vars:
    dns_domain: example.com
"#;

    fn inventory() -> Inventory {
        let doc: Value = serde_yaml::from_str(INVENTORY).unwrap();
        Inventory::from_value(doc).unwrap()
    }

    #[test]
    fn test_transitive_membership() {
        let inv = inventory();
        assert_eq!(inv.hosts_in("FABRIC"), vec!["leaf1", "spine1", "spine2"]);
        assert_eq!(inv.hosts_in("SPINES"), vec!["spine1", "spine2"]);
        assert_eq!(
            inv.all_hosts(),
            vec!["leaf1", "server1", "spine1", "spine2"]
        );
    }

    #[test]
    fn test_unknown_group_is_empty() {
        let inv = inventory();
        assert!(inv.hosts_in("NOPE").is_empty());
    }

    #[test]
    fn test_group_var_inheritance() {
        let inv = inventory();
        let vars = inv.resolved_vars("spine1").unwrap();
        assert_eq!(vars["type"], Value::from("spine"));
        assert_eq!(vars["fabric_name"], Value::from("FABRIC"));
        assert_eq!(vars["dns_domain"], Value::from("example.com"));
        assert_eq!(vars["mtu"], Value::from(9214));
        assert_eq!(vars["inventory_hostname"], Value::from("spine1"));
    }

    #[test]
    fn test_host_vars_override_group_vars() {
        let inv = inventory();
        let vars = inv.resolved_vars("leaf1").unwrap();
        // leaf1 sets type inline, overriding the LEAFS group var
        assert_eq!(vars["type"], Value::from("l2leaf"));
        assert_eq!(vars["id"], Value::from(11));
    }

    #[test]
    fn test_deeper_group_overrides_shallower() {
        let yaml = r#"
all:
  children:
    outer:
      children:
        inner:
          hosts:
            h1:
          vars:
            key: inner
      vars:
        key: outer
"#;
        let inv = Inventory::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap();
        let vars = inv.resolved_vars("h1").unwrap();
        assert_eq!(vars["key"], Value::from("inner"));
    }

    #[test]
    fn test_unknown_host_errors() {
        let inv = inventory();
        assert!(matches!(
            inv.resolved_vars("ghost"),
            Err(Error::UnknownHost { .. })
        ));
    }

    #[test]
    fn test_non_mapping_top_level_errors() {
        let doc: Value = serde_yaml::from_str("- a\n- b\n").unwrap();
        assert!(matches!(
            Inventory::from_value(doc),
            Err(Error::InvalidInventory { .. })
        ));
    }

    #[test]
    fn test_unexpected_group_key_errors() {
        let doc: Value = serde_yaml::from_str("all:\n  tasks:\n    - ping\n").unwrap();
        assert!(matches!(
            Inventory::from_value(doc),
            Err(Error::InvalidInventory { .. })
        ));
    }

    #[test]
    fn test_hostvars_in_interpolates() {
        let yaml = r#"
all:
  children:
    FABRIC:
      hosts:
        spine1:
      vars:
        fabric_name: FAB
        hostname: "{{ inventory_hostname }}.{{ fabric_name }}"
"#;
        let inv = Inventory::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap();
        let hostvars = inv.hostvars_in("FABRIC").unwrap();
        assert_eq!(hostvars["spine1"]["hostname"], Value::from("spine1.FAB"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Inventory::load("/nonexistent/inventory.yml", &VaultSecrets::default());
        assert!(matches!(result, Err(Error::InventoryNotFound { .. })));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yml");
        std::fs::write(&path, INVENTORY).unwrap();

        let inv = Inventory::load(&path, &VaultSecrets::default()).unwrap();
        assert_eq!(inv.hosts_in("FABRIC").len(), 3);
    }
}
