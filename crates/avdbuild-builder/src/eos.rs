//! Built-in EOS-style reference builder
//!
//! A deterministic [`ConfigBuilder`] implementation: fixed key order in
//! facts and structured configs, hosts processed in sorted order, and a
//! fixed device-config template, so repeated runs produce byte-identical
//! artifacts.

use minijinja::Environment;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::validation::ValidationResult;
use crate::{switch_facts, ConfigBuilder, Hostvars};

const NODE_TYPES: [&str; 3] = ["spine", "l3leaf", "l2leaf"];
const DEFAULT_PLATFORM: &str = "vEOS-lab";

const DEVICE_TEMPLATE: &str = r#"!
hostname {{ hostname }}
!
{% if dns_domain %}
dns domain {{ dns_domain }}
!
{% endif %}
{% for vlan in vlans %}
vlan {{ vlan.id }}
   name {{ vlan.name }}
!
{% endfor %}
{% for intf in management_interfaces %}
interface {{ intf.name }}
   ip address {{ intf.ip_address }}
!
{% endfor %}
{% for intf in loopback_interfaces %}
interface {{ intf.name }}
   ip address {{ intf.ip_address }}
!
{% endfor %}
{% if router_bgp %}
router bgp {{ router_bgp["as"] }}
   router-id {{ router_bgp.router_id }}
!
{% endif %}
end
"#;

/// Deterministic EOS-flavoured configuration builder.
#[derive(Debug, Clone, Default)]
pub struct EosBuilder;

impl EosBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }
}

impl ConfigBuilder for EosBuilder {
    fn validate_inputs(&self, hostname: &str, hostvars: &Mapping) -> ValidationResult {
        let mut result = ValidationResult::default();

        let node_type = match hostvars.get("type").and_then(Value::as_str) {
            Some(t) if NODE_TYPES.contains(&t) => Some(t),
            Some(t) => {
                result.error(format!(
                    "type '{t}' must be one of {}",
                    NODE_TYPES.join(", ")
                ));
                None
            }
            None => {
                result.error("missing required key 'type'");
                None
            }
        };

        match hostvars.get("id").and_then(Value::as_u64) {
            Some(id) if id > 0 => {}
            Some(_) => result.error("'id' must be a positive integer"),
            None => result.error("missing required key 'id'"),
        }

        if matches!(node_type, Some("spine") | Some("l3leaf")) && as_number(hostvars.get("bgp_as")).is_none() {
            result.error(format!(
                "'{hostname}' is a routed node and requires a numeric 'bgp_as'"
            ));
        }

        if let Some(vlans) = hostvars.get("vlans") {
            if !vlans.is_sequence() {
                result.error("'vlans' must be a list");
            }
        }

        if hostvars.contains_key("evpn_rd") {
            result.deprecation("'evpn_rd' is deprecated and ignored, use 'overlay_rd'");
        }

        result
    }

    fn fabric_facts(&self, all_hostvars: &Hostvars) -> Result<Value> {
        let mut ids: BTreeMap<u64, String> = BTreeMap::new();
        let mut switch_facts = Mapping::new();
        let mut fabric_name = None;

        for (hostname, hostvars) in all_hostvars {
            if fabric_name.is_none() {
                fabric_name = hostvars.get("fabric_name").and_then(Value::as_str);
            }

            // Hosts with incomplete inputs get no facts entry; their build
            // fails later with a missing-key error instead of poisoning the
            // fabric-wide view.
            let (Some(node_type), Some(id)) = (
                hostvars.get("type").and_then(Value::as_str),
                hostvars.get("id").and_then(Value::as_u64),
            ) else {
                continue;
            };

            if let Some(other) = ids.insert(id, hostname.clone()) {
                return Err(Error::DuplicateData {
                    message: format!("node id {id} is used by both '{other}' and '{hostname}'"),
                });
            }

            let mut facts = Mapping::new();
            facts.insert("type".into(), node_type.into());
            facts.insert("id".into(), id.into());
            facts.insert(
                "platform".into(),
                hostvars
                    .get("platform")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_PLATFORM)
                    .into(),
            );
            if let Some(bgp_as) = as_number(hostvars.get("bgp_as")) {
                facts.insert("bgp_as".into(), bgp_as.into());
            }
            if let Some(pool) = hostvars.get("loopback_ipv4_pool").and_then(Value::as_str) {
                let ip = ipv4_offset(pool, id).map_err(|message| Error::InvalidValue {
                    hostname: hostname.clone(),
                    message,
                })?;
                facts.insert("loopback_ipv4".into(), ip.into());
            }

            switch_facts.insert(hostname.as_str().into(), Value::Mapping(facts));
        }

        let mut doc = Mapping::new();
        if let Some(name) = fabric_name {
            doc.insert("fabric_name".into(), name.into());
        }
        doc.insert("avd_switch_facts".into(), Value::Mapping(switch_facts));
        Ok(Value::Mapping(doc))
    }

    fn structured_config(
        &self,
        hostname: &str,
        hostvars: &Mapping,
        facts: &Value,
    ) -> Result<Value> {
        let own_facts = switch_facts(facts, hostname)?;

        let mut config = Mapping::new();
        config.insert("hostname".into(), hostname.into());
        config.insert(
            "platform".into(),
            own_facts
                .get("platform")
                .cloned()
                .unwrap_or_else(|| DEFAULT_PLATFORM.into()),
        );
        if let Some(domain) = hostvars.get("dns_domain") {
            config.insert("dns_domain".into(), domain.clone());
        }

        let mut management = Vec::new();
        if let Some(mgmt_ip) = hostvars.get("ansible_host").and_then(Value::as_str) {
            let mut intf = Mapping::new();
            intf.insert("name".into(), "Management1".into());
            intf.insert("ip_address".into(), mgmt_ip.into());
            management.push(Value::Mapping(intf));
        }
        config.insert("management_interfaces".into(), management.into());

        config.insert(
            "vlans".into(),
            hostvars
                .get("vlans")
                .cloned()
                .unwrap_or_else(|| Value::Sequence(Vec::new())),
        );

        let mut loopbacks = Vec::new();
        if let Some(loopback) = own_facts.get("loopback_ipv4").and_then(Value::as_str) {
            let mut intf = Mapping::new();
            intf.insert("name".into(), "Loopback0".into());
            intf.insert("ip_address".into(), format!("{loopback}/32").into());
            loopbacks.push(Value::Mapping(intf));
        }
        config.insert("loopback_interfaces".into(), loopbacks.into());

        if let Some(bgp_as) = own_facts.get("bgp_as").and_then(Value::as_u64) {
            let router_id = own_facts
                .get("loopback_ipv4")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::MissingKey {
                    hostname: hostname.to_string(),
                    key: "loopback_ipv4_pool".to_string(),
                })?;
            let mut bgp = Mapping::new();
            bgp.insert("as".into(), bgp_as.into());
            bgp.insert("router_id".into(), router_id.into());
            config.insert("router_bgp".into(), Value::Mapping(bgp));
        }

        Ok(Value::Mapping(config))
    }

    fn validate_structured_config(&self, hostname: &str, structured: &Value) -> ValidationResult {
        let mut result = ValidationResult::default();

        match structured.get("hostname").and_then(Value::as_str) {
            Some(h) if h == hostname => {}
            Some(h) => result.error(format!(
                "structured config hostname '{h}' does not match host '{hostname}'"
            )),
            None => result.error("structured config has no hostname"),
        }

        if let Some(vlans) = structured.get("vlans").and_then(Value::as_sequence) {
            for vlan in vlans {
                match vlan.get("id").and_then(Value::as_u64) {
                    Some(id) if (1..=4094).contains(&id) => {}
                    Some(id) => result.error(format!("vlan id {id} is outside 1-4094")),
                    None => result.error("vlan entry has no numeric id"),
                }
                if vlan.get("name").and_then(Value::as_str).is_none() {
                    result.error("vlan entry has no name");
                }
            }
        }

        result
    }

    fn device_config(&self, structured: &Value) -> Result<String> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        let rendered = env.render_str(
            DEVICE_TEMPLATE,
            minijinja::Value::from_serialize(structured),
        )?;
        // render strips the template's trailing newline; device configs end
        // with one
        Ok(format!("{rendered}\n"))
    }
}

/// Accept a numeric value given as either an integer or a numeric string.
fn as_number(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// `pool` is a dotted-quad network with prefix (`10.255.0.0/24`); the result
/// is the network address plus `offset`.
fn ipv4_offset(pool: &str, offset: u64) -> std::result::Result<String, String> {
    let (addr, prefix) = pool
        .split_once('/')
        .ok_or_else(|| format!("'{pool}' is not a CIDR network"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("invalid prefix length in '{pool}'"))?;
    if prefix > 32 {
        return Err(format!("invalid prefix length in '{pool}'"));
    }

    let octets: Vec<u32> = addr
        .split('.')
        .map(|o| o.parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| format!("invalid IPv4 network '{pool}'"))?;
    if octets.len() != 4 || octets.iter().any(|&o| o > 255) {
        return Err(format!("invalid IPv4 network '{pool}'"));
    }

    let base = (octets[0] << 24) | (octets[1] << 16) | (octets[2] << 8) | octets[3];
    let ip = base
        .checked_add(u32::try_from(offset).map_err(|_| format!("offset {offset} too large"))?)
        .ok_or_else(|| format!("offset {offset} overflows '{pool}'"))?;

    Ok(format!(
        "{}.{}.{}.{}",
        ip >> 24,
        (ip >> 16) & 0xff,
        (ip >> 8) & 0xff,
        ip & 0xff
    ))
}
