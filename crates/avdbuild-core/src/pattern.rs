//! Host limit pattern matching
//!
//! Implements the subset of Ansible host patterns needed for `--limit`:
//! `:`/`,` separated terms, `!` exclusion, `&` intersection, and `*`/`?`
//! globs over host and group names.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{Error, Result};
use crate::inventory::Inventory;

/// Resolve a limit pattern against an inventory.
///
/// Terms are evaluated left to right: plain terms union their matches into
/// the result, `&term` intersects, `!term` excludes. A term matches a
/// hostname, a group name (expanded to its transitive hosts), or a glob over
/// either. The result is sorted and deduplicated.
pub fn match_pattern(inventory: &Inventory, pattern: &str) -> Result<Vec<String>> {
    // A pattern of only restrictions ("!x", "&y") restricts the full
    // inventory, as in Ansible.
    let only_restrictions = pattern
        .split([':', ','])
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| term.starts_with(['!', '&']));
    let mut selected: BTreeSet<String> = if only_restrictions {
        inventory.all_hosts().into_iter().collect()
    } else {
        BTreeSet::new()
    };

    for raw_term in pattern.split([':', ',']) {
        let term = raw_term.trim();
        if term.is_empty() {
            continue;
        }

        let (op, name) = match term.as_bytes()[0] {
            b'!' => ('!', term[1..].trim()),
            b'&' => ('&', term[1..].trim()),
            _ => ('+', term),
        };

        let matches = match_term(inventory, name)?;
        match op {
            '&' => selected.retain(|host| matches.contains(host)),
            '!' => selected.retain(|host| !matches.contains(host)),
            _ => selected.extend(matches),
        }
    }

    Ok(selected.into_iter().collect())
}

/// Hosts matching a single pattern term.
fn match_term(inventory: &Inventory, term: &str) -> Result<BTreeSet<String>> {
    if term == "all" || term == "*" {
        return Ok(inventory.all_hosts().into_iter().collect());
    }

    let mut matches = BTreeSet::new();

    if term.contains(['*', '?']) {
        let re = glob_to_regex(term)?;
        for host in inventory.all_hosts() {
            if re.is_match(&host) {
                matches.insert(host);
            }
        }
        // A glob can also select whole groups by name.
        for group in inventory.group_names() {
            if re.is_match(&group) {
                matches.extend(inventory.hosts_in(&group));
            }
        }
    } else {
        if inventory.has_group(term) {
            matches.extend(inventory.hosts_in(term));
        }
        if inventory.all_hosts().iter().any(|h| h == term) {
            matches.insert(term.to_string());
        }
    }

    Ok(matches)
}

fn glob_to_regex(term: &str) -> Result<Regex> {
    let mut source = String::from("^");
    for ch in term.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| Error::InvalidPattern {
        pattern: term.to_string(),
        message: e.to_string(),
    })
}
