//! Jinja-style interpolation of host variables
//!
//! Host variables may reference each other with `{{ ... }}` expressions.
//! Every string value containing template syntax is rendered against the
//! full variable mapping; values that fail to render (undefined variables,
//! syntax errors) are kept as-is, matching a templating pass with
//! `fail_on_undefined=false`.

use minijinja::{Environment, UndefinedBehavior};
use serde_yaml::{Mapping, Value};

/// Variable chains (`a: "{{ b }}"`, `b: "{{ c }}"`) settle within a few
/// passes; anything deeper is left partially rendered.
const MAX_PASSES: usize = 5;

/// Interpolate a host variable mapping in place of its template expressions.
///
/// Runs repeated render passes over the mapping until a pass changes nothing,
/// so variables referencing other templated variables resolve too.
pub fn interpolate(vars: &Mapping) -> Mapping {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let mut current = vars.clone();
    for _ in 0..MAX_PASSES {
        let context = minijinja::Value::from_serialize(&current);
        let mut changed = false;
        let next = current
            .iter()
            .map(|(k, v)| (k.clone(), render_value(&env, v, &context, &mut changed)))
            .collect();
        current = next;
        if !changed {
            break;
        }
    }
    current
}

/// Render one value against the given context, recursing into collections.
pub fn render_value(
    env: &Environment<'_>,
    value: &Value,
    context: &minijinja::Value,
    changed: &mut bool,
) -> Value {
    match value {
        Value::String(s) if s.contains("{{") || s.contains("{%") => {
            match env.render_str(s, context) {
                Ok(rendered) => {
                    if rendered != *s {
                        *changed = true;
                    }
                    Value::String(rendered)
                }
                // Unresolvable expression, keep the original string.
                Err(_) => value.clone(),
            }
        }
        Value::Sequence(seq) => Value::Sequence(
            seq.iter()
                .map(|v| render_value(env, v, context, changed))
                .collect(),
        ),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(env, v, context, changed)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_simple_interpolation() {
        let result = interpolate(&vars(
            "fabric_name: FAB\nhostname: \"{{ fabric_name }}-spine1\"\n",
        ));
        assert_eq!(result["hostname"], Value::from("FAB-spine1"));
    }

    #[test]
    fn test_chained_variables() {
        let result = interpolate(&vars(
            "a: \"{{ b }}\"\nb: \"{{ c }}\"\nc: leaf\n",
        ));
        assert_eq!(result["a"], Value::from("leaf"));
        assert_eq!(result["b"], Value::from("leaf"));
    }

    #[test]
    fn test_undefined_keeps_original() {
        let result = interpolate(&vars("hostname: \"{{ missing_var }}\"\n"));
        assert_eq!(result["hostname"], Value::from("{{ missing_var }}"));
    }

    #[test]
    fn test_nested_collections() {
        let result = interpolate(&vars(
            "name: sw1\ninterfaces:\n  - description: \"uplink {{ name }}\"\n",
        ));
        let interfaces = result["interfaces"].as_sequence().unwrap();
        assert_eq!(interfaces[0]["description"], Value::from("uplink sw1"));
    }

    #[test]
    fn test_non_template_values_untouched() {
        let result = interpolate(&vars("mtu: 9214\nname: plain\n"));
        assert_eq!(result["mtu"], Value::from(9214));
        assert_eq!(result["name"], Value::from("plain"));
    }

    #[test]
    fn test_expression_with_filter() {
        let result = interpolate(&vars("name: spine1\nupper_name: \"{{ name | upper }}\"\n"));
        assert_eq!(result["upper_name"], Value::from("SPINE1"));
    }

    #[test]
    fn test_arithmetic_expression() {
        let result = interpolate(&vars("id: 3\nvlan: \"{{ 100 + id }}\"\n"));
        assert_eq!(result["vlan"], Value::from("103"));
    }
}
