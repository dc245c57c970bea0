//! Effective input resolution.
//!
//! Dependency outputs are substituted into a node's input by rendering its
//! strings as minijinja templates with strict undefined behaviour. The
//! context holds every dependency output under its node id, and the same map
//! under `outputs` for ids that are not valid identifiers:
//!
//! ```text
//! "{{ fetch }}"                  -> the fetch output, structure preserved
//! "rows: {{ fetch.rows | length }}" -> rendered string
//! "{{ outputs[\"Query Database\"] }}"
//! ```
//!
//! A string is only treated as a template when one of its `{{ }}` or `{% %}`
//! blocks names a dependency (or `outputs`, when there is at least one).
//! Anything else is free text and passes through verbatim, braces included.
//! A dependency whose id is `outputs` shadows the map.

use lazy_static::lazy_static;
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::errors::ServiceError;
use crate::dag_flow::inference::placeholder_references;

lazy_static! {
    static ref SINGLE_PLACEHOLDER: Regex = Regex::new(r"^\s*\{\{-?(.*?)-?\}\}\s*$").unwrap();
}

/// Resolve `input` for `node_id` against the outputs of its dependencies.
pub fn resolve_input(
    node_id: &str,
    input: &Value,
    upstream: &BTreeMap<String, Value>,
) -> Result<Value, ServiceError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let mut context: BTreeMap<String, minijinja::Value> = BTreeMap::new();
    if !upstream.is_empty() {
        context.insert(
            "outputs".to_string(),
            minijinja::Value::from_serialize(upstream),
        );
    }
    for (id, output) in upstream {
        context.insert(id.clone(), minijinja::Value::from_serialize(output));
    }

    resolve_value(&env, node_id, input, &context)
}

fn resolve_value(
    env: &Environment,
    node_id: &str,
    value: &Value,
    context: &BTreeMap<String, minijinja::Value>,
) -> Result<Value, ServiceError> {
    match value {
        Value::String(text) => resolve_string(env, node_id, text, context),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(env, node_id, item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(env, node_id, item, context)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    env: &Environment,
    node_id: &str,
    text: &str,
    context: &BTreeMap<String, minijinja::Value>,
) -> Result<Value, ServiceError> {
    if !is_template(text, context) {
        return Ok(Value::String(text.to_string()));
    }

    if let Some(expr) = single_expression(text) {
        let evaluated = env
            .compile_expression(expr)
            .and_then(|compiled| compiled.eval(context))
            .map_err(|e| resolution_error(node_id, text, e))?;
        if evaluated.is_undefined() {
            return Err(ServiceError::InputResolution {
                node_id: node_id.to_string(),
                message: format!("'{}' is undefined", expr.trim()),
            });
        }
        return serde_json::to_value(&evaluated).map_err(|e| ServiceError::InputResolution {
            node_id: node_id.to_string(),
            message: format!("cannot convert '{}' to JSON: {}", expr.trim(), e),
        });
    }

    env.render_str(text, context)
        .map(Value::String)
        .map_err(|e| resolution_error(node_id, text, e))
}

/// Whether `text` has a template block that names something in `context`
fn is_template(text: &str, context: &BTreeMap<String, minijinja::Value>) -> bool {
    if !text.contains("{{") && !text.contains("{%") {
        return false;
    }
    placeholder_references(text)
        .iter()
        .any(|name| context.contains_key(name))
}

/// The inner expression when `text` is exactly one `{{ ... }}` placeholder
fn single_expression(text: &str) -> Option<&str> {
    let caps = SINGLE_PLACEHOLDER.captures(text)?;
    let expr = caps.get(1)?.as_str();
    if expr.contains("{{") || expr.contains("}}") || expr.contains("{%") {
        return None;
    }
    Some(expr)
}

fn resolution_error(node_id: &str, template: &str, err: minijinja::Error) -> ServiceError {
    ServiceError::InputResolution {
        node_id: node_id.to_string(),
        message: format!("failed to resolve '{}': {}", template, err),
    }
}
