//! Body-Template Rendering
//!
//! Recursive walk over a target's JSON body template. A string leaf that
//! is exactly `${name}`, where `name` is one of the closed variable set,
//! is replaced by the corresponding value from the anonymization result.
//! Anything else passes through unchanged, so templates cannot evaluate
//! expressions or reach outside the fixed variable set.

use crate::processor::chatlog::AnonymizationResult;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Render a body template against an anonymization result
pub fn render(template: &Value, result: &AnonymizationResult) -> Value {
    let variables = variable_map(result);
    substitute(template, &variables)
}

/// The closed set of substitutable variables
fn variable_map(result: &AnonymizationResult) -> HashMap<&'static str, Value> {
    let mut variables = HashMap::new();
    variables.insert(
        "messages",
        serde_json::to_value(result.payload_messages()).unwrap_or(Value::Null),
    );
    variables.insert(
        "source_file_hash",
        Value::String(result.source_file_hash.clone()),
    );
    variables.insert(
        "processed_at",
        Value::String(result.processed_at.to_rfc3339()),
    );
    variables.insert("byte_size", Value::from(result.byte_size));
    variables.insert(
        "metadata",
        result.metadata.clone().unwrap_or(Value::Null),
    );
    variables
}

fn substitute(node: &Value, variables: &HashMap<&'static str, Value>) -> Value {
    match node {
        Value::String(text) => {
            if let Some(name) = extract_variable(text) {
                if let Some(value) = variables.get(name) {
                    return value.clone();
                }
            }
            node.clone()
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| substitute(item, variables)).collect())
        }
        Value::Object(fields) => {
            let mut rendered = Map::with_capacity(fields.len());
            for (key, value) in fields {
                rendered.insert(key.clone(), substitute(value, variables));
            }
            Value::Object(rendered)
        }
        _ => node.clone(),
    }
}

/// Match the fixed `${identifier}` grammar. The whole string must be the
/// placeholder; embedded placeholders are not substituted.
fn extract_variable(text: &str) -> Option<&str> {
    let name = text.strip_prefix("${")?.strip_suffix('}')?;
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(name)
    } else {
        None
    }
}
