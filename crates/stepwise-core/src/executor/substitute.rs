//! `${key}` placeholder substitution.
//!
//! Keys are looked up in the shared data first and in the composed workflow
//! params second. Placeholders without a value are left verbatim so optional
//! steps can run with partial inputs; each one is reported to the caller.

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::{value_to_text, SharedData};

/// Where placeholder values come from, in lookup order.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub shared: &'a SharedData,
    pub params: &'a IndexMap<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn lookup(&self, key: &str) -> Option<&'a Value> {
        self.shared.get(key).or_else(|| self.params.get(key))
    }
}

/// Replaces every resolvable `${key}` in `template`.
///
/// Unresolved keys are appended to `unresolved` and kept as written.
pub fn substitute_str(template: &str, scope: Scope<'_>, unresolved: &mut Vec<String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut remainder = template;

    while let Some(start) = remainder.find("${") {
        output.push_str(&remainder[..start]);
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find('}') else {
            output.push_str(&remainder[start..]);
            return output;
        };

        let key = after_start[..end].trim();
        match scope.lookup(key).filter(|_| !key.is_empty()) {
            Some(value) => output.push_str(&value_to_text(value)),
            None => {
                unresolved.push(key.to_string());
                output.push_str(&remainder[start..start + 2 + end + 1]);
            }
        }
        remainder = &after_start[end + 1..];
    }

    output.push_str(remainder);
    output
}

/// Substitutes placeholders in every string inside `value`.
///
/// A string consisting of exactly one placeholder takes the referenced
/// value with its JSON type intact, so `"${count}"` can yield a number.
pub fn substitute_value(value: &Value, scope: Scope<'_>, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::String(text) => {
            if let Some(key) = sole_placeholder(text) {
                if let Some(found) = scope.lookup(key) {
                    return found.clone();
                }
            }
            Value::String(substitute_str(text, scope, unresolved))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, scope, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute_value(item, scope, unresolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sole_placeholder(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    let key = inner.trim();
    (!key.is_empty() && !inner.contains('}') && !inner.contains("${")).then_some(key)
}
