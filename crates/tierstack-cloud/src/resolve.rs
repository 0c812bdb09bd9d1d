//! Token resolution against provisioned resources

use crate::error::{CloudError, Result};
use crate::provider::ProvisionedResource;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tierstack_core::Token;
use tierstack_core::token::ARN;

/// Every external lookup key used inside `value`
pub fn lookup_keys(value: &Value) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_keys(value, &mut keys);
    keys
}

fn collect_keys(value: &Value, keys: &mut BTreeSet<String>) {
    if let Some(token) = Token::parse(value) {
        if let Token::Resolve(key) = token {
            keys.insert(key.to_string());
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_keys(v, keys)),
        Value::Object(map) => map.values().for_each(|v| collect_keys(v, keys)),
        _ => {}
    }
}

/// Replace every token in `value` with a concrete value
///
/// `resource` is only used for error messages.
pub fn resolve_value(
    resource: &str,
    value: &Value,
    provisioned: &BTreeMap<String, ProvisionedResource>,
    lookups: &HashMap<String, String>,
) -> Result<Value> {
    if let Some(token) = Token::parse(value) {
        return resolve_token(resource, token, provisioned, lookups);
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(resource, v, provisioned, lookups))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                resolved.insert(key.clone(), resolve_value(resource, v, provisioned, lookups)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_token(
    resource: &str,
    token: Token<'_>,
    provisioned: &BTreeMap<String, ProvisionedResource>,
    lookups: &HashMap<String, String>,
) -> Result<Value> {
    let unresolved = |detail: String| CloudError::UnresolvedToken {
        resource: resource.to_string(),
        token: detail,
    };

    match token {
        Token::Ref(id) => provisioned
            .get(id)
            .map(|p| Value::String(p.physical_id.clone()))
            .ok_or_else(|| unresolved(format!("Ref {}", id))),
        Token::GetAtt(id, attr) => {
            let target = provisioned
                .get(id)
                .ok_or_else(|| unresolved(format!("{}.{}", id, attr)))?;
            if attr == ARN {
                return Ok(Value::String(target.arn.clone()));
            }
            target
                .attribute(attr)
                .cloned()
                .ok_or_else(|| unresolved(format!("{}.{}", id, attr)))
        }
        Token::Resolve(key) => lookups
            .get(key)
            .map(|v| Value::String(v.clone()))
            .ok_or_else(|| unresolved(format!("Resolve {}", key))),
    }
}
