//! Cross-resource references inside property bags
//!
//! Synthesis never knows physical identifiers. A property that points at
//! another resource holds a token instead, resolved at apply time:
//!
//! - `{"Ref": "<logical-id>"}` -> physical id
//! - `{"Fn::GetAtt": ["<logical-id>", "<attr>"]}` -> attribute (e.g. `Arn`)
//! - `{"Resolve": "<key>"}` -> external lookup (e.g. latest machine image)

use serde_json::{Value, json};
use std::collections::BTreeSet;

pub const REF: &str = "Ref";
pub const GET_ATT: &str = "Fn::GetAtt";
pub const RESOLVE: &str = "Resolve";

/// Attribute name for a resource's ARN
pub const ARN: &str = "Arn";

/// Token for the physical id of `logical_id`
pub fn reference(logical_id: &str) -> Value {
    json!({ REF: logical_id })
}

/// Token for an attribute of `logical_id`
pub fn attribute(logical_id: &str, attr: &str) -> Value {
    json!({ GET_ATT: [logical_id, attr] })
}

/// Token for the ARN of `logical_id`
pub fn arn(logical_id: &str) -> Value {
    attribute(logical_id, ARN)
}

/// Token for a value only the provider can look up
pub fn lookup(key: &str) -> Value {
    json!({ RESOLVE: key })
}

/// A parsed token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Ref(&'a str),
    GetAtt(&'a str, &'a str),
    Resolve(&'a str),
}

impl<'a> Token<'a> {
    /// Parse `value` as a token; `None` for ordinary values
    pub fn parse(value: &'a Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let (key, inner) = obj.iter().next()?;
        match key.as_str() {
            REF => inner.as_str().map(Token::Ref),
            GET_ATT => {
                let parts = inner.as_array()?;
                match parts.as_slice() {
                    [id, attr] => Some(Token::GetAtt(id.as_str()?, attr.as_str()?)),
                    _ => None,
                }
            }
            RESOLVE => inner.as_str().map(Token::Resolve),
            _ => None,
        }
    }

    /// Logical id this token depends on, if any
    pub fn target(&self) -> Option<&'a str> {
        match self {
            Token::Ref(id) | Token::GetAtt(id, _) => Some(id),
            Token::Resolve(_) => None,
        }
    }
}

/// Every logical id referenced anywhere inside `value`
pub fn referenced_ids(value: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    collect_ids(value, &mut ids);
    ids
}

fn collect_ids(value: &Value, ids: &mut BTreeSet<String>) {
    if let Some(token) = Token::parse(value) {
        if let Some(id) = token.target() {
            ids.insert(id.to_string());
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, ids)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, ids)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        let r = reference("vpc");
        let a = arn("db-0");
        let l = lookup("ssm:/ami");

        assert_eq!(Token::parse(&r), Some(Token::Ref("vpc")));
        assert_eq!(Token::parse(&a), Some(Token::GetAtt("db-0", "Arn")));
        assert_eq!(Token::parse(&l), Some(Token::Resolve("ssm:/ami")));
        assert_eq!(Token::parse(&json!({"Ref": "a", "extra": 1})), None);
        assert_eq!(Token::parse(&json!("plain")), None);
    }

    #[test]
    fn test_referenced_ids_walks_nested_values() {
        let props = json!({
            "VpcId": reference("vpc"),
            "Targets": [{ "Id": reference("web-0") }, { "Id": reference("web-1") }],
            "ImageId": lookup("ssm:/ami"),
            "Resources": [arn("db-0")],
            "Port": 80,
        });

        let ids: Vec<String> = referenced_ids(&props).into_iter().collect();
        assert_eq!(ids, vec!["db-0", "vpc", "web-0", "web-1"]);
    }
}
