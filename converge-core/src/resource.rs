//! Resource - Representing attribute values, identities and observed state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a managed resource in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type (e.g., "lightsail_instance")
    pub resource_type: String,
    /// Resource name (binding in the manifest)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = String;

    /// Parse the `type.name` address printed by `Display`
    fn from_str(address: &str) -> Result<Self, Self::Err> {
        match address.split_once('.') {
            Some((resource_type, name)) if !resource_type.is_empty() && !name.is_empty() => {
                Ok(Self::new(resource_type, name))
            }
            _ => Err(format!(
                "invalid resource address '{}', expected <type>.<name>",
                address
            )),
        }
    }
}

/// Identifier assigned by the remote system when a resource is created
///
/// Once assigned it never changes for the lifetime of the remote object.
/// A different identity means the old object was destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Attribute map keyed by schema attribute name
pub type Attributes = BTreeMap<String, Value>;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value. `null` has no counterpart and yields `None`;
    /// nulls inside lists and maps are dropped.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => n.as_f64().map(Value::Float),
            },
            serde_json::Value::Array(items) => {
                Some(Value::List(items.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Value::Map(
                map.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Convert a JSON object into an attribute map. Non-object input yields an
/// empty map.
pub fn attributes_from_json(value: &serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => Attributes::new(),
    }
}

pub fn attributes_to_json(attributes: &Attributes) -> serde_json::Value {
    serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Observed state of a resource that exists remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState<O> {
    /// Identifier assigned by the remote system
    pub identity: ResourceIdentity,
    /// Last-known attribute values
    pub observed: O,
}

impl<O> ObservedState<O> {
    pub fn new(identity: impl Into<ResourceIdentity>, observed: O) -> Self {
        Self {
            identity: identity.into(),
            observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_parses_back_into_id() {
        let id: ResourceId = "lightsail_instance.web".parse().unwrap();
        assert_eq!(id, ResourceId::new("lightsail_instance", "web"));
        assert_eq!(id.to_string(), "lightsail_instance.web");

        assert!("lightsail_instance".parse::<ResourceId>().is_err());
        assert!(".web".parse::<ResourceId>().is_err());
    }

    #[test]
    fn json_numbers_keep_int_and_float_apart() {
        assert_eq!(Value::from_json(&json!(4)), Some(Value::Int(4)));
        assert_eq!(Value::from_json(&json!(0.5)), Some(Value::Float(0.5)));
    }

    #[test]
    fn json_null_is_dropped() {
        assert_eq!(Value::from_json(&json!(null)), None);

        let attrs = attributes_from_json(&json!({"a": null, "b": [1, null], "c": "x"}));
        assert!(!attrs.contains_key("a"));
        assert_eq!(attrs["b"], Value::List(vec![Value::Int(1)]));
        assert_eq!(attrs["c"], Value::String("x".to_string()));
    }

    #[test]
    fn attributes_json_conversion_preserves_nesting() {
        let original = json!({
            "name": "web",
            "rules": [{"days": 30, "enabled": true}],
            "tags": {"env": "prod"}
        });
        let attrs = attributes_from_json(&original);
        assert_eq!(attributes_to_json(&attrs), original);
    }

    #[test]
    fn resource_id_display() {
        let id = ResourceId::new("lightsail_instance", "web");
        assert_eq!(id.to_string(), "lightsail_instance.web");
    }

    #[test]
    fn value_display() {
        let value = Value::List(vec![Value::from("a"), Value::Int(2)]);
        assert_eq!(value.to_string(), "[\"a\", 2]");
    }
}
