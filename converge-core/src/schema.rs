//! Schema - Declarative field tables for resources
//!
//! Each resource kind declares its fields once: type, mode (required,
//! optional, computed), whether a change forces replacement, how values are
//! compared, and the provider-side property name used by the field mapper.

use std::collections::BTreeMap;
use std::fmt;

use crate::resource::{Attributes, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Floating point number (integers are accepted)
    Float,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block with its own field table
    Object(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Float, Value::Float(_) | Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(fields), Value::Map(map)) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) => field.validate_value(v)?,
                        None if field.mode == AttributeMode::Required => {
                            return Err(TypeError::MissingRequired {
                                name: field.name.clone(),
                            });
                        }
                        None => {}
                    }
                }
                if let Some(unknown) = map
                    .keys()
                    .find(|k| !fields.iter().any(|f| &f.name == *k))
                {
                    return Err(TypeError::UnknownAttribute {
                        name: unknown.clone(),
                    });
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    /// Structural check used when reading remote values: enum variants and
    /// custom validators are not applied.
    pub fn matches_shape(&self, value: &Value) -> bool {
        match (self, value) {
            (AttributeType::String | AttributeType::Enum(_), Value::String(_)) => true,
            (AttributeType::Int, Value::Int(_)) => true,
            (AttributeType::Float, Value::Float(_) | Value::Int(_)) => true,
            (AttributeType::Bool, Value::Bool(_)) => true,
            (AttributeType::Custom { base, .. }, v) => base.matches_shape(v),
            (AttributeType::List(inner), Value::List(items)) => {
                items.iter().all(|item| inner.matches_shape(item))
            }
            (AttributeType::Map(inner), Value::Map(map)) => {
                map.values().all(|v| inner.matches_shape(v))
            }
            (AttributeType::Object(fields), Value::Map(map)) => map.iter().all(|(k, v)| {
                fields
                    .iter()
                    .find(|f| &f.name == k)
                    .is_some_and(|f| f.attr_type.matches_shape(v))
            }),
            _ => false,
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Float => "Float".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(_) => "Object".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}' is computed by the remote system and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' allows at most {max} items, got {got}")]
    TooManyItems { name: String, max: usize, got: usize },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },
}

/// Who supplies an attribute's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    Required,
    Optional,
    /// Assigned by the remote system, never supplied by the caller
    Computed,
}

/// How desired and observed values of an attribute are compared
#[derive(Debug, Clone, Copy)]
pub enum Comparison {
    /// Values must be equal
    Exact,
    /// Values are equal when their normalized forms are equal
    Normalized(fn(&Value) -> Value),
    /// Write-only: sent on create and never returned by the remote; a change
    /// is detected against the carried value and only triggers a replace
    /// when the field forces one
    IgnoreOnUpdate,
}

impl Comparison {
    /// Whether two values are equivalent under this policy
    pub fn equivalent(&self, a: &Value, b: &Value) -> bool {
        match self {
            Comparison::Exact | Comparison::IgnoreOnUpdate => a == b,
            Comparison::Normalized(normalize) => normalize(a) == normalize(b),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub mode: AttributeMode,
    /// Any change requires destroy and recreate
    pub force_replace: bool,
    pub comparison: Comparison,
    pub default: Option<Value>,
    pub max_items: Option<usize>,
    pub description: Option<String>,
    /// Provider-side property name (e.g., "BundleId")
    pub provider_name: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            mode: AttributeMode::Optional,
            force_replace: false,
            comparison: Comparison::Exact,
            default: None,
            max_items: None,
            description: None,
            provider_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = AttributeMode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = AttributeMode::Computed;
        self
    }

    pub fn force_replace(mut self) -> Self {
        self.force_replace = true;
        self
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn is_computed(&self) -> bool {
        self.mode == AttributeMode::Computed
    }

    fn validate_value(&self, value: &Value) -> Result<(), TypeError> {
        if let (Some(max), Value::List(items)) = (self.max_items, value)
            && items.len() > max
        {
            return Err(TypeError::TooManyItems {
                name: self.name.clone(),
                max,
                got: items.len(),
            });
        }
        self.attr_type
            .validate(value)
            .map_err(|e| TypeError::AttributeError {
                name: self.name.clone(),
                inner: Box::new(e),
            })
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Attributes a caller may supply
    pub fn caller_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.values().filter(|a| !a.is_computed())
    }

    /// Fill in schema defaults for attributes the caller left out
    pub fn with_defaults(&self, attributes: &Attributes) -> Attributes {
        let mut out = attributes.clone();
        for schema in self.caller_attributes() {
            if let Some(default) = &schema.default {
                out.entry(schema.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        out
    }

    /// Validate caller-supplied attributes
    pub fn validate(&self, attributes: &Attributes) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.mode == AttributeMode::Required
                && !attributes.contains_key(name)
                && schema.default.is_none()
            {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            match self.attributes.get(name) {
                Some(schema) if schema.is_computed() => {
                    errors.push(TypeError::ComputedAttribute { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.validate_value(value) {
                        errors.push(e);
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n > 0 => Ok(()),
                _ => Err("Value must be positive".to_string()),
            },
        }
    }

    /// ARN string type (e.g., "arn:aws:outposts:us-west-2:123456789012:outpost/op-1")
    pub fn arn() -> AttributeType {
        AttributeType::Custom {
            name: "Arn".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => validate_arn(s),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// String holding a JSON document
    pub fn json() -> AttributeType {
        AttributeType::Custom {
            name: "Json".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                    .map(|_| ())
                    .map_err(|e| format!("Invalid JSON: {}", e)),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Normalizer for JSON document strings: key order and whitespace are
    /// not significant. Invalid JSON is returned unchanged.
    pub fn normalize_json(value: &Value) -> Value {
        match value {
            Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(doc) => Value::String(canonical_json(&doc)),
                Err(_) => value.clone(),
            },
            other => other.clone(),
        }
    }

    fn canonical_json(doc: &serde_json::Value) -> String {
        match doc {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let body: Vec<String> = entries
                    .into_iter()
                    .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(v)))
                    .collect();
                format!("{{{}}}", body.join(","))
            }
            serde_json::Value::Array(items) => {
                let body: Vec<String> = items.iter().map(canonical_json).collect();
                format!("[{}]", body.join(","))
            }
            other => other.to_string(),
        }
    }
}

/// Validate ARN format: `arn:partition:service:region:account:resource`
pub fn validate_arn(arn: &str) -> Result<(), String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(format!(
            "Invalid ARN '{}': expected arn:partition:service:region:account:resource",
            arn
        ));
    }
    if parts[1].is_empty() || parts[2].is_empty() || parts[5].is_empty() {
        return Err(format!(
            "Invalid ARN '{}': partition, service and resource must not be empty",
            arn
        ));
    }
    if !parts[4].is_empty() && !parts[4].chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid ARN '{}': account must be numeric", arn));
    }
    Ok(())
}

/// Validate that a string length is within `min..=max` characters
pub fn validate_length(field: &str, s: &str, min: usize, max: usize) -> Result<(), String> {
    let len = s.chars().count();
    if len < min || len > max {
        return Err(format!(
            "{} must be between {} and {} characters, got {}",
            field, min, max, len
        ));
    }
    Ok(())
}
