//! Mapper - Translate between typed resource structs and remote payloads
//!
//! A `ResourceKind` ties together the typed desired and observed structs of
//! one resource, its field table, and the pure `expand`/`flatten` transforms.
//! The default transforms copy every field under its `provider_name`; kinds
//! with nested remote shapes override them.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::provider::Payload;
use crate::resource::{Attributes, attributes_from_json, attributes_to_json, Value};
use crate::schema::{Comparison, ResourceSchema};

/// Whether a resource has settled after a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Still transitioning; carries the remote status for logging
    Pending(String),
    Failed(String),
}

/// A remote resource type with typed desired and observed state
pub trait ResourceKind: Sized + Send + Sync + 'static {
    /// Caller-supplied configuration
    type Desired: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;
    /// Remote state; every field must tolerate absence (`#[serde(default)]`)
    type Observed: Serialize
        + DeserializeOwned
        + Clone
        + fmt::Debug
        + PartialEq
        + Default
        + Send
        + Sync;

    /// Resource type name (e.g., "lightsail_instance")
    const TYPE_NAME: &'static str;

    /// Whether delete must wait until describe reports the object gone
    const WAIT_FOR_DELETION: bool = false;

    /// Field table
    fn schema() -> &'static ResourceSchema;

    /// Desired state -> request payload. Computed fields are never sent.
    fn expand(desired: &Self::Desired) -> Payload {
        expand_with_schema(Self::schema(), &desired_attributes::<Self>(desired))
    }

    /// Response payload -> observed state
    fn flatten(payload: &Payload) -> Self::Observed {
        from_attributes(&flatten_with_schema(Self::schema(), payload))
    }

    /// Readiness of an observed resource (default: ready as soon as it exists)
    fn readiness(_observed: &Self::Observed) -> Readiness {
        Readiness::Ready
    }
}

/// Serialize a typed struct into an attribute map
///
/// Panics if the type does not serialize to a JSON object with string keys,
/// which is a bug in the resource definition.
pub fn to_attributes<T: Serialize>(value: &T) -> Attributes {
    match serde_json::to_value(value) {
        Ok(json) => attributes_from_json(&json),
        Err(e) => panic!(
            "{} does not serialize to an attribute map: {}",
            std::any::type_name::<T>(),
            e
        ),
    }
}

/// Deserialize a typed struct from an attribute map
///
/// Panics on a shape mismatch, which is a bug in the resource definition.
pub fn from_attributes<T: DeserializeOwned>(attributes: &Attributes) -> T {
    match serde_json::from_value(attributes_to_json(attributes)) {
        Ok(value) => value,
        Err(e) => panic!(
            "attributes do not fit {}: {}",
            std::any::type_name::<T>(),
            e
        ),
    }
}

/// Caller attributes of a desired state with schema defaults applied
pub fn desired_attributes<K: ResourceKind>(desired: &K::Desired) -> Attributes {
    K::schema().with_defaults(&to_attributes(desired))
}

pub fn observed_attributes<K: ResourceKind>(observed: &K::Observed) -> Attributes {
    to_attributes(observed)
}

/// Copy every caller attribute into the payload under its provider name
pub fn expand_with_schema(schema: &ResourceSchema, attributes: &Attributes) -> Payload {
    let mut payload = serde_json::Map::new();
    for attr in schema.caller_attributes() {
        if let Some(provider_name) = &attr.provider_name
            && let Some(value) = attributes.get(&attr.name)
        {
            payload.insert(provider_name.clone(), value.to_json());
        }
    }
    Payload::Object(payload)
}

/// Read every attribute from the payload by its provider name
///
/// Values whose shape does not match the field table are dropped.
pub fn flatten_with_schema(schema: &ResourceSchema, payload: &Payload) -> Attributes {
    let mut attributes = Attributes::new();
    for attr in schema.attributes.values() {
        let Some(provider_name) = &attr.provider_name else {
            continue;
        };
        let Some(value) = payload.get(provider_name).and_then(Value::from_json) else {
            continue;
        };
        if attr.attr_type.matches_shape(&value) {
            attributes.insert(attr.name.clone(), value);
        } else {
            log::warn!(
                "{}: dropping {} from remote payload, expected {} but got {}",
                schema.resource_type,
                attr.name,
                attr.attr_type,
                value.type_name()
            );
        }
    }
    attributes
}

/// Carry write-only fields (`IgnoreOnUpdate`) the remote never returns from
/// `source` into an observed state
pub fn carry_write_only<K: ResourceKind>(source: &Attributes, observed: K::Observed) -> K::Observed {
    let schema = K::schema();
    let mut attributes = observed_attributes::<K>(&observed);
    let mut carried = false;
    for attr in schema.attributes.values() {
        if matches!(attr.comparison, Comparison::IgnoreOnUpdate)
            && !attributes.contains_key(&attr.name)
            && let Some(value) = source.get(&attr.name)
        {
            attributes.insert(attr.name.clone(), value.clone());
            carried = true;
        }
    }
    if carried {
        from_attributes(&attributes)
    } else {
        observed
    }
}
