//! lightsail_instance - Lightsail virtual server
//!
//! The remote shape nests several properties (`Hardware`, `State`, the
//! auto-snapshot request inside `AddOns`), so both transforms are written by
//! hand on top of the schema-driven mapping.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use converge_core::mapper::{
    Readiness, ResourceKind, desired_attributes, expand_with_schema, flatten_with_schema,
    from_attributes,
};
use converge_core::provider::Payload;
use converge_core::resource::Value;
use converge_core::schema::{
    AttributeSchema, AttributeType, Comparison, ResourceSchema, validate_length,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::utils::{expand_tags, flatten_tags, nested};

pub const AWS_TYPE_NAME: &str = "AWS::Lightsail::Instance";

/// Key pair Lightsail assigns when none is given
const DEFAULT_KEY_PAIR: &str = "LightsailDefaultKeyPair";

pub struct LightsailInstance;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddOn {
    #[serde(rename = "type")]
    pub add_on_type: String,
    /// "HH:00" in UTC
    pub snapshot_time: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub availability_zone: String,
    pub blueprint_id: String,
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_on: Option<Vec<AddOn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceState {
    pub name: String,
    pub availability_zone: String,
    pub blueprint_id: String,
    pub bundle_id: String,
    pub key_pair_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    pub ip_address_type: String,
    pub add_on: Vec<AddOn>,
    pub tags: BTreeMap<String, String>,
    pub arn: String,
    pub created_at: String,
    pub cpu_count: i64,
    pub ram_size: f64,
    pub ipv6_addresses: Vec<String>,
    pub is_static_ip: bool,
    pub private_ip_address: String,
    pub public_ip_address: String,
    pub username: String,
    /// Instance state name (e.g., "pending", "running")
    pub state: String,
}

fn validate_name(value: &Value) -> Result<(), String> {
    let Value::String(name) = value else {
        return Err("Expected string".to_string());
    };
    validate_length("name", name, 2, 255)?;
    let first = Regex::new(r"^[a-zA-Z0-9]").map_err(|e| e.to_string())?;
    if !first.is_match(name) {
        return Err(format!("'{}' must begin with an alphanumeric character", name));
    }
    let body = Regex::new(r"^[a-zA-Z0-9_\-.]+[^._\-]$").map_err(|e| e.to_string())?;
    if !body.is_match(name) {
        return Err(format!(
            "'{}' must contain only alphanumeric characters, underscores, hyphens, and dots",
            name
        ));
    }
    Ok(())
}

fn validate_snapshot_time(value: &Value) -> Result<(), String> {
    let Value::String(time) = value else {
        return Err("Expected string".to_string());
    };
    let re = Regex::new(r"^(0[0-9]|1[0-9]|2[0-3]):[0-5][0-9]$").map_err(|e| e.to_string())?;
    if re.is_match(time) {
        Ok(())
    } else {
        Err(format!(
            "'{}' must be in HH:00 format, and in Coordinated Universal Time (UTC)",
            time
        ))
    }
}

fn default_key_pair(value: &Value) -> Value {
    match value {
        Value::String(s) if s == DEFAULT_KEY_PAIR => Value::String(String::new()),
        other => other.clone(),
    }
}

fn strings(variants: &[&str]) -> Vec<String> {
    variants.iter().map(|v| v.to_string()).collect()
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let add_on = AttributeType::Object(vec![
        AttributeSchema::new("type", AttributeType::Enum(strings(&["AutoSnapshot"]))).required(),
        AttributeSchema::new(
            "snapshot_time",
            AttributeType::Custom {
                name: "SnapshotTime".to_string(),
                base: Box::new(AttributeType::String),
                validate: validate_snapshot_time,
            },
        )
        .required(),
        AttributeSchema::new("status", AttributeType::Enum(strings(&["Enabled", "Disabled"])))
            .required(),
    ]);
    let computed_string = |name: &str, provider_name: &str| {
        AttributeSchema::new(name, AttributeType::String)
            .computed()
            .with_provider_name(provider_name)
    };

    ResourceSchema::new("lightsail_instance")
        .with_description("Lightsail virtual private server")
        .attribute(
            AttributeSchema::new(
                "name",
                AttributeType::Custom {
                    name: "InstanceName".to_string(),
                    base: Box::new(AttributeType::String),
                    validate: validate_name,
                },
            )
            .required()
            .force_replace()
            .with_provider_name("InstanceName"),
        )
        .attribute(
            AttributeSchema::new("availability_zone", AttributeType::String)
                .required()
                .force_replace()
                .with_provider_name("AvailabilityZone"),
        )
        .attribute(
            AttributeSchema::new("blueprint_id", AttributeType::String)
                .required()
                .force_replace()
                .with_provider_name("BlueprintId"),
        )
        .attribute(
            AttributeSchema::new("bundle_id", AttributeType::String)
                .required()
                .force_replace()
                .with_provider_name("BundleId"),
        )
        .attribute(
            AttributeSchema::new("key_pair_name", AttributeType::String)
                .force_replace()
                .with_comparison(Comparison::Normalized(default_key_pair))
                .with_provider_name("KeyPairName"),
        )
        .attribute(
            AttributeSchema::new("user_data", AttributeType::String)
                .force_replace()
                .with_comparison(Comparison::IgnoreOnUpdate)
                .with_provider_name("UserData"),
        )
        .attribute(
            AttributeSchema::new(
                "ip_address_type",
                AttributeType::Enum(strings(&["dualstack", "ipv4"])),
            )
            .with_default(Value::from("dualstack"))
            .with_provider_name("IpAddressType"),
        )
        .attribute(
            AttributeSchema::new("add_on", AttributeType::List(Box::new(add_on)))
                .with_max_items(1)
                .with_provider_name("AddOns"),
        )
        .attribute(
            AttributeSchema::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
                .with_provider_name("Tags"),
        )
        .attribute(computed_string("arn", "InstanceArn"))
        .attribute(computed_string("created_at", "CreatedAt"))
        .attribute(AttributeSchema::new("cpu_count", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("ram_size", AttributeType::Float).computed())
        .attribute(
            AttributeSchema::new(
                "ipv6_addresses",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .computed()
            .with_provider_name("Ipv6Addresses"),
        )
        .attribute(
            AttributeSchema::new("is_static_ip", AttributeType::Bool)
                .computed()
                .with_provider_name("IsStaticIp"),
        )
        .attribute(computed_string("private_ip_address", "PrivateIpAddress"))
        .attribute(computed_string("public_ip_address", "PublicIpAddress"))
        .attribute(computed_string("username", "UserName"))
        .attribute(AttributeSchema::new("state", AttributeType::String).computed())
});

/// Computed attributes read from nested response properties
const NESTED: &[(&str, &[&str])] = &[
    ("cpu_count", &["Hardware", "CpuCount"]),
    ("ram_size", &["Hardware", "RamSizeInGb"]),
    ("state", &["State", "Name"]),
];

impl ResourceKind for LightsailInstance {
    type Desired = InstanceConfig;
    type Observed = InstanceState;

    const TYPE_NAME: &'static str = "lightsail_instance";

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn expand(desired: &InstanceConfig) -> Payload {
        let mut payload = expand_with_schema(&SCHEMA, &desired_attributes::<Self>(desired));
        if let Some(add_ons) = &desired.add_on {
            payload["AddOns"] = add_ons
                .iter()
                .map(|a| {
                    json!({
                        "AddOnType": a.add_on_type,
                        "AutoSnapshotAddOnRequest": {"SnapshotTimeOfDay": a.snapshot_time},
                        "Status": a.status,
                    })
                })
                .collect();
        }
        expand_tags(&mut payload);
        payload
    }

    fn flatten(payload: &Payload) -> InstanceState {
        let mut payload = flatten_tags(payload);
        if let Some(Payload::Array(add_ons)) = payload.get("AddOns") {
            let add_ons: Vec<Payload> = add_ons
                .iter()
                .map(|a| {
                    json!({
                        "type": a.get("AddOnType"),
                        "snapshot_time": nested(a, &["AutoSnapshotAddOnRequest", "SnapshotTimeOfDay"]),
                        "status": a.get("Status"),
                    })
                })
                .collect();
            payload["AddOns"] = Payload::Array(add_ons);
        }

        let mut attributes = flatten_with_schema(&SCHEMA, &payload);
        for (name, path) in NESTED {
            let Some(value) = nested(&payload, path).and_then(Value::from_json) else {
                continue;
            };
            if SCHEMA
                .get(name)
                .is_some_and(|attr| attr.attr_type.matches_shape(&value))
            {
                attributes.insert(name.to_string(), value);
            }
        }
        from_attributes(&attributes)
    }

    fn readiness(observed: &InstanceState) -> Readiness {
        match observed.state.as_str() {
            "running" => Readiness::Ready,
            "terminated" => Readiness::Failed(format!("instance {} was terminated", observed.name)),
            state => Readiness::Pending(state.to_string()),
        }
    }
}
