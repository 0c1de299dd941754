//! outposts_assets - Asset ids of an Outpost, optionally filtered by host and status
//!
//! Cloud Control publishes no `AWS::Outposts::Asset` type; against the real
//! service `ListResources` fails with `TypeNotFoundException`, which surfaces
//! as a remote failure. The listing shape below matches the Outposts
//! `ListAssets` output, so the kind works with any client that serves it
//! (the in-memory remote in tests does).

use std::sync::LazyLock;

use converge_core::data_source::{DataQuery, DataSourceKind};
use converge_core::provider::Payload;
use converge_core::resource::Value;
use converge_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types, validate_length};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::utils::nested;

pub const AWS_TYPE_NAME: &str = "AWS::Outposts::Asset";

pub struct OutpostsAssets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetsArgs {
    /// Outpost ARN
    pub arn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_id_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_id_filter: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assets {
    pub arn: String,
    pub host_id_filter: Vec<String>,
    pub status_id_filter: Vec<String>,
    pub asset_ids: Vec<String>,
}

fn validate_host_id(value: &Value) -> Result<(), String> {
    let Value::String(host_id) = value else {
        return Err("Expected string".to_string());
    };
    validate_length("host_id_filter", host_id, 1, 50)?;
    if !host_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("'{}' must match [a-zA-Z0-9-]", host_id));
    }
    Ok(())
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    ResourceSchema::new("outposts_assets")
        .with_description("Hardware assets installed in an Outpost")
        .attribute(AttributeSchema::new("arn", types::arn()).required())
        .attribute(AttributeSchema::new(
            "host_id_filter",
            AttributeType::List(Box::new(AttributeType::Custom {
                name: "HostId".to_string(),
                base: Box::new(AttributeType::String),
                validate: validate_host_id,
            })),
        ))
        .attribute(
            AttributeSchema::new(
                "status_id_filter",
                AttributeType::List(Box::new(AttributeType::Enum(vec![
                    "ACTIVE".to_string(),
                    "RETIRING".to_string(),
                ]))),
            )
            .with_max_items(2),
        )
        .attribute(
            AttributeSchema::new("asset_ids", AttributeType::List(Box::new(AttributeType::String)))
                .computed(),
        )
});

/// Whether `value` passes a filter; an empty filter passes everything
fn matches(filter: &[String], value: Option<&str>) -> bool {
    filter.is_empty() || value.is_some_and(|v| filter.iter().any(|f| f == v))
}

impl DataSourceKind for OutpostsAssets {
    type Args = AssetsArgs;
    type Output = Assets;

    const TYPE_NAME: &'static str = "outposts_assets";

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn query(args: &AssetsArgs) -> DataQuery {
        let mut query = json!({"OutpostIdentifier": args.arn});
        if !args.host_id_filter.is_empty() {
            query["HostIdFilter"] = json!(args.host_id_filter);
        }
        if !args.status_id_filter.is_empty() {
            query["StatusFilter"] = json!(args.status_id_filter);
        }
        DataQuery::List(query)
    }

    /// The listing may ignore the filters, so they are applied again here
    fn flatten(args: &AssetsArgs, results: &[Payload]) -> Assets {
        let asset_ids = results
            .iter()
            .filter(|asset| {
                matches(
                    &args.host_id_filter,
                    nested(asset, &["ComputeAttributes", "HostId"]).and_then(Payload::as_str),
                ) && matches(
                    &args.status_id_filter,
                    nested(asset, &["ComputeAttributes", "State"]).and_then(Payload::as_str),
                )
            })
            .filter_map(|asset| asset.get("AssetId").and_then(Payload::as_str))
            .map(str::to_string)
            .collect();

        Assets {
            arn: args.arn.clone(),
            host_id_filter: args.host_id_filter.clone(),
            status_id_filter: args.status_id_filter.clone(),
            asset_ids,
        }
    }
}
