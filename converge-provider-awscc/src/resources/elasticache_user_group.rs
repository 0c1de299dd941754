//! elasticache_user_group - ElastiCache user group

use std::collections::BTreeMap;
use std::sync::LazyLock;

use converge_core::mapper::{
    Readiness, ResourceKind, desired_attributes, expand_with_schema, flatten_with_schema,
    from_attributes,
};
use converge_core::provider::Payload;
use converge_core::resource::Value;
use converge_core::schema::{AttributeSchema, AttributeType, Comparison, ResourceSchema};
use serde::{Deserialize, Serialize};

use crate::utils::{expand_tags, flatten_tags};

pub const AWS_TYPE_NAME: &str = "AWS::ElastiCache::UserGroup";

pub struct ElasticacheUserGroup;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroupConfig {
    pub user_group_id: String,
    /// Accepted in any case (e.g., "REDIS")
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserGroupState {
    pub user_group_id: String,
    pub engine: String,
    pub user_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub arn: String,
    pub status: String,
}

fn lowercase(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other.clone(),
    }
}

/// User ids are a set
fn sorted(value: &Value) -> Value {
    match value {
        Value::List(items) => {
            let mut items = items.clone();
            items.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            items.dedup();
            Value::List(items)
        }
        other => other.clone(),
    }
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    ResourceSchema::new("elasticache_user_group")
        .with_description("Group of ElastiCache users for role-based access control")
        .attribute(
            AttributeSchema::new("user_group_id", AttributeType::String)
                .required()
                .force_replace()
                .with_provider_name("UserGroupId"),
        )
        .attribute(
            AttributeSchema::new(
                "engine",
                AttributeType::Custom {
                    name: "Engine".to_string(),
                    base: Box::new(AttributeType::String),
                    validate: |value| match value.as_str() {
                        Some(s) if s.eq_ignore_ascii_case("redis") => Ok(()),
                        Some(s) => Err(format!("Unsupported engine '{}', expected redis", s)),
                        None => Err("Expected string".to_string()),
                    },
                },
            )
            .required()
            .force_replace()
            .with_comparison(Comparison::Normalized(lowercase))
            .with_provider_name("Engine"),
        )
        .attribute(
            AttributeSchema::new("user_ids", AttributeType::List(Box::new(AttributeType::String)))
                .with_comparison(Comparison::Normalized(sorted))
                .with_provider_name("UserIds"),
        )
        .attribute(
            AttributeSchema::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
                .with_provider_name("Tags"),
        )
        .attribute(
            AttributeSchema::new("arn", AttributeType::String)
                .computed()
                .with_provider_name("Arn"),
        )
        .attribute(
            AttributeSchema::new("status", AttributeType::String)
                .computed()
                .with_provider_name("Status"),
        )
});

impl ResourceKind for ElasticacheUserGroup {
    type Desired = UserGroupConfig;
    type Observed = UserGroupState;

    const TYPE_NAME: &'static str = "elasticache_user_group";
    const WAIT_FOR_DELETION: bool = true;

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn expand(desired: &UserGroupConfig) -> Payload {
        let mut payload = expand_with_schema(&SCHEMA, &desired_attributes::<Self>(desired));
        payload["Engine"] = Payload::from(desired.engine.to_lowercase());
        expand_tags(&mut payload);
        payload
    }

    fn flatten(payload: &Payload) -> UserGroupState {
        from_attributes(&flatten_with_schema(&SCHEMA, &flatten_tags(payload)))
    }

    fn readiness(observed: &UserGroupState) -> Readiness {
        match observed.status.as_str() {
            "active" => Readiness::Ready,
            status => Readiness::Pending(status.to_string()),
        }
    }
}
