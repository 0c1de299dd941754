//! docdb_global_cluster - DocumentDB global cluster

use std::sync::LazyLock;

use converge_core::mapper::{Readiness, ResourceKind, flatten_with_schema, from_attributes};
use converge_core::provider::Payload;
use converge_core::resource::Value;
use converge_core::schema::{
    AttributeSchema, AttributeType, Comparison, ResourceSchema, types, validate_length,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const AWS_TYPE_NAME: &str = "AWS::DocDB::GlobalCluster";

pub struct DocdbGlobalCluster;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalClusterConfig {
    pub global_cluster_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_protection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    /// ARN of an existing cluster to promote; never read back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_db_cluster_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_encrypted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalClusterMember {
    pub db_cluster_arn: String,
    pub is_writer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalClusterState {
    pub global_cluster_identifier: String,
    pub database_name: String,
    pub deletion_protection: bool,
    pub engine: String,
    pub engine_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_db_cluster_identifier: Option<String>,
    pub storage_encrypted: bool,
    pub arn: String,
    pub global_cluster_resource_id: String,
    pub global_cluster_members: Vec<GlobalClusterMember>,
    pub status: String,
}

/// 1-255 letters, digits or hyphens; starts with a letter; no trailing
/// hyphen and no two consecutive hyphens
fn validate_identifier(value: &Value) -> Result<(), String> {
    let Value::String(s) = value else {
        return Err("Expected string".to_string());
    };
    validate_length("global_cluster_identifier", s, 1, 255)?;
    if !s.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(format!("'{}' must begin with a letter", s));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!(
            "'{}' may only contain letters, digits and hyphens",
            s
        ));
    }
    if s.ends_with('-') || s.contains("--") {
        return Err(format!(
            "'{}' cannot end with a hyphen or contain two consecutive hyphens",
            s
        ));
    }
    Ok(())
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let member = AttributeType::Object(vec![
        AttributeSchema::new("db_cluster_arn", AttributeType::String),
        AttributeSchema::new("is_writer", AttributeType::Bool),
    ]);

    ResourceSchema::new("docdb_global_cluster")
        .with_description("DocumentDB global cluster spanning multiple regions")
        .attribute(
            AttributeSchema::new(
                "global_cluster_identifier",
                AttributeType::Custom {
                    name: "GlobalClusterIdentifier".to_string(),
                    base: Box::new(AttributeType::String),
                    validate: validate_identifier,
                },
            )
            .required()
            .force_replace()
            .with_provider_name("GlobalClusterIdentifier"),
        )
        .attribute(
            AttributeSchema::new("database_name", AttributeType::String)
                .force_replace()
                .with_provider_name("DatabaseName"),
        )
        .attribute(
            AttributeSchema::new("deletion_protection", AttributeType::Bool)
                .with_provider_name("DeletionProtection"),
        )
        .attribute(
            AttributeSchema::new("engine", AttributeType::Enum(vec!["docdb".to_string()]))
                .force_replace()
                .with_default(Value::from("docdb"))
                .with_provider_name("Engine"),
        )
        .attribute(
            AttributeSchema::new("engine_version", AttributeType::String)
                .with_provider_name("EngineVersion"),
        )
        .attribute(
            AttributeSchema::new("source_db_cluster_identifier", types::arn())
                .force_replace()
                .with_comparison(Comparison::IgnoreOnUpdate)
                .with_provider_name("SourceDBClusterIdentifier"),
        )
        .attribute(
            AttributeSchema::new("storage_encrypted", AttributeType::Bool)
                .force_replace()
                .with_provider_name("StorageEncrypted"),
        )
        .attribute(
            AttributeSchema::new("arn", AttributeType::String)
                .computed()
                .with_provider_name("GlobalClusterArn"),
        )
        .attribute(
            AttributeSchema::new("global_cluster_resource_id", AttributeType::String)
                .computed()
                .with_provider_name("GlobalClusterResourceId"),
        )
        .attribute(
            AttributeSchema::new(
                "global_cluster_members",
                AttributeType::List(Box::new(member)),
            )
            .computed()
            .with_provider_name("GlobalClusterMembers"),
        )
        .attribute(
            AttributeSchema::new("status", AttributeType::String)
                .computed()
                .with_provider_name("Status"),
        )
});

impl ResourceKind for DocdbGlobalCluster {
    type Desired = GlobalClusterConfig;
    type Observed = GlobalClusterState;

    const TYPE_NAME: &'static str = "docdb_global_cluster";
    const WAIT_FOR_DELETION: bool = true;

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn flatten(payload: &Payload) -> GlobalClusterState {
        let mut payload = payload.clone();
        if let Some(Payload::Array(members)) = payload.get("GlobalClusterMembers") {
            let members: Vec<Payload> = members
                .iter()
                .map(|m| {
                    json!({
                        "db_cluster_arn": m.get("DBClusterArn").cloned().unwrap_or_default(),
                        "is_writer": m.get("IsWriter").cloned().unwrap_or(Payload::Bool(false)),
                    })
                })
                .collect();
            payload["GlobalClusterMembers"] = Payload::Array(members);
        }
        from_attributes(&flatten_with_schema(&SCHEMA, &payload))
    }

    fn readiness(observed: &GlobalClusterState) -> Readiness {
        match observed.status.as_str() {
            "available" => Readiness::Ready,
            "failed" => Readiness::Failed(format!(
                "global cluster {} failed",
                observed.global_cluster_identifier
            )),
            status => Readiness::Pending(status.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use converge_core::drift::Drift;
    use converge_core::mapper::desired_attributes;
    use converge_core::plan::Action;
    use converge_core::provider::ProviderError;
    use converge_core::testing::{
        Call, MemoryRemote, check_destroyed, check_exists, check_not_recreated, disappear,
    };
    use converge_core::{Error, ReconcileRequest, Reconciler, ReconcilerConfig};

    use super::*;

    fn config(name: &str) -> GlobalClusterConfig {
        GlobalClusterConfig {
            global_cluster_identifier: name.to_string(),
            database_name: None,
            deletion_protection: None,
            engine: Some("docdb".to_string()),
            engine_version: None,
            source_db_cluster_identifier: None,
            storage_encrypted: None,
        }
    }

    fn remote() -> MemoryRemote {
        MemoryRemote::new()
            .with_identity_field("GlobalClusterIdentifier")
            .with_write_only(&["SourceDBClusterIdentifier"])
            .with_defaults(json!({
                "Status": "available",
                "EngineVersion": "4.0.0",
                "DeletionProtection": false,
                "StorageEncrypted": false,
                "GlobalClusterResourceId": "cluster-abc123",
                "GlobalClusterArn": "arn:aws:rds::123456789012:global-cluster:tf-acc-test"
            }))
    }

    #[test]
    fn identifier_rules() {
        let schema = DocdbGlobalCluster::schema();
        for bad in ["1abc", "abc-", "a--b", "a_b", ""] {
            let attrs = desired_attributes::<DocdbGlobalCluster>(&config(bad));
            assert!(schema.validate(&attrs).is_err(), "{} should be rejected", bad);
        }
        let attrs = desired_attributes::<DocdbGlobalCluster>(&config("tf-acc-test-1"));
        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn only_docdb_engine_is_accepted() {
        let mut desired = config("test");
        desired.engine = Some("aurora".to_string());
        let attrs = converge_core::mapper::to_attributes(&desired);
        assert!(DocdbGlobalCluster::schema().validate(&attrs).is_err());
    }

    #[test]
    fn flatten_members() {
        let observed = DocdbGlobalCluster::flatten(&json!({
            "GlobalClusterIdentifier": "test",
            "Status": "available",
            "GlobalClusterMembers": [
                {"DBClusterArn": "arn:aws:rds:us-east-1:123456789012:cluster:a", "IsWriter": true}
            ]
        }));
        assert_eq!(observed.global_cluster_members.len(), 1);
        assert!(observed.global_cluster_members[0].is_writer);
        assert_eq!(DocdbGlobalCluster::readiness(&observed), Readiness::Ready);
    }

    #[test]
    fn expand_omits_computed_fields() {
        let payload = DocdbGlobalCluster::expand(&config("test"));
        assert_eq!(
            payload,
            json!({"GlobalClusterIdentifier": "test", "Engine": "docdb"})
        );
    }

    #[tokio::test]
    async fn basic_lifecycle() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let desired = config("tf-acc-test");

        let created = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap();
        let state = created.state.unwrap();
        assert_eq!(state.identity.as_str(), "tf-acc-test");
        assert_eq!(state.observed.status, "available");
        assert_eq!(state.observed.database_name, "");
        assert!(!state.observed.deletion_protection);
        assert!(state.observed.global_cluster_resource_id.starts_with("cluster-"));
        check_exists(&remote, &state.identity).await.unwrap();

        let again = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(state.clone()), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(again.action, Action::NoOp);

        let deleted = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(state.clone()), None))
            .await
            .unwrap();
        assert_eq!(deleted.action, Action::Deleted);
        check_destroyed(&remote, &state.identity).await.unwrap();
    }

    #[tokio::test]
    async fn database_name_change_recreates() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let mut desired = config("test");
        desired.database_name = Some("database1".to_string());

        let first = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap()
            .state
            .unwrap();

        desired.database_name = Some("database2".to_string());
        let second = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(first.clone()), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Replaced);
        let second = second.state.unwrap();
        assert_eq!(second.observed.database_name, "database2");
        // Same identifier, new remote object
        assert_eq!(first.identity, second.identity);
    }

    #[tokio::test]
    async fn deletion_protection_updates_in_place() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let mut desired = config("test");
        desired.deletion_protection = Some(true);

        let first = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap()
            .state
            .unwrap();
        assert!(first.observed.deletion_protection);

        desired.deletion_protection = Some(false);
        let second = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(first.clone()), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Updated);
        let second = second.state.unwrap();
        check_not_recreated(&first, &second).unwrap();
        assert!(!second.observed.deletion_protection);
        assert_eq!(remote.update_requests(), vec![json!({"DeletionProtection": false})]);
    }

    #[tokio::test]
    async fn source_cluster_is_write_only() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let mut desired = config("test");
        desired.source_db_cluster_identifier =
            Some("arn:aws:rds:us-east-1:123456789012:cluster:source".to_string());

        let first = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap()
            .state
            .unwrap();
        assert_eq!(
            first.observed.source_db_cluster_identifier,
            desired.source_db_cluster_identifier
        );

        let second = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(first), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(second.action, Action::NoOp);
    }

    #[tokio::test]
    async fn disappears() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let desired = config("test");

        let state = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap()
            .state
            .unwrap();
        disappear(&remote, &state.identity).await.unwrap();

        let result = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(state.clone()), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(result.action, Action::Created);
        assert_eq!(result.drift, Some(Drift::Gone));
        // Recreated under the same identifier
        assert_eq!(result.state.unwrap().identity, state.identity);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_available_status() {
        let remote = remote();
        remote.script_describes([json!({"Status": "creating"}), json!({"Status": "creating"})]);
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());

        let state = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&config("test"))))
            .await
            .unwrap()
            .state
            .unwrap();
        assert_eq!(state.observed.status, "available");
    }

    #[tokio::test]
    async fn invalid_state_during_delete_is_a_conflict() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let state = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(None, Some(&config("test"))))
            .await
            .unwrap()
            .state
            .unwrap();

        remote.fail_next(
            Call::Delete,
            ProviderError::new("cluster is busy").with_code("InvalidGlobalClusterStateFault"),
        );
        let err = reconciler
            .reconcile::<DocdbGlobalCluster>(ReconcileRequest::new(Some(state), None))
            .await
            .unwrap_err();
        assert!(matches!(err.error, Error::Conflict { .. }));
        assert!(!err.mutated);
        check_exists(&remote, &"test".into()).await.unwrap();
    }
}
