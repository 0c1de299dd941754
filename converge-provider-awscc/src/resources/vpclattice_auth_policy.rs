//! vpclattice_auth_policy - Auth policy attached to a VPC Lattice service or service network

use std::sync::LazyLock;

use converge_core::mapper::{
    ResourceKind, desired_attributes, expand_with_schema, flatten_with_schema, from_attributes,
};
use converge_core::provider::Payload;
use converge_core::schema::{AttributeSchema, AttributeType, Comparison, ResourceSchema, types};
use serde::{Deserialize, Serialize};

pub const AWS_TYPE_NAME: &str = "AWS::VpcLattice::AuthPolicy";

pub struct VpclatticeAuthPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPolicyConfig {
    /// ARN of the service or service network
    pub resource_identifier: String,
    /// IAM policy document as a JSON string
    pub policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPolicyState {
    pub resource_identifier: String,
    pub policy: String,
    /// "Active" or "Inactive"
    pub state: String,
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    ResourceSchema::new("vpclattice_auth_policy")
        .with_description("IAM resource policy controlling access to a VPC Lattice target")
        .attribute(
            AttributeSchema::new("resource_identifier", types::arn())
                .required()
                .force_replace()
                .with_provider_name("ResourceIdentifier"),
        )
        .attribute(
            AttributeSchema::new("policy", types::json())
                .required()
                .with_comparison(Comparison::Normalized(types::normalize_json))
                .with_provider_name("Policy"),
        )
        .attribute(AttributeSchema::new("state", AttributeType::String).with_provider_name("State"))
});

impl ResourceKind for VpclatticeAuthPolicy {
    type Desired = AuthPolicyConfig;
    type Observed = AuthPolicyState;

    const TYPE_NAME: &'static str = "vpclattice_auth_policy";

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    /// The remote takes the policy as a document, not a string
    fn expand(desired: &AuthPolicyConfig) -> Payload {
        let mut payload = expand_with_schema(&SCHEMA, &desired_attributes::<Self>(desired));
        if let Ok(document) = serde_json::from_str::<Payload>(&desired.policy) {
            payload["Policy"] = document;
        }
        payload
    }

    fn flatten(payload: &Payload) -> AuthPolicyState {
        let mut payload = payload.clone();
        let document = payload
            .get("Policy")
            .filter(|p| !p.is_string())
            .map(|p| p.to_string());
        if let Some(text) = document {
            payload["Policy"] = Payload::String(text);
        }
        from_attributes(&flatten_with_schema(&SCHEMA, &payload))
    }
}

#[cfg(test)]
mod tests {
    use converge_core::drift::{Drift, DriftDetector};
    use converge_core::plan::Action;
    use converge_core::reconciler::validate;
    use converge_core::testing::{MemoryRemote, check_destroyed, check_exists, disappear};
    use converge_core::{ReconcileRequest, Reconciler, ReconcilerConfig};
    use serde_json::json;

    use super::*;

    const SERVICE_ARN: &str =
        "arn:aws:vpc-lattice:us-west-2:123456789012:service/svc-0123456789abcdef0";

    fn config(policy: &str) -> AuthPolicyConfig {
        AuthPolicyConfig {
            resource_identifier: SERVICE_ARN.to_string(),
            policy: policy.to_string(),
            state: None,
        }
    }

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": "*",
            "Action": "*",
            "Resource": "*",
            "Condition": {"StringNotEqualsIgnoreCase": {"aws:PrincipalType": "anonymous"}}
        }]
    }"#;

    fn remote() -> MemoryRemote {
        MemoryRemote::new()
            .with_identity_field("ResourceIdentifier")
            .with_defaults(json!({"State": "Active"}))
    }

    #[test]
    fn validation() {
        assert!(validate::<VpclatticeAuthPolicy>(&config(POLICY)).is_ok());
        assert!(validate::<VpclatticeAuthPolicy>(&config("{not json")).is_err());

        let mut desired = config(POLICY);
        desired.resource_identifier = "svc-0123456789abcdef0".to_string();
        assert!(validate::<VpclatticeAuthPolicy>(&desired).is_err());
    }

    #[test]
    fn expand_sends_policy_document() {
        let payload = VpclatticeAuthPolicy::expand(&config(r#"{"Version": "2012-10-17"}"#));
        assert_eq!(
            payload,
            json!({"ResourceIdentifier": SERVICE_ARN, "Policy": {"Version": "2012-10-17"}})
        );
    }

    #[tokio::test]
    async fn basic() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let desired = config(POLICY);

        let state = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(None, Some(&desired)))
            .await
            .unwrap()
            .state
            .unwrap();
        assert_eq!(state.identity.as_str(), SERVICE_ARN);
        assert_eq!(state.observed.state, "Active");
        let described = check_exists(&remote, &state.identity).await.unwrap();
        assert!(described["Policy"].is_object());

        // Whitespace and key order in the stored document differ from the input
        let again = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(Some(state.clone()), Some(&desired)))
            .await
            .unwrap();
        assert_eq!(again.action, Action::NoOp);

        reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(Some(state.clone()), None))
            .await
            .unwrap();
        check_destroyed(&remote, &state.identity).await.unwrap();
    }

    #[tokio::test]
    async fn policy_change_updates_in_place() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());

        let first = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(None, Some(&config(POLICY))))
            .await
            .unwrap()
            .state
            .unwrap();

        let deny = r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Deny", "Principal": "*", "Action": "*", "Resource": "*"}]}"#;
        let second = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(Some(first), Some(&config(deny))))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Updated);
        let requests = remote.update_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["Policy"]["Statement"][0]["Effect"], "Deny");
    }

    #[tokio::test]
    async fn disappears() {
        let remote = remote();
        let reconciler = Reconciler::new(&remote, ReconcilerConfig::default());
        let state = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(None, Some(&config(POLICY))))
            .await
            .unwrap()
            .state
            .unwrap();

        disappear(&remote, &state.identity).await.unwrap();
        let refreshed = DriftDetector::new(&remote)
            .detect::<VpclatticeAuthPolicy>(&state)
            .await
            .unwrap();
        assert_eq!(refreshed.drift, Drift::Gone);

        // Deleting the vanished policy succeeds without error
        let deleted = reconciler
            .reconcile::<VpclatticeAuthPolicy>(ReconcileRequest::new(Some(state), None))
            .await
            .unwrap();
        assert_eq!(deleted.action, Action::NoOp);
    }
}
