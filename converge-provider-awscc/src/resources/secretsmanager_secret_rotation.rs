//! secretsmanager_secret_rotation - Rotation settings of an existing secret

use std::sync::LazyLock;

use converge_core::data_source::{DataQuery, DataSourceKind};
use converge_core::provider::Payload;
use converge_core::resource::{ResourceIdentity, Value};
use converge_core::schema::{AttributeSchema, AttributeType, ResourceSchema, validate_length};
use serde::{Deserialize, Serialize};

pub const AWS_TYPE_NAME: &str = "AWS::SecretsManager::RotationSchedule";

pub struct SecretsmanagerSecretRotation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRotationArgs {
    /// Secret name or ARN
    pub secret_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationRules {
    pub automatically_after_days: i64,
    pub duration: String,
    pub schedule_expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRotation {
    pub secret_id: String,
    /// ARN of the secret
    pub id: String,
    pub rotation_enabled: bool,
    pub rotation_lambda_arn: String,
    /// Zero or one element
    pub rotation_rules: Vec<RotationRules>,
}

static SCHEMA: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let rules = AttributeType::Object(vec![
        AttributeSchema::new("automatically_after_days", AttributeType::Int),
        AttributeSchema::new("duration", AttributeType::String),
        AttributeSchema::new("schedule_expression", AttributeType::String),
    ]);

    ResourceSchema::new("secretsmanager_secret_rotation")
        .attribute(
            AttributeSchema::new(
                "secret_id",
                AttributeType::Custom {
                    name: "SecretId".to_string(),
                    base: Box::new(AttributeType::String),
                    validate: |value| match value {
                        Value::String(s) => validate_length("secret_id", s, 1, 2048),
                        _ => Err("Expected string".to_string()),
                    },
                },
            )
            .required(),
        )
        .attribute(AttributeSchema::new("id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("rotation_enabled", AttributeType::Bool).computed())
        .attribute(AttributeSchema::new("rotation_lambda_arn", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("rotation_rules", AttributeType::List(Box::new(rules))).computed(),
        )
});

fn flatten_rules(rules: &Payload) -> RotationRules {
    let text = |key: &str| {
        rules
            .get(key)
            .and_then(Payload::as_str)
            .unwrap_or_default()
            .to_string()
    };
    RotationRules {
        automatically_after_days: rules
            .get("AutomaticallyAfterDays")
            .and_then(Payload::as_i64)
            .unwrap_or_default(),
        duration: text("Duration"),
        schedule_expression: text("ScheduleExpression"),
    }
}

impl DataSourceKind for SecretsmanagerSecretRotation {
    type Args = SecretRotationArgs;
    type Output = SecretRotation;

    const TYPE_NAME: &'static str = "secretsmanager_secret_rotation";

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn query(args: &SecretRotationArgs) -> DataQuery {
        DataQuery::Describe(ResourceIdentity::new(&args.secret_id))
    }

    fn flatten(args: &SecretRotationArgs, results: &[Payload]) -> SecretRotation {
        let secret = results.first().cloned().unwrap_or_default();
        let rotation_lambda_arn = secret
            .get("RotationLambdaARN")
            .and_then(Payload::as_str)
            .unwrap_or_default()
            .to_string();
        let rotation_rules: Vec<RotationRules> = secret
            .get("RotationRules")
            .filter(|r| r.is_object())
            .map(flatten_rules)
            .into_iter()
            .collect();
        // Schedules without an explicit flag are enabled by being configured
        let rotation_enabled = secret
            .get("RotationEnabled")
            .and_then(Payload::as_bool)
            .unwrap_or(!rotation_lambda_arn.is_empty() || !rotation_rules.is_empty());

        SecretRotation {
            secret_id: args.secret_id.clone(),
            id: secret
                .get("SecretId")
                .and_then(Payload::as_str)
                .unwrap_or(&args.secret_id)
                .to_string(),
            rotation_enabled,
            rotation_lambda_arn,
            rotation_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use converge_core::data_source::read_data_source;
    use converge_core::testing::MemoryRemote;
    use serde_json::json;

    use super::*;

    const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:db-AbCdEf";

    fn args(secret_id: &str) -> SecretRotationArgs {
        SecretRotationArgs {
            secret_id: secret_id.to_string(),
        }
    }

    #[tokio::test]
    async fn rotation_enabled() {
        let remote = MemoryRemote::new();
        remote.insert(
            SECRET_ARN,
            json!({
                "SecretId": SECRET_ARN,
                "RotationEnabled": true,
                "RotationLambdaARN": "arn:aws:lambda:us-east-1:123456789012:function:rotate",
                "RotationRules": {"AutomaticallyAfterDays": 7}
            }),
        );

        let output = read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args(SECRET_ARN))
            .await
            .unwrap();
        assert!(output.rotation_enabled);
        assert_eq!(output.id, SECRET_ARN);
        assert_eq!(
            output.rotation_lambda_arn,
            "arn:aws:lambda:us-east-1:123456789012:function:rotate"
        );
        assert_eq!(output.rotation_rules.len(), 1);
        assert_eq!(output.rotation_rules[0].automatically_after_days, 7);
        assert_eq!(output.rotation_rules[0].schedule_expression, "");
    }

    #[tokio::test]
    async fn rotation_not_configured() {
        let remote = MemoryRemote::new();
        remote.insert("db", json!({"SecretId": SECRET_ARN}));

        let output = read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args("db"))
            .await
            .unwrap();
        assert!(!output.rotation_enabled);
        assert!(output.rotation_rules.is_empty());
        assert_eq!(output.id, SECRET_ARN);
    }

    #[tokio::test]
    async fn schedule_expression_rules() {
        let remote = MemoryRemote::new();
        remote.insert(
            "db",
            json!({
                "RotationRules": {"ScheduleExpression": "rate(4 hours)", "Duration": "2h"}
            }),
        );

        let output = read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args("db"))
            .await
            .unwrap();
        assert!(output.rotation_enabled);
        assert_eq!(output.rotation_rules[0].schedule_expression, "rate(4 hours)");
        assert_eq!(output.rotation_rules[0].duration, "2h");
    }

    #[tokio::test]
    async fn missing_secret_is_an_error() {
        let remote = MemoryRemote::new();
        let err = read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn secret_id_length_is_validated() {
        let remote = MemoryRemote::new();
        assert!(
            read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args(""))
                .await
                .is_err()
        );
        let long = "a".repeat(2049);
        assert!(
            read_data_source::<SecretsmanagerSecretRotation, _>(&remote, &args(&long))
                .await
                .is_err()
        );
        assert!(remote.calls().is_empty());
    }
}
