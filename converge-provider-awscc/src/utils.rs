//! Utility functions for payload conversion

use serde_json::{Map, Value, json};

/// Normalize region value (e.g., "aws.Region.ap_northeast_1" -> "ap-northeast-1")
pub fn normalize_region(s: &str) -> String {
    let region_part = if s.contains('.') {
        s.split('.').next_back().unwrap_or(s)
    } else {
        s
    };
    region_part.replace('_', "-")
}

/// Convert a tag map into CloudFormation format (`[{"Key": .., "Value": ..}]`)
pub fn build_tags(tags: &Map<String, Value>) -> Vec<Value> {
    tags.iter()
        .filter_map(|(key, value)| value.as_str().map(|v| json!({"Key": key, "Value": v})))
        .collect()
}

/// Parse tags from CloudFormation format into a map
pub fn parse_tags(tags: &[Value]) -> Map<String, Value> {
    let mut map = Map::new();
    for tag in tags {
        if let (Some(key), Some(value)) = (
            tag.get("Key").and_then(|v| v.as_str()),
            tag.get("Value").and_then(|v| v.as_str()),
        ) {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    map
}

/// Rewrite a `Tags` object in a request payload into CloudFormation format
pub fn expand_tags(payload: &mut Value) {
    if let Some(Value::Object(tags)) = payload.get("Tags") {
        let tags = build_tags(tags);
        payload["Tags"] = Value::Array(tags);
    }
}

/// Copy of a response payload with `Tags` turned back into an object
pub fn flatten_tags(payload: &Value) -> Value {
    let mut payload = payload.clone();
    if let Some(Value::Array(tags)) = payload.get("Tags") {
        let tags = parse_tags(tags);
        payload["Tags"] = Value::Object(tags);
    }
    payload
}

/// Fetch a nested property by path (e.g., `["Hardware", "CpuCount"]`)
pub fn nested<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |value, key| value.get(*key))
}
