//! Manifest file (converge.json)

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use converge_core::ReconcilerConfig;
use converge_core::registry::Registry;
use converge_core::resource::{ResourceId, attributes_from_json};
use converge_state::BackendConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub data: Vec<DataEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(flatten)]
    pub reconciler: ReconcilerConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResourceEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub attributes: serde_json::Value,
}

impl ResourceEntry {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct DataEntry {
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub args: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    /// Check every entry against the registry, collecting all problems
    pub fn validate(&self, registry: &Registry) -> Result<(), String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for entry in &self.resources {
            let id = entry.id();
            if !seen.insert(id.to_string()) {
                errors.push(format!("{}: declared more than once", id));
            }
            match registry.resource(&entry.resource_type) {
                Some(kind) => {
                    if let Err(e) = kind.validate(&entry.attributes) {
                        errors.push(format!("{}: {}", id, e));
                    }
                }
                None => errors.push(format!("{}: unknown resource type", id)),
            }
        }

        let mut seen = HashSet::new();
        for entry in &self.data {
            let label = format!("data.{}.{}", entry.source_type, entry.name);
            if !seen.insert(label.clone()) {
                errors.push(format!("{}: declared more than once", label));
            }
            match registry.data_source(&entry.source_type) {
                Some(source) => {
                    if let Err(type_errors) =
                        source.schema().validate(&attributes_from_json(&entry.args))
                    {
                        for e in type_errors {
                            errors.push(format!("{}: {}", label, e));
                        }
                    }
                }
                None => errors.push(format!("{}: unknown data source type", label)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceEntry> {
        self.resources.iter().find(|r| &r.id() == id)
    }
}
