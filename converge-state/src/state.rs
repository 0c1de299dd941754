//! State file structures for persisting observed resource state

use converge_core::registry::StoredState;
use converge_core::resource::{ObservedState, ResourceId};
use serde::{Deserialize, Serialize};

/// Last-known observed state of every managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Identifies one history of writes; a file from another lineage is never overwritten
    pub lineage: String,
    /// Version of converge that last wrote this state
    pub converge_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            converge_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Prepare for a new write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.converge_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == id.resource_type && r.name == id.name)
    }

    /// Observed state of a resource in the form the registry consumes
    pub fn stored(&self, id: &ResourceId) -> Option<StoredState> {
        self.find(id).map(ResourceState::to_stored)
    }

    /// Record the outcome of a pass: `Some` stores the state, `None` forgets
    /// the resource
    pub fn record(&mut self, id: &ResourceId, state: Option<StoredState>) {
        match state {
            Some(state) => self.upsert(ResourceState::from_stored(id, state)),
            None => {
                self.remove(id);
            }
        }
    }

    pub fn upsert(&mut self, resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == id.resource_type && r.name == id.name)?;
        Some(self.resources.remove(pos))
    }

    /// Ids of every stored resource
    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.resources
            .iter()
            .map(|r| ResourceId::new(&r.resource_type, &r.name))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "lightsail_instance")
    pub resource_type: String,
    /// Name of the manifest entry
    pub name: String,
    /// Remote identity assigned on create
    pub identity: String,
    /// Observed attributes as a JSON object
    pub attributes: serde_json::Value,
}

impl ResourceState {
    pub fn from_stored(id: &ResourceId, state: StoredState) -> Self {
        Self {
            resource_type: id.resource_type.clone(),
            name: id.name.clone(),
            identity: state.identity.as_str().to_string(),
            attributes: state.observed,
        }
    }

    pub fn to_stored(&self) -> StoredState {
        ObservedState::new(self.identity.as_str(), self.attributes.clone())
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn web() -> ResourceId {
        ResourceId::new("lightsail_instance", "web")
    }

    #[test]
    fn new_state_file_is_empty() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
        assert_ne!(state.lineage, StateFile::new().lineage);
    }

    #[test]
    fn record_stores_and_forgets() {
        let mut state = StateFile::new();
        state.record(&web(), Some(ObservedState::new("web", json!({"bundle_id": "nano_1_0"}))));
        assert_eq!(state.resources.len(), 1);

        state.record(&web(), Some(ObservedState::new("web", json!({"bundle_id": "micro_1_0"}))));
        assert_eq!(state.resources.len(), 1);
        let stored = state.stored(&web()).unwrap();
        assert_eq!(stored.identity.as_str(), "web");
        assert_eq!(stored.observed["bundle_id"], "micro_1_0");

        state.record(&web(), None);
        assert!(state.stored(&web()).is_none());
        assert!(state.remove(&web()).is_none());
    }

    #[test]
    fn lookup_is_by_type_and_name() {
        let mut state = StateFile::new();
        state.record(&web(), Some(ObservedState::new("web", json!({}))));
        state.record(
            &ResourceId::new("elasticache_user_group", "web"),
            Some(ObservedState::new("users", json!({}))),
        );

        assert_eq!(state.resources.len(), 2);
        assert_eq!(state.find(&web()).unwrap().identity, "web");
        assert_eq!(state.ids().count(), 2);
    }

    #[test]
    fn serialization_keeps_lineage_and_resources() {
        let mut state = StateFile::new();
        state.record(&web(), Some(ObservedState::new("web", json!({"state": "running"}))));
        state.increment_serial();

        let text = serde_json::to_string_pretty(&state).unwrap();
        let read: StateFile = serde_json::from_str(&text).unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, state.lineage);
        assert_eq!(read.resources, state.resources);
    }
}
