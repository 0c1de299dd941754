//! Testing - In-memory remote and acceptance predicates
//!
//! `MemoryRemote` implements `RemoteClient` over a map of stored payloads.
//! It can run synchronously or hand out pending operations, replay scripted
//! operation statuses, inject failures per call, and drop fields the real
//! service never returns. The predicates confirm state transitions against
//! any `RemoteClient`, recorded or live.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::provider::{
    BoxFuture, MutationResponse, OperationStatus, Payload, PendingOperation, ProviderError,
    ProviderResult, RemoteClient,
};
use crate::resource::{ObservedState, ResourceIdentity};

/// Remote call kinds, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Describe,
    Create,
    Update,
    Delete,
    PollStatus,
    List,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Payload>,
    next_id: u64,
    next_token: u64,
    operations: HashMap<String, Option<ResourceIdentity>>,
    statuses: VecDeque<OperationStatus>,
    describe_overlays: VecDeque<Payload>,
    failures: HashMap<Call, VecDeque<ProviderError>>,
    calls: Vec<Call>,
    updates: Vec<Payload>,
    listing: Vec<Payload>,
}

/// In-memory `RemoteClient`
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    identity_field: Option<String>,
    asynchronous: bool,
    defaults: serde_json::Map<String, Payload>,
    write_only: Vec<String>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the value of `field` in the create request as identity instead of
    /// a generated one
    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = Some(field.into());
        self
    }

    /// Return pending operations from create, update and delete
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// Properties the remote fills in on create when the request omits them
    pub fn with_defaults(mut self, defaults: Payload) -> Self {
        if let Payload::Object(map) = defaults {
            self.defaults = map;
        }
        self
    }

    /// Properties accepted on create but never returned by describe
    pub fn with_write_only(mut self, fields: &[&str]) -> Self {
        self.write_only = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Statuses returned by the next `poll_status` calls, in order. Once
    /// exhausted, operations succeed.
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = OperationStatus>) {
        self.inner().statuses.extend(statuses);
    }

    /// Properties merged into the next `describe` responses, one per call
    pub fn script_describes(&self, overlays: impl IntoIterator<Item = Payload>) {
        self.inner().describe_overlays.extend(overlays);
    }

    /// Make the next call of `call` fail with `error`
    pub fn fail_next(&self, call: Call, error: ProviderError) {
        self.inner().failures.entry(call).or_default().push_back(error);
    }

    /// Items returned by `list`
    pub fn set_listing(&self, items: Vec<Payload>) {
        self.inner().listing = items;
    }

    /// Store an object directly, bypassing `create`
    pub fn insert(&self, identity: impl Into<String>, payload: Payload) {
        self.inner().objects.insert(identity.into(), payload);
    }

    /// Change properties of a stored object out of band
    pub fn modify(&self, identity: &str, changes: Payload) {
        if let Some(object) = self.inner().objects.get_mut(identity) {
            merge(object, changes);
        }
    }

    /// Remove a stored object out of band
    pub fn remove(&self, identity: &str) -> Option<Payload> {
        self.inner().objects.remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<Payload> {
        self.inner().objects.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().objects.is_empty()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner().calls.clone()
    }

    /// Change sets received by `update`, in order
    pub fn update_requests(&self) -> Vec<Payload> {
        self.inner().updates.clone()
    }

    pub fn call_count(&self, call: Call) -> usize {
        self.inner().calls.iter().filter(|c| **c == call).count()
    }

    /// Number of calls that mutate remote state
    pub fn mutation_count(&self) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Create | Call::Update | Call::Delete))
            .count()
    }

    /// Record a call and pop an injected failure for it
    fn begin(&self, call: Call) -> ProviderResult<()> {
        let mut inner = self.inner();
        inner.calls.push(call);
        match inner.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start_operation(&self, identity: Option<ResourceIdentity>) -> PendingOperation {
        let mut inner = self.inner();
        inner.next_token += 1;
        let token = format!("op-{}", inner.next_token);
        inner.operations.insert(token.clone(), identity);
        PendingOperation::new(token)
    }

    fn do_describe(&self, identity: &ResourceIdentity) -> ProviderResult<Payload> {
        self.begin(Call::Describe)?;
        let mut inner = self.inner();
        let mut payload = inner.objects.get(identity.as_str()).cloned().ok_or_else(|| {
            ProviderError::not_found(format!("{} does not exist", identity))
        })?;
        if let Some(overlay) = inner.describe_overlays.pop_front() {
            merge(&mut payload, overlay);
        }
        if let Payload::Object(map) = &mut payload {
            for field in &self.write_only {
                map.remove(field);
            }
        }
        Ok(payload)
    }

    fn do_create(&self, request: Payload) -> ProviderResult<MutationResponse> {
        self.begin(Call::Create)?;
        let mut stored = request;
        let identity = {
            let mut inner = self.inner();
            let identity = match self
                .identity_field
                .as_ref()
                .and_then(|f| stored.get(f))
                .and_then(Payload::as_str)
            {
                Some(id) => id.to_string(),
                None => {
                    inner.next_id += 1;
                    format!("res-{}", inner.next_id)
                }
            };
            if inner.objects.contains_key(&identity) {
                return Err(ProviderError::new(format!("{} already exists", identity))
                    .with_code("AlreadyExistsException"));
            }
            if let Payload::Object(map) = &mut stored {
                for (key, value) in &self.defaults {
                    map.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            inner.objects.insert(identity.clone(), stored);
            identity
        };

        if self.asynchronous {
            // Identity is only reported once the operation completes
            let op = self.start_operation(Some(ResourceIdentity::new(&identity)));
            Ok(MutationResponse::pending(op))
        } else {
            Ok(MutationResponse::completed(identity))
        }
    }

    fn do_update(&self, identity: &ResourceIdentity, changes: Payload) -> ProviderResult<MutationResponse> {
        self.begin(Call::Update)?;
        {
            let mut inner = self.inner();
            inner.updates.push(changes.clone());
            let object = inner.objects.get_mut(identity.as_str()).ok_or_else(|| {
                ProviderError::not_found(format!("{} does not exist", identity))
            })?;
            merge(object, changes);
        }

        if self.asynchronous {
            let op = self
                .start_operation(Some(identity.clone()))
                .with_resource_identity(identity.clone());
            Ok(MutationResponse::pending(op))
        } else {
            Ok(MutationResponse::completed(identity.clone()))
        }
    }

    fn do_delete(&self, identity: &ResourceIdentity) -> ProviderResult<Option<PendingOperation>> {
        self.begin(Call::Delete)?;
        self.inner()
            .objects
            .remove(identity.as_str())
            .ok_or_else(|| ProviderError::not_found(format!("{} does not exist", identity)))?;

        if self.asynchronous {
            Ok(Some(self.start_operation(Some(identity.clone()))))
        } else {
            Ok(None)
        }
    }

    fn do_poll(&self, operation: &PendingOperation) -> ProviderResult<OperationStatus> {
        self.begin(Call::PollStatus)?;
        let mut inner = self.inner();
        let known = inner.operations.get(&operation.token).cloned().flatten();
        Ok(match inner.statuses.pop_front() {
            Some(OperationStatus::Succeeded {
                resource_identity: None,
            })
            | None => OperationStatus::Succeeded {
                resource_identity: known,
            },
            Some(status) => status,
        })
    }
}

impl RemoteClient for MemoryRemote {
    fn describe<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Payload>> {
        Box::pin(async move { self.do_describe(identity) })
    }

    fn create(&self, request: Payload) -> BoxFuture<'_, ProviderResult<MutationResponse>> {
        Box::pin(async move { self.do_create(request) })
    }

    fn update<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
        changes: Payload,
    ) -> BoxFuture<'a, ProviderResult<MutationResponse>> {
        Box::pin(async move { self.do_update(identity, changes) })
    }

    fn delete<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Option<PendingOperation>>> {
        Box::pin(async move { self.do_delete(identity) })
    }

    fn poll_status<'a>(
        &'a self,
        operation: &'a PendingOperation,
    ) -> BoxFuture<'a, ProviderResult<OperationStatus>> {
        Box::pin(async move { self.do_poll(operation) })
    }

    fn list(&self, _query: Payload) -> BoxFuture<'_, ProviderResult<Vec<Payload>>> {
        Box::pin(async move {
            self.begin(Call::List)?;
            Ok(self.inner().listing.clone())
        })
    }
}

/// Shallow merge; `null` removes a property
fn merge(target: &mut Payload, changes: Payload) {
    let (Payload::Object(target), Payload::Object(changes)) = (target, changes) else {
        return;
    };
    for (key, value) in changes {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

/// Confirm the resource exists remotely and return its description
pub async fn check_exists<C: RemoteClient + ?Sized>(
    client: &C,
    identity: &ResourceIdentity,
) -> Result<Payload, String> {
    client
        .describe(identity)
        .await
        .map_err(|e| format!("Expected {} to exist: {}", identity, e))
}

/// Confirm the resource no longer exists remotely
pub async fn check_destroyed<C: RemoteClient + ?Sized>(
    client: &C,
    identity: &ResourceIdentity,
) -> Result<(), String> {
    match client.describe(identity).await {
        Ok(_) => Err(format!("Expected {} to be destroyed, but it still exists", identity)),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(format!("Checking {} failed: {}", identity, e)),
    }
}

/// Confirm a pass destroyed and recreated the resource
pub fn check_recreated<O>(before: &ObservedState<O>, after: &ObservedState<O>) -> Result<(), String> {
    if before.identity == after.identity {
        return Err(format!("Expected {} to be recreated", before.identity));
    }
    Ok(())
}

/// Confirm a pass kept the resource in place
pub fn check_not_recreated<O>(
    before: &ObservedState<O>,
    after: &ObservedState<O>,
) -> Result<(), String> {
    if before.identity != after.identity {
        return Err(format!(
            "Expected {} not to be recreated, got {}",
            before.identity, after.identity
        ));
    }
    Ok(())
}

/// Delete the resource behind the engine's back
pub async fn disappear<C: RemoteClient + ?Sized>(
    client: &C,
    identity: &ResourceIdentity,
) -> Result<(), String> {
    client
        .delete(identity)
        .await
        .map(|_| ())
        .map_err(|e| format!("Failed to delete {}: {}", identity, e))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_describe_delete() {
        let remote = MemoryRemote::new().with_defaults(json!({"Status": "available"}));

        let response = remote.create(json!({"Name": "a"})).await.unwrap();
        let identity = response.identity.unwrap();
        assert_eq!(identity.as_str(), "res-1");

        let payload = check_exists(&remote, &identity).await.unwrap();
        assert_eq!(payload, json!({"Name": "a", "Status": "available"}));

        disappear(&remote, &identity).await.unwrap();
        check_destroyed(&remote, &identity).await.unwrap();
    }

    #[tokio::test]
    async fn identity_field_and_duplicates() {
        let remote = MemoryRemote::new().with_identity_field("Name");
        remote.create(json!({"Name": "web"})).await.unwrap();

        let err = remote.create(json!({"Name": "web"})).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("AlreadyExistsException"));
    }

    #[tokio::test]
    async fn update_merges_and_removes() {
        let remote = MemoryRemote::new();
        remote.insert("x", json!({"A": 1, "B": 2}));

        remote
            .update(&ResourceIdentity::new("x"), json!({"A": 3, "B": null}))
            .await
            .unwrap();
        assert_eq!(remote.get("x"), Some(json!({"A": 3})));
    }

    #[tokio::test]
    async fn asynchronous_create_reports_identity_on_completion() {
        let remote = MemoryRemote::new().asynchronous();
        let response = remote.create(json!({"Name": "a"})).await.unwrap();
        let op = response.pending.unwrap();

        let status = remote.poll_status(&op).await.unwrap();
        assert_eq!(
            status,
            OperationStatus::Succeeded {
                resource_identity: Some(ResourceIdentity::new("res-1"))
            }
        );
    }

    #[tokio::test]
    async fn write_only_fields_are_not_described() {
        let remote = MemoryRemote::new().with_write_only(&["UserData"]);
        remote.insert("x", json!({"Name": "a", "UserData": "#!/bin/sh"}));

        let payload = remote.describe(&ResourceIdentity::new("x")).await.unwrap();
        assert_eq!(payload, json!({"Name": "a"}));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let remote = MemoryRemote::new();
        remote.insert("x", json!({}));
        remote.fail_next(Call::Describe, ProviderError::new("boom"));

        let id = ResourceIdentity::new("x");
        assert!(remote.describe(&id).await.is_err());
        assert!(remote.describe(&id).await.is_ok());
        assert_eq!(remote.call_count(Call::Describe), 2);
    }

    #[test]
    fn recreated_predicates() {
        let a = ObservedState::new("res-1", ());
        let b = ObservedState::new("res-2", ());
        assert!(check_recreated(&a, &b).is_ok());
        assert!(check_not_recreated(&a, &b).is_err());
        assert!(check_not_recreated(&a, &a.clone()).is_ok());
    }
}
