//! Registry - Resource kinds addressed by type name
//!
//! `ManagedResource` and `ManagedDataSource` erase the typed structs of a
//! kind behind JSON documents so a manifest can name resources by their
//! type string.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::data_source::{DataSourceKind, read_data_source};
use crate::drift::{DriftDetector, Refreshed};
use crate::error::{Error, ReconcileError};
use crate::mapper::{ResourceKind, to_attributes};
use crate::plan::PlannedChange;
use crate::provider::{BoxFuture, Payload, RemoteClient};
use crate::reconciler::{ReconcileRequest, Reconciled, Reconciler};
use crate::resource::{
    ObservedState, ResourceId, ResourceIdentity, attributes_from_json, attributes_to_json,
};
use crate::schema::{ResourceSchema, TypeError};

/// Observed state stored as a JSON document
pub type StoredState = ObservedState<Payload>;

/// A resource kind behind JSON documents
pub trait ManagedResource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> &'static ResourceSchema;

    /// Validate a desired state document
    fn validate(&self, desired: &Payload) -> Result<(), Error>;

    /// Preview the change without remote calls
    fn plan(
        &self,
        id: ResourceId,
        current: Option<&StoredState>,
        desired: Option<&Payload>,
    ) -> Result<PlannedChange, Error>;

    /// Run one reconciliation pass
    fn reconcile<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        config: &'a ReconcilerConfig,
        current: Option<StoredState>,
        desired: Option<Payload>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Reconciled<Payload>, ReconcileError>>;

    /// Describe the resource and report drift
    fn refresh<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        current: &'a StoredState,
    ) -> BoxFuture<'a, Result<Refreshed<Payload>, Error>>;

    /// Adopt an existing remote object by its identity
    fn import<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        identity: ResourceIdentity,
    ) -> BoxFuture<'a, Result<StoredState, Error>>;
}

/// A data source kind behind JSON documents
pub trait ManagedDataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> &'static ResourceSchema;

    fn read<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        args: &'a Payload,
    ) -> BoxFuture<'a, Result<Payload, Error>>;
}

/// Adapter from a typed kind to the erased traits
pub struct Kind<K>(PhantomData<fn() -> K>);

impl<K> Kind<K> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K> Default for Kind<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a caller document after checking it against the field table
fn decode_desired<T: DeserializeOwned>(schema: &ResourceSchema, document: &Payload) -> Result<T, Error> {
    if !document.is_object() {
        return Err(invalid(format!(
            "{} must be given as an object",
            schema.resource_type
        )));
    }
    schema
        .validate(&attributes_from_json(document))
        .map_err(Error::Validation)?;
    serde_json::from_value(document.clone()).map_err(|e| invalid(e.to_string()))
}

fn decode_state<T: DeserializeOwned>(type_name: &str, state: &StoredState) -> Result<ObservedState<T>, Error> {
    let observed = serde_json::from_value(state.observed.clone()).map_err(|e| {
        invalid(format!(
            "stored state of {} {} is unreadable: {}",
            type_name, state.identity, e
        ))
    })?;
    Ok(ObservedState::new(state.identity.clone(), observed))
}

fn encode_state<O: serde::Serialize>(state: ObservedState<O>) -> StoredState {
    let observed = attributes_to_json(&to_attributes(&state.observed));
    ObservedState::new(state.identity, observed)
}

fn invalid(message: String) -> Error {
    Error::Validation(vec![TypeError::ValidationFailed { message }])
}

impl<K: ResourceKind> ManagedResource for Kind<K> {
    fn type_name(&self) -> &'static str {
        K::TYPE_NAME
    }

    fn schema(&self) -> &'static ResourceSchema {
        K::schema()
    }

    fn validate(&self, desired: &Payload) -> Result<(), Error> {
        decode_desired::<K::Desired>(K::schema(), desired).map(|_| ())
    }

    fn plan(
        &self,
        id: ResourceId,
        current: Option<&StoredState>,
        desired: Option<&Payload>,
    ) -> Result<PlannedChange, Error> {
        let desired = desired
            .map(|d| decode_desired::<K::Desired>(K::schema(), d))
            .transpose()?;
        let current = current
            .map(|s| decode_state::<K::Observed>(K::TYPE_NAME, s))
            .transpose()?;

        let (action, diff) =
            crate::reconciler::decide::<K>(current.as_ref().map(|s| &s.observed), desired.as_ref());
        Ok(PlannedChange::new(id, action, diff))
    }

    fn reconcile<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        config: &'a ReconcilerConfig,
        current: Option<StoredState>,
        desired: Option<Payload>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Reconciled<Payload>, ReconcileError>> {
        Box::pin(async move {
            let desired = desired
                .map(|d| decode_desired::<K::Desired>(K::schema(), &d))
                .transpose()
                .map_err(ReconcileError::planning)?;
            let current = current
                .map(|s| decode_state::<K::Observed>(K::TYPE_NAME, &s))
                .transpose()
                .map_err(ReconcileError::planning)?;

            let request = ReconcileRequest::<K>::new(current, desired.as_ref()).with_cancel(cancel);
            let reconciled = Reconciler::new(client, config.clone())
                .reconcile::<K>(request)
                .await?;

            Ok(Reconciled {
                state: reconciled.state.map(encode_state),
                action: reconciled.action,
                drift: reconciled.drift,
            })
        })
    }

    fn refresh<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        current: &'a StoredState,
    ) -> BoxFuture<'a, Result<Refreshed<Payload>, Error>> {
        Box::pin(async move {
            let typed = decode_state::<K::Observed>(K::TYPE_NAME, current)?;
            let refreshed = DriftDetector::new(client).detect::<K>(&typed).await?;
            Ok(Refreshed {
                drift: refreshed.drift,
                observed: refreshed
                    .observed
                    .map(|o| attributes_to_json(&to_attributes(&o))),
            })
        })
    }

    fn import<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        identity: ResourceIdentity,
    ) -> BoxFuture<'a, Result<StoredState, Error>> {
        Box::pin(async move {
            let imported = DriftDetector::new(client).import::<K>(identity).await?;
            Ok(encode_state(imported))
        })
    }
}

impl<K: DataSourceKind> ManagedDataSource for Kind<K> {
    fn type_name(&self) -> &'static str {
        K::TYPE_NAME
    }

    fn schema(&self) -> &'static ResourceSchema {
        K::schema()
    }

    fn read<'a>(
        &'a self,
        client: &'a dyn RemoteClient,
        args: &'a Payload,
    ) -> BoxFuture<'a, Result<Payload, Error>> {
        Box::pin(async move {
            let args: K::Args = decode_desired(K::schema(), args)?;
            let output = read_data_source::<K, _>(client, &args).await?;
            Ok(attributes_to_json(&to_attributes(&output)))
        })
    }
}

/// Resource and data source kinds by type name
#[derive(Default)]
pub struct Registry {
    resources: BTreeMap<&'static str, Box<dyn ManagedResource>>,
    data_sources: BTreeMap<&'static str, Box<dyn ManagedDataSource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource<K: ResourceKind>(&mut self) -> &mut Self {
        self.resources.insert(K::TYPE_NAME, Box::new(Kind::<K>::new()));
        self
    }

    pub fn register_data_source<K: DataSourceKind>(&mut self) -> &mut Self {
        self.data_sources
            .insert(K::TYPE_NAME, Box::new(Kind::<K>::new()));
        self
    }

    pub fn resource(&self, type_name: &str) -> Option<&dyn ManagedResource> {
        self.resources.get(type_name).map(|r| r.as_ref())
    }

    pub fn data_source(&self, type_name: &str) -> Option<&dyn ManagedDataSource> {
        self.data_sources.get(type_name).map(|d| d.as_ref())
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    pub fn data_source_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.data_sources.keys().copied()
    }
}
