//! Reconciler - Drive one resource towards its desired state
//!
//! One `reconcile` call is one pass: refresh the last-known state, diff it
//! against the desired state, invoke the minimal remote operations, wait for
//! them to settle, and return the new observed state.
//!
//! ```text
//! absent --create--> present --update--> present
//!                    present --delete--> absent
//!                    present --replace (delete + create)--> present
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::differ::{Diff, FieldDiff, diff};
use crate::drift::{Drift, DriftDetector};
use crate::error::{Error, ReconcileError};
use crate::mapper::{
    Readiness, ResourceKind, carry_write_only, desired_attributes, observed_attributes,
    to_attributes,
};
use crate::plan::{Action, PlannedChange};
use crate::poller::{OperationPoller, Probe};
use crate::provider::{MutationResponse, Payload, RemoteClient, codes};
use crate::resource::{ObservedState, ResourceId, ResourceIdentity};

/// Input of one reconciliation pass
pub struct ReconcileRequest<'a, K: ResourceKind> {
    /// Last-known state, `None` if the resource is believed absent
    pub current: Option<ObservedState<K::Observed>>,
    /// Desired state, `None` to delete
    pub desired: Option<&'a K::Desired>,
    /// Deadline for the whole pass; the reconciler default when `None`
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl<'a, K: ResourceKind> ReconcileRequest<'a, K> {
    pub fn new(
        current: Option<ObservedState<K::Observed>>,
        desired: Option<&'a K::Desired>,
    ) -> Self {
        Self {
            current,
            desired,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<O> {
    /// New state, `None` when the resource is absent
    pub state: Option<ObservedState<O>>,
    pub action: Action,
    /// Drift found while refreshing, `None` when no prior state was given
    pub drift: Option<Drift>,
}

impl<O> Reconciled<O> {
    pub fn identity(&self) -> Option<&ResourceIdentity> {
        self.state.as_ref().map(|s| &s.identity)
    }
}

/// Validate a desired state against the kind's field table
pub fn validate<K: ResourceKind>(desired: &K::Desired) -> Result<(), Error> {
    K::schema()
        .validate(&to_attributes(desired))
        .map_err(Error::Validation)
}

/// Choose the action for a resource without touching the remote system
pub fn decide<K: ResourceKind>(
    current: Option<&K::Observed>,
    desired: Option<&K::Desired>,
) -> (Action, Diff) {
    match (current, desired) {
        (None, None) => (Action::NoOp, Diff::new()),
        (None, Some(_)) => (Action::Created, Diff::new()),
        (Some(_), None) => (Action::Deleted, Diff::new()),
        (Some(current), Some(desired)) => {
            let diff = diff(
                K::schema(),
                &desired_attributes::<K>(desired),
                &observed_attributes::<K>(current),
            );
            let action = if diff.is_empty() {
                Action::NoOp
            } else if diff.requires_replace() {
                Action::Replaced
            } else {
                Action::Updated
            };
            (action, diff)
        }
    }
}

/// Reconciles resources through one remote client
///
/// The reconciler holds no mutable state and may run passes for many
/// identities concurrently. Callers must not run two passes for the same
/// identity at the same time.
pub struct Reconciler<'c, C: RemoteClient + ?Sized> {
    client: &'c C,
    config: ReconcilerConfig,
    poller: OperationPoller,
}

impl<'c, C: RemoteClient + ?Sized> Reconciler<'c, C> {
    pub fn new(client: &'c C, config: ReconcilerConfig) -> Self {
        let poller = OperationPoller::new(config.poll.clone());
        Self {
            client,
            config,
            poller,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Preview the change for one resource from its last-known state
    pub fn plan<K: ResourceKind>(
        &self,
        id: ResourceId,
        current: Option<&ObservedState<K::Observed>>,
        desired: Option<&K::Desired>,
    ) -> Result<PlannedChange, Error> {
        if let Some(desired) = desired {
            validate::<K>(desired)?;
        }
        let (action, diff) = decide::<K>(current.map(|s| &s.observed), desired);
        Ok(PlannedChange::new(id, action, diff))
    }

    /// Run one reconciliation pass
    pub async fn reconcile<K: ResourceKind>(
        &self,
        request: ReconcileRequest<'_, K>,
    ) -> Result<Reconciled<K::Observed>, ReconcileError> {
        let ReconcileRequest {
            current,
            desired,
            timeout,
            cancel,
        } = request;
        let pass = Pass {
            deadline: Instant::now() + timeout.unwrap_or(self.config.default_timeout),
            cancel,
        };

        if let Some(desired) = desired {
            validate::<K>(desired).map_err(ReconcileError::planning)?;
        }

        let (current, drift) = match current {
            Some(state) if self.config.refresh => {
                let refreshed = DriftDetector::new(self.client)
                    .detect::<K>(&state)
                    .await
                    .map_err(ReconcileError::planning)?;
                let current = refreshed
                    .observed
                    .map(|observed| ObservedState::new(state.identity, observed));
                (current, Some(refreshed.drift))
            }
            other => (other, None),
        };

        let (action, diff) = decide::<K>(current.as_ref().map(|s| &s.observed), desired);
        let state = match (action, current, desired) {
            (Action::NoOp, current, _) => current,
            (Action::Created, None, Some(desired)) => {
                Some(self.create::<K>(desired, &pass, action, false).await?)
            }
            (Action::Deleted, Some(current), None) => {
                self.delete::<K>(&current.identity, &pass, action).await?;
                None
            }
            (Action::Updated, Some(current), Some(desired)) => {
                Some(self.update::<K>(current, desired, &diff, &pass).await?)
            }
            (Action::Replaced, Some(current), Some(desired)) => {
                log::info!(
                    "Replacing {} {}: {} requires a new resource",
                    K::TYPE_NAME,
                    current.identity,
                    replace_fields(&diff).join(", ")
                );
                self.delete::<K>(&current.identity, &pass, action).await?;
                Some(self.create::<K>(desired, &pass, action, true).await?)
            }
            (action, _, _) => unreachable!("{} chosen for inconsistent input", action),
        };

        Ok(Reconciled {
            state,
            action,
            drift,
        })
    }

    async fn create<K: ResourceKind>(
        &self,
        desired: &K::Desired,
        pass: &Pass,
        action: Action,
        mutated: bool,
    ) -> Result<ObservedState<K::Observed>, ReconcileError> {
        log::info!("Creating {}", K::TYPE_NAME);
        let response = self
            .client
            .create(K::expand(desired))
            .await
            .map_err(|e| ReconcileError::during(action, mutated, e))?;

        let reported = response.identity.clone();
        let identity = self
            .settle(response, pass)
            .await
            .map_err(|e| {
                let err = ReconcileError::during(action, true, e);
                match reported {
                    Some(identity) => err.with_identity(identity),
                    None => err,
                }
            })?
            .ok_or_else(|| {
                ReconcileError::during(
                    action,
                    true,
                    Error::RemoteFailure {
                        code: None,
                        reason: format!("create of {} reported no identity", K::TYPE_NAME),
                    },
                )
            })?;
        log::info!("Created {} {}", K::TYPE_NAME, identity);

        let observed = self
            .wait_ready::<K>(&identity, pass)
            .await
            .map_err(|e| ReconcileError::during(action, true, e).with_identity(identity.clone()))?;
        let observed = carry_write_only::<K>(&desired_attributes::<K>(desired), observed);
        Ok(ObservedState::new(identity, observed))
    }

    async fn update<K: ResourceKind>(
        &self,
        current: ObservedState<K::Observed>,
        desired: &K::Desired,
        diff: &Diff,
        pass: &Pass,
    ) -> Result<ObservedState<K::Observed>, ReconcileError> {
        let action = Action::Updated;
        let changes = changed_payload::<K>(desired, diff);
        log::info!(
            "Updating {} {}: {}",
            K::TYPE_NAME,
            current.identity,
            diff.changed_fields().join(", ")
        );

        let response = self
            .client
            .update(&current.identity, changes)
            .await
            .map_err(|e| ReconcileError::during(action, false, e))?;
        self.settle(response, pass)
            .await
            .map_err(|e| ReconcileError::during(action, true, e))?;

        let observed = self
            .wait_ready::<K>(&current.identity, pass)
            .await
            .map_err(|e| ReconcileError::during(action, true, e))?;

        let mut carried = observed_attributes::<K>(&current.observed);
        carried.extend(desired_attributes::<K>(desired));
        let observed = carry_write_only::<K>(&carried, observed);
        Ok(ObservedState::new(current.identity, observed))
    }

    async fn delete<K: ResourceKind>(
        &self,
        identity: &ResourceIdentity,
        pass: &Pass,
        action: Action,
    ) -> Result<(), ReconcileError> {
        log::info!("Deleting {} {}", K::TYPE_NAME, identity);
        match self.client.delete(identity).await {
            Ok(Some(operation)) => {
                match self
                    .poller
                    .wait(self.client, &operation, pass.remaining(), &pass.cancel)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if is_gone(&e) => {
                        log::debug!("{} {} was already deleted", K::TYPE_NAME, identity);
                    }
                    Err(e) => return Err(ReconcileError::during(action, true, e)),
                }
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => {
                log::debug!("{} {} was already deleted", K::TYPE_NAME, identity);
                return Ok(());
            }
            Err(e) => return Err(ReconcileError::during(action, false, e)),
        }

        if K::WAIT_FOR_DELETION {
            self.wait_gone::<K>(identity, pass)
                .await
                .map_err(|e| ReconcileError::during(action, true, e))?;
        }
        Ok(())
    }

    /// Wait for a pending mutation; returns the identity it reported
    async fn settle(
        &self,
        response: MutationResponse,
        pass: &Pass,
    ) -> Result<Option<ResourceIdentity>, Error> {
        let Some(operation) = response.pending else {
            return Ok(response.identity);
        };
        let completed = self
            .poller
            .wait(self.client, &operation, pass.remaining(), &pass.cancel)
            .await?;
        Ok(completed.resource_identity.or(response.identity))
    }

    /// Re-read the resource until its kind reports it ready
    async fn wait_ready<K: ResourceKind>(
        &self,
        identity: &ResourceIdentity,
        pass: &Pass,
    ) -> Result<K::Observed, Error> {
        let description = format!("{} {} to become ready", K::TYPE_NAME, identity);
        let client = self.client;
        self.poller
            .wait_for(&description, pass.remaining(), &pass.cancel, move || async move {
                let payload = match client.describe(identity).await {
                    Ok(payload) => payload,
                    // Not visible yet
                    Err(e) if e.is_not_found() => return Ok(Probe::Pending),
                    Err(e) => return Err(Error::classify(e)),
                };
                let observed = K::flatten(&payload);
                match K::readiness(&observed) {
                    Readiness::Ready => Ok(Probe::Ready(observed)),
                    Readiness::Pending(status) => {
                        log::debug!("{} {} is {}", K::TYPE_NAME, identity, status);
                        Ok(Probe::Pending)
                    }
                    Readiness::Failed(reason) => Err(Error::RemoteFailure { code: None, reason }),
                }
            })
            .await
    }

    async fn wait_gone<K: ResourceKind>(
        &self,
        identity: &ResourceIdentity,
        pass: &Pass,
    ) -> Result<(), Error> {
        let description = format!("{} {} to be deleted", K::TYPE_NAME, identity);
        let client = self.client;
        self.poller
            .wait_for(&description, pass.remaining(), &pass.cancel, move || async move {
                match client.describe(identity).await {
                    Ok(_) => Ok(Probe::Pending),
                    Err(e) if e.is_not_found() => Ok(Probe::Ready(())),
                    Err(e) => Err(Error::classify(e)),
                }
            })
            .await
    }
}

/// Deadline and cancellation shared by every wait in one pass
struct Pass {
    deadline: Instant,
    cancel: CancellationToken,
}

impl Pass {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Request payload restricted to the provider properties of changed fields
fn changed_payload<K: ResourceKind>(desired: &K::Desired, diff: &Diff) -> Payload {
    let schema = K::schema();
    let keys: Vec<&str> = diff
        .changed_fields()
        .into_iter()
        .filter_map(|field| schema.get(field)?.provider_name.as_deref())
        .collect();

    match K::expand(desired) {
        Payload::Object(mut map) => {
            map.retain(|key, _| keys.contains(&key.as_str()));
            Payload::Object(map)
        }
        other => other,
    }
}

fn replace_fields(diff: &Diff) -> Vec<&str> {
    diff.fields()
        .iter()
        .filter(|(_, f)| matches!(f, FieldDiff::ForceReplace { .. }))
        .map(|(k, _)| k.as_str())
        .collect()
}

/// Whether an error means the remote object does not exist
fn is_gone(err: &Error) -> bool {
    match err {
        Error::NotFound { .. } => true,
        Error::RemoteFailure {
            code: Some(code), ..
        } => codes::is_not_found(code),
        _ => false,
    }
}
