//! Drift - Detect out-of-band changes to remote resources
//!
//! The detector only ever calls `describe`; it never mutates remote state.

use crate::differ::{Diff, diff_observed};
use crate::error::Error;
use crate::mapper::{ResourceKind, carry_write_only, observed_attributes};
use crate::provider::RemoteClient;
use crate::resource::{ObservedState, ResourceIdentity};

/// How the remote object compares with the last-known observed state
#[derive(Debug, Clone, PartialEq)]
pub enum Drift {
    Unchanged,
    Changed(Diff),
    /// The remote object no longer exists
    Gone,
}

impl Drift {
    pub fn is_gone(&self) -> bool {
        matches!(self, Drift::Gone)
    }
}

/// Result of refreshing one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed<O> {
    pub drift: Drift,
    /// Fresh observed state, `None` when the object is gone
    pub observed: Option<O>,
}

pub struct DriftDetector<'c, C: RemoteClient + ?Sized> {
    client: &'c C,
}

impl<'c, C: RemoteClient + ?Sized> DriftDetector<'c, C> {
    pub fn new(client: &'c C) -> Self {
        Self { client }
    }

    /// Describe the resource and compare it with `current`
    pub async fn detect<K: ResourceKind>(
        &self,
        current: &ObservedState<K::Observed>,
    ) -> Result<Refreshed<K::Observed>, Error> {
        let payload = match self.client.describe(&current.identity).await {
            Ok(payload) => payload,
            Err(e) if e.is_not_found() => {
                log::warn!("{} {} no longer exists", K::TYPE_NAME, current.identity);
                return Ok(Refreshed {
                    drift: Drift::Gone,
                    observed: None,
                });
            }
            Err(e) => return Err(Error::classify(e)),
        };

        let previous = observed_attributes::<K>(&current.observed);
        let observed = carry_write_only::<K>(&previous, K::flatten(&payload));
        let diff = diff_observed(K::schema(), &previous, &observed_attributes::<K>(&observed));

        let drift = if diff.is_empty() {
            Drift::Unchanged
        } else {
            log::warn!(
                "{} {} changed outside of converge: {}",
                K::TYPE_NAME,
                current.identity,
                diff.changed_fields().join(", ")
            );
            Drift::Changed(diff)
        };

        Ok(Refreshed {
            drift,
            observed: Some(observed),
        })
    }
    /// Adopt an existing remote object as observed state
    ///
    /// Write-only fields cannot be read back and stay empty; a following
    /// pass leaves them alone unless a replacement is already needed.
    pub async fn import<K: ResourceKind>(
        &self,
        identity: ResourceIdentity,
    ) -> Result<ObservedState<K::Observed>, Error> {
        let payload = self
            .client
            .describe(&identity)
            .await
            .map_err(Error::classify)?;
        log::info!("Imported {} {}", K::TYPE_NAME, identity);
        Ok(ObservedState::new(identity, K::flatten(&payload)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mapper::tests::{Widget, WidgetState};
    use crate::provider::ProviderError;
    use crate::testing::{Call, MemoryRemote};

    fn state(size: i64) -> ObservedState<WidgetState> {
        ObservedState::new(
            "w-1",
            WidgetState {
                name: "w".to_string(),
                size,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn unchanged_when_remote_matches() {
        let remote = MemoryRemote::new();
        remote.insert("w-1", json!({"Name": "w", "Size": 1}));

        let refreshed = DriftDetector::new(&remote)
            .detect::<Widget>(&state(1))
            .await
            .unwrap();
        assert_eq!(refreshed.drift, Drift::Unchanged);
        assert_eq!(refreshed.observed, Some(state(1).observed));
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn reports_changed_fields() {
        let remote = MemoryRemote::new();
        remote.insert("w-1", json!({"Name": "w", "Size": 4}));

        let refreshed = DriftDetector::new(&remote)
            .detect::<Widget>(&state(1))
            .await
            .unwrap();
        match refreshed.drift {
            Drift::Changed(diff) => assert_eq!(diff.changed_fields(), vec!["size"]),
            other => panic!("Expected Changed, got {:?}", other),
        }
        assert_eq!(refreshed.observed.unwrap().size, 4);
    }

    #[tokio::test]
    async fn not_found_is_gone() {
        let remote = MemoryRemote::new();

        let refreshed = DriftDetector::new(&remote)
            .detect::<Widget>(&state(1))
            .await
            .unwrap();
        assert!(refreshed.drift.is_gone());
        assert_eq!(refreshed.observed, None);
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let remote = MemoryRemote::new();
        remote.insert("w-1", json!({"Name": "w", "Size": 1}));
        remote.fail_next(
            Call::Describe,
            ProviderError::new("denied").with_code("AccessDeniedException"),
        );

        let err = DriftDetector::new(&remote)
            .detect::<Widget>(&state(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteFailure { .. }));
    }

    #[tokio::test]
    async fn write_only_fields_do_not_drift() {
        let remote = MemoryRemote::new().with_write_only(&["Secret"]);
        remote.insert("w-1", json!({"Name": "w", "Size": 1, "Secret": "s"}));

        let mut current = state(1);
        current.observed.secret = Some("s".to_string());

        let refreshed = DriftDetector::new(&remote)
            .detect::<Widget>(&current)
            .await
            .unwrap();
        assert_eq!(refreshed.drift, Drift::Unchanged);
        assert_eq!(refreshed.observed.unwrap().secret.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn import_reads_the_remote_object() {
        let remote = MemoryRemote::new().with_write_only(&["Secret"]);
        remote.insert("w-1", json!({"Name": "w", "Size": 3, "Secret": "s"}));

        let imported = DriftDetector::new(&remote)
            .import::<Widget>(ResourceIdentity::new("w-1"))
            .await
            .unwrap();
        assert_eq!(imported.identity, ResourceIdentity::new("w-1"));
        assert_eq!(imported.observed.size, 3);
        assert_eq!(imported.observed.secret, None);
        assert_eq!(remote.mutation_count(), 0);
    }

    #[tokio::test]
    async fn import_of_missing_object_is_not_found() {
        let remote = MemoryRemote::new();

        let err = DriftDetector::new(&remote)
            .import::<Widget>(ResourceIdentity::new("w-9"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
