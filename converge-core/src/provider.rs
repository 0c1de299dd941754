//! Provider - The remote client facade
//!
//! A `RemoteClient` exposes the remote operations for one resource kind.
//! Provider crates implement it on top of a cloud API; the engine only ever
//! sees this trait, passed in explicitly by the caller.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{ResourceId, ResourceIdentity};

/// Error type for remote operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    /// Remote error code (e.g., "ResourceNotFoundException")
    pub code: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] ", id.resource_type, id.name)?;
        }
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            resource_id: None,
            cause: None,
        }
    }

    /// The remote object does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_code(codes::NOT_FOUND)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code.as_deref().is_some_and(codes::is_not_found)
    }
}

/// Remote error codes understood by the error classifier
pub mod codes {
    pub const NOT_FOUND: &str = "NotFound";
    pub const CONFLICT: &str = "ResourceConflict";
    pub const THROTTLING: &str = "Throttling";
    pub const NETWORK: &str = "NetworkFailure";
    pub const INVALID_REQUEST: &str = "InvalidRequest";

    pub fn is_not_found(code: &str) -> bool {
        matches!(
            code,
            NOT_FOUND
                | "ResourceNotFoundException"
                | "NotFoundException"
                | "GlobalClusterNotFoundFault"
                | "UserGroupNotFound"
        )
    }

    pub fn is_conflict(code: &str) -> bool {
        matches!(
            code,
            CONFLICT
                | "ResourceConflictException"
                | "ConflictException"
                | "AlreadyExists"
                | "AlreadyExistsException"
                | "InvalidGlobalClusterStateFault"
                | "InvalidUserGroupState"
        )
    }

    pub fn is_transient(code: &str) -> bool {
        matches!(
            code,
            THROTTLING
                | NETWORK
                | "ThrottlingException"
                | "TooManyRequestsException"
                | "RequestLimitExceeded"
                | "ServiceUnavailable"
                | "ServiceUnavailableException"
                | "ServiceInternalError"
                | "InternalFailure"
                | "RequestTimeout"
        )
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request or response body exchanged with the remote system
pub type Payload = serde_json::Value;

/// Handle to an in-flight asynchronous remote mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Remote operation identifier (e.g., a request token)
    pub token: String,
    /// Identity of the affected resource, when already known
    pub resource_identity: Option<ResourceIdentity>,
}

impl PendingOperation {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            resource_identity: None,
        }
    }

    pub fn with_resource_identity(mut self, identity: impl Into<ResourceIdentity>) -> Self {
        self.resource_identity = Some(identity.into());
        self
    }
}

/// Status of a pending operation as reported by the remote system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded {
        /// Identity assigned by the operation, if it reports one
        resource_identity: Option<ResourceIdentity>,
    },
    Failed {
        /// Remote failure code (e.g., "NotFound", "AlreadyExists")
        code: Option<String>,
        reason: String,
    },
}

impl OperationStatus {
    pub fn succeeded() -> Self {
        Self::Succeeded {
            resource_identity: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// Result of a create or update call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationResponse {
    /// Identity of the resource, when the call reports it synchronously
    pub identity: Option<ResourceIdentity>,
    /// Set when the mutation completes asynchronously
    pub pending: Option<PendingOperation>,
}

impl MutationResponse {
    pub fn completed(identity: impl Into<ResourceIdentity>) -> Self {
        Self {
            identity: Some(identity.into()),
            pending: None,
        }
    }

    pub fn pending(operation: PendingOperation) -> Self {
        Self {
            identity: operation.resource_identity.clone(),
            pending: Some(operation),
        }
    }
}

/// Remote client facade for one resource kind
///
/// Implementations must report a missing remote object as a
/// `ProviderError` whose code satisfies `codes::is_not_found`.
pub trait RemoteClient: Send + Sync {
    /// Describe the resource with the given identity
    fn describe<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Payload>>;

    /// Create a resource from an expanded request payload
    fn create(&self, request: Payload) -> BoxFuture<'_, ProviderResult<MutationResponse>>;

    /// Update a resource; `changes` holds only the changed properties
    fn update<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
        changes: Payload,
    ) -> BoxFuture<'a, ProviderResult<MutationResponse>>;

    /// Delete a resource
    fn delete<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Option<PendingOperation>>>;

    /// Check the status of a pending operation
    fn poll_status<'a>(
        &'a self,
        operation: &'a PendingOperation,
    ) -> BoxFuture<'a, ProviderResult<OperationStatus>>;

    /// List resources matching a query (read-only data sources)
    fn list(&self, _query: Payload) -> BoxFuture<'_, ProviderResult<Vec<Payload>>> {
        Box::pin(async {
            Err(ProviderError::new("List is not supported by this resource kind")
                .with_code(codes::INVALID_REQUEST))
        })
    }
}

/// RemoteClient implementation for Box<dyn RemoteClient>
/// This enables dynamic dispatch for remote clients
impl RemoteClient for Box<dyn RemoteClient> {
    fn describe<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Payload>> {
        (**self).describe(identity)
    }

    fn create(&self, request: Payload) -> BoxFuture<'_, ProviderResult<MutationResponse>> {
        (**self).create(request)
    }

    fn update<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
        changes: Payload,
    ) -> BoxFuture<'a, ProviderResult<MutationResponse>> {
        (**self).update(identity, changes)
    }

    fn delete<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Option<PendingOperation>>> {
        (**self).delete(identity)
    }

    fn poll_status<'a>(
        &'a self,
        operation: &'a PendingOperation,
    ) -> BoxFuture<'a, ProviderResult<OperationStatus>> {
        (**self).poll_status(operation)
    }

    fn list(&self, query: Payload) -> BoxFuture<'_, ProviderResult<Vec<Payload>>> {
        (**self).list(query)
    }
}
