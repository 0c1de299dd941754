//! AWS Cloud Control Provider implementation
//!
//! This module contains the remote client facade that talks to AWS Cloud
//! Control API. Every resource kind is addressed through the same five
//! generic calls (get, create, update, delete, request status) plus list,
//! keyed by the kind's CloudFormation type name.

use aws_config::Region;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::{OperationStatus as CcOperationStatus, ProgressEvent};
use converge_core::provider::{
    BoxFuture, MutationResponse, OperationStatus, Payload, PendingOperation, ProviderError,
    ProviderResult, RemoteClient, codes,
};
use converge_core::resource::ResourceIdentity;
use serde_json::json;

use crate::resources::aws_type_name;
use crate::utils::normalize_region;

/// AWS Cloud Control Provider
pub struct AwsccProvider {
    cloudcontrol_client: CloudControlClient,
    region: String,
}

impl AwsccProvider {
    /// Create a new AwsccProvider for the specified region
    pub async fn new(region: &str) -> Self {
        let region = normalize_region(region);
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        Self {
            cloudcontrol_client: CloudControlClient::new(&config),
            region,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Remote client for one kind, `None` if the kind is unknown
    pub fn client_for(&self, type_name: &str) -> Option<CloudControlResource> {
        aws_type_name(type_name).map(|aws_type| CloudControlResource {
            client: self.cloudcontrol_client.clone(),
            type_name: aws_type,
        })
    }
}

/// Cloud Control API calls for one CloudFormation type
#[derive(Clone)]
pub struct CloudControlResource {
    client: CloudControlClient,
    type_name: &'static str,
}

impl CloudControlResource {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Get a resource by identifier
    async fn cc_get_resource(&self, identifier: &str) -> ProviderResult<Payload> {
        log::debug!("GetResource {} {}", self.type_name, identifier);
        let response = self
            .client
            .get_resource()
            .type_name(self.type_name)
            .identifier(identifier)
            .send()
            .await
            .map_err(|e| sdk_error("get resource", e))?;

        let properties = response
            .resource_description()
            .and_then(|desc| desc.properties())
            .ok_or_else(|| {
                ProviderError::not_found(format!(
                    "{} {} has no resource description",
                    self.type_name, identifier
                ))
            })?;
        parse_properties(properties)
    }

    /// Create a resource
    async fn cc_create_resource(&self, desired_state: Payload) -> ProviderResult<MutationResponse> {
        log::debug!("CreateResource {}", self.type_name);
        let response = self
            .client
            .create_resource()
            .type_name(self.type_name)
            .desired_state(desired_state.to_string())
            .send()
            .await
            .map_err(|e| sdk_error("create resource", e))?;

        let progress = response
            .progress_event()
            .ok_or_else(|| ProviderError::new("No progress event returned"))?;
        mutation_response(progress)
    }

    /// Update a resource with a JSON patch built from the changed properties
    async fn cc_update_resource(
        &self,
        identifier: &str,
        changes: Payload,
    ) -> ProviderResult<MutationResponse> {
        let patch_ops = patch_operations(&changes);
        if patch_ops.is_empty() {
            return Ok(MutationResponse::completed(identifier));
        }

        let patch_document = serde_json::to_string(&patch_ops)
            .map_err(|e| ProviderError::new(format!("Failed to build patch: {}", e)).with_cause(e))?;

        log::debug!("UpdateResource {} {}: {}", self.type_name, identifier, patch_document);
        let response = self
            .client
            .update_resource()
            .type_name(self.type_name)
            .identifier(identifier)
            .patch_document(patch_document)
            .send()
            .await
            .map_err(|e| sdk_error("update resource", e))?;

        let response = match response.progress_event() {
            Some(progress) => mutation_response(progress)?,
            None => MutationResponse::completed(identifier),
        };
        Ok(match response.pending {
            Some(operation) => {
                MutationResponse::pending(operation.with_resource_identity(identifier))
            }
            None => MutationResponse::completed(identifier),
        })
    }

    /// Delete a resource
    async fn cc_delete_resource(&self, identifier: &str) -> ProviderResult<Option<PendingOperation>> {
        log::debug!("DeleteResource {} {}", self.type_name, identifier);
        let response = self
            .client
            .delete_resource()
            .type_name(self.type_name)
            .identifier(identifier)
            .send()
            .await
            .map_err(|e| sdk_error("delete resource", e))?;

        Ok(response
            .progress_event()
            .and_then(|p| p.request_token())
            .map(|token| PendingOperation::new(token).with_resource_identity(identifier)))
    }

    /// Get the status of an operation
    async fn cc_request_status(&self, request_token: &str) -> ProviderResult<OperationStatus> {
        let response = self
            .client
            .get_resource_request_status()
            .request_token(request_token)
            .send()
            .await
            .map_err(|e| sdk_error("get operation status", e))?;

        let progress = response
            .progress_event()
            .ok_or_else(|| ProviderError::new("No progress event returned"))?;
        Ok(operation_status(progress))
    }

    /// List resources, following every page
    async fn cc_list_resources(&self, query: Payload) -> ProviderResult<Vec<Payload>> {
        let resource_model = match &query {
            Payload::Object(map) if !map.is_empty() => Some(query.to_string()),
            _ => None,
        };

        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            log::debug!(
                "ListResources {} (page token: {:?})",
                self.type_name,
                next_token
            );
            let response = self
                .client
                .list_resources()
                .type_name(self.type_name)
                .set_resource_model(resource_model.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("list resources", e))?;

            for desc in response.resource_descriptions() {
                if let Some(properties) = desc.properties() {
                    items.push(parse_properties(properties)?);
                }
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(items)
    }
}

impl RemoteClient for CloudControlResource {
    fn describe<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Payload>> {
        Box::pin(async move { self.cc_get_resource(identity.as_str()).await })
    }

    fn create(&self, request: Payload) -> BoxFuture<'_, ProviderResult<MutationResponse>> {
        Box::pin(async move { self.cc_create_resource(request).await })
    }

    fn update<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
        changes: Payload,
    ) -> BoxFuture<'a, ProviderResult<MutationResponse>> {
        Box::pin(async move { self.cc_update_resource(identity.as_str(), changes).await })
    }

    fn delete<'a>(
        &'a self,
        identity: &'a ResourceIdentity,
    ) -> BoxFuture<'a, ProviderResult<Option<PendingOperation>>> {
        Box::pin(async move { self.cc_delete_resource(identity.as_str()).await })
    }

    fn poll_status<'a>(
        &'a self,
        operation: &'a PendingOperation,
    ) -> BoxFuture<'a, ProviderResult<OperationStatus>> {
        Box::pin(async move { self.cc_request_status(&operation.token).await })
    }

    fn list(&self, query: Payload) -> BoxFuture<'_, ProviderResult<Vec<Payload>>> {
        Box::pin(async move { self.cc_list_resources(query).await })
    }
}

fn parse_properties(properties: &str) -> ProviderResult<Payload> {
    serde_json::from_str(properties)
        .map_err(|e| ProviderError::new(format!("Invalid resource properties: {}", e)).with_cause(e))
}

/// Convert an SDK error, keeping the service error code for classification
fn sdk_error<E, R>(action: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => Some(codes::NETWORK.to_string()),
        other => other.code().map(str::to_string),
    };
    let error = ProviderError::new(format!("Failed to {}: {}", action, DisplayErrorContext(&err)));
    match code {
        Some(code) => error.with_code(code),
        None => error,
    }
}

/// JSON patch operations for a change set; `null` removes a property
fn patch_operations(changes: &Payload) -> Vec<Payload> {
    let Payload::Object(changes) = changes else {
        return Vec::new();
    };
    changes
        .iter()
        .map(|(key, value)| {
            let path = format!("/{}", key.replace('~', "~0").replace('/', "~1"));
            if value.is_null() {
                json!({"op": "remove", "path": path})
            } else {
                json!({"op": "add", "path": path, "value": value})
            }
        })
        .collect()
}

fn operation_status(progress: &ProgressEvent) -> OperationStatus {
    match progress.operation_status() {
        Some(CcOperationStatus::Success) => OperationStatus::Succeeded {
            resource_identity: progress.identifier().map(ResourceIdentity::new),
        },
        Some(CcOperationStatus::Failed) => OperationStatus::Failed {
            code: progress.error_code().map(|c| c.as_str().to_string()),
            reason: progress
                .status_message()
                .unwrap_or("Unknown error")
                .to_string(),
        },
        Some(CcOperationStatus::CancelComplete) => OperationStatus::Failed {
            code: None,
            reason: "Operation was cancelled".to_string(),
        },
        _ => OperationStatus::InProgress,
    }
}

/// Response of a create or update call from its first progress event
fn mutation_response(progress: &ProgressEvent) -> ProviderResult<MutationResponse> {
    match operation_status(progress) {
        OperationStatus::Succeeded {
            resource_identity: Some(identity),
        } => Ok(MutationResponse::completed(identity)),
        OperationStatus::Failed { code, reason } => {
            let error = ProviderError::new(reason);
            Err(match code {
                Some(code) => error.with_code(code),
                None => error,
            })
        }
        _ => {
            let token = progress
                .request_token()
                .ok_or_else(|| ProviderError::new("No request token returned"))?;
            let mut operation = PendingOperation::new(token);
            if let Some(identifier) = progress.identifier() {
                operation = operation.with_resource_identity(identifier);
            }
            Ok(MutationResponse::pending(operation))
        }
    }
}
