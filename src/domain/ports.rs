//! Domain Ports - Core trait definitions for the control plane
//!
//! These traits define the boundaries between routing/orchestration logic and
//! the systems it talks to. Adapters implement these traits to provide
//! concrete functionality.

use crate::domain::operation::{OperationState, OperationType};
use crate::domain::output_resource::OutputResource;
use crate::domain::plane::Plane;
use crate::domain::resource_id::{CollectionTarget, ResourceId, ResourceTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Request Types
// =============================================================================

/// HTTP-level method of an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Put,
    Patch,
    Delete,
    Post,
}

impl std::fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestMethod::Get => write!(f, "GET"),
            RequestMethod::Put => write!(f, "PUT"),
            RequestMethod::Patch => write!(f, "PATCH"),
            RequestMethod::Delete => write!(f, "DELETE"),
            RequestMethod::Post => write!(f, "POST"),
        }
    }
}

/// Capability a backend is asked to perform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    List,
    Get,
    CreateOrUpdate,
    Delete,
    Action(String),
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::List => write!(f, "List"),
            Verb::Get => write!(f, "Get"),
            Verb::CreateOrUpdate => write!(f, "CreateOrUpdate"),
            Verb::Delete => write!(f, "Delete"),
            Verb::Action(name) => write!(f, "Action({})", name),
        }
    }
}

/// Everything a backend needs to know about a routed request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Resolved plane
    pub plane: Arc<Plane>,
    pub method: RequestMethod,
    /// Decoded path with the router base path removed
    pub path: String,
    /// Path relative to the plane
    pub rewritten_path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    pub api_version: Option<String>,
}

/// Outcome of a backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    /// 200 with a body
    Ok(Value),
    /// 201 with a body
    Created(Value),
    /// 202 with a reference to poll
    Accepted { location: String, body: Value },
    /// 204
    NoContent,
}

impl BackendResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            BackendResponse::Ok(_) => 200,
            BackendResponse::Created(_) => 201,
            BackendResponse::Accepted { .. } => 202,
            BackendResponse::NoContent => 204,
        }
    }
}

/// Build the error returned for a capability a backend lacks
pub fn unsupported(backend: &str, verb: &Verb) -> Error {
    Error::UnsupportedOperation {
        backend: backend.to_string(),
        operation: verb.to_string(),
    }
}

// =============================================================================
// Plane Backend Port
// =============================================================================

/// Port implemented by every backend the router dispatches to
///
/// A backend need not implement every capability; the defaults fail with
/// [`Error::UnsupportedOperation`].
#[async_trait]
pub trait PlaneBackend: Send + Sync {
    /// Backend name used in logs and errors
    fn name(&self) -> &str;

    async fn list(&self, _ctx: &RequestContext, _collection: &CollectionTarget) -> Result<BackendResponse> {
        Err(unsupported(self.name(), &Verb::List))
    }

    async fn get(&self, _ctx: &RequestContext, _id: &ResourceId) -> Result<BackendResponse> {
        Err(unsupported(self.name(), &Verb::Get))
    }

    async fn create_or_update(
        &self,
        _ctx: &RequestContext,
        _id: &ResourceId,
        _body: Value,
    ) -> Result<BackendResponse> {
        Err(unsupported(self.name(), &Verb::CreateOrUpdate))
    }

    async fn delete(&self, _ctx: &RequestContext, _id: &ResourceId) -> Result<BackendResponse> {
        Err(unsupported(self.name(), &Verb::Delete))
    }

    /// Delete and return once the resource is gone
    ///
    /// Called from inside a running operation, so it must not queue another
    /// one. Backends whose `delete` is asynchronous override this to run the
    /// delete in place.
    async fn delete_inline(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        self.delete(ctx, id).await
    }

    async fn action(
        &self,
        _ctx: &RequestContext,
        _target: &ResourceTarget,
        action: &str,
        _body: Option<Value>,
    ) -> Result<BackendResponse> {
        Err(unsupported(self.name(), &Verb::Action(action.to_string())))
    }
}

// =============================================================================
// Cloud Control Port
// =============================================================================

/// Account and region an AWS call is made in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AwsScope {
    pub account: String,
    pub region: String,
}

impl AwsScope {
    /// Extract `accounts/{id}/regions/{region}` from an ID
    pub fn from_id(id: &ResourceId) -> Result<Self> {
        let account = id.find_scope("accounts");
        let region = id.find_scope("regions");
        match (account, region) {
            (Some(account), Some(region)) => Ok(Self {
                account: account.to_string(),
                region: region.to_string(),
            }),
            _ => Err(Error::malformed(
                id.as_str(),
                "AWS addresses require accounts and regions scopes",
            )),
        }
    }
}

/// Status of an asynchronous cloud-control request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    CancelInProgress,
    CancelComplete,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Success | ProgressStatus::Failed | ProgressStatus::CancelComplete
        )
    }
}

/// Progress of a mutating cloud-control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub request_token: String,
    pub operation_status: ProgressStatus,
    #[serde(default)]
    pub identifier: Option<String>,
    /// Handler error code such as `NotFound` or `Throttling`
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// Current state of a downstream resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub identifier: String,
    pub properties: Value,
}

/// The parts of a resource type schema the adapter relies on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSchema {
    /// Ordered identifying properties, e.g. `/properties/Name`
    #[serde(default)]
    pub primary_identifier: Vec<String>,
    #[serde(default)]
    pub read_only_properties: Vec<String>,
    #[serde(default)]
    pub create_only_properties: Vec<String>,
}

/// Port for a cloud-control style resource API
#[async_trait]
pub trait CloudControlClient: Send + Sync {
    /// Fails with `DownstreamNotFound` when the resource does not exist
    async fn get_resource(
        &self,
        scope: &AwsScope,
        type_name: &str,
        identifier: &str,
    ) -> Result<ResourceDescription>;

    async fn list_resources(&self, scope: &AwsScope, type_name: &str) -> Result<Vec<ResourceDescription>>;

    async fn create_resource(
        &self,
        scope: &AwsScope,
        type_name: &str,
        desired_state: &Value,
    ) -> Result<ProgressEvent>;

    /// Apply an RFC 6902 patch document
    async fn update_resource(
        &self,
        scope: &AwsScope,
        type_name: &str,
        identifier: &str,
        patch: &Value,
    ) -> Result<ProgressEvent>;

    async fn delete_resource(
        &self,
        scope: &AwsScope,
        type_name: &str,
        identifier: &str,
    ) -> Result<ProgressEvent>;

    async fn get_resource_request_status(
        &self,
        scope: &AwsScope,
        request_token: &str,
    ) -> Result<ProgressEvent>;

    async fn describe_type(&self, scope: &AwsScope, type_name: &str) -> Result<TypeSchema>;
}

// =============================================================================
// Work Queue Port
// =============================================================================

/// Unit of work handed from the request path to an operation worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    /// Delivery identity, stable across redeliveries
    pub message_id: Uuid,
    pub operation_id: Uuid,
    pub resource_id: ResourceId,
    pub operation_type: OperationType,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Times this message has been handed to a worker
    #[serde(default)]
    pub dequeue_count: u32,
}

/// Port for the durable work queue feeding operation workers
#[async_trait]
pub trait OperationQueue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage) -> Result<()>;

    /// Make a message visible again after `delay`
    async fn enqueue_after(&self, message: QueueMessage, delay: Duration) -> Result<()>;

    /// Wait for the next message; `None` once the queue is closed
    async fn dequeue(&self) -> Result<Option<QueueMessage>>;

    /// Extend the visibility lease of an in-flight message
    async fn extend(&self, message: &QueueMessage, lease: Duration) -> Result<()>;

    /// Acknowledge a message so it is never redelivered
    async fn finish(&self, message: &QueueMessage) -> Result<()>;
}

// =============================================================================
// Teardown Port
// =============================================================================

/// Port used by concurrent teardown to delete one output resource
#[async_trait]
pub trait ResourceDeleter: Send + Sync {
    /// Delete and wait for completion; `DownstreamNotFound` means already gone
    async fn delete(&self, resource: &OutputResource) -> Result<()>;
}

// =============================================================================
// Telemetry Port
// =============================================================================

/// Injected sink for operation and routing telemetry
pub trait TelemetrySink: Send + Sync {
    fn operation_queued(&self, operation_type: &OperationType);

    /// A lease was renewed on a still-running operation
    fn operation_extended(&self, operation_type: &OperationType);

    fn operation_completed(&self, operation_type: &OperationType, state: OperationState, duration: Duration);

    fn request_routed(&self, plane_type: &str, verb: &str, outcome: &str);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PlaneBackendRef = Arc<dyn PlaneBackend>;
pub type CloudControlClientRef = Arc<dyn CloudControlClient>;
pub type OperationQueueRef = Arc<dyn OperationQueue>;
pub type ResourceDeleterRef = Arc<dyn ResourceDeleter>;
pub type TelemetrySinkRef = Arc<dyn TelemetrySink>;
