//! Error types for the Universal Control Plane
//!
//! Provides structured error types for all control plane components including
//! addressing, routing, storage, backend adapters and async operations.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An error observed by several waiters at once
    #[error("{0}")]
    Shared(Arc<Error>),

    // =========================================================================
    // Addressing Errors
    // =========================================================================
    #[error("Malformed address '{address}': {reason}")]
    MalformedAddress { address: String, reason: String },

    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("Plane not found: {plane_type}/{plane_name}")]
    PlaneNotFound {
        plane_type: String,
        plane_name: String,
    },

    #[error("No resource provider registered for namespace {namespace} on plane {plane}")]
    ProviderNotRegistered { namespace: String, plane: String },

    #[error("Operation {operation} is not supported by backend {backend}")]
    UnsupportedOperation { backend: String, operation: String },

    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    // =========================================================================
    // Request Validation Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    #[error("Mandatory property {property} is missing for resource type {resource_type}")]
    MissingRequiredProperty {
        property: String,
        resource_type: String,
    },

    // =========================================================================
    // Downstream Errors
    // =========================================================================
    #[error("Downstream resource not found: {resource}")]
    DownstreamNotFound { resource: String },

    #[error("Transient downstream failure from {backend}: {reason}")]
    DownstreamTransient { backend: String, reason: String },

    #[error("Downstream throttled by {backend}, retry after {retry_after:?}")]
    DownstreamThrottled {
        backend: String,
        retry_after: Duration,
    },

    #[error("Downstream failure from {backend}: {reason}")]
    DownstreamFatal { backend: String, reason: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Object not found: {id}")]
    ObjectNotFound { id: String },

    #[error("Concurrency conflict saving {id}: etag mismatch")]
    ConcurrencyConflict { id: String },

    #[error("Scope {id} still contains resources")]
    ScopeNotEmpty { id: String },

    // =========================================================================
    // Async Operation Errors
    // =========================================================================
    #[error("Invalid operation state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("No controller registered for operation {operation_type}")]
    ControllerNotFound { operation_type: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Canceled")]
    Canceled,

    #[error("Work queue closed")]
    QueueClosed,

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error inside an operation worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RequeueWithBackoff,
    /// Retry after specific duration
    RequeueAfter(Duration),
    /// Don't retry, record the failure
    NoRequeue,
}

impl Error {
    /// Build a malformed-address error
    pub fn malformed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Shared(inner) => inner.action(),

            // Throttling carries its own delay
            Error::DownstreamThrottled { retry_after, .. } => ErrorAction::RequeueAfter(*retry_after),

            // Transient errors - retry with backoff
            Error::DownstreamTransient { .. }
            | Error::BackendUnavailable { .. }
            | Error::Kube(_) => ErrorAction::RequeueWithBackoff,

            Error::Http(e) if e.is_timeout() || e.is_connect() => ErrorAction::RequeueWithBackoff,

            // Optimistic concurrency - short retry
            Error::ConcurrencyConflict { .. } => ErrorAction::RequeueAfter(Duration::from_millis(200)),

            // Everything else is final
            _ => ErrorAction::NoRequeue,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Shared(inner) => inner.is_transient(),
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => matches!(
                self,
                Error::DownstreamTransient { .. }
                    | Error::DownstreamThrottled { .. }
                    | Error::BackendUnavailable { .. }
                    | Error::Kube(_)
            ),
        }
    }

    /// Check if this error means the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Shared(inner) => inner.is_not_found(),
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => matches!(
                self,
                Error::DownstreamNotFound { .. } | Error::ObjectNotFound { .. }
            ),
        }
    }

    /// Stable error code recorded on failed operations and API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) | Error::Io(_) | Error::Metrics(_) => "Internal",
            Error::Configuration(_) => "InvalidConfiguration",
            Error::Shared(inner) => inner.code(),
            Error::MalformedAddress { .. } => "MalformedAddress",
            Error::PlaneNotFound { .. } => "PlaneNotFound",
            Error::ProviderNotRegistered { .. } => "ProviderNotRegistered",
            Error::UnsupportedOperation { .. } => "UnsupportedOperation",
            Error::BackendUnavailable { .. } => "BackendUnavailable",
            Error::ApiValidation(_) | Error::JsonParse(_) | Error::YamlParse(_) => "BadRequest",
            Error::MissingRequiredProperty { .. } => "MissingRequiredProperty",
            Error::DownstreamNotFound { .. } | Error::ObjectNotFound { .. } => "NotFound",
            Error::DownstreamTransient { .. } | Error::DownstreamThrottled { .. } => "DownstreamTransient",
            Error::DownstreamFatal { .. } | Error::Kube(_) | Error::Http(_) => "DownstreamFailure",
            Error::ConcurrencyConflict { .. } => "PreconditionFailed",
            Error::ScopeNotEmpty { .. } => "Conflict",
            Error::InvalidStateTransition { .. } => "InvalidStateTransition",
            Error::ControllerNotFound { .. } => "ControllerNotFound",
            Error::DeadlineExceeded => "DeadlineExceeded",
            Error::Canceled => "Canceled",
            Error::QueueClosed => "QueueClosed",
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Self {
        Error::Shared(err)
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;
