//! REST API Handlers
//!
//! Every path outside the health and metrics endpoints is handed to the
//! plane router. Responses follow the ARM conventions: accepted operations
//! carry `Location` and `Azure-AsyncOperation` headers and errors are
//! wrapped as `{"error": {"code", "message"}}`.

use crate::controlplane::host::ControlPlane;
use crate::controlplane::router::RouterRequest;
use crate::domain::operation::ErrorDetail;
use crate::domain::ports::{BackendResponse, RequestMethod};
use crate::domain::resource_id::PLANES_SEGMENT;
use crate::error::Error;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// `Azure-AsyncOperation`, the header naming the operation status to poll
pub const ASYNC_OPERATION_HEADER: HeaderName = HeaderName::from_static("azure-asyncoperation");

// =============================================================================
// Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
}

impl ApiErrorResponse {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail::new(code, message),
        }
    }
}

/// HTTP status for a routing or backend failure
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Shared(inner) => status_for(inner),
        _ if err.is_not_found() => StatusCode::NOT_FOUND,
        Error::PlaneNotFound { .. } | Error::ProviderNotRegistered { .. } => StatusCode::NOT_FOUND,
        Error::MalformedAddress { .. }
        | Error::ApiValidation(_)
        | Error::MissingRequiredProperty { .. }
        | Error::JsonParse(_) => StatusCode::BAD_REQUEST,
        Error::UnsupportedOperation { .. } | Error::ControllerNotFound { .. } => StatusCode::METHOD_NOT_ALLOWED,
        Error::ScopeNotEmpty { .. } => StatusCode::CONFLICT,
        Error::ConcurrencyConflict { .. } => StatusCode::PRECONDITION_FAILED,
        Error::DownstreamThrottled { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::DownstreamTransient { .. } | Error::DownstreamFatal { .. } | Error::Kube(_) | Error::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    let body = ApiErrorResponse::new(err.code(), err.to_string());
    (status, Json(body)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    control_plane: Arc<ControlPlane>,
}

impl RestRouter {
    pub fn new(control_plane: Arc<ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            control_plane: self.control_plane,
        };

        Router::new()
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .route("/metrics", get(metrics))
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    control_plane: Arc<ControlPlane>,
}

// =============================================================================
// Handlers
// =============================================================================

fn request_method(method: &Method) -> Option<RequestMethod> {
    match *method {
        Method::GET => Some(RequestMethod::Get),
        Method::PUT => Some(RequestMethod::Put),
        Method::PATCH => Some(RequestMethod::Patch),
        Method::DELETE => Some(RequestMethod::Delete),
        Method::POST => Some(RequestMethod::Post),
        _ => None,
    }
}

/// Route any other request through the plane router
async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let Some(method) = request_method(&method) else {
        let body = ApiErrorResponse::new("UnsupportedOperation", format!("method {} is not supported", method));
        return (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response();
    };

    let mut request = RouterRequest::new(method, uri.path());
    if let Some(query) = uri.query() {
        request = request.with_query(query);
    }
    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => request = request.with_body(value),
            Err(e) => return error_response(&Error::ApiValidation(format!("invalid JSON body: {}", e))),
        }
    }

    let router = state.control_plane.router();
    match router.handle(request).await {
        Ok(response) => backend_response(router.base_path(), response),
        Err(e) => error_response(&e),
    }
}

fn backend_response(base_path: &str, response: BackendResponse) -> Response {
    match response {
        BackendResponse::Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        BackendResponse::Created(body) => (StatusCode::CREATED, Json(body)).into_response(),
        BackendResponse::NoContent => StatusCode::NO_CONTENT.into_response(),
        BackendResponse::Accepted { location, body } => {
            let location = if location.starts_with(&format!("/{}/", PLANES_SEGMENT)) {
                format!("{}{}", base_path, location)
            } else {
                location
            };
            let mut response = (StatusCode::ACCEPTED, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&location) {
                let headers = response.headers_mut();
                headers.insert(header::LOCATION, value.clone());
                headers.insert(ASYNC_OPERATION_HEADER, value);
            }
            response
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.control_plane.registry().is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "no planes configured")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.control_plane.telemetry().render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
