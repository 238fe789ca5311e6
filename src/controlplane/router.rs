//! Request Router
//!
//! Resolves an inbound path to a plane and dispatches to that plane's
//! backend:
//!
//! ```text
//! {basePath}/planes/{planeType}/{planeName}/...   ->  registry lookup
//!     UCPNative + scope           -> scope backend (resource groups)
//!     UCPNative + resource        -> provider namespace -> local RP or proxy
//!     AWS                         -> cloud-control adapter
//!     Azure                       -> proxy to plane URL (plane-relative path)
//!     Kubernetes                  -> dynamic Kubernetes backend
//! ```
//!
//! `GET /planes` and `GET /planes/{type}` list planes; operation status
//! records are served by the orchestrator for every plane.

use crate::controlplane::backends::proxy::{PathMode, ProxyBackend};
use crate::controlplane::orchestrator::{is_operation_status, Orchestrator};
use crate::controlplane::registry::PlaneRegistry;
use crate::domain::plane::{BackendUrl, Plane, PlaneKind};
use crate::domain::ports::{
    BackendResponse, PlaneBackendRef, RequestContext, RequestMethod, TelemetrySinkRef, Verb,
};
use crate::domain::resource_id::{ResourceId, ResourceTarget, PLANES_SEGMENT, SEGMENT_SEPARATOR};
use crate::error::{Error, Result};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Query parameter carrying the API version
pub const API_VERSION_PARAM: &str = "api-version";

// =============================================================================
// Requests and Routes
// =============================================================================

/// Inbound request as seen by the router
#[derive(Debug, Clone)]
pub struct RouterRequest {
    pub method: RequestMethod,
    /// Raw path including the base path, possibly percent-encoded
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Value>,
}

impl RouterRequest {
    pub fn new(method: RequestMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Value of the `api-version` query parameter
    pub fn api_version(&self) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            key.eq_ignore_ascii_case(API_VERSION_PARAM)
                .then(|| urlencoding::decode(value).map(|v| v.into_owned()).ok())
                .flatten()
        })
    }
}

/// A resolved route
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub plane: Arc<Plane>,
    pub target: ResourceTarget,
    /// Decoded path without base path or action suffix
    pub path: String,
    /// Path relative to the plane, e.g. `/accounts/0/regions/...`
    pub rewritten_path: String,
    /// Custom action from a `:{action}` suffix or a POST on `{resource}/{action}`
    pub action: Option<String>,
}

/// Backends available to the router, by role
#[derive(Default, Clone)]
pub struct BackendSet {
    pub aws: Option<PlaneBackendRef>,
    pub kubernetes: Option<PlaneBackendRef>,
    /// In-process resource providers of UCPNative planes
    pub local: Option<PlaneBackendRef>,
    /// Resource groups of UCPNative planes
    pub scopes: Option<PlaneBackendRef>,
}

fn unavailable(backend: &str) -> Error {
    Error::BackendUnavailable {
        backend: backend.to_string(),
    }
}

// =============================================================================
// Router
// =============================================================================

pub struct Router {
    base_path: String,
    registry: Arc<PlaneRegistry>,
    orchestrator: Arc<Orchestrator>,
    backends: BackendSet,
    /// Proxy backends by target URL and path mode
    proxies: DashMap<(String, PathMode), PlaneBackendRef>,
    http: reqwest::Client,
    telemetry: TelemetrySinkRef,
}

impl Router {
    pub fn new(
        base_path: &str,
        registry: Arc<PlaneRegistry>,
        orchestrator: Arc<Orchestrator>,
        backends: BackendSet,
        telemetry: TelemetrySinkRef,
    ) -> Arc<Self> {
        let base_path = base_path.trim_end_matches(SEGMENT_SEPARATOR).to_string();
        info!("Router serving planes under '{}/planes'", base_path);
        Arc::new(Self {
            base_path,
            registry,
            orchestrator,
            backends,
            proxies: DashMap::new(),
            http: reqwest::Client::new(),
            telemetry,
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn registry(&self) -> &Arc<PlaneRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    // -------------------------------------------------------------------------
    // Path handling
    // -------------------------------------------------------------------------

    /// Strip the base path and percent-decode
    fn normalize_path(&self, raw: &str) -> Result<String> {
        let relative = if self.base_path.is_empty() {
            raw
        } else {
            match raw.get(..self.base_path.len()) {
                Some(prefix) if prefix.eq_ignore_ascii_case(&self.base_path) => {
                    &raw[self.base_path.len()..]
                }
                _ => return Err(Error::malformed(raw, "path is outside the router base path")),
            }
        };
        if !relative.is_empty() && !relative.starts_with(SEGMENT_SEPARATOR) {
            return Err(Error::malformed(raw, "path is outside the router base path"));
        }

        urlencoding::decode(relative)
            .map(|decoded| decoded.into_owned())
            .map_err(|e| Error::malformed(raw, format!("invalid percent-encoding: {}", e)))
    }

    /// Resolve a path to its plane without choosing a backend
    pub fn resolve(&self, method: RequestMethod, raw_path: &str) -> Result<RouteMatch> {
        let path = self.normalize_path(raw_path)?;
        let (path, action) = split_action(&path);

        let target = ResourceId::parse_target(&path)?;
        let anchor = match &target {
            ResourceTarget::Resource(id) => id,
            ResourceTarget::Collection(collection) => &collection.parent,
        };
        let (Some(plane_type), Some(plane_name)) = (anchor.plane_type(), anchor.plane_name()) else {
            return Err(Error::malformed(&path, "address does not name a plane"));
        };
        let plane = self
            .registry
            .resolve(plane_type, plane_name)
            .ok_or_else(|| Error::PlaneNotFound {
                plane_type: plane_type.to_string(),
                plane_name: plane_name.to_string(),
            })?;

        let (target, action) = match (method, target, action) {
            (RequestMethod::Post, ResourceTarget::Collection(c), None) if !c.parent.is_scope() => {
                let action = c
                    .resource_type
                    .rsplit(SEGMENT_SEPARATOR)
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (ResourceTarget::Resource(c.parent), Some(action))
            }
            (_, target, action) => (target, action),
        };

        Ok(RouteMatch {
            rewritten_path: plane_relative(&path),
            plane,
            target,
            path,
            action,
        })
    }

    /// Resolve a path to a backend and the plane-relative path
    pub fn route(&self, method: RequestMethod, raw_path: &str) -> Result<(PlaneBackendRef, RouteMatch)> {
        let route = self.resolve(method, raw_path)?;
        let backend = self.select_backend(&route)?;
        Ok((backend, route))
    }

    fn select_backend(&self, route: &RouteMatch) -> Result<PlaneBackendRef> {
        let plane = &route.plane;
        let is_scope = match &route.target {
            ResourceTarget::Resource(id) => id.is_scope(),
            ResourceTarget::Collection(c) => c.is_scope,
        };

        match plane.kind {
            PlaneKind::UcpNative if is_scope => {
                self.backends.scopes.clone().ok_or_else(|| unavailable("scopes"))
            }
            PlaneKind::UcpNative => {
                let namespace = target_namespace(&route.target)
                    .ok_or_else(|| Error::malformed(&route.path, "missing provider namespace"))?;
                match plane.provider_backend(namespace) {
                    Some(BackendUrl::Local) => {
                        self.backends.local.clone().ok_or_else(|| unavailable("local"))
                    }
                    Some(BackendUrl::Remote(url)) => Ok(self.proxy(url, PathMode::Full)),
                    None => Err(Error::ProviderNotRegistered {
                        namespace: namespace.to_string(),
                        plane: plane.id.to_string(),
                    }),
                }
            }
            PlaneKind::Aws => self.backends.aws.clone().ok_or_else(|| unavailable("aws")),
            PlaneKind::Kubernetes => self
                .backends
                .kubernetes
                .clone()
                .ok_or_else(|| unavailable("kubernetes")),
            PlaneKind::Azure => match &plane.url {
                Some(BackendUrl::Remote(url)) => Ok(self.proxy(url, PathMode::PlaneRelative)),
                _ => Err(unavailable("azure")),
            },
        }
    }

    fn proxy(&self, url: &str, mode: PathMode) -> PlaneBackendRef {
        self.proxies
            .entry((url.to_string(), mode))
            .or_insert_with(|| Arc::new(ProxyBackend::new(self.http.clone(), url, mode)))
            .value()
            .clone()
    }

    /// Operation statuses are ours unless a remote provider owns the namespace
    fn serves_operation_status(&self, route: &RouteMatch, id: &ResourceId) -> bool {
        if !is_operation_status(id) {
            return false;
        }
        if route.plane.kind != PlaneKind::UcpNative {
            return true;
        }
        !matches!(
            id.provider_namespace().and_then(|ns| route.plane.provider_backend(ns)),
            Some(BackendUrl::Remote(_))
        )
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Handle one inbound request end to end
    pub async fn handle(&self, request: RouterRequest) -> Result<BackendResponse> {
        if let Some(response) = self.handle_planes(&request)? {
            return Ok(response);
        }

        let route = self.resolve(request.method, &request.path)?;
        let plane_type = route.plane.plane_type().to_string();

        if let ResourceTarget::Resource(id) = &route.target {
            if self.serves_operation_status(&route, id) {
                if request.method != RequestMethod::Get {
                    return Err(Error::UnsupportedOperation {
                        backend: "operations".to_string(),
                        operation: request.method.to_string(),
                    });
                }
                let status = self.orchestrator.get_status(id).await?;
                self.telemetry.request_routed(&plane_type, "Get", "ok");
                return Ok(BackendResponse::Ok(serde_json::to_value(status)?));
            }
        }

        let verb = select_verb(request.method, &route)?;
        let backend = self.select_backend(&route)?;
        let ctx = RequestContext {
            plane: Arc::clone(&route.plane),
            method: request.method,
            path: route.path.clone(),
            rewritten_path: route.rewritten_path.clone(),
            api_version: request.api_version(),
            query: request.query.clone(),
        };

        debug!(
            plane = %route.plane.id,
            backend = backend.name(),
            "Routing {} {} as {}",
            request.method,
            route.path,
            verb
        );

        let result = match (&verb, &route.target) {
            (Verb::List, ResourceTarget::Collection(collection)) => backend.list(&ctx, collection).await,
            (Verb::Get, ResourceTarget::Resource(id)) => backend.get(&ctx, id).await,
            (Verb::CreateOrUpdate, ResourceTarget::Resource(id)) => {
                let body = request
                    .body
                    .ok_or_else(|| Error::ApiValidation("request body is required".into()))?;
                backend.create_or_update(&ctx, id, body).await
            }
            (Verb::Delete, ResourceTarget::Resource(id)) => backend.delete(&ctx, id).await,
            (Verb::Action(action), target) => backend.action(&ctx, target, action, request.body).await,
            _ => Err(Error::UnsupportedOperation {
                backend: backend.name().to_string(),
                operation: verb.to_string(),
            }),
        };

        let verb_label = match verb {
            Verb::Action(_) => "Action".to_string(),
            other => other.to_string(),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        self.telemetry.request_routed(&plane_type, &verb_label, outcome);
        result
    }

    /// Delete the resource at `raw_path` without queueing an operation
    ///
    /// Backends run their delete in the caller's task, so an operation that
    /// tears down its children never waits on another worker.
    pub async fn delete_inline(&self, raw_path: &str) -> Result<BackendResponse> {
        let route = self.resolve(RequestMethod::Delete, raw_path)?;
        let id = match (&route.target, &route.action) {
            (ResourceTarget::Resource(id), None) if !is_operation_status(id) => id,
            _ => {
                return Err(Error::UnsupportedOperation {
                    backend: "router".to_string(),
                    operation: format!("inline DELETE {}", route.path),
                })
            }
        };
        let backend = self.select_backend(&route)?;
        let ctx = RequestContext {
            plane: Arc::clone(&route.plane),
            method: RequestMethod::Delete,
            path: route.path.clone(),
            rewritten_path: route.rewritten_path.clone(),
            query: None,
            api_version: None,
        };

        debug!(plane = %route.plane.id, backend = backend.name(), "Deleting {} inline", route.path);
        let result = backend.delete_inline(&ctx, id).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        self.telemetry
            .request_routed(route.plane.plane_type(), "Delete", outcome);
        result
    }

    /// `GET /planes`, `GET /planes/{type}` and `GET /planes/{type}/{name}`
    fn handle_planes(&self, request: &RouterRequest) -> Result<Option<BackendResponse>> {
        let path = self.normalize_path(&request.path)?;
        let tokens: Vec<&str> = path
            .trim_matches('/')
            .split(SEGMENT_SEPARATOR)
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() || !tokens[0].eq_ignore_ascii_case(PLANES_SEGMENT) || tokens.len() > 3 {
            return Ok(None);
        }
        if request.method != RequestMethod::Get {
            if tokens.len() == 3 {
                return Err(Error::UnsupportedOperation {
                    backend: "planes".to_string(),
                    operation: format!("{} on a plane; planes are configured, not created", request.method),
                });
            }
            return Ok(None);
        }

        let response = match tokens.as_slice() {
            [_] => list_response(self.registry.list()),
            [_, plane_type] => list_response(self.registry.list_by_type(plane_type)),
            [_, plane_type, plane_name] => {
                let plane = self
                    .registry
                    .resolve(plane_type, plane_name)
                    .ok_or_else(|| Error::PlaneNotFound {
                        plane_type: plane_type.to_string(),
                        plane_name: plane_name.to_string(),
                    })?;
                BackendResponse::Ok(plane.to_resource())
            }
            _ => return Ok(None),
        };
        Ok(Some(response))
    }
}

fn list_response(planes: Vec<Arc<Plane>>) -> BackendResponse {
    let value: Vec<Value> = planes.iter().map(|p| p.to_resource()).collect();
    BackendResponse::Ok(json!({ "value": value }))
}

/// Split a trailing `/:action` segment off a path
fn split_action(path: &str) -> (String, Option<String>) {
    let trimmed = path.trim_end_matches(SEGMENT_SEPARATOR);
    match trimmed.rsplit_once(SEGMENT_SEPARATOR) {
        Some((head, last)) if last.starts_with(':') && last.len() > 1 => {
            (head.to_string(), Some(last[1..].to_string()))
        }
        _ => (path.to_string(), None),
    }
}

/// Path below `/planes/{type}/{name}`, always starting with `/`
fn plane_relative(path: &str) -> String {
    let rest = path
        .trim_start_matches(SEGMENT_SEPARATOR)
        .splitn(4, SEGMENT_SEPARATOR)
        .nth(3)
        .unwrap_or_default();
    format!("/{}", rest.trim_end_matches(SEGMENT_SEPARATOR))
}

fn target_namespace(target: &ResourceTarget) -> Option<&str> {
    match target {
        ResourceTarget::Resource(id) => id.provider_namespace(),
        ResourceTarget::Collection(c) => c.resource_type.split(SEGMENT_SEPARATOR).next(),
    }
}

fn select_verb(method: RequestMethod, route: &RouteMatch) -> Result<Verb> {
    let verb = match (method, &route.target, &route.action) {
        (RequestMethod::Post, _, Some(action)) => Verb::Action(action.clone()),
        (RequestMethod::Get, ResourceTarget::Collection(_), None) => Verb::List,
        (RequestMethod::Get, ResourceTarget::Resource(_), None) => Verb::Get,
        (RequestMethod::Put | RequestMethod::Patch, ResourceTarget::Resource(_), None) => {
            Verb::CreateOrUpdate
        }
        (RequestMethod::Delete, ResourceTarget::Resource(_), None) => Verb::Delete,
        _ => {
            return Err(Error::UnsupportedOperation {
                backend: "router".to_string(),
                operation: format!("{} {}", method, route.path),
            })
        }
    };
    Ok(verb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorSettings;
    use crate::controlplane::queue::MemoryQueue;
    use crate::controlplane::telemetry::NoopTelemetry;
    use crate::domain::ports::PlaneBackend;
    use crate::domain::resource_id::CollectionTarget;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    /// Echoes what it was asked to do
    struct EchoBackend(&'static str);

    #[async_trait]
    impl PlaneBackend for EchoBackend {
        fn name(&self) -> &str {
            self.0
        }

        async fn list(&self, ctx: &RequestContext, collection: &CollectionTarget) -> Result<BackendResponse> {
            Ok(BackendResponse::Ok(json!({
                "backend": self.0,
                "verb": "list",
                "type": collection.resource_type,
                "rewritten": ctx.rewritten_path,
            })))
        }

        async fn get(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
            Ok(BackendResponse::Ok(json!({
                "backend": self.0,
                "verb": "get",
                "id": id.as_str(),
                "rewritten": ctx.rewritten_path,
                "apiVersion": ctx.api_version,
            })))
        }

        async fn action(
            &self,
            _ctx: &RequestContext,
            target: &ResourceTarget,
            action: &str,
            _body: Option<Value>,
        ) -> Result<BackendResponse> {
            let target = match target {
                ResourceTarget::Resource(id) => id.to_string(),
                ResourceTarget::Collection(c) => c.resource_type.clone(),
            };
            Ok(BackendResponse::Ok(json!({
                "backend": self.0,
                "verb": "action",
                "action": action,
                "target": target,
            })))
        }
    }

    fn router(base_path: &str) -> Arc<Router> {
        let registry = PlaneRegistry::new(vec![
            Plane::new("aws", "aws", PlaneKind::Aws),
            Plane::new("radius", "local", PlaneKind::UcpNative)
                .with_provider("Applications.Core", BackendUrl::Local),
            Plane::new("kubernetes", "local", PlaneKind::Kubernetes),
        ])
        .unwrap();
        let settings = OrchestratorSettings::default();
        let orchestrator = Orchestrator::new(
            settings.clone(),
            Arc::new(MemoryStore::new()),
            MemoryQueue::new(8, settings.lease_duration()),
            Arc::new(NoopTelemetry),
        );
        let backends = BackendSet {
            aws: Some(Arc::new(EchoBackend("aws"))),
            local: Some(Arc::new(EchoBackend("local"))),
            scopes: Some(Arc::new(EchoBackend("scopes"))),
            kubernetes: None,
        };
        Router::new(base_path, registry, orchestrator, backends, Arc::new(NoopTelemetry))
    }

    #[tokio::test]
    async fn test_route_to_aws_with_base_path() {
        let router = router("/apis/api.ucp.dev/v1alpha3");
        let response = router
            .handle(
                RouterRequest::new(
                    RequestMethod::Get,
                    "/apis/api.ucp.dev/v1alpha3/planes/aws/aws/accounts/0/regions/us-west-2/providers/AWS.Kinesis/Stream/s1",
                )
                .with_query("api-version=default"),
            )
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) => {
            assert_eq!(body["backend"], "aws");
            assert_eq!(body["verb"], "get");
            assert_eq!(body["rewritten"], "/accounts/0/regions/us-west-2/providers/AWS.Kinesis/Stream/s1");
            assert_eq!(body["apiVersion"], "default");
        });
    }

    #[tokio::test]
    async fn test_unknown_plane_is_not_found() {
        let router = router("");
        let err = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes/aws/missing/accounts/0"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::PlaneNotFound { ref plane_name, .. } if plane_name == "missing");

        let err = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes/aws/missing"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::PlaneNotFound { .. });
    }

    #[tokio::test]
    async fn test_path_outside_base_path() {
        let router = router("/apis/v1");
        assert_matches!(
            router.handle(RouterRequest::new(RequestMethod::Get, "/other/planes")).await,
            Err(Error::MalformedAddress { .. })
        );
        assert_matches!(
            router.handle(RouterRequest::new(RequestMethod::Get, "/apis/v1x/planes")).await,
            Err(Error::MalformedAddress { .. })
        );
    }

    #[tokio::test]
    async fn test_scopes_and_providers_on_native_plane() {
        let router = router("");
        let response = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes/radius/local/resourceGroups"))
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) if body["backend"] == "scopes" && body["verb"] == "list");

        let response = router
            .handle(RouterRequest::new(
                RequestMethod::Get,
                "/planes/radius/local/resourceGroups/rg/providers/applications.core/containers/web",
            ))
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) if body["backend"] == "local");

        let err = router
            .handle(RouterRequest::new(
                RequestMethod::Get,
                "/planes/radius/local/resourceGroups/rg/providers/Applications.Dapr/stateStores/s",
            ))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ProviderNotRegistered { namespace, .. } if namespace == "Applications.Dapr");
    }

    #[tokio::test]
    async fn test_actions() {
        let router = router("");
        let response = router
            .handle(RouterRequest::new(
                RequestMethod::Post,
                "/planes/aws/aws/accounts/0/regions/r/providers/AWS.Kinesis/Stream/:put",
            ))
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) => {
            assert_eq!(body["action"], "put");
            assert_eq!(body["target"], "AWS.Kinesis/Stream");
        });

        let response = router
            .handle(RouterRequest::new(
                RequestMethod::Post,
                "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/containers/web/listSecrets",
            ))
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) => {
            assert_eq!(body["action"], "listSecrets");
            assert_eq!(
                body["target"],
                "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/containers/web"
            );
        });
    }

    #[tokio::test]
    async fn test_unimplemented_capability_and_backend() {
        let router = router("");
        let err = router
            .handle(RouterRequest::new(
                RequestMethod::Delete,
                "/planes/aws/aws/accounts/0/regions/r/providers/AWS.Kinesis/Stream/s1",
            ))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UnsupportedOperation { backend, .. } if backend == "aws");

        let err = router
            .handle(RouterRequest::new(
                RequestMethod::Get,
                "/planes/kubernetes/local/namespaces/default/providers/core/Pod/p",
            ))
            .await
            .unwrap_err();
        assert_matches!(err, Error::BackendUnavailable { .. });
    }

    #[tokio::test]
    async fn test_percent_encoded_composite_name() {
        let router = router("");
        let response = router
            .handle(RouterRequest::new(
                RequestMethod::Get,
                "/planes/aws/aws/accounts/0/regions/r/providers/AWS.RDS/DBProxyEndpoint/proxy%7Cendpoint",
            ))
            .await
            .unwrap();
        assert_matches!(response, BackendResponse::Ok(body) => {
            assert!(body["id"].as_str().unwrap().ends_with("/proxy|endpoint"));
        });
    }

    #[tokio::test]
    async fn test_plane_listing() {
        let router = router("");
        let all = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes"))
            .await
            .unwrap();
        assert_matches!(all, BackendResponse::Ok(body) if body["value"].as_array().unwrap().len() == 3);

        let radius = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes/radius"))
            .await
            .unwrap();
        assert_matches!(radius, BackendResponse::Ok(body) => {
            let planes = body["value"].as_array().unwrap();
            assert_eq!(planes.len(), 1);
            assert_eq!(planes[0]["id"], "/planes/radius/local");
        });

        let plane = router
            .handle(RouterRequest::new(RequestMethod::Get, "/planes/aws/aws"))
            .await
            .unwrap();
        assert_matches!(plane, BackendResponse::Ok(body) if body["properties"]["kind"] == "AWS");

        assert_matches!(
            router.handle(RouterRequest::new(RequestMethod::Put, "/planes/aws/aws")).await,
            Err(Error::UnsupportedOperation { .. })
        );
    }

    #[tokio::test]
    async fn test_unknown_operation_status_is_not_found() {
        let router = router("");
        let err = router
            .handle(RouterRequest::new(
                RequestMethod::Get,
                "/planes/aws/aws/accounts/0/regions/r/providers/AWS.Kinesis/locations/global/operationStatuses/7f1f4c1e-2d5b-4a57-9f0e-7c4d9a3b2e10",
            ))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_split_action_and_relative_path() {
        assert_eq!(
            split_action("/planes/aws/aws/x/:delete"),
            ("/planes/aws/aws/x".to_string(), Some("delete".to_string()))
        );
        assert_eq!(split_action("/planes/aws/aws"), ("/planes/aws/aws".to_string(), None));
        assert_eq!(plane_relative("/planes/aws/aws"), "/");
        assert_eq!(plane_relative("/planes/aws/aws/accounts/0/"), "/accounts/0");
    }

    #[test]
    fn test_api_version_param() {
        let request = RouterRequest::new(RequestMethod::Get, "/").with_query("x=1&api-version=2023-10-01");
        assert_eq!(request.api_version().as_deref(), Some("2023-10-01"));
        assert_eq!(RouterRequest::new(RequestMethod::Get, "/").api_version(), None);
    }
}
