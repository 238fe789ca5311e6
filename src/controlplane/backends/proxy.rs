//! HTTP Proxy Backend
//!
//! Forwards requests to a remote endpoint: the plane URL of an Azure plane
//! (plane-relative path) or a remote resource provider of a UCPNative
//! plane (full path).

use crate::domain::ports::{BackendResponse, PlaneBackend, RequestContext, RequestMethod};
use crate::domain::resource_id::{CollectionTarget, ResourceId, ResourceTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Header some providers use instead of `Location` for async operations
pub const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 200;

/// Which path is appended to the target URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathMode {
    /// Path with the base path removed, starting at `/planes`
    Full,
    /// Path relative to the plane
    PlaneRelative,
}

/// Backend that relays requests over HTTP
pub struct ProxyBackend {
    client: Client,
    base_url: String,
    mode: PathMode,
    name: String,
}

impl ProxyBackend {
    pub fn new(client: Client, base_url: &str, mode: PathMode) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            name: format!("proxy({})", base_url),
            client,
            base_url,
            mode,
        }
    }

    fn url(&self, ctx: &RequestContext, suffix: Option<&str>) -> String {
        let path = match self.mode {
            PathMode::Full => &ctx.path,
            PathMode::PlaneRelative => &ctx.rewritten_path,
        };
        let mut url = format!("{}{}", self.base_url, path.trim_end_matches('/'));
        if let Some(suffix) = suffix {
            url.push('/');
            url.push_str(suffix);
        }
        if let Some(query) = ctx.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    async fn forward(&self, method: Method, url: String, body: Option<Value>) -> Result<BackendResponse> {
        debug!("Proxying {} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        self.map_response(&url, status, &headers, &text)
    }

    fn map_response(
        &self,
        url: &str,
        status: StatusCode,
        headers: &HeaderMap,
        text: &str,
    ) -> Result<BackendResponse> {
        let body = || -> Result<Value> {
            if text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                Ok(serde_json::from_str(text)?)
            }
        };

        match status {
            StatusCode::OK => Ok(BackendResponse::Ok(body()?)),
            StatusCode::CREATED => Ok(BackendResponse::Created(body()?)),
            StatusCode::ACCEPTED => {
                let location = header_str(headers, ASYNC_OPERATION_HEADER)
                    .or_else(|| header_str(headers, LOCATION.as_str()))
                    .unwrap_or_default();
                Ok(BackendResponse::Accepted {
                    location,
                    body: body()?,
                })
            }
            StatusCode::NO_CONTENT => Ok(BackendResponse::NoContent),
            StatusCode::NOT_FOUND => Err(Error::DownstreamNotFound {
                resource: url.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::DownstreamThrottled {
                backend: self.name.clone(),
                retry_after: header_str(headers, RETRY_AFTER.as_str())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER),
            }),
            s if s.is_server_error() => {
                warn!("Upstream {} returned {}", url, s);
                Err(Error::DownstreamTransient {
                    backend: self.name.clone(),
                    reason: format!("{}: {}", s, truncate(text)),
                })
            }
            s if s.is_success() => Ok(BackendResponse::Ok(body()?)),
            s => Err(Error::DownstreamFatal {
                backend: self.name.clone(),
                reason: format!("{}: {}", s, truncate(text)),
            }),
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[async_trait]
impl PlaneBackend for ProxyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &RequestContext, _collection: &CollectionTarget) -> Result<BackendResponse> {
        self.forward(Method::GET, self.url(ctx, None), None).await
    }

    async fn get(&self, ctx: &RequestContext, _id: &ResourceId) -> Result<BackendResponse> {
        self.forward(Method::GET, self.url(ctx, None), None).await
    }

    async fn create_or_update(&self, ctx: &RequestContext, _id: &ResourceId, body: Value) -> Result<BackendResponse> {
        let method = match ctx.method {
            RequestMethod::Patch => Method::PATCH,
            _ => Method::PUT,
        };
        self.forward(method, self.url(ctx, None), Some(body)).await
    }

    async fn delete(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        match self.forward(Method::DELETE, self.url(ctx, None), None).await {
            Err(e) if e.is_not_found() => {
                debug!("{} already absent upstream", id);
                Ok(BackendResponse::NoContent)
            }
            other => other,
        }
    }

    async fn action(
        &self,
        ctx: &RequestContext,
        target: &ResourceTarget,
        action: &str,
        body: Option<Value>,
    ) -> Result<BackendResponse> {
        let suffix = match target {
            ResourceTarget::Resource(_) => action.to_string(),
            ResourceTarget::Collection(_) => format!(":{}", action),
        };
        self.forward(Method::POST, self.url(ctx, Some(&suffix)), body).await
    }
}
