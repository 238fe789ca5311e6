//! Scope backend for UCPNative planes
//!
//! Resource groups and other scopes below a plane live in the object store.
//! Planes themselves come from configuration and cannot be written here.

use crate::controlplane::orchestrator::is_operation_status;
use crate::domain::ports::{BackendResponse, PlaneBackend, RequestContext};
use crate::domain::resource_id::{CollectionTarget, ResourceId};
use crate::error::{Error, Result};
use crate::store::{Query, StorageClientRef, StorageObject};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Namespace used in the `type` of stored scopes
pub const SCOPE_TYPE_NAMESPACE: &str = "System.Resources";

pub struct ScopeBackend {
    store: StorageClientRef,
}

impl ScopeBackend {
    pub fn new(store: StorageClientRef) -> Self {
        Self { store }
    }

    fn ensure_writable(id: &ResourceId) -> Result<()> {
        if !id.is_scope() || id.scope_segments().len() < 2 {
            return Err(Error::UnsupportedOperation {
                backend: "scopes".to_string(),
                operation: format!("write {}", id),
            });
        }
        Ok(())
    }

    /// True if any scope or resource other than an operation record is stored below `id`
    async fn has_children(&self, id: &ResourceId) -> Result<bool> {
        let resources = Query {
            root_scope: id.as_str().to_string(),
            scope_recursive: true,
            ..Default::default()
        };
        let found = self.store.query(&resources).await?;
        if found.iter().any(|object| !is_operation_status(&object.id)) {
            return Ok(true);
        }
        let scopes = Query {
            is_scope_query: true,
            ..resources
        };
        Ok(!self.store.query(&scopes).await?.is_empty())
    }
}

fn scope_body(id: &ResourceId, request: &Value) -> Value {
    let scope_type = id
        .scope_segments()
        .last()
        .map(|s| s.scope_type.as_str())
        .unwrap_or_default();
    json!({
        "id": id.as_str(),
        "name": id.name(),
        "type": format!("{}/{}", SCOPE_TYPE_NAMESPACE, scope_type),
        "location": request.get("location").cloned().unwrap_or_else(|| json!("global")),
        "tags": request.get("tags").cloned().unwrap_or_else(|| json!({})),
    })
}

#[async_trait]
impl PlaneBackend for ScopeBackend {
    fn name(&self) -> &str {
        "scopes"
    }

    async fn list(&self, _ctx: &RequestContext, collection: &CollectionTarget) -> Result<BackendResponse> {
        if !collection.is_scope {
            return Err(Error::UnsupportedOperation {
                backend: self.name().to_string(),
                operation: format!("List {}", collection.resource_type),
            });
        }
        let query = Query::scopes_of_type(collection.parent.as_str(), &collection.resource_type);
        let value: Vec<Value> = self
            .store
            .query(&query)
            .await?
            .into_iter()
            .map(|object| object.data)
            .collect();
        Ok(BackendResponse::Ok(json!({ "value": value })))
    }

    async fn get(&self, _ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        Ok(BackendResponse::Ok(self.store.get(id).await?.data))
    }

    async fn create_or_update(&self, _ctx: &RequestContext, id: &ResourceId, body: Value) -> Result<BackendResponse> {
        Self::ensure_writable(id)?;
        let parent = id.truncate();
        if parent.scope_segments().len() > 1 {
            self.store.get(&parent).await.map_err(|e| match e {
                Error::ObjectNotFound { .. } => Error::ApiValidation(format!("parent scope {} does not exist", parent)),
                other => other,
            })?;
        }

        let existed = match self.store.get(id).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        let data = scope_body(id, &body);
        self.store.save(StorageObject::new(id.clone(), data.clone()), None).await?;

        if existed {
            Ok(BackendResponse::Ok(data))
        } else {
            info!("Created scope {}", id);
            Ok(BackendResponse::Created(data))
        }
    }

    async fn delete(&self, _ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        Self::ensure_writable(id)?;
        if self.has_children(id).await? {
            return Err(Error::ScopeNotEmpty { id: id.to_string() });
        }
        match self.store.delete(id, None).await {
            Ok(()) => {
                info!("Deleted scope {}", id);
                Ok(BackendResponse::Ok(Value::Null))
            }
            Err(e) if e.is_not_found() => Ok(BackendResponse::NoContent),
            Err(e) => Err(e),
        }
    }
}
