//! Local resource provider
//!
//! Backs provider namespaces that a UCPNative plane serves itself. Records
//! live in the object store; writes and deletes run as async operations.
//! Deleting a record first tears down the output resources listed under
//! `properties.status.outputResources`.

use crate::controlplane::orchestrator::{OperationController, OperationRequest, Orchestrator};
use crate::controlplane::teardown::Teardown;
use crate::domain::operation::OperationMethod;
use crate::domain::output_resource::OutputResource;
use crate::domain::ports::{BackendResponse, PlaneBackend, RequestContext};
use crate::domain::resource_id::{CollectionTarget, ResourceId};
use crate::error::{Error, Result};
use crate::store::{Query, StorageClientRef, StorageObject};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Controller pattern covering every resource type
pub const ANY_RESOURCE_TYPE: &str = "*";

const PROVISIONING_STATE: &str = "provisioningState";

fn set_provisioning_state(record: &mut Value, state: &str) {
    if let Some(properties) = record
        .as_object_mut()
        .and_then(|r| r.entry("properties").or_insert_with(|| json!({})).as_object_mut())
    {
        properties.insert(PROVISIONING_STATE.into(), json!(state));
    }
}

/// Build the stored record from a request body
fn build_record(id: &ResourceId, body: Value) -> Result<Value> {
    let mut record = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            return Err(Error::ApiValidation(
                "resource body must be a JSON object".into(),
            ))
        }
    };
    if record.get("properties").is_some_and(|p| !p.is_object()) {
        return Err(Error::ApiValidation("properties must be a JSON object".into()));
    }
    record.insert("id".into(), json!(id.as_str()));
    record.insert("name".into(), json!(id.name()));
    record.insert("type".into(), json!(id.resource_type()));
    Ok(Value::Object(record))
}

/// Output resources recorded on a stored resource
pub fn output_resources(record: &Value) -> Result<Vec<OutputResource>> {
    match record.pointer("/properties/status/outputResources") {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value.clone())?),
        _ => Ok(Vec::new()),
    }
}

// =============================================================================
// Backend
// =============================================================================

pub struct LocalBackend {
    store: StorageClientRef,
    orchestrator: Arc<Orchestrator>,
}

impl LocalBackend {
    pub fn new(store: StorageClientRef, orchestrator: Arc<Orchestrator>) -> Self {
        Self { store, orchestrator }
    }

    /// Register the fallback put and delete controllers
    ///
    /// They match every resource type at the lowest priority, so providers
    /// with their own controllers still win.
    pub fn register_controllers(store: &StorageClientRef, orchestrator: &Orchestrator, teardown: Arc<Teardown>) {
        orchestrator.register_controller(
            ANY_RESOURCE_TYPE,
            OperationMethod::Put,
            Arc::new(LocalPutController {
                store: Arc::clone(store),
            }),
        );
        orchestrator.register_controller(
            ANY_RESOURCE_TYPE,
            OperationMethod::Delete,
            Arc::new(LocalDeleteController {
                store: Arc::clone(store),
                teardown,
            }),
        );
    }
}

#[async_trait]
impl PlaneBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, _ctx: &RequestContext, collection: &CollectionTarget) -> Result<BackendResponse> {
        let query = if collection.parent.is_scope() {
            Query::resources_of_type(collection.parent.as_str(), &collection.resource_type)
        } else {
            Query {
                root_scope: collection.parent.root_scope(),
                routing_scope_prefix: Some(collection.parent.routing_scope()),
                resource_type: Some(collection.resource_type.clone()),
                ..Default::default()
            }
        };
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

    async fn create_or_update(&self, ctx: &RequestContext, id: &ResourceId, body: Value) -> Result<BackendResponse> {
        let mut record = build_record(id, body)?;
        let desired = record.clone();
        set_provisioning_state(&mut record, "Accepted");
        self.store.save(StorageObject::new(id.clone(), record), None).await?;

        self.orchestrator
            .submit_accepted(id, OperationMethod::Put, Some(desired), ctx.api_version.clone())
            .await
    }

    async fn delete(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        match self.store.get(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(BackendResponse::NoContent),
            Err(e) => return Err(e),
        }
        self.orchestrator
            .submit_accepted(id, OperationMethod::Delete, None, ctx.api_version.clone())
            .await
    }

    async fn delete_inline(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        self.orchestrator
            .run_inline(id, OperationMethod::Delete, None, ctx.api_version.clone())
            .await?;
        Ok(BackendResponse::NoContent)
    }
}

// =============================================================================
// Controllers
// =============================================================================

struct LocalPutController {
    store: StorageClientRef,
}

#[async_trait]
impl OperationController for LocalPutController {
    async fn run(&self, request: &OperationRequest) -> Result<()> {
        let mut record = build_record(&request.resource_id, request.body.clone().unwrap_or(Value::Null))?;
        set_provisioning_state(&mut record, "Succeeded");
        self.store
            .save(StorageObject::new(request.resource_id.clone(), record), None)
            .await?;
        info!("Provisioned {}", request.resource_id);
        Ok(())
    }
}

struct LocalDeleteController {
    store: StorageClientRef,
    teardown: Arc<Teardown>,
}

#[async_trait]
impl OperationController for LocalDeleteController {
    async fn run(&self, request: &OperationRequest) -> Result<()> {
        let id = &request.resource_id;
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("{} was already deleted", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let resources = output_resources(&record.data)?;
        if !resources.is_empty() {
            info!("Deleting {} output resources of {}", resources.len(), id);
            self.teardown.delete_all(&resources).await?;
        }

        match self.store.delete(id, None).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => {
                info!("Deleted {}", id);
                Ok(())
            }
        }
    }
}
