//! AWS Cloud-Control Adapter
//!
//! Serves the AWS plane over a [`CloudControlClient`]. Reads are answered
//! synchronously; creates, updates and deletes are handed to the
//! orchestrator and completed by the controllers in this module, which poll
//! the cloud-control request token until it settles.
//!
//! Resources whose type declares several primary identifiers are addressed
//! by a composite name: the identifier values joined with `|` in schema
//! order.

use crate::config::AwsSettings;
use crate::controlplane::orchestrator::{OperationController, OperationRequest, Orchestrator};
use crate::domain::operation::OperationMethod;
use crate::domain::ports::{
    AwsScope, BackendResponse, CloudControlClientRef, PlaneBackend, ProgressEvent, ProgressStatus,
    RequestContext, ResourceDescription, TypeSchema,
};
use crate::domain::resource_id::{CollectionTarget, ResourceId, ResourceTarget, SEGMENT_SEPARATOR};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Separator between the values of a composite identifier
pub const IDENTIFIER_SEPARATOR: &str = "|";

/// Prefix of property paths in a resource type schema
pub const PROPERTIES_PREFIX: &str = "/properties/";

const THROTTLE_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// Property Helpers
// =============================================================================

/// Strip `/properties/` from a schema property path
pub fn parse_property_name(path: &str) -> Result<&str> {
    match path.strip_prefix(PROPERTIES_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(Error::ApiValidation(format!(
            "property identifier {} is not in the format /properties/<propertyName>",
            path
        ))),
    }
}

fn lookup<'a>(properties: &'a Value, name: &str) -> Option<&'a Value> {
    name.split(SEGMENT_SEPARATOR)
        .try_fold(properties, |value, key| value.get(key))
}

/// Join the primary identifier values of `properties` in schema order
pub fn composite_identifier(properties: &Value, schema: &TypeSchema, resource_type: &str) -> Result<String> {
    let mut values = Vec::with_capacity(schema.primary_identifier.len());
    for identifier in &schema.primary_identifier {
        let name = identifier.strip_prefix(PROPERTIES_PREFIX).unwrap_or(identifier);
        let value = match lookup(properties, name) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => {
                return Err(Error::MissingRequiredProperty {
                    property: name.to_string(),
                    resource_type: resource_type.to_string(),
                })
            }
        };
        values.push(value);
    }
    if values.is_empty() {
        return Err(Error::DownstreamFatal {
            backend: "aws".to_string(),
            reason: format!("type {} declares no primary identifier", resource_type),
        });
    }
    Ok(values.join(IDENTIFIER_SEPARATOR))
}

/// Flatten nested objects into `A/B/C` keyed leaves
///
/// Arrays and scalars are leaves; an empty object is kept as a leaf.
pub fn flatten_properties(properties: &Value) -> Map<String, Value> {
    fn walk(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}{}{}", prefix, SEGMENT_SEPARATOR, key)
                    };
                    walk(&path, child, out);
                }
            }
            leaf if !prefix.is_empty() => {
                out.insert(prefix.to_string(), leaf.clone());
            }
            _ => {}
        }
    }

    let mut out = Map::new();
    walk("", properties, &mut out);
    out
}

/// Inverse of [`flatten_properties`]
pub fn unflatten_properties(flat: &Map<String, Value>) -> Value {
    let mut root = Map::new();
    for (path, value) in flat {
        let mut keys = path.split(SEGMENT_SEPARATOR).peekable();
        let mut node = &mut root;
        while let Some(key) = keys.next() {
            if keys.peek().is_none() {
                node.insert(key.to_string(), value.clone());
                break;
            }
            let child = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = match child {
                Value::Object(map) => map,
                _ => break,
            };
        }
    }
    Value::Object(root)
}

/// One RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn diff(path: &str, current: &Value, desired: &Value, out: &mut Vec<PatchOperation>) {
    match (current, desired) {
        (Value::Object(cur), Value::Object(des)) => {
            for (key, cur_child) in cur {
                let child_path = format!("{}/{}", path, escape_pointer(key));
                match des.get(key) {
                    Some(des_child) => diff(&child_path, cur_child, des_child, out),
                    None => out.push(PatchOperation::Remove { path: child_path }),
                }
            }
            for (key, des_child) in des {
                if !cur.contains_key(key) {
                    out.push(PatchOperation::Add {
                        path: format!("{}/{}", path, escape_pointer(key)),
                        value: des_child.clone(),
                    });
                }
            }
        }
        (cur, des) if cur != des => out.push(PatchOperation::Replace {
            path: path.to_string(),
            value: des.clone(),
        }),
        _ => {}
    }
}

/// Patch turning `current` into `desired`
///
/// Read-only and create-only properties are left out on both sides, so
/// values the caller cannot change never produce an operation.
pub fn generate_patch(current: &Value, desired: &Value, schema: &TypeSchema) -> Vec<PatchOperation> {
    let immutable: Vec<&str> = schema
        .read_only_properties
        .iter()
        .chain(&schema.create_only_properties)
        .filter_map(|p| parse_property_name(p).ok())
        .collect();
    let is_immutable = |key: &str| {
        immutable.iter().any(|p| {
            key == *p
                || key
                    .strip_prefix(p)
                    .is_some_and(|rest| rest.starts_with(SEGMENT_SEPARATOR))
        })
    };

    let prune = |value: &Value| {
        let flat: Map<String, Value> = flatten_properties(value)
            .into_iter()
            .filter(|(key, _)| !is_immutable(key))
            .collect();
        unflatten_properties(&flat)
    };

    let mut patch = Vec::new();
    diff("", &prune(current), &prune(desired), &mut patch);
    patch
}

// =============================================================================
// Shared Client State
// =============================================================================

/// Cloud-control client plus the per-type schema cache
pub struct AwsResources {
    client: CloudControlClientRef,
    schemas: DashMap<String, Arc<TypeSchema>>,
    poll_interval: Duration,
}

impl AwsResources {
    pub fn new(client: CloudControlClientRef, settings: &AwsSettings) -> Arc<Self> {
        Arc::new(Self {
            client,
            schemas: DashMap::new(),
            poll_interval: settings.poll_interval(),
        })
    }

    /// Type schema, described once per type
    pub async fn schema(&self, scope: &AwsScope, type_name: &str) -> Result<Arc<TypeSchema>> {
        if let Some(schema) = self.schemas.get(type_name) {
            return Ok(Arc::clone(schema.value()));
        }
        let schema = Arc::new(self.client.describe_type(scope, type_name).await?);
        debug!("Cached schema for {}", type_name);
        self.schemas.insert(type_name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Poll a request token until the request settles
    async fn await_request(&self, scope: &AwsScope, mut progress: ProgressEvent) -> Result<ProgressEvent> {
        while !progress.operation_status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            progress = self
                .client
                .get_resource_request_status(scope, &progress.request_token)
                .await?;
        }
        match progress.operation_status {
            ProgressStatus::Success => Ok(progress),
            ProgressStatus::CancelComplete => Err(Error::Canceled),
            _ => Err(progress_error(&progress)),
        }
    }
}

/// Map a failed request to an error by handler error code
fn progress_error(progress: &ProgressEvent) -> Error {
    let reason = progress
        .status_message
        .clone()
        .unwrap_or_else(|| format!("request {} failed", progress.request_token));
    match progress.error_code.as_deref() {
        Some("NotFound") => Error::DownstreamNotFound {
            resource: progress.identifier.clone().unwrap_or_default(),
        },
        Some("Throttling") => Error::DownstreamThrottled {
            backend: "aws".to_string(),
            retry_after: THROTTLE_DELAY,
        },
        Some(
            "NetworkFailure" | "ServiceInternalError" | "ServiceLimitExceeded" | "InternalFailure"
            | "ResourceConflict" | "NotStabilized",
        ) => Error::DownstreamTransient {
            backend: "aws".to_string(),
            reason,
        },
        _ => Error::DownstreamFatal {
            backend: "aws".to_string(),
            reason,
        },
    }
}

fn resource_body(id: &ResourceId, description: &ResourceDescription) -> Value {
    json!({
        "id": id.as_str(),
        "name": id.name(),
        "type": id.resource_type(),
        "properties": description.properties,
    })
}

fn body_properties(body: Option<&Value>) -> Value {
    body.and_then(|b| b.get("properties"))
        .filter(|p| p.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn aws_type(resource_type: &str) -> String {
    resource_type.replace(['.', '/'], "::")
}

// =============================================================================
// Plane Backend
// =============================================================================

/// Router backend for AWS planes
pub struct AwsBackend {
    resources: Arc<AwsResources>,
    orchestrator: Arc<Orchestrator>,
}

impl AwsBackend {
    pub fn new(resources: Arc<AwsResources>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            resources,
            orchestrator,
        }
    }

    /// Register the PUT and DELETE controllers for AWS resource types
    pub fn register_controllers(resources: &Arc<AwsResources>, orchestrator: &Orchestrator) {
        orchestrator.register_controller(
            "AWS.*",
            OperationMethod::Put,
            Arc::new(AwsPutController {
                resources: Arc::clone(resources),
            }),
        );
        orchestrator.register_controller(
            "AWS.*",
            OperationMethod::Delete,
            Arc::new(AwsDeleteController {
                resources: Arc::clone(resources),
            }),
        );
    }

    /// Resource ID for a collection member named by its composite identifier
    async fn member_id(&self, collection: &CollectionTarget, body: Option<&Value>) -> Result<ResourceId> {
        if !collection.parent.is_scope() {
            return Err(Error::malformed(
                collection.parent.as_str(),
                "AWS actions address a resource type below a region scope",
            ));
        }
        let scope = AwsScope::from_id(&collection.parent)?;
        let type_name = aws_type(&collection.resource_type);
        let schema = self.resources.schema(&scope, &type_name).await?;
        let identifier = composite_identifier(&body_properties(body), &schema, &collection.resource_type)?;
        collection.parent.append_type(&collection.resource_type, &identifier)
    }

    async fn read(&self, id: &ResourceId) -> Result<BackendResponse> {
        let scope = AwsScope::from_id(id)?;
        let description = self
            .resources
            .client
            .get_resource(&scope, &id.to_aws_type(), id.name())
            .await?;
        Ok(BackendResponse::Ok(resource_body(id, &description)))
    }
}

#[async_trait]
impl PlaneBackend for AwsBackend {
    fn name(&self) -> &str {
        "aws"
    }

    async fn list(&self, _ctx: &RequestContext, collection: &CollectionTarget) -> Result<BackendResponse> {
        if collection.is_scope || !collection.parent.is_scope() {
            return Err(Error::UnsupportedOperation {
                backend: self.name().to_string(),
                operation: format!("List {}", collection.resource_type),
            });
        }
        let scope = AwsScope::from_id(&collection.parent)?;
        let descriptions = self
            .resources
            .client
            .list_resources(&scope, &aws_type(&collection.resource_type))
            .await?;

        let mut value = Vec::with_capacity(descriptions.len());
        for description in &descriptions {
            let name = if description.identifier.contains(SEGMENT_SEPARATOR) {
                urlencoding::encode(&description.identifier).into_owned()
            } else {
                description.identifier.clone()
            };
            let id = collection.parent.append_type(&collection.resource_type, &name)?;
            value.push(resource_body(&id, description));
        }
        Ok(BackendResponse::Ok(json!({ "value": value })))
    }

    async fn get(&self, _ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        self.read(id).await
    }

    async fn create_or_update(&self, ctx: &RequestContext, id: &ResourceId, body: Value) -> Result<BackendResponse> {
        AwsScope::from_id(id)?;
        self.orchestrator
            .submit_accepted(id, OperationMethod::Put, Some(body), ctx.api_version.clone())
            .await
    }

    async fn delete(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        AwsScope::from_id(id)?;
        self.orchestrator
            .submit_accepted(id, OperationMethod::Delete, None, ctx.api_version.clone())
            .await
    }

    async fn delete_inline(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        AwsScope::from_id(id)?;
        self.orchestrator
            .run_inline(id, OperationMethod::Delete, None, ctx.api_version.clone())
            .await?;
        Ok(BackendResponse::NoContent)
    }

    async fn action(
        &self,
        ctx: &RequestContext,
        target: &ResourceTarget,
        action: &str,
        body: Option<Value>,
    ) -> Result<BackendResponse> {
        let ResourceTarget::Collection(collection) = target else {
            return Err(Error::UnsupportedOperation {
                backend: self.name().to_string(),
                operation: format!("Action({})", action),
            });
        };

        match action.to_ascii_lowercase().as_str() {
            "put" => {
                let id = self.member_id(collection, body.as_ref()).await?;
                info!("Creating or updating {} by properties", id);
                self.orchestrator
                    .submit_accepted(&id, OperationMethod::Put, body, ctx.api_version.clone())
                    .await
            }
            "get" => {
                let id = self.member_id(collection, body.as_ref()).await?;
                self.read(&id).await
            }
            "delete" => {
                let id = self.member_id(collection, body.as_ref()).await?;
                self.orchestrator
                    .submit_accepted(&id, OperationMethod::Delete, None, ctx.api_version.clone())
                    .await
            }
            _ => Err(Error::UnsupportedOperation {
                backend: self.name().to_string(),
                operation: format!("Action({})", action),
            }),
        }
    }
}

// =============================================================================
// Controllers
// =============================================================================

/// Creates a resource, or patches it when it already exists
struct AwsPutController {
    resources: Arc<AwsResources>,
}

#[async_trait]
impl OperationController for AwsPutController {
    async fn run(&self, request: &OperationRequest) -> Result<()> {
        let id = &request.resource_id;
        let scope = AwsScope::from_id(id)?;
        let type_name = id.to_aws_type();
        let client = &self.resources.client;
        let desired = body_properties(request.body.as_ref());

        let progress = match client.get_resource(&scope, &type_name, id.name()).await {
            Ok(current) => {
                let schema = self.resources.schema(&scope, &type_name).await?;
                let patch = generate_patch(&current.properties, &desired, &schema);
                if patch.is_empty() {
                    debug!("{} is already up to date", id);
                    return Ok(());
                }
                info!("Updating {} with {} patch operations", id, patch.len());
                client
                    .update_resource(&scope, &type_name, id.name(), &serde_json::to_value(&patch)?)
                    .await?
            }
            Err(e) if e.is_not_found() => {
                info!("Creating {}", id);
                client.create_resource(&scope, &type_name, &desired).await?
            }
            Err(e) => return Err(e),
        };

        self.resources.await_request(&scope, progress).await?;
        Ok(())
    }
}

/// Deletes a resource; an absent resource counts as deleted
struct AwsDeleteController {
    resources: Arc<AwsResources>,
}

#[async_trait]
impl OperationController for AwsDeleteController {
    async fn run(&self, request: &OperationRequest) -> Result<()> {
        let id = &request.resource_id;
        let scope = AwsScope::from_id(id)?;
        let type_name = id.to_aws_type();

        let outcome = match self
            .resources
            .client
            .delete_resource(&scope, &type_name, id.name())
            .await
        {
            Ok(progress) => self.resources.await_request(&scope, progress).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match outcome {
            Err(e) if e.is_not_found() => {
                warn!("{} was already deleted", id);
                Ok(())
            }
            other => other,
        }
    }
}
