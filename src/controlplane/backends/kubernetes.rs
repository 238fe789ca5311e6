//! Kubernetes Backend
//!
//! Serves Kubernetes planes through the dynamic API. Objects are addressed
//! as
//!
//! ```text
//! /planes/kubernetes/{cluster}/namespaces/{ns}/providers/{group}/{Kind}/{name}
//! /planes/kubernetes/{cluster}/providers/{group}/{Kind}/{name}      (cluster-scoped)
//! ```
//!
//! with `core` standing for the empty API group. The API version comes from
//! the `api-version` query parameter, then the object's `apiVersion`, then
//! `v1`.

use crate::domain::ports::{BackendResponse, PlaneBackend, RequestContext};
use crate::domain::resource_id::{CollectionTarget, ResourceId, SEGMENT_SEPARATOR};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Group name used in addresses for the core API group
pub const CORE_GROUP: &str = "core";

const DEFAULT_VERSION: &str = "v1";
const NAMESPACES_SCOPE: &str = "namespaces";

/// Where an addressed object lives in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeTarget {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
}

impl KubeTarget {
    /// Map `providers/{group}/{Kind}` plus an optional namespace scope
    fn from_parts(parent: &ResourceId, resource_type: &str) -> Result<Self> {
        let mut parts = resource_type.split(SEGMENT_SEPARATOR);
        let (Some(group), Some(kind), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::malformed(
                parent.as_str(),
                format!("'{}' is not a {{group}}/{{Kind}} type", resource_type),
            ));
        };
        let group = if group.eq_ignore_ascii_case(CORE_GROUP) {
            String::new()
        } else {
            group.to_string()
        };
        Ok(Self {
            group,
            kind: kind.to_string(),
            namespace: parent.find_scope(NAMESPACES_SCOPE).map(str::to_string),
        })
    }

    pub fn from_id(id: &ResourceId) -> Result<Self> {
        if id.type_segments().len() != 1 {
            return Err(Error::malformed(
                id.as_str(),
                "Kubernetes objects are addressed by exactly one type segment",
            ));
        }
        Self::from_parts(id, &id.resource_type())
    }

    pub fn from_collection(collection: &CollectionTarget) -> Result<Self> {
        if collection.is_scope || !collection.parent.is_scope() {
            return Err(Error::malformed(
                collection.parent.as_str(),
                "Kubernetes collections are addressed by one type below a scope",
            ));
        }
        Self::from_parts(&collection.parent, &collection.resource_type)
    }

    pub fn api_resource(&self, version: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(&self.group, version, &self.kind))
    }

    /// `apiVersion` as written in manifests
    pub fn api_version(&self, version: &str) -> String {
        if self.group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", self.group, version)
        }
    }
}

fn version_of(ctx: &RequestContext, body: Option<&Value>) -> String {
    ctx.api_version
        .clone()
        .filter(|v| !v.eq_ignore_ascii_case("default"))
        .or_else(|| {
            body.and_then(|b| b.get("apiVersion"))
                .and_then(Value::as_str)
                .map(|v| v.rsplit('/').next().unwrap_or(v).to_string())
        })
        .unwrap_or_else(|| DEFAULT_VERSION.to_string())
}

/// Fill in identity fields of a manifest from its address
pub fn prepare_manifest(target: &KubeTarget, version: &str, id: &ResourceId, mut body: Value) -> Result<Value> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| Error::ApiValidation("Kubernetes manifest must be a JSON object".into()))?;
    object.insert("apiVersion".into(), json!(target.api_version(version)));
    object.insert("kind".into(), json!(target.kind));

    let metadata = object
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| Error::ApiValidation("metadata must be a JSON object".into()))?;
    metadata.insert("name".into(), json!(id.name()));
    match &target.namespace {
        Some(namespace) => {
            metadata.insert("namespace".into(), json!(namespace));
        }
        None => {
            metadata.remove("namespace");
        }
    }
    Ok(body)
}

/// Backend for Kubernetes planes
pub struct KubernetesBackend {
    client: Client,
    field_manager: String,
}

impl KubernetesBackend {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    fn api(&self, target: &KubeTarget, version: &str) -> Api<DynamicObject> {
        let resource = target.api_resource(version);
        match &target.namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn object_body(id: &ResourceId, object: &DynamicObject) -> Result<Value> {
    let mut body = serde_json::to_value(object)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("id".into(), json!(id.as_str()));
    }
    Ok(body)
}

#[async_trait]
impl PlaneBackend for KubernetesBackend {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn list(&self, ctx: &RequestContext, collection: &CollectionTarget) -> Result<BackendResponse> {
        let target = KubeTarget::from_collection(collection)?;
        let version = version_of(ctx, None);
        let objects = self.api(&target, &version).list(&ListParams::default()).await?;

        let mut value = Vec::with_capacity(objects.items.len());
        for object in &objects.items {
            let Some(name) = object.metadata.name.as_deref() else {
                continue;
            };
            let id = collection.parent.append_type(&collection.resource_type, name)?;
            value.push(object_body(&id, object)?);
        }
        Ok(BackendResponse::Ok(json!({ "value": value })))
    }

    async fn get(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        let target = KubeTarget::from_id(id)?;
        let object = self.api(&target, &version_of(ctx, None)).get(id.name()).await?;
        Ok(BackendResponse::Ok(object_body(id, &object)?))
    }

    async fn create_or_update(&self, ctx: &RequestContext, id: &ResourceId, body: Value) -> Result<BackendResponse> {
        let target = KubeTarget::from_id(id)?;
        let version = version_of(ctx, Some(&body));
        let manifest = prepare_manifest(&target, &version, id, body)?;

        info!("Applying {} {}", target.kind, id);
        let params = PatchParams::apply(&self.field_manager).force();
        let object = self
            .api(&target, &version)
            .patch(id.name(), &params, &Patch::Apply(&manifest))
            .await?;
        Ok(BackendResponse::Ok(object_body(id, &object)?))
    }

    async fn delete(&self, ctx: &RequestContext, id: &ResourceId) -> Result<BackendResponse> {
        let target = KubeTarget::from_id(id)?;
        let result = self
            .api(&target, &version_of(ctx, None))
            .delete(id.name(), &DeleteParams::background())
            .await;

        match result {
            Ok(_) => Ok(BackendResponse::NoContent),
            Err(e) => {
                let err = Error::from(e);
                if err.is_not_found() {
                    debug!("{} already deleted", id);
                    return Ok(BackendResponse::NoContent);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plane::{Plane, PlaneKind};
    use crate::domain::ports::RequestMethod;
    use crate::domain::resource_id::ResourceTarget;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn ctx(api_version: Option<&str>) -> RequestContext {
        RequestContext {
            plane: Arc::new(Plane::new("kubernetes", "local", PlaneKind::Kubernetes)),
            method: RequestMethod::Put,
            path: "/planes/kubernetes/local".into(),
            rewritten_path: "/".into(),
            query: None,
            api_version: api_version.map(str::to_string),
        }
    }

    #[test]
    fn test_namespaced_target() {
        let id = ResourceId::parse(
            "/planes/kubernetes/local/namespaces/default/providers/apps/Deployment/web",
        )
        .unwrap();
        let target = KubeTarget::from_id(&id).unwrap();
        assert_eq!(target.group, "apps");
        assert_eq!(target.kind, "Deployment");
        assert_eq!(target.namespace.as_deref(), Some("default"));

        let resource = target.api_resource("v1");
        assert_eq!(resource.api_version, "apps/v1");
        assert_eq!(resource.plural, "deployments");
    }

    #[test]
    fn test_core_cluster_scoped_target() {
        let id = ResourceId::parse("/planes/kubernetes/local/providers/core/Namespace/team-a").unwrap();
        let target = KubeTarget::from_id(&id).unwrap();
        assert_eq!(target.group, "");
        assert_eq!(target.namespace, None);
        assert_eq!(target.api_version("v1"), "v1");
    }

    #[test]
    fn test_nested_types_rejected() {
        let id = ResourceId::parse(
            "/planes/kubernetes/local/namespaces/default/providers/apps/Deployment/web/scale/s",
        )
        .unwrap();
        assert_matches!(KubeTarget::from_id(&id), Err(Error::MalformedAddress { .. }));
    }

    #[test]
    fn test_collection_target() {
        let target = ResourceId::parse_target("/planes/kubernetes/local/namespaces/ns/providers/core/Secret").unwrap();
        let ResourceTarget::Collection(collection) = target else {
            panic!("expected a collection");
        };
        let target = KubeTarget::from_collection(&collection).unwrap();
        assert_eq!(target.kind, "Secret");
        assert_eq!(target.namespace.as_deref(), Some("ns"));
    }

    #[test]
    fn test_prepare_manifest() {
        let id = ResourceId::parse("/planes/kubernetes/local/namespaces/prod/providers/apps/Deployment/web").unwrap();
        let target = KubeTarget::from_id(&id).unwrap();
        let manifest = prepare_manifest(
            &target,
            "v1",
            &id,
            json!({ "metadata": { "labels": { "app": "web" } }, "spec": { "replicas": 2 } }),
        )
        .unwrap();

        assert_eq!(manifest["apiVersion"], "apps/v1");
        assert_eq!(manifest["kind"], "Deployment");
        assert_eq!(manifest["metadata"]["name"], "web");
        assert_eq!(manifest["metadata"]["namespace"], "prod");
        assert_eq!(manifest["metadata"]["labels"]["app"], "web");

        assert_matches!(
            prepare_manifest(&target, "v1", &id, json!([1, 2])),
            Err(Error::ApiValidation(_))
        );
    }

    #[test]
    fn test_version_selection() {
        assert_eq!(version_of(&ctx(Some("v1beta1")), None), "v1beta1");
        assert_eq!(version_of(&ctx(Some("default")), None), "v1");
        assert_eq!(
            version_of(&ctx(None), Some(&json!({ "apiVersion": "batch/v1" }))),
            "v1"
        );
        assert_eq!(
            version_of(&ctx(None), Some(&json!({ "apiVersion": "networking.k8s.io/v2" }))),
            "v2"
        );
    }
}
