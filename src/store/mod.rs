//! Generic Object Store
//!
//! Persists versioned resource bodies, scopes and operation records keyed by
//! decomposed resource addresses. Only the key/query contract is fixed here;
//! engines implement [`StorageClient`].

pub mod keys;
mod memory;

pub use keys::{
    extract_storage_parts, id_matches_query, normalize_part, StorageKey, StorageParts,
    StoragePrefix,
};
pub use memory::MemoryStore;

use crate::domain::resource_id::ResourceId;
use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Stored Objects
// =============================================================================

/// Metadata kept alongside every stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Concurrency token, replaced on every save
    pub etag: String,
    pub storage_key: String,
}

/// A persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    pub id: ResourceId,
    /// Opaque payload
    pub data: Value,
    pub metadata: ObjectMetadata,
}

impl StorageObject {
    /// Wrap a payload for saving; metadata is assigned by the store
    pub fn new(id: ResourceId, data: Value) -> Self {
        let storage_key = StorageKey::from_id(&id).to_string();
        Self {
            id,
            data,
            metadata: ObjectMetadata {
                etag: String::new(),
                storage_key,
            },
        }
    }

    pub fn from_typed<T: Serialize>(id: ResourceId, value: &T) -> Result<Self> {
        Ok(Self::new(id, serde_json::to_value(value)?))
    }

    pub fn as_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub fn etag(&self) -> &str {
        &self.metadata.etag
    }
}

// =============================================================================
// Query
// =============================================================================

/// Filter over stored objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Scope to search under
    pub root_scope: String,
    /// Match every scope below `root_scope` instead of only itself
    pub scope_recursive: bool,
    pub routing_scope_prefix: Option<String>,
    pub resource_type: Option<String>,
    /// Search scopes instead of resources
    pub is_scope_query: bool,
}

impl Query {
    /// The query that selects exactly the object stored under `id`
    pub fn from_id(id: &ResourceId) -> Self {
        if id.is_scope() {
            let last = id.scope_segments().last();
            return Self {
                root_scope: id.truncate().root_scope(),
                scope_recursive: false,
                routing_scope_prefix: last.map(|s| format!("{}/{}", s.scope_type, s.name)),
                resource_type: last.map(|s| s.scope_type.clone()),
                is_scope_query: true,
            };
        }

        Self {
            root_scope: id.root_scope(),
            scope_recursive: false,
            routing_scope_prefix: Some(id.routing_scope()),
            resource_type: Some(id.resource_type()),
            is_scope_query: false,
        }
    }

    /// All resources of a type directly under a scope
    pub fn resources_of_type(root_scope: &str, resource_type: &str) -> Self {
        Self {
            root_scope: root_scope.to_string(),
            resource_type: Some(resource_type.to_string()),
            ..Default::default()
        }
    }

    /// All scopes of a type directly under a scope
    pub fn scopes_of_type(root_scope: &str, scope_type: &str) -> Self {
        Self {
            root_scope: root_scope.to_string(),
            resource_type: Some(scope_type.to_string()),
            is_scope_query: true,
            ..Default::default()
        }
    }
}

// =============================================================================
// Storage Client Port
// =============================================================================

/// Port for the persistent store
///
/// Engines must provide per-key read-modify-write isolation.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fails with `ObjectNotFound` when absent
    async fn get(&self, id: &ResourceId) -> Result<StorageObject>;

    /// Save and return the object with its new ETag
    ///
    /// When `etag` is set the save only succeeds if the stored ETag matches,
    /// otherwise it fails with `ConcurrencyConflict`.
    async fn save(&self, object: StorageObject, etag: Option<&str>) -> Result<StorageObject>;

    /// Fails with `ObjectNotFound` when absent
    async fn delete(&self, id: &ResourceId, etag: Option<&str>) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<StorageObject>>;
}

pub type StorageClientRef = Arc<dyn StorageClient>;
