//! In-Memory Object Store
//!
//! Sharded concurrent map keyed by [`StorageKey`]. Per-key isolation comes
//! from DashMap's entry API.

use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use crate::store::keys::{id_matches_query, StorageKey};
use crate::store::{Query, StorageClient, StorageObject};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// In-process [`StorageClient`]
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<StorageKey, StorageObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn check_etag(id: &ResourceId, stored: Option<&str>, expected: Option<&str>) -> Result<()> {
    match (expected, stored) {
        (None, _) => Ok(()),
        (Some(expected), Some(stored)) if expected == stored => Ok(()),
        _ => Err(Error::ConcurrencyConflict { id: id.to_string() }),
    }
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn get(&self, id: &ResourceId) -> Result<StorageObject> {
        self.objects
            .get(&StorageKey::from_id(id))
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })
    }

    async fn save(&self, mut object: StorageObject, etag: Option<&str>) -> Result<StorageObject> {
        let key = StorageKey::from_id(&object.id);
        object.metadata.storage_key = key.to_string();
        object.metadata.etag = Uuid::new_v4().to_string();

        match self.objects.entry(key) {
            Entry::Occupied(mut entry) => {
                check_etag(&object.id, Some(entry.get().etag()), etag)?;
                entry.insert(object.clone());
            }
            Entry::Vacant(entry) => {
                check_etag(&object.id, None, etag)?;
                entry.insert(object.clone());
            }
        }

        debug!("Saved {} (etag {})", object.id, object.metadata.etag);
        Ok(object)
    }

    async fn delete(&self, id: &ResourceId, etag: Option<&str>) -> Result<()> {
        match self.objects.entry(StorageKey::from_id(id)) {
            Entry::Occupied(entry) => {
                check_etag(id, Some(entry.get().etag()), etag)?;
                entry.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(Error::ObjectNotFound { id: id.to_string() }),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<StorageObject>> {
        let mut matches: Vec<(StorageKey, StorageObject)> = self
            .objects
            .iter()
            .filter(|r| id_matches_query(&r.value().id, query))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches.into_iter().map(|(_, object)| object).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get_case_insensitive() {
        let store = MemoryStore::new();
        let saved = store
            .save(
                StorageObject::new(
                    id("/planes/radius/local/resourceGroups/rg1"),
                    json!({"name": "rg1"}),
                ),
                None,
            )
            .await
            .unwrap();
        assert!(!saved.etag().is_empty());

        let got = store
            .get(&id("/planes/RADIUS/local/resourcegroups/RG1"))
            .await
            .unwrap();
        assert_eq!(got.data["name"], "rg1");
        assert_eq!(got.etag(), saved.etag());
    }

    #[tokio::test]
    async fn test_etag_preconditions() {
        let store = MemoryStore::new();
        let rg = id("/planes/radius/local/resourceGroups/rg1");

        assert_matches!(
            store.save(StorageObject::new(rg.clone(), json!({})), Some("nope")).await,
            Err(Error::ConcurrencyConflict { .. })
        );

        let first = store
            .save(StorageObject::new(rg.clone(), json!({"v": 1})), None)
            .await
            .unwrap();
        let second = store
            .save(StorageObject::new(rg.clone(), json!({"v": 2})), Some(first.etag()))
            .await
            .unwrap();
        assert_ne!(first.etag(), second.etag());

        assert_matches!(
            store.save(StorageObject::new(rg.clone(), json!({"v": 3})), Some(first.etag())).await,
            Err(Error::ConcurrencyConflict { .. })
        );
        assert_matches!(
            store.delete(&rg, Some(first.etag())).await,
            Err(Error::ConcurrencyConflict { .. })
        );
        store.delete(&rg, Some(second.etag())).await.unwrap();
        assert_matches!(store.get(&rg).await, Err(Error::ObjectNotFound { .. }));
        assert_matches!(store.delete(&rg, None).await, Err(Error::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_partitions_scopes_and_resources() {
        let store = MemoryStore::new();
        for raw in [
            "/planes/radius/local/resourceGroups/rg1",
            "/planes/radius/local/resourceGroups/rg2",
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/a",
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/b",
            "/planes/radius/local/resourceGroups/rg2/providers/Applications.Core/gateways/g",
        ] {
            store.save(StorageObject::new(id(raw), json!({})), None).await.unwrap();
        }

        let groups = store
            .query(&Query::scopes_of_type("/planes/radius/local", "resourceGroups"))
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);

        let containers = store
            .query(&Query::resources_of_type(
                "/planes/radius/local/resourceGroups/rg1",
                "Applications.Core/containers",
            ))
            .await
            .unwrap();
        let names: Vec<_> = containers.iter().map(|o| o.id.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let everything = store
            .query(&Query {
                root_scope: "/planes/radius/local".into(),
                scope_recursive: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    }
}
