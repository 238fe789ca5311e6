//! Plane Registry
//!
//! Holds the set of known planes. Lookups read an immutable snapshot; a
//! reload builds a whole new table and swaps it in one step, so a request
//! never observes a half-applied configuration.

use crate::domain::plane::{plane_key, Plane};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

// =============================================================================
// Registry Events
// =============================================================================

/// Changes observed when a new plane table is swapped in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    PlaneAdded { plane_type: String, plane_name: String },
    PlaneRemoved { plane_type: String, plane_name: String },
    PlaneUpdated { plane_type: String, plane_name: String },
}

// =============================================================================
// Plane Table
// =============================================================================

type PlaneTable = IndexMap<(String, String), Arc<Plane>>;

fn build_table(planes: Vec<Plane>) -> Result<PlaneTable> {
    let mut table = PlaneTable::with_capacity(planes.len());
    for plane in planes {
        let key = plane.key();
        if table.contains_key(&key) {
            return Err(Error::Configuration(format!(
                "duplicate plane {}/{}",
                plane.plane_type(),
                plane.name()
            )));
        }
        table.insert(key, Arc::new(plane));
    }
    Ok(table)
}

// =============================================================================
// Plane Registry
// =============================================================================

/// Registry of routable planes
pub struct PlaneRegistry {
    table: RwLock<Arc<PlaneTable>>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl PlaneRegistry {
    /// Create a registry; duplicate `(planeType, planeName)` keys are rejected
    pub fn new(planes: Vec<Plane>) -> Result<Arc<Self>> {
        let table = build_table(planes)?;
        let (event_sender, _) = broadcast::channel(64);
        info!("Plane registry loaded with {} planes", table.len());

        Ok(Arc::new(Self {
            table: RwLock::new(Arc::new(table)),
            event_sender,
        }))
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    fn snapshot(&self) -> Arc<PlaneTable> {
        Arc::clone(&self.table.read())
    }

    /// Case-insensitive lookup
    pub fn resolve(&self, plane_type: &str, plane_name: &str) -> Option<Arc<Plane>> {
        self.snapshot().get(&plane_key(plane_type, plane_name)).cloned()
    }

    /// All planes in configuration order
    pub fn list(&self) -> Vec<Arc<Plane>> {
        self.snapshot().values().cloned().collect()
    }

    pub fn list_by_type(&self, plane_type: &str) -> Vec<Arc<Plane>> {
        self.snapshot()
            .values()
            .filter(|p| p.plane_type().eq_ignore_ascii_case(plane_type))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole plane set atomically
    ///
    /// On error the current table is left untouched.
    pub fn reload(&self, planes: Vec<Plane>) -> Result<Vec<RegistryEvent>> {
        let next = Arc::new(build_table(planes)?);
        let previous = std::mem::replace(&mut *self.table.write(), Arc::clone(&next));

        let mut events = Vec::new();
        for (key, plane) in next.iter() {
            let (plane_type, plane_name) = (plane.plane_type().to_string(), plane.name().to_string());
            match previous.get(key) {
                None => events.push(RegistryEvent::PlaneAdded { plane_type, plane_name }),
                Some(old) if old.as_ref() != plane.as_ref() => {
                    events.push(RegistryEvent::PlaneUpdated { plane_type, plane_name })
                }
                Some(_) => {}
            }
        }
        for (key, plane) in previous.iter() {
            if !next.contains_key(key) {
                events.push(RegistryEvent::PlaneRemoved {
                    plane_type: plane.plane_type().to_string(),
                    plane_name: plane.name().to_string(),
                });
            }
        }

        info!("Plane registry reloaded: {} planes, {} changes", next.len(), events.len());
        for event in &events {
            let _ = self.event_sender.send(event.clone());
        }
        Ok(events)
    }
}
