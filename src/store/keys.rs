//! Storage keys and query matching
//!
//! Every ID is decomposed into `(prefix, rootScope, routingScope, resourceType)`.
//! Scope IDs and resource IDs land under different prefixes so that "all
//! resource groups under a plane" and "all resources of type X under a group"
//! are both prefix scans over the key space.
//!
//! All parts are lowercased and bounded by `/` on both sides, so a prefix
//! match can never stop in the middle of a segment name.

use crate::domain::resource_id::{ResourceId, SEGMENT_SEPARATOR};
use crate::store::Query;
use std::fmt;

/// Separator between the parts of a storage key
pub const KEY_SEPARATOR: char = '|';

/// Partition of the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoragePrefix {
    Scope,
    Resource,
}

impl StoragePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoragePrefix::Scope => "scope",
            StoragePrefix::Resource => "resource",
        }
    }
}

impl fmt::Display for StoragePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decomposed, normalized address parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageParts {
    pub prefix: StoragePrefix,
    pub root_scope: String,
    pub routing_scope: String,
    pub resource_type: String,
}

/// Lowercase and bound a part with separators; empty stays empty
pub fn normalize_part(part: &str) -> String {
    if part.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(part.len() + 2);
    if !part.starts_with(SEGMENT_SEPARATOR) {
        out.push_str(SEGMENT_SEPARATOR);
    }
    out.push_str(part);
    if !part.ends_with(SEGMENT_SEPARATOR) {
        out.push_str(SEGMENT_SEPARATOR);
    }
    out.to_lowercase()
}

/// Decompose an ID into its storage parts
pub fn extract_storage_parts(id: &ResourceId) -> StorageParts {
    if id.is_scope() {
        let (routing_scope, resource_type) = match id.scope_segments().last() {
            Some(last) => (
                normalize_part(&format!("{}{}{}", last.scope_type, SEGMENT_SEPARATOR, last.name)),
                last.scope_type.to_lowercase(),
            ),
            None => (String::new(), String::new()),
        };
        return StorageParts {
            prefix: StoragePrefix::Scope,
            root_scope: normalize_part(&id.truncate().root_scope()),
            routing_scope,
            resource_type,
        };
    }

    StorageParts {
        prefix: StoragePrefix::Resource,
        root_scope: normalize_part(&id.root_scope()),
        routing_scope: normalize_part(&id.routing_scope()),
        resource_type: id.resource_type().to_lowercase(),
    }
}

/// Evaluate a query against an ID
///
/// Checks, in order: prefix kind, scope (prefix or exact per
/// `scope_recursive`), routing scope prefix when set, resource type when set.
pub fn id_matches_query(id: &ResourceId, query: &Query) -> bool {
    let parts = extract_storage_parts(id);

    let wanted = if query.is_scope_query {
        StoragePrefix::Scope
    } else {
        StoragePrefix::Resource
    };
    if parts.prefix != wanted {
        return false;
    }

    let query_root = normalize_part(&query.root_scope);
    let scope_matches = if query.scope_recursive {
        parts.root_scope.starts_with(&query_root)
    } else {
        parts.root_scope == query_root
    };
    if !scope_matches {
        return false;
    }

    if let Some(prefix) = query.routing_scope_prefix.as_deref().filter(|p| !p.is_empty()) {
        if !parts.routing_scope.starts_with(&normalize_part(prefix)) {
            return false;
        }
    }

    match query.resource_type.as_deref().filter(|t| !t.is_empty()) {
        Some(resource_type) => parts.resource_type == resource_type.to_lowercase(),
        None => true,
    }
}

/// Stable key an object is stored under: `{prefix}|{rootScope}|{routingScope}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn from_id(id: &ResourceId) -> Self {
        Self::from_parts(&extract_storage_parts(id))
    }

    pub fn from_parts(parts: &StorageParts) -> Self {
        Self(format!(
            "{}{}{}{}{}",
            parts.prefix, KEY_SEPARATOR, parts.root_scope, KEY_SEPARATOR, parts.routing_scope
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
