//! Hierarchical Resource Identifiers
//!
//! Every addressable thing in the control plane is named by a [`ResourceId`]:
//!
//! ```text
//! /planes/{planeType}/{planeName}[/{scopeType}/{scopeName}]...
//!     [/providers/{namespace}/{type}/{name}[/{subtype}/{subname}]...]
//! ```
//!
//! The segments before `providers` are *scope* segments (the plane itself is
//! the first one). The segments after it are *type* segments. An ID without
//! type segments is a scope ID (a plane or a resource group), otherwise it is
//! a resource ID.
//!
//! Segment casing is preserved for display. Equality and hashing are
//! case-insensitive.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// Constants
// =============================================================================

/// Separator between address segments
pub const SEGMENT_SEPARATOR: &str = "/";

/// Leading segment of every address
pub const PLANES_SEGMENT: &str = "planes";

/// Marker segment between scopes and types
pub const PROVIDERS_SEGMENT: &str = "providers";

// =============================================================================
// Segments
// =============================================================================

/// A `(type, name)` pair before the `providers` marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScopeSegment {
    pub scope_type: String,
    pub name: String,
}

impl ScopeSegment {
    pub fn new(scope_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope_type: scope_type.into(),
            name: name.into(),
        }
    }
}

/// A `(type, name)` pair after the `providers` marker
///
/// The first type segment of an ID carries the provider namespace in its
/// type (`Applications.Core/containers`); nested segments carry a bare type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSegment {
    pub type_name: String,
    pub name: String,
}

impl TypeSegment {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

// =============================================================================
// Resource ID
// =============================================================================

#[derive(Debug)]
struct IdInner {
    scopes: Vec<ScopeSegment>,
    types: Vec<TypeSegment>,
    rendered: String,
}

/// Immutable, cheaply cloneable resource identifier
#[derive(Clone)]
pub struct ResourceId(Arc<IdInner>);

/// Collection addressed by a path ending in a type without a name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTarget {
    /// Scope or resource the collection lives under
    pub parent: ResourceId,
    /// Fully qualified type of the collection members
    pub resource_type: String,
    /// Whether the members are scopes (e.g. `resourceGroups`)
    pub is_scope: bool,
}

/// Result of parsing a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceTarget {
    Resource(ResourceId),
    Collection(CollectionTarget),
}

impl ResourceId {
    /// Build an ID from already validated segments
    pub fn from_segments(scopes: Vec<ScopeSegment>, types: Vec<TypeSegment>) -> Self {
        let rendered = render(&scopes, &types);
        Self(Arc::new(IdInner {
            scopes,
            types,
            rendered,
        }))
    }

    /// The `/planes` root that every plane lives under
    pub fn planes_root() -> Self {
        Self::from_segments(Vec::new(), Vec::new())
    }

    /// The scope ID of a plane
    pub fn plane(plane_type: impl Into<String>, plane_name: impl Into<String>) -> Self {
        Self::from_segments(vec![ScopeSegment::new(plane_type, plane_name)], Vec::new())
    }

    /// Parse a full scope or resource ID
    pub fn parse(address: &str) -> Result<Self> {
        match Self::parse_target(address)? {
            ResourceTarget::Resource(id) => Ok(id),
            ResourceTarget::Collection(collection) => Err(Error::malformed(
                address,
                format!("type '{}' has no name", collection.resource_type),
            )),
        }
    }

    /// Parse a request path that may address a collection
    pub fn parse_target(address: &str) -> Result<ResourceTarget> {
        let tokens = tokenize(address)?;

        if tokens.len() < 3 || !tokens[0].eq_ignore_ascii_case(PLANES_SEGMENT) {
            return Err(Error::malformed(
                address,
                "address must begin with /planes/{planeType}/{planeName}",
            ));
        }

        let mut scopes = vec![ScopeSegment::new(tokens[1], tokens[2])];
        let mut i = 3;
        while i < tokens.len() && !tokens[i].eq_ignore_ascii_case(PROVIDERS_SEGMENT) {
            match tokens.get(i + 1) {
                Some(name) if !name.eq_ignore_ascii_case(PROVIDERS_SEGMENT) => {
                    scopes.push(ScopeSegment::new(tokens[i], *name));
                    i += 2;
                }
                None => {
                    return Ok(ResourceTarget::Collection(CollectionTarget {
                        parent: Self::from_segments(scopes, Vec::new()),
                        resource_type: tokens[i].to_string(),
                        is_scope: true,
                    }));
                }
                Some(_) => {
                    return Err(Error::malformed(
                        address,
                        format!("scope type '{}' has no name", tokens[i]),
                    ));
                }
            }
        }

        if i == tokens.len() {
            return Ok(ResourceTarget::Resource(Self::from_segments(scopes, Vec::new())));
        }

        let rest = &tokens[i + 1..];
        if rest.len() < 2 {
            return Err(Error::malformed(
                address,
                "providers must be followed by a namespace and a type",
            ));
        }

        let mut types: Vec<TypeSegment> = Vec::new();
        let mut pending = format!("{}{}{}", rest[0], SEGMENT_SEPARATOR, rest[1]);
        let mut j = 2;
        loop {
            match rest.get(j) {
                Some(name) => {
                    types.push(TypeSegment::new(std::mem::take(&mut pending), *name));
                    j += 1;
                }
                None => {
                    let parent = Self::from_segments(scopes, types);
                    let resource_type = if parent.is_scope() {
                        pending
                    } else {
                        format!("{}{}{}", parent.resource_type(), SEGMENT_SEPARATOR, pending)
                    };
                    return Ok(ResourceTarget::Collection(CollectionTarget {
                        parent,
                        resource_type,
                        is_scope: false,
                    }));
                }
            }

            match rest.get(j) {
                Some(next_type) => {
                    pending = next_type.to_string();
                    j += 1;
                }
                None => break,
            }
        }

        Ok(ResourceTarget::Resource(Self::from_segments(scopes, types)))
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.0.rendered
    }

    pub fn scope_segments(&self) -> &[ScopeSegment] {
        &self.0.scopes
    }

    pub fn type_segments(&self) -> &[TypeSegment] {
        &self.0.types
    }

    /// True when the ID ends in a scope segment
    pub fn is_scope(&self) -> bool {
        self.0.types.is_empty()
    }

    /// True for the bare `/planes` root
    pub fn is_planes_root(&self) -> bool {
        self.0.scopes.is_empty() && self.0.types.is_empty()
    }

    pub fn plane_type(&self) -> Option<&str> {
        self.0.scopes.first().map(|s| s.scope_type.as_str())
    }

    pub fn plane_name(&self) -> Option<&str> {
        self.0.scopes.first().map(|s| s.name.as_str())
    }

    /// All scope segments joined, e.g. `/planes/radius/local/resourceGroups/rg`
    pub fn root_scope(&self) -> String {
        render(&self.0.scopes, &[])
    }

    /// Type segments below the root scope, e.g. `Applications.Core/containers/web`
    pub fn routing_scope(&self) -> String {
        self.0
            .types
            .iter()
            .map(|t| format!("{}{}{}", t.type_name, SEGMENT_SEPARATOR, t.name))
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    /// Fully qualified resource type, e.g. `AWS.Kinesis/Stream`; empty for scopes
    pub fn resource_type(&self) -> String {
        self.0
            .types
            .iter()
            .map(|t| t.type_name.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    /// Name of the terminal segment
    pub fn name(&self) -> &str {
        if let Some(last) = self.0.types.last() {
            return &last.name;
        }
        self.0.scopes.last().map(|s| s.name.as_str()).unwrap_or("")
    }

    /// Provider namespace of a resource ID, e.g. `AWS.Kinesis`
    pub fn provider_namespace(&self) -> Option<&str> {
        self.0
            .types
            .first()
            .and_then(|t| t.type_name.split(SEGMENT_SEPARATOR).next())
    }

    /// Drop the terminal segment
    pub fn truncate(&self) -> ResourceId {
        let mut scopes = self.0.scopes.clone();
        let mut types = self.0.types.clone();
        if types.pop().is_none() {
            scopes.pop();
        }
        Self::from_segments(scopes, types)
    }

    /// Look up a scope segment's name by its type, case-insensitively
    pub fn find_scope(&self, scope_type: &str) -> Option<&str> {
        self.0
            .scopes
            .iter()
            .find(|s| s.scope_type.eq_ignore_ascii_case(scope_type))
            .map(|s| s.name.as_str())
    }

    /// Append a type segment, turning a scope ID into a resource ID if needed
    pub fn append_type(&self, type_name: &str, name: &str) -> Result<ResourceId> {
        if self.is_planes_root() {
            return Err(Error::malformed(self.as_str(), "cannot add a type below /planes"));
        }
        if self.is_scope() && !type_name.contains(SEGMENT_SEPARATOR) {
            return Err(Error::malformed(
                self.as_str(),
                format!("first type '{}' must be namespace qualified", type_name),
            ));
        }
        validate_name(self.as_str(), name)?;
        let mut types = self.0.types.clone();
        types.push(TypeSegment::new(type_name, name));
        Ok(Self::from_segments(self.0.scopes.clone(), types))
    }

    /// Append a scope segment to a scope ID
    pub fn append_scope(&self, scope_type: &str, name: &str) -> Result<ResourceId> {
        if !self.is_scope() {
            return Err(Error::malformed(
                self.as_str(),
                "scopes cannot be nested below a resource",
            ));
        }
        validate_name(self.as_str(), scope_type)?;
        validate_name(self.as_str(), name)?;
        let mut scopes = self.0.scopes.clone();
        scopes.push(ScopeSegment::new(scope_type, name));
        Ok(Self::from_segments(scopes, Vec::new()))
    }

    /// The AWS CloudFormation style type name, e.g. `AWS::Kinesis::Stream`
    pub fn to_aws_type(&self) -> String {
        self.resource_type().replace(['.', '/'], "::")
    }
}

fn validate_name(address: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEGMENT_SEPARATOR) {
        return Err(Error::malformed(
            address,
            format!("segment '{}' must be non-empty and contain no '/'", name),
        ));
    }
    Ok(())
}

fn tokenize(address: &str) -> Result<Vec<&str>> {
    let Some(body) = address.strip_prefix(SEGMENT_SEPARATOR) else {
        return Err(Error::malformed(address, "address must start with '/'"));
    };
    let body = body.strip_suffix(SEGMENT_SEPARATOR).unwrap_or(body);
    if body.is_empty() {
        return Err(Error::malformed(
            address,
            "address must begin with /planes/{planeType}/{planeName}",
        ));
    }

    let tokens: Vec<&str> = body.split(SEGMENT_SEPARATOR).collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::malformed(address, "empty segment between separators"));
    }
    Ok(tokens)
}

fn render(scopes: &[ScopeSegment], types: &[TypeSegment]) -> String {
    let mut out = String::with_capacity(64);
    out.push_str(SEGMENT_SEPARATOR);
    out.push_str(PLANES_SEGMENT);
    for scope in scopes {
        out.push_str(SEGMENT_SEPARATOR);
        out.push_str(&scope.scope_type);
        out.push_str(SEGMENT_SEPARATOR);
        out.push_str(&scope.name);
    }
    for (i, segment) in types.iter().enumerate() {
        if i == 0 {
            out.push_str(SEGMENT_SEPARATOR);
            out.push_str(PROVIDERS_SEGMENT);
        }
        out.push_str(SEGMENT_SEPARATOR);
        out.push_str(&segment.type_name);
        out.push_str(SEGMENT_SEPARATOR);
        out.push_str(&segment.name);
    }
    out
}

// =============================================================================
// Trait Implementations
// =============================================================================

// Same lowercasing as storage keys, so equal IDs share a key
impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str() || self.as_str().to_lowercase() == other.as_str().to_lowercase()
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().to_lowercase().hash(state);
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceId").field(&self.as_str()).finish()
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ResourceId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const CONTAINER: &str =
        "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/web";

    #[test]
    fn test_parse_resource_id() {
        let id = ResourceId::parse(CONTAINER).unwrap();
        assert!(!id.is_scope());
        assert_eq!(id.plane_type(), Some("radius"));
        assert_eq!(id.plane_name(), Some("local"));
        assert_eq!(id.root_scope(), "/planes/radius/local/resourceGroups/rg1");
        assert_eq!(id.routing_scope(), "Applications.Core/containers/web");
        assert_eq!(id.resource_type(), "Applications.Core/containers");
        assert_eq!(id.provider_namespace(), Some("Applications.Core"));
        assert_eq!(id.name(), "web");
        assert_eq!(id.to_string(), CONTAINER);
    }

    #[test]
    fn test_parse_nested_types() {
        let id = ResourceId::parse(
            "/planes/aws/aws/accounts/0000/regions/us-west-2/providers/AWS.EKS/Cluster/c1/Nodegroup/ng1",
        )
        .unwrap();
        assert_eq!(id.resource_type(), "AWS.EKS/Cluster/Nodegroup");
        assert_eq!(id.routing_scope(), "AWS.EKS/Cluster/c1/Nodegroup/ng1");
        assert_eq!(id.find_scope("regions"), Some("us-west-2"));
        assert_eq!(id.find_scope("ACCOUNTS"), Some("0000"));
        assert_eq!(id.find_scope("resourceGroups"), None);
        assert_eq!(id.to_aws_type(), "AWS::EKS::Cluster::Nodegroup");
    }

    #[test]
    fn test_parse_scope_id() {
        let id = ResourceId::parse("/planes/radius/local/resourceGroups/rg1").unwrap();
        assert!(id.is_scope());
        assert_eq!(id.resource_type(), "");
        assert_eq!(id.routing_scope(), "");
        assert_eq!(id.name(), "rg1");

        let plane = ResourceId::parse("/planes/aws/aws/").unwrap();
        assert!(plane.is_scope());
        assert_eq!(plane.to_string(), "/planes/aws/aws");
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        let cases = [
            "",
            "planes/radius/local",
            "/",
            "/planes",
            "/planes/radius",
            "/subscriptions/sub/resourceGroups/rg",
            "/planes/radius/local//resourceGroups/rg",
            "/planes/radius/local/resourceGroups/rg/providers",
            "/planes/radius/local/resourceGroups/rg/providers/Applications.Core",
            "/planes/radius/local/resourceGroups/providers/Applications.Core/containers/web",
        ];
        for case in cases {
            assert_matches!(
                ResourceId::parse(case),
                Err(Error::MalformedAddress { .. }),
                "expected {case:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_dangling_type_is_rejected_by_parse() {
        let err = ResourceId::parse(
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers",
        )
        .unwrap_err();
        assert_matches!(err, Error::MalformedAddress { reason, .. } if reason.contains("no name"));
    }

    #[test]
    fn test_parse_target_collections() {
        let target = ResourceId::parse_target(
            "/planes/aws/aws/accounts/0000/regions/us-west-2/providers/AWS.Kinesis/Stream",
        )
        .unwrap();
        assert_matches!(target, ResourceTarget::Collection(c) => {
            assert_eq!(c.resource_type, "AWS.Kinesis/Stream");
            assert!(!c.is_scope);
            assert_eq!(c.parent.as_str(), "/planes/aws/aws/accounts/0000/regions/us-west-2");
        });

        let target = ResourceId::parse_target("/planes/radius/local/resourceGroups").unwrap();
        assert_matches!(target, ResourceTarget::Collection(c) => {
            assert_eq!(c.resource_type, "resourceGroups");
            assert!(c.is_scope);
            assert_eq!(c.parent.as_str(), "/planes/radius/local");
        });

        let target = ResourceId::parse_target(
            "/planes/aws/aws/accounts/0/regions/r/providers/AWS.EKS/Cluster/c1/Nodegroup",
        )
        .unwrap();
        assert_matches!(target, ResourceTarget::Collection(c) => {
            assert_eq!(c.resource_type, "AWS.EKS/Cluster/Nodegroup");
            assert_eq!(c.parent.resource_type(), "AWS.EKS/Cluster");
        });
    }

    #[test]
    fn test_truncate() {
        let id = ResourceId::parse(CONTAINER).unwrap();
        let rg = id.truncate();
        assert_eq!(rg.as_str(), "/planes/radius/local/resourceGroups/rg1");
        let plane = rg.truncate();
        assert_eq!(plane.as_str(), "/planes/radius/local");
        let root = plane.truncate();
        assert!(root.is_planes_root());
        assert_eq!(root.as_str(), "/planes");
        assert_eq!(root.truncate().as_str(), "/planes");
    }

    #[test]
    fn test_composite_name_is_opaque() {
        let id = ResourceId::parse(
            "/planes/aws/aws/accounts/0/regions/r/providers/AWS.RDS/DBProxyEndpoint/proxy|endpoint",
        )
        .unwrap();
        assert_eq!(id.name(), "proxy|endpoint");
        assert_eq!(id.resource_type(), "AWS.RDS/DBProxyEndpoint");
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = ResourceId::parse(CONTAINER).unwrap();
        let b = ResourceId::parse(&CONTAINER.to_uppercase()).unwrap();
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(b.as_str(), CONTAINER);

        let lower = ResourceId::parse("/planes/radius/local/resourceGroups/rg/providers/Applications.Core/übertype/x").unwrap();
        let upper = ResourceId::parse("/planes/radius/local/resourceGroups/rg/providers/Applications.Core/ÜBERTYPE/x").unwrap();
        assert_eq!(lower, upper);
        assert!(set.contains(&b));
        set.insert(lower);
        assert!(set.contains(&upper));
    }

    #[test]
    fn test_append_segments() {
        let scope = ResourceId::parse("/planes/radius/local").unwrap();
        let rg = scope.append_scope("resourceGroups", "rg1").unwrap();
        let id = rg.append_type("Applications.Core/containers", "web").unwrap();
        assert_eq!(id.as_str(), CONTAINER);

        assert_matches!(rg.append_type("containers", "web"), Err(Error::MalformedAddress { .. }));
        assert_matches!(id.append_scope("resourceGroups", "x"), Err(Error::MalformedAddress { .. }));
        assert_matches!(
            ResourceId::planes_root().append_type("A.B/c", "d"),
            Err(Error::MalformedAddress { .. })
        );
    }

    #[test]
    fn test_serde_as_string() {
        let id = ResourceId::parse(CONTAINER).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", CONTAINER));
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<ResourceId>("\"/not/a/plane\"").is_err());
    }
}
