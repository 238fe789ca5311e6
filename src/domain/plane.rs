//! Planes - named routing domains owning a subtree of the address space

use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

/// Marker used in place of a URL for in-process backends
pub const LOCAL_BACKEND: &str = "local";

/// Kind of backend a plane fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PlaneKind {
    /// First-party resource providers, routed by namespace
    #[serde(rename = "UCPNative")]
    UcpNative,
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "Azure")]
    Azure,
    #[serde(rename = "Kubernetes")]
    Kubernetes,
}

impl fmt::Display for PlaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaneKind::UcpNative => write!(f, "UCPNative"),
            PlaneKind::Aws => write!(f, "AWS"),
            PlaneKind::Azure => write!(f, "Azure"),
            PlaneKind::Kubernetes => write!(f, "Kubernetes"),
        }
    }
}

/// Where requests for a plane or provider are sent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendUrl {
    /// Served in-process
    Local,
    /// Proxied to a remote base URL
    Remote(String),
}

impl BackendUrl {
    /// Parse `local` or an absolute http(s) URL
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.eq_ignore_ascii_case(LOCAL_BACKEND) {
            return Ok(BackendUrl::Local);
        }
        if !(raw.starts_with("http://") || raw.starts_with("https://")) {
            return Err(Error::Configuration(format!(
                "backend URL '{}' must be 'local' or an http(s) URL",
                raw
            )));
        }
        Ok(BackendUrl::Remote(raw.trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackendUrl::Local => LOCAL_BACKEND,
            BackendUrl::Remote(url) => url,
        }
    }
}

impl Serialize for BackendUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackendUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BackendUrl::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A registered plane
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    /// Scope ID of the plane, e.g. `/planes/aws/aws`
    pub id: ResourceId,
    pub kind: PlaneKind,
    /// Default backend for the plane
    pub url: Option<BackendUrl>,
    /// Namespace to backend, keyed lowercase (UCPNative planes only)
    pub resource_providers: IndexMap<String, BackendUrl>,
}

impl Plane {
    pub fn new(plane_type: &str, plane_name: &str, kind: PlaneKind) -> Self {
        Self {
            id: ResourceId::plane(plane_type, plane_name),
            kind,
            url: None,
            resource_providers: IndexMap::new(),
        }
    }

    pub fn with_url(mut self, url: BackendUrl) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_provider(mut self, namespace: &str, url: BackendUrl) -> Self {
        self.resource_providers.insert(namespace.to_ascii_lowercase(), url);
        self
    }

    pub fn plane_type(&self) -> &str {
        self.id.plane_type().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.id.plane_name().unwrap_or_default()
    }

    /// Registry key: case-insensitive `(planeType, planeName)`
    pub fn key(&self) -> (String, String) {
        plane_key(self.plane_type(), self.name())
    }

    /// Backend for a provider namespace, falling back to the plane URL
    pub fn provider_backend(&self, namespace: &str) -> Option<&BackendUrl> {
        self.resource_providers
            .get(&namespace.to_ascii_lowercase())
            .or(self.url.as_ref())
    }

    /// Resource representation served by `GET /planes/...`
    pub fn to_resource(&self) -> Value {
        let mut properties = json!({ "kind": self.kind.to_string() });
        if let Some(url) = &self.url {
            properties["url"] = json!(url.as_str());
        }
        if !self.resource_providers.is_empty() {
            properties["resourceProviders"] = json!(self.resource_providers);
        }
        json!({
            "id": self.id.as_str(),
            "type": format!("System.Planes/{}", self.plane_type()),
            "name": self.name(),
            "properties": properties,
        })
    }
}

/// Normalize a plane lookup key
pub fn plane_key(plane_type: &str, plane_name: &str) -> (String, String) {
    (plane_type.to_ascii_lowercase(), plane_name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_url_parse() {
        assert_eq!(BackendUrl::parse("LOCAL").unwrap(), BackendUrl::Local);
        assert_eq!(
            BackendUrl::parse("http://rp:8080/").unwrap(),
            BackendUrl::Remote("http://rp:8080".into())
        );
        assert!(BackendUrl::parse("ftp://nope").is_err());
    }

    #[test]
    fn test_provider_backend_fallback() {
        let plane = Plane::new("radius", "local", PlaneKind::UcpNative)
            .with_url(BackendUrl::Remote("http://default".into()))
            .with_provider("Applications.Core", BackendUrl::Local);

        assert_eq!(plane.provider_backend("applications.core"), Some(&BackendUrl::Local));
        assert_eq!(
            plane.provider_backend("Applications.Dapr"),
            Some(&BackendUrl::Remote("http://default".into()))
        );
    }

    #[test]
    fn test_plane_resource() {
        let plane = Plane::new("aws", "aws", PlaneKind::Aws);
        let resource = plane.to_resource();
        assert_eq!(resource["id"], "/planes/aws/aws");
        assert_eq!(resource["type"], "System.Planes/aws");
        assert_eq!(resource["properties"]["kind"], "AWS");
        assert_eq!(plane.key(), ("aws".to_string(), "aws".to_string()));
    }
}
