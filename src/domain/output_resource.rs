//! Output resources produced on behalf of a higher-level resource

use crate::domain::resource_id::ResourceId;
use serde::{Deserialize, Serialize};

/// Provider that owns an output resource, e.g. `aws` or `kubernetes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeProvider {
    #[serde(rename = "type")]
    pub type_name: String,
    pub provider: String,
}

/// A downstream artifact tracked for later deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResource {
    pub id: ResourceId,
    #[serde(default)]
    pub local_id: String,
    #[serde(default, rename = "resourceType", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceTypeProvider>,
    /// Whether this control plane created the resource and owns its lifetime
    #[serde(default, alias = "radiusManaged", skip_serializing_if = "Option::is_none")]
    pub managed: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl OutputResource {
    pub fn new(id: ResourceId, provider: impl Into<String>) -> Self {
        let type_name = id.resource_type();
        Self {
            id,
            local_id: String::new(),
            resource_type: Some(ResourceTypeProvider {
                type_name,
                provider: provider.into(),
            }),
            managed: Some(true),
            dependencies: Vec::new(),
        }
    }

    pub fn unmanaged(mut self) -> Self {
        self.managed = Some(false);
        self
    }

    /// Only explicitly managed resources are torn down
    pub fn is_managed(&self) -> bool {
        self.managed.unwrap_or(false)
    }

    /// Owning provider, falling back to the plane type of the ID
    pub fn provider(&self) -> &str {
        self.resource_type
            .as_ref()
            .map(|t| t.provider.as_str())
            .or_else(|| self.id.plane_type())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_defaults_to_false() {
        let raw = serde_json::json!({
            "id": "/planes/aws/aws/accounts/0/regions/r/providers/AWS.S3/Bucket/b",
            "localId": "bucket",
        });
        let resource: OutputResource = serde_json::from_value(raw).unwrap();
        assert!(!resource.is_managed());
        assert_eq!(resource.provider(), "aws");
    }

    #[test]
    fn test_radius_managed_alias() {
        let raw = serde_json::json!({
            "id": "/planes/kubernetes/local/namespaces/default/providers/apps/Deployment/web",
            "resourceType": { "type": "apps/Deployment", "provider": "kubernetes" },
            "radiusManaged": true,
        });
        let resource: OutputResource = serde_json::from_value(raw).unwrap();
        assert!(resource.is_managed());
        assert_eq!(resource.provider(), "kubernetes");
    }
}
