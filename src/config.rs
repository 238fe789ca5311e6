//! Control plane configuration
//!
//! Loaded from a YAML file at start-up. The `planes` section is re-read on
//! reload; everything else is fixed for the life of the process.
//!
//! ```yaml
//! basePath: /apis/api.ucp.dev/v1alpha3
//! planes:
//!   - id: /planes/radius/local
//!     properties:
//!       kind: UCPNative
//!       resourceProviders:
//!         Applications.Core: local
//!   - id: /planes/aws/aws
//!     properties:
//!       kind: AWS
//! ```

use crate::domain::plane::{BackendUrl, Plane, PlaneKind};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Top-level Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UcpConfig {
    /// Prefix stripped from every request path before routing
    pub base_path: String,
    pub planes: Vec<PlaneConfig>,
    pub orchestrator: OrchestratorSettings,
    pub teardown: TeardownSettings,
    pub aws: AwsSettings,
    pub kubernetes: KubernetesSettings,
}

/// One plane entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaneConfig {
    /// Plane scope ID, e.g. `/planes/aws/aws`
    pub id: String,
    pub properties: PlaneProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaneProperties {
    pub kind: PlaneKind,
    /// Default backend URL or `local`
    #[serde(default)]
    pub url: Option<String>,
    /// Namespace to URL or `local`
    #[serde(default)]
    pub resource_providers: IndexMap<String, String>,
}

impl PlaneConfig {
    /// Validate and convert into a routable [`Plane`]
    pub fn to_plane(&self) -> Result<Plane> {
        let id = ResourceId::parse(&self.id)
            .map_err(|e| Error::Configuration(format!("plane id: {}", e)))?;
        if id.scope_segments().len() != 1 || !id.is_scope() {
            return Err(Error::Configuration(format!(
                "plane id '{}' must have the form /planes/{{planeType}}/{{planeName}}",
                self.id
            )));
        }

        let mut plane = Plane {
            id,
            kind: self.properties.kind,
            url: self.properties.url.as_deref().map(BackendUrl::parse).transpose()?,
            resource_providers: IndexMap::new(),
        };
        for (namespace, url) in &self.properties.resource_providers {
            plane = plane.with_provider(namespace, BackendUrl::parse(url)?);
        }

        if plane.kind == PlaneKind::Azure && plane.url.is_none() {
            return Err(Error::Configuration(format!(
                "Azure plane '{}' requires a url",
                self.id
            )));
        }
        Ok(plane)
    }
}

// =============================================================================
// Orchestrator Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Concurrent operation workers
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Visibility lease on a dequeued message
    pub lease_duration_secs: u64,
    /// Attempts before a retryable failure is recorded as `Failed`
    pub max_attempts: u32,
    /// Time limit for a single operation attempt
    pub operation_timeout_secs: u64,
    pub retry_initial_interval_millis: u64,
    pub retry_max_interval_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            lease_duration_secs: 30,
            max_attempts: 5,
            operation_timeout_secs: 120,
            retry_initial_interval_millis: 500,
            retry_max_interval_secs: 30,
        }
    }
}

impl OrchestratorSettings {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retry_initial_interval(&self) -> Duration {
        Duration::from_millis(self.retry_initial_interval_millis)
    }

    pub fn retry_max_interval(&self) -> Duration {
        Duration::from_secs(self.retry_max_interval_secs)
    }
}

// =============================================================================
// Teardown Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TeardownSettings {
    /// Providers whose deletes may report stale failures and are retried
    pub eventually_consistent_providers: Vec<String>,
    pub max_attempts: u32,
    pub retry_interval_secs: u64,
}

impl Default for TeardownSettings {
    fn default() -> Self {
        Self {
            eventually_consistent_providers: vec!["aws".to_string()],
            max_attempts: 5,
            retry_interval_secs: 60,
        }
    }
}

impl TeardownSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

// =============================================================================
// Backend Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsSettings {
    /// Delay between request-status polls
    pub poll_interval_millis: u64,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            poll_interval_millis: 2000,
        }
    }
}

impl AwsSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesSettings {
    /// Field manager for server-side apply
    pub field_manager: String,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            field_manager: "ucp".to_string(),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl UcpConfig {
    /// Read and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: UcpConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.worker_count == 0 {
            return Err(Error::Configuration("orchestrator.workerCount must be > 0".into()));
        }
        if self.orchestrator.queue_capacity == 0 {
            return Err(Error::Configuration("orchestrator.queueCapacity must be > 0".into()));
        }
        if self.orchestrator.max_attempts == 0 || self.teardown.max_attempts == 0 {
            return Err(Error::Configuration("maxAttempts must be > 0".into()));
        }
        if !self.base_path.is_empty() && !self.base_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "basePath '{}' must start with '/'",
                self.base_path
            )));
        }
        self.build_planes().map(|_| ())
    }

    /// Convert the plane list, rejecting duplicate `(planeType, planeName)` keys
    pub fn build_planes(&self) -> Result<Vec<Plane>> {
        let mut seen = HashSet::new();
        let mut planes = Vec::with_capacity(self.planes.len());
        for entry in &self.planes {
            let plane = entry.to_plane()?;
            if !seen.insert(plane.key()) {
                return Err(Error::Configuration(format!(
                    "duplicate plane {}/{}",
                    plane.plane_type(),
                    plane.name()
                )));
            }
            planes.push(plane);
        }
        Ok(planes)
    }

    /// JSON Schema of the configuration file
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(UcpConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const SAMPLE: &str = r#"
basePath: /apis/api.ucp.dev/v1alpha3
planes:
  - id: /planes/radius/local
    properties:
      kind: UCPNative
      resourceProviders:
        Applications.Core: local
        Applications.Dapr: http://dapr-rp:8080
  - id: /planes/aws/aws
    properties:
      kind: AWS
  - id: /planes/azure/azurecloud
    properties:
      kind: Azure
      url: https://management.azure.com
orchestrator:
  workerCount: 2
teardown:
  eventuallyConsistentProviders: [aws, azure]
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = UcpConfig::load(file.path()).unwrap();
        assert_eq!(config.base_path, "/apis/api.ucp.dev/v1alpha3");
        assert_eq!(config.orchestrator.worker_count, 2);
        assert_eq!(config.orchestrator.max_attempts, 5);
        assert_eq!(config.teardown.eventually_consistent_providers, vec!["aws", "azure"]);
        assert_eq!(config.teardown.retry_interval(), Duration::from_secs(60));

        let planes = config.build_planes().unwrap();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].kind, PlaneKind::UcpNative);
        assert_eq!(planes[0].provider_backend("applications.core"), Some(&BackendUrl::Local));
        assert_eq!(planes[2].url, Some(BackendUrl::Remote("https://management.azure.com".into())));
    }

    #[test]
    fn test_defaults() {
        let config = UcpConfig::from_yaml("planes: []").unwrap();
        assert_eq!(config.teardown.eventually_consistent_providers, vec!["aws"]);
        assert_eq!(config.teardown.max_attempts, 5);
        assert_eq!(config.kubernetes.field_manager, "ucp");
    }

    #[test]
    fn test_duplicate_planes_rejected() {
        let raw = r#"
planes:
  - id: /planes/aws/aws
    properties: { kind: AWS }
  - id: /planes/AWS/aws
    properties: { kind: AWS }
"#;
        assert_matches!(UcpConfig::from_yaml(raw), Err(Error::Configuration(msg)) if msg.contains("duplicate"));
    }

    #[test]
    fn test_invalid_planes_rejected() {
        let not_a_plane = r#"
planes:
  - id: /planes/radius/local/resourceGroups/rg
    properties: { kind: UCPNative }
"#;
        assert_matches!(UcpConfig::from_yaml(not_a_plane), Err(Error::Configuration(_)));

        let bad_url = r#"
planes:
  - id: /planes/azure/cloud
    properties: { kind: Azure, url: "management.azure.com" }
"#;
        assert_matches!(UcpConfig::from_yaml(bad_url), Err(Error::Configuration(_)));

        let zero_workers = "orchestrator: { workerCount: 0 }";
        assert_matches!(UcpConfig::from_yaml(zero_workers), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_json_schema_mentions_planes() {
        let schema = UcpConfig::json_schema().unwrap();
        assert!(schema.contains("planes"));
        assert!(schema.contains("UCPNative"));
    }
}
