//! Plane Backend Adapters
//!
//! Provides adapters for the systems planes are served by:
//! - AWS: Cloud Control resources with composite identifiers
//! - Kubernetes: dynamic objects via server-side apply
//! - Local: store-backed resource providers of UCPNative planes
//! - Scopes: resource groups of UCPNative planes
//! - Proxy: remote resource providers and Azure endpoints

pub mod aws;
#[cfg(feature = "aws")]
pub mod aws_sdk;
pub mod kubernetes;
pub mod local;
pub mod proxy;
pub mod scopes;

pub use aws::{AwsBackend, AwsResources};
pub use kubernetes::KubernetesBackend;
pub use local::LocalBackend;
pub use proxy::{PathMode, ProxyBackend};
pub use scopes::ScopeBackend;

use crate::config::UcpConfig;
use crate::controlplane::orchestrator::Orchestrator;
use crate::controlplane::router::BackendSet;
use crate::domain::plane::{Plane, PlaneKind};
use crate::domain::ports::CloudControlClientRef;
use crate::store::StorageClientRef;
use std::sync::Arc;
use tracing::{info, warn};

/// External clients the backends are built on
#[derive(Clone, Default)]
pub struct BackendClients {
    pub cloud_control: Option<CloudControlClientRef>,
    pub kubernetes: Option<kube::Client>,
}

impl BackendClients {
    /// Connect the clients the configured plane kinds need
    ///
    /// A client that cannot be created is left out; requests to its planes
    /// then fail with `BackendUnavailable`.
    pub async fn discover(planes: &[Plane]) -> Self {
        let mut clients = Self::default();

        if planes.iter().any(|p| p.kind == PlaneKind::Kubernetes) {
            match kube::Client::try_default().await {
                Ok(client) => clients.kubernetes = Some(client),
                Err(e) => warn!("Kubernetes planes are unavailable: {}", e),
            }
        }

        if planes.iter().any(|p| p.kind == PlaneKind::Aws) {
            clients.cloud_control = Self::aws_client();
        }
        clients
    }

    #[cfg(feature = "aws")]
    fn aws_client() -> Option<CloudControlClientRef> {
        Some(Arc::new(aws_sdk::SdkCloudControl::new()))
    }

    #[cfg(not(feature = "aws"))]
    fn aws_client() -> Option<CloudControlClientRef> {
        warn!("AWS planes are configured but the `aws` feature is disabled");
        None
    }
}

/// Factory for the router's backend set
pub struct BackendFactory;

impl BackendFactory {
    /// Build every backend the clients allow and register the AWS controllers
    ///
    /// Local provider controllers need the router for teardown and are
    /// registered separately.
    pub fn create(
        config: &UcpConfig,
        store: &StorageClientRef,
        orchestrator: &Arc<Orchestrator>,
        clients: BackendClients,
    ) -> BackendSet {
        let mut backends = BackendSet {
            local: Some(Arc::new(LocalBackend::new(Arc::clone(store), Arc::clone(orchestrator)))),
            scopes: Some(Arc::new(ScopeBackend::new(Arc::clone(store)))),
            ..Default::default()
        };

        if let Some(cloud) = clients.cloud_control {
            let resources = AwsResources::new(cloud, &config.aws);
            AwsBackend::register_controllers(&resources, orchestrator);
            backends.aws = Some(Arc::new(AwsBackend::new(resources, Arc::clone(orchestrator))));
            info!("AWS backend enabled");
        }

        if let Some(client) = clients.kubernetes {
            backends.kubernetes = Some(Arc::new(KubernetesBackend::new(
                client,
                &config.kubernetes.field_manager,
            )));
            info!("Kubernetes backend enabled");
        }

        backends
    }
}
