//! Control plane host
//!
//! Wires the store, queue, orchestrator, backends and router together and
//! owns their lifetime.

use crate::config::UcpConfig;
use crate::controlplane::backends::{BackendClients, BackendFactory, LocalBackend};
use crate::controlplane::orchestrator::Orchestrator;
use crate::controlplane::queue::MemoryQueue;
use crate::controlplane::registry::{PlaneRegistry, RegistryEvent};
use crate::controlplane::router::Router;
use crate::controlplane::teardown::{RouterDeleter, Teardown, TeardownPolicy};
use crate::controlplane::telemetry::PrometheusTelemetry;
use crate::domain::ports::TelemetrySinkRef;
use crate::error::Result;
use crate::store::{MemoryStore, StorageClientRef};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// A running control plane
pub struct ControlPlane {
    config: UcpConfig,
    registry: Arc<PlaneRegistry>,
    store: StorageClientRef,
    queue: Arc<MemoryQueue>,
    orchestrator: Arc<Orchestrator>,
    router: Arc<Router>,
    telemetry: Arc<PrometheusTelemetry>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ControlPlane {
    /// Build with clients discovered from the environment and start workers
    pub async fn start(config: UcpConfig) -> Result<Arc<Self>> {
        let planes = config.build_planes()?;
        let clients = BackendClients::discover(&planes).await;
        Self::with_clients(config, clients)
    }

    /// Build with the given clients and start workers
    pub fn with_clients(config: UcpConfig, clients: BackendClients) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = PlaneRegistry::new(config.build_planes()?)?;
        let telemetry = Arc::new(PrometheusTelemetry::new()?);
        let sink: TelemetrySinkRef = telemetry.clone();

        let store: StorageClientRef = Arc::new(MemoryStore::new());
        let settings = config.orchestrator.clone();
        let queue = MemoryQueue::new(settings.queue_capacity, settings.lease_duration());
        let orchestrator = Orchestrator::new(settings.clone(), Arc::clone(&store), queue.clone(), Arc::clone(&sink));

        let backends = BackendFactory::create(&config, &store, &orchestrator, clients);
        let router = Router::new(
            &config.base_path,
            Arc::clone(&registry),
            Arc::clone(&orchestrator),
            backends,
            sink,
        );

        let deleter = Arc::new(RouterDeleter::new(&router));
        let teardown = Arc::new(Teardown::new(deleter, TeardownPolicy::from(&config.teardown)));
        LocalBackend::register_controllers(&store, &orchestrator, teardown);

        orchestrator.start();
        let reaper = queue.spawn_reaper((settings.lease_duration() / 2).max(Duration::from_millis(100)));
        info!("Control plane started with {} planes", registry.len());

        Ok(Arc::new(Self {
            config,
            registry,
            store,
            queue,
            orchestrator,
            router,
            telemetry,
            reaper: Mutex::new(Some(reaper)),
        }))
    }

    pub fn config(&self) -> &UcpConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<PlaneRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &StorageClientRef {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn telemetry(&self) -> &Arc<PrometheusTelemetry> {
        &self.telemetry
    }

    /// Swap in the planes of `config`; other settings need a restart
    pub fn reload(&self, config: &UcpConfig) -> Result<Vec<RegistryEvent>> {
        config.validate()?;
        self.registry.reload(config.build_planes()?)
    }

    /// Stop workers and the queue; in-flight operations stay queued
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.queue.close();
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        info!("Control plane stopped");
    }
}
