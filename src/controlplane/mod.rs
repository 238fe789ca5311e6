//! Universal Control Plane Module
//!
//! Routes resource requests to the plane that owns them and runs mutating
//! requests as tracked async operations.

pub mod api;
pub mod backends;
pub mod host;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod router;
pub mod teardown;
pub mod telemetry;

pub use api::{ApiServer, ApiServerConfig, RestRouter};
pub use backends::{BackendClients, BackendFactory};
pub use host::ControlPlane;
pub use orchestrator::{OperationController, OperationRequest, Orchestrator};
pub use queue::MemoryQueue;
pub use registry::{PlaneRegistry, RegistryEvent};
pub use router::{BackendSet, Router, RouterRequest};
pub use teardown::{Teardown, TeardownPolicy};
pub use telemetry::{NoopTelemetry, PrometheusTelemetry};
