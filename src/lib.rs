//! Universal Control Plane
//!
//! A single HTTP front door for resources that live in different systems.
//! Every resource has a hierarchical address; the router resolves the
//! address to the plane that owns it and dispatches to that plane's
//! backend. Mutating requests become tracked async operations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              REST API (axum)                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Plane Registry │  │     Router      │  │   Operation Orchestrator    │  │
//! │  │  (swap on load) │──│ (address->plane)│──│  (queue, workers, leases)   │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │                                │                         │                  │
//! │                    ┌───────────┴───────────┐  ┌──────────┴──────────┐       │
//! │                    │     Object Store      │  │ Concurrent Teardown │       │
//! │                    │ (storage keys, query) │  │                     │       │
//! │                    └───────────────────────┘  └─────────────────────┘       │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                             Plane Backends                                  │
//! │  ┌──────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐   │
//! │  │   AWS    │  │  Kubernetes  │  │  Local   │  │  Scopes  │  │  Proxy   │   │
//! │  └──────────┘  └──────────────┘  └──────────┘  └──────────┘  └──────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Router, orchestrator, backends and the REST API
//! - [`domain`]: Resource addresses, planes, operations and ports
//! - [`store`]: Storage keys, queries and the in-memory object store
//! - [`sync`]: Single-slot async value
//! - [`config`]: Configuration file model
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::UcpConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendClients, ControlPlane, Orchestrator, PlaneRegistry, Router,
    RouterRequest,
};

pub use domain::{
    BackendResponse, ErrorDetail, OperationMethod, OperationState, OperationStatus, OutputResource, Plane,
    PlaneKind, RequestMethod, ResourceId, ResourceTarget,
};

pub use error::{Error, ErrorAction, Result};

pub use store::{MemoryStore, Query, StorageClient, StorageObject};

pub use sync::AsyncValue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
