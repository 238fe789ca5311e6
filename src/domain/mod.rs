//! Domain layer - Core types and port definitions
//!
//! Resource addressing, planes, operation records and the traits (ports)
//! that adapters implement.

pub mod operation;
pub mod output_resource;
pub mod plane;
pub mod ports;
pub mod resource_id;

pub use operation::{ErrorDetail, OperationMethod, OperationState, OperationStatus, OperationType};
pub use output_resource::{OutputResource, ResourceTypeProvider};
pub use plane::{BackendUrl, Plane, PlaneKind};
pub use ports::*;
pub use resource_id::{CollectionTarget, ResourceId, ResourceTarget, ScopeSegment, TypeSegment};
