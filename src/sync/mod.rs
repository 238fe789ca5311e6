//! Synchronization primitives shared by the orchestrator and teardown

mod async_value;

pub use async_value::AsyncValue;
