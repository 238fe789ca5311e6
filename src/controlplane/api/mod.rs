//! API Module
//!
//! Exposes the control plane over REST.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
