//! Backend state: one instance per (service id, region).
//!
//! - **Registry** (`registry`): create-if-absent lookup, reset, stash/restore,
//!   and forks for per-thread scope lanes
//! - **Instances** (`instance`): the per-instance mutex and the handler context
//!   that carries locked dependency instances

pub mod instance;
pub mod registry;

use std::any::Any;
use std::sync::Arc;

pub use instance::{BackendInstance, HandlerContext, LockedBackend};
pub use registry::{BackendKey, BackendRegistry, RegistryError};

/// Type-erased state of one backend instance.
pub type BackendState = Box<dyn Any + Send>;

/// Builds the initial state of a service's backend for a region.
pub type BackendFactory = Arc<dyn Fn(&str) -> BackendState + Send + Sync>;
