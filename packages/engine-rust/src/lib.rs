//! `cloudmock` engine: intercepts outbound cloud API calls and answers them
//! from in-memory, per-region service backends.

pub mod activation;
pub mod backend;
pub mod config;
pub mod engine;
pub mod logging;
pub mod service;
pub mod testing;
pub mod transport;

pub use activation::{ActivationError, ActivationManager, ScopeGuard, ScopeHandle};
pub use backend::{BackendInstance, BackendKey, BackendRegistry, HandlerContext};
pub use config::{EngineConfig, LogConfig, MockConfig};
pub use engine::{MockEngine, MockEngineBuilder};
pub use logging::init_logging;
pub use service::{
    HandlerError, HandlerResult, InternalFailure, RegionSource, RegistrationError, ServiceBuilder,
    ServiceDescriptor,
};
pub use transport::{build_transport, InterceptLayer, Intercepted};
