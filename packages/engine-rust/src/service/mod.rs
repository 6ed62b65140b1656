//! Service registration, action resolution, and dispatch.
//!
//! 1. **Descriptors** (`descriptor`): per-service URL bases, protocol, routes,
//!    and the action -> handler table, built through `ServiceBuilder`
//! 2. **Catalog** (`catalog`): registered descriptors, matched by origin
//! 3. **Resolution** (`resolve`): `CapturedRequest` -> `ResolvedOperation`
//! 4. **Dispatch** (`dispatch`): runs the handler and renders the response
//! 5. **Reference services** (`domain`): ec2, elb, autoscaling, support

pub mod catalog;
pub mod descriptor;
pub mod dispatch;
pub mod domain;
pub mod operation;
pub mod resolve;

pub use catalog::{ServiceCatalog, ServiceMatch};
pub use descriptor::{
    default_region_sources, ActionSpec, RegionSource, RegistrationError, RouteSpec,
    ServiceBuilder, ServiceDescriptor,
};
pub use dispatch::{Diagnostics, Dispatcher, InternalFailure};
pub use operation::{
    DispatchError, HandlerError, HandlerResult, ResolutionError, ResolvedOperation,
};
pub use resolve::ActionResolver;
