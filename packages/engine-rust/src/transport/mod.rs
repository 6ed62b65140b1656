//! Transport Interceptor as tower middleware.
//!
//! - **Interceptor** (`interceptor`): attach switch and the capturing layer
//! - **Trace** (`trace`): per-call tracing span
//! - **Pipeline** (`pipeline`): composes both around a real client service

pub mod interceptor;
pub mod pipeline;
pub mod trace;

pub use interceptor::{
    AttachState, InterceptLayer, InterceptService, Intercepted, InterceptorSwitch,
};
pub use pipeline::build_transport;
pub use trace::{TraceLayer, TraceService};
