//! Transport composition: wraps a real client service with the engine.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::interceptor::{InterceptLayer, InterceptService};
use super::trace::{TraceLayer, TraceService};
use crate::engine::MockEngine;

/// Wraps `network` so calls to registered services are answered by `engine`.
///
/// Layer order (outermost to innermost):
/// 1. `TraceLayer`: span with method, uri, status and duration for every call
/// 2. `InterceptLayer`: captured calls stop here, the rest reach `network`
#[must_use]
pub fn build_transport<S>(
    engine: Arc<MockEngine>,
    network: S,
) -> TraceService<InterceptService<S>> {
    ServiceBuilder::new()
        .layer(TraceLayer)
        .layer(InterceptLayer::new(engine))
        .service(network)
}
