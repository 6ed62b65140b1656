//! Transport Interceptor: captures calls to registered services before they
//! reach the network.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{Request, Response};
use tower::{Layer, Service};

use crate::engine::MockEngine;

// ---------------------------------------------------------------------------
// InterceptorSwitch
// ---------------------------------------------------------------------------

/// Whether the interceptor is installed on the transport.
///
/// State machine: Detached -> Attached -> Detached, repeatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attached,
}

/// Lock-free attach/detach flag read on every intercepted call.
#[derive(Debug)]
pub struct InterceptorSwitch {
    state: ArcSwap<AttachState>,
    attachments: AtomicU64,
}

impl InterceptorSwitch {
    /// Creates a detached switch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(AttachState::Detached),
            attachments: AtomicU64::new(0),
        }
    }

    pub fn attach(&self) {
        self.state.store(Arc::new(AttachState::Attached));
        self.attachments.fetch_add(1, Ordering::Relaxed);
        tracing::info!("interceptor attached");
    }

    pub fn detach(&self) {
        self.state.store(Arc::new(AttachState::Detached));
        tracing::info!("interceptor detached");
    }

    #[must_use]
    pub fn state(&self) -> AttachState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state() == AttachState::Attached
    }

    /// Number of times the interceptor has been attached.
    #[must_use]
    pub fn attachments(&self) -> u64 {
        self.attachments.load(Ordering::Relaxed)
    }
}

impl Default for InterceptorSwitch {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Intercepted
// ---------------------------------------------------------------------------

/// Outcome of offering a request to the engine.
#[derive(Debug)]
pub enum Intercepted {
    /// The engine handled the call; hand this response to the caller.
    Captured(Response<Bytes>),
    /// Not ours: forward the untouched request to the real transport.
    PassThrough(Request<Bytes>),
}

// ---------------------------------------------------------------------------
// InterceptLayer
// ---------------------------------------------------------------------------

/// Tower layer that answers calls to registered services from the engine.
#[derive(Debug, Clone)]
pub struct InterceptLayer {
    engine: Arc<MockEngine>,
}

impl InterceptLayer {
    #[must_use]
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self { engine }
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = InterceptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptService {
            engine: Arc::clone(&self.engine),
            inner,
        }
    }
}

// ---------------------------------------------------------------------------
// InterceptService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`InterceptLayer`].
///
/// Dispatch runs synchronously inside `call`, on the calling thread, so
/// thread-affine activation scopes see the caller's thread.
#[derive(Debug, Clone)]
pub struct InterceptService<S> {
    engine: Arc<MockEngine>,
    inner: S,
}

impl<S> Service<Request<Bytes>> for InterceptService<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Bytes>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Bytes>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        match self.engine.intercept(request) {
            Intercepted::Captured(response) => Box::pin(async move { Ok(response) }),
            Intercepted::PassThrough(request) => Box::pin(self.inner.call(request)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
