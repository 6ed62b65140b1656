//! `MockEngine`: the facade that owns every engine component.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use cloudmock_core::wire::request_origin;
use cloudmock_core::{render_fault, CapturedRequest, EnvelopeMeta, Fault, WireResponse};
use http::Request;
use uuid::Uuid;

use crate::activation::{ActivationError, ActivationManager, ScopeGuard, ScopeHandle};
use crate::backend::BackendRegistry;
use crate::config::{EngineConfig, MockConfig};
use crate::service::dispatch::panic_message;
use crate::service::domain::reference_services;
use crate::service::{
    Diagnostics, Dispatcher, InternalFailure, RegistrationError, ServiceCatalog, ServiceDescriptor,
};
use crate::transport::{
    build_transport, InterceptLayer, InterceptService, Intercepted, InterceptorSwitch, TraceService,
};

// ---------------------------------------------------------------------------
// MockEngineBuilder
// ---------------------------------------------------------------------------

/// Collects configuration and Service Descriptors for a [`MockEngine`].
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    config: EngineConfig,
    services: Vec<ServiceDescriptor>,
}

impl MockEngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers one service. Match order follows registration order.
    #[must_use]
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Registers `ec2`, `elb`, `autoscaling` and `support`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if a reference descriptor fails to
    /// build.
    pub fn with_reference_services(mut self) -> Result<Self, RegistrationError> {
        self.services.extend(reference_services()?);
        Ok(self)
    }

    /// Registers every descriptor and checks cross-service dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateService`] or
    /// [`RegistrationError::UnknownDependency`].
    pub fn build(self) -> Result<MockEngine, RegistrationError> {
        let registry = Arc::new(BackendRegistry::new());
        let mut catalog = ServiceCatalog::new();
        for descriptor in self.services {
            let id = descriptor.id().to_string();
            let factory = Arc::clone(descriptor.factory());
            catalog.register(descriptor)?;
            registry.register_factory(&id, factory);
        }
        catalog.validate()?;
        tracing::info!(services = ?catalog.ids(), "mock engine built");

        let config = Arc::new(self.config);
        let diagnostics = Arc::new(Diagnostics::new());
        let switch = Arc::new(InterceptorSwitch::new());
        let known: BTreeSet<String> = catalog.ids().into_iter().map(str::to_string).collect();

        Ok(MockEngine {
            activation: ActivationManager::new(known, Arc::clone(&registry), Arc::clone(&switch)),
            dispatcher: Dispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&config),
                Arc::clone(&diagnostics),
            ),
            catalog: Arc::new(catalog),
            config,
            registry,
            switch,
            diagnostics,
        })
    }
}

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

/// An isolated emulation: its own catalog, backend state, scopes and
/// interceptor switch. Engines share nothing with each other.
pub struct MockEngine {
    config: Arc<EngineConfig>,
    catalog: Arc<ServiceCatalog>,
    registry: Arc<BackendRegistry>,
    switch: Arc<InterceptorSwitch>,
    activation: ActivationManager,
    dispatcher: Dispatcher,
    diagnostics: Arc<Diagnostics>,
}

impl MockEngine {
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Backend registry the calling thread works on: its own scope lane
    /// while it has one, the engine's shared registry otherwise.
    #[must_use]
    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.activation.backends()
    }

    #[must_use]
    pub fn activation(&self) -> &ActivationManager {
        &self.activation
    }

    // -- activation ---------------------------------------------------------

    /// # Errors
    ///
    /// See [`ActivationManager::enter`].
    pub fn enter(&self, config: MockConfig) -> Result<ScopeHandle, ActivationError> {
        self.activation.enter(config)
    }

    /// # Errors
    ///
    /// See [`ActivationManager::exit`].
    pub fn exit(&self, handle: ScopeHandle) -> Result<(), ActivationError> {
        self.activation.exit(handle)
    }

    /// Caller-facing alias of [`MockEngine::enter`].
    ///
    /// # Errors
    ///
    /// See [`ActivationManager::enter`].
    pub fn start(&self, config: MockConfig) -> Result<ScopeHandle, ActivationError> {
        self.enter(config)
    }

    /// # Errors
    ///
    /// See [`ActivationManager::stop`].
    pub fn stop(&self) -> Result<(), ActivationError> {
        self.activation.stop()
    }

    /// # Errors
    ///
    /// See [`ActivationManager::enter`].
    pub fn scope(&self, config: MockConfig) -> Result<ScopeGuard<'_>, ActivationError> {
        self.activation.scope(config)
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.switch.is_attached()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    // -- interception -------------------------------------------------------

    /// Offers an outbound request to the engine.
    ///
    /// The call is captured only while the interceptor is attached and the
    /// request's origin matches a service visible to the calling thread.
    /// Everything else comes back untouched as [`Intercepted::PassThrough`].
    /// Dispatch runs on the calling thread and blocks it until the response
    /// is rendered.
    #[must_use]
    pub fn intercept(&self, request: Request<Bytes>) -> Intercepted {
        if !self.switch.is_attached() {
            tracing::trace!(uri = %request.uri(), "pass-through: interceptor detached");
            return Intercepted::PassThrough(request);
        }
        let Some(visible) = self.activation.visible() else {
            tracing::trace!(uri = %request.uri(), "pass-through: no scope on this thread");
            return Intercepted::PassThrough(request);
        };
        let matched = request_origin(request.uri(), request.headers()).and_then(|origin| {
            self.catalog
                .match_origin(&origin, |service_id| visible.intercepts(service_id))
        });
        let Some(matched) = matched else {
            tracing::trace!(uri = %request.uri(), "pass-through: no matching service");
            return Intercepted::PassThrough(request);
        };

        let descriptor = matched.descriptor;
        let captured = CapturedRequest::from_http(request);
        let fallback = visible
            .region_default
            .as_deref()
            .unwrap_or(&self.config.default_region);

        let response = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher
                .dispatch_request_in(visible.backends(), &descriptor, &captured, fallback)
        }))
        .unwrap_or_else(|payload| self.boundary_failure(&descriptor, fallback, &*payload));
        Intercepted::Captured(response.into_http())
    }

    /// Renders a panic that escaped dispatch as a 500 `InternalFailure`.
    fn boundary_failure(
        &self,
        descriptor: &ServiceDescriptor,
        region: &str,
        payload: &(dyn Any + Send),
    ) -> WireResponse {
        let service = descriptor.id();
        let request_id = Uuid::new_v4().to_string();
        let message = format!("dispatch panicked: {}", panic_message(payload));
        tracing::error!(
            service,
            region,
            request_id = %request_id,
            error = %message,
            "interceptor boundary failure"
        );
        self.diagnostics.record(InternalFailure {
            service: service.to_string(),
            action: String::new(),
            region: region.to_string(),
            request_id: request_id.clone(),
            message,
        });
        render_fault(
            descriptor.protocol(),
            &Fault::internal("An internal error occurred."),
            &EnvelopeMeta::new(request_id).with_xmlns(descriptor.xmlns()),
        )
    }

    /// Dispatches straight to a registered service, bypassing activation.
    /// Instances come from [`MockEngine::registry`]. Returns `None` for an
    /// unregistered service id.
    #[must_use]
    pub fn dispatch(&self, service_id: &str, request: &CapturedRequest) -> Option<WireResponse> {
        let descriptor = self.catalog.get(service_id)?;
        Some(self.dispatcher.dispatch_request_in(
            &self.registry(),
            descriptor,
            request,
            &self.config.default_region,
        ))
    }

    /// Tower layer that answers calls to registered services from this engine.
    #[must_use]
    pub fn layer(self: &Arc<Self>) -> InterceptLayer {
        InterceptLayer::new(Arc::clone(self))
    }

    /// Wraps a real client service; see [`build_transport`].
    #[must_use]
    pub fn transport<S>(self: &Arc<Self>, network: S) -> TraceService<InterceptService<S>> {
        build_transport(Arc::clone(self), network)
    }

    // -- introspection ------------------------------------------------------

    /// Reads the typed state of a live backend instance. `None` if the
    /// instance does not exist or its state is not a `T`.
    pub fn with_backend<T: Any, R>(
        &self,
        service_id: &str,
        region: &str,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        self.registry().get(service_id, region)?.with(f)
    }

    /// Drops matching backend instances from [`MockEngine::registry`];
    /// `None` matches everything.
    pub fn reset(&self, service_id: Option<&str>, region: Option<&str>) -> usize {
        self.registry().reset(service_id, region)
    }

    #[must_use]
    pub fn internal_failures(&self) -> Vec<InternalFailure> {
        self.diagnostics.failures()
    }

    pub fn take_internal_failures(&self) -> Vec<InternalFailure> {
        self.diagnostics.take()
    }
}

impl fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockEngine")
            .field("config", &self.config)
            .field("services", &self.catalog.ids())
            .field("instances", &self.registry.len())
            .field("attached", &self.switch.is_attached())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
