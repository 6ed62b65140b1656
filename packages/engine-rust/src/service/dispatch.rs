//! Dispatcher: resolved operation -> wire response.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use cloudmock_core::{
    render_fault, render_success, CapturedRequest, EnvelopeMeta, Fault, WireResponse,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::info_span;
use uuid::Uuid;

use super::descriptor::ServiceDescriptor;
use super::operation::{DispatchError, HandlerError, ResolvedOperation};
use super::resolve::ActionResolver;
use crate::backend::{BackendInstance, BackendRegistry, HandlerContext, LockedBackend};
use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// One recorded unexpected dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternalFailure {
    pub service: String,
    pub action: String,
    pub region: String,
    pub request_id: String,
    pub message: String,
}

/// Collects internal failures for later inspection by tests.
#[derive(Debug, Default)]
pub struct Diagnostics {
    failures: Mutex<Vec<InternalFailure>>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: InternalFailure) {
        self.failures.lock().push(failure);
    }

    #[must_use]
    pub fn failures(&self) -> Vec<InternalFailure> {
        self.failures.lock().clone()
    }

    /// Returns and clears the recorded failures.
    pub fn take(&self) -> Vec<InternalFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs handlers against their backend instances and renders the outcome.
///
/// For each operation the dispatcher creates (if absent) the handler's own
/// instance and those of the services it depends on, locks them all in
/// ascending (service id, region) order, validates the parameters against
/// the action's shape, and invokes the handler. Faults render through the
/// protocol's error envelope; anything else is an internal failure.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    config: Arc<EngineConfig>,
    diagnostics: Arc<Diagnostics>,
    resolver: ActionResolver,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        config: Arc<EngineConfig>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            registry,
            config,
            diagnostics,
            resolver: ActionResolver::new(),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &ActionResolver {
        &self.resolver
    }

    /// Resolves and dispatches a captured request against the dispatcher's
    /// own registry. Resolution failures are rendered as "operation not
    /// recognized" faults without running any handler.
    #[must_use]
    pub fn dispatch_request(
        &self,
        descriptor: &ServiceDescriptor,
        request: &CapturedRequest,
        fallback_region: &str,
    ) -> WireResponse {
        self.dispatch_request_in(&self.registry, descriptor, request, fallback_region)
    }

    /// Like [`Dispatcher::dispatch_request`], with instances taken from
    /// `backends`.
    #[must_use]
    pub fn dispatch_request_in(
        &self,
        backends: &BackendRegistry,
        descriptor: &ServiceDescriptor,
        request: &CapturedRequest,
        fallback_region: &str,
    ) -> WireResponse {
        match self.resolver.resolve(descriptor, request, fallback_region) {
            Ok(operation) => self.dispatch(backends, descriptor, operation),
            Err(error) => {
                let request_id = Uuid::new_v4().to_string();
                tracing::warn!(
                    service = descriptor.id(),
                    method = %request.method,
                    path = request.path(),
                    request_id = %request_id,
                    error = %error,
                    "could not resolve operation"
                );
                let meta = EnvelopeMeta::new(request_id).with_xmlns(descriptor.xmlns());
                render_fault(descriptor.protocol(), &error.to_fault(descriptor.protocol()), &meta)
            }
        }
    }

    /// Runs the handler bound to `operation.action` and renders its outcome.
    #[must_use]
    pub fn dispatch(
        &self,
        backends: &BackendRegistry,
        descriptor: &ServiceDescriptor,
        operation: ResolvedOperation,
    ) -> WireResponse {
        let protocol = descriptor.protocol();
        let request_id = Uuid::new_v4().to_string();
        let meta = EnvelopeMeta::new(request_id.clone()).with_xmlns(descriptor.xmlns());

        let span = info_span!(
            "dispatch",
            service = descriptor.id(),
            region = %operation.region,
            action = %operation.action,
            request_id = %request_id,
            call_id = operation.call_id,
        );
        let _entered = span.enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.invoke(backends, descriptor, &operation, &request_id)
        }))
        .unwrap_or_else(|payload| {
            Err(HandlerError::internal(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        match outcome {
            Ok(result) => {
                tracing::debug!("operation succeeded");
                render_success(protocol, &operation.action, &result, &meta)
            }
            Err(HandlerError::Fault(fault)) => {
                tracing::debug!(
                    code = %fault.code,
                    status = fault.status.as_u16(),
                    "handler fault"
                );
                render_fault(protocol, &fault, &meta)
            }
            Err(HandlerError::Internal(source)) => {
                let error = DispatchError::Internal {
                    service: descriptor.id().to_string(),
                    action: operation.action.clone(),
                    region: operation.region.clone(),
                    source,
                };
                tracing::error!(error = %error, "internal dispatch failure");
                self.diagnostics.record(InternalFailure {
                    service: descriptor.id().to_string(),
                    action: operation.action.clone(),
                    region: operation.region.clone(),
                    request_id,
                    message: error.to_string(),
                });
                render_fault(protocol, &Fault::internal("An internal error occurred."), &meta)
            }
        }
    }

    fn invoke(
        &self,
        backends: &BackendRegistry,
        descriptor: &ServiceDescriptor,
        operation: &ResolvedOperation,
        request_id: &str,
    ) -> Result<Value, HandlerError> {
        let protocol = descriptor.protocol();
        let action = descriptor
            .action(&operation.action)
            .ok_or_else(|| Fault::unknown_operation(protocol, Some(&operation.action)))?;

        let mut params = operation.params.clone();
        action
            .shape()
            .validate(&mut params)
            .map_err(|violation| Fault::from_violation(protocol, &violation))?;

        let instances = Self::lock_set(backends, descriptor, &operation.region)?;
        let mut own = None;
        let mut peers = Vec::with_capacity(instances.len().saturating_sub(1));
        for instance in &instances {
            let guard = instance.lock();
            if instance.key().service_id == descriptor.id() {
                own = Some(guard);
            } else {
                peers.push(LockedBackend::new(instance.key().clone(), guard));
            }
        }
        let mut own = own.ok_or_else(|| {
            HandlerError::internal(format!("no backend instance for {}", descriptor.id()))
        })?;

        let mut ctx = HandlerContext::new(
            descriptor.id(),
            protocol,
            &operation.region,
            request_id,
            &self.config.account_id,
            operation.call_id,
            peers,
        );
        action.invoke(&mut own, &params, &mut ctx)
    }

    /// The handler's own instance plus its dependencies, sorted in lock order.
    fn lock_set(
        backends: &BackendRegistry,
        descriptor: &ServiceDescriptor,
        region: &str,
    ) -> Result<Vec<Arc<BackendInstance>>, HandlerError> {
        let mut instances = Vec::with_capacity(descriptor.depends_on().len() + 1);
        for service_id in std::iter::once(descriptor.id())
            .chain(descriptor.depends_on().iter().map(String::as_str))
        {
            let instance = backends.get_or_create(service_id, region).map_err(anyhow::Error::from)?;
            instances.push(instance);
        }
        instances.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(instances)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
