use std::any::{type_name, Any};
use std::fmt;

use cloudmock_core::Protocol;
use parking_lot::{Mutex, MutexGuard};

use super::registry::BackendKey;
use super::BackendState;
use crate::service::operation::HandlerError;

// ---------------------------------------------------------------------------
// BackendInstance
// ---------------------------------------------------------------------------

/// The stateful emulation of one service in one region.
///
/// All access to the state goes through a per-instance mutex, so handlers
/// running against the same instance are serialized.
pub struct BackendInstance {
    key: BackendKey,
    instance_id: u64,
    state: Mutex<BackendState>,
}

impl BackendInstance {
    pub(crate) fn new(key: BackendKey, instance_id: u64, state: BackendState) -> Self {
        Self {
            key,
            instance_id,
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn key(&self) -> &BackendKey {
        &self.key
    }

    /// Registry-unique id; a reset key gets a new id.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock()
    }

    /// Runs `f` against the typed state. `None` if the state is not a `T`.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.state.lock();
        (**guard).downcast_ref::<T>().map(f)
    }

    /// Mutable variant of [`BackendInstance::with`].
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.state.lock();
        (**guard).downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInstance")
            .field("key", &self.key)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// LockedBackend
// ---------------------------------------------------------------------------

/// A dependency instance locked for the duration of one handler call.
pub struct LockedBackend<'g> {
    key: BackendKey,
    guard: MutexGuard<'g, BackendState>,
}

impl<'g> LockedBackend<'g> {
    pub(crate) fn new(key: BackendKey, guard: MutexGuard<'g, BackendState>) -> Self {
        Self { key, guard }
    }

    #[must_use]
    pub fn key(&self) -> &BackendKey {
        &self.key
    }
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Per-call context handed to handlers next to their own backend.
///
/// Carries the request's identity and the locked instances of the services
/// the handler's descriptor declared with `depends_on`, all in the same
/// region as the handler's own instance.
pub struct HandlerContext<'g> {
    service_id: &'g str,
    protocol: Protocol,
    region: &'g str,
    request_id: &'g str,
    account_id: &'g str,
    call_id: u64,
    peers: Vec<LockedBackend<'g>>,
}

impl<'g> HandlerContext<'g> {
    pub(crate) fn new(
        service_id: &'g str,
        protocol: Protocol,
        region: &'g str,
        request_id: &'g str,
        account_id: &'g str,
        call_id: u64,
        peers: Vec<LockedBackend<'g>>,
    ) -> Self {
        Self {
            service_id,
            protocol,
            region,
            request_id,
            account_id,
            call_id,
            peers,
        }
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        self.service_id
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn region(&self) -> &str {
        self.region
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        self.account_id
    }

    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Same-region state of a declared dependency.
    ///
    /// # Errors
    ///
    /// Returns an internal error if `service_id` was not declared as a
    /// dependency or its state is not a `T`.
    pub fn backend<T: Any>(&self, service_id: &str) -> Result<&T, HandlerError> {
        let peer = self.peer(service_id)?;
        (**peer.guard)
            .downcast_ref::<T>()
            .ok_or_else(|| mistyped::<T>(service_id))
    }

    /// Mutable variant of [`HandlerContext::backend`].
    ///
    /// # Errors
    ///
    /// Same as [`HandlerContext::backend`].
    pub fn backend_mut<T: Any>(&mut self, service_id: &str) -> Result<&mut T, HandlerError> {
        let owner = self.service_id;
        let peer = self
            .peers
            .iter_mut()
            .find(|p| p.key.service_id == service_id)
            .ok_or_else(|| undeclared(owner, service_id))?;
        (**peer.guard)
            .downcast_mut::<T>()
            .ok_or_else(|| mistyped::<T>(service_id))
    }

    fn peer(&self, service_id: &str) -> Result<&LockedBackend<'g>, HandlerError> {
        self.peers
            .iter()
            .find(|p| p.key.service_id == service_id)
            .ok_or_else(|| undeclared(self.service_id, service_id))
    }
}

fn undeclared(owner: &str, service_id: &str) -> HandlerError {
    HandlerError::internal(format!(
        "service {owner} reached backend {service_id} without declaring it as a dependency"
    ))
}

fn mistyped<T>(service_id: &str) -> HandlerError {
    HandlerError::internal(format!(
        "backend state of {service_id} is not a {}",
        type_name::<T>()
    ))
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("service_id", &self.service_id)
            .field("region", &self.region)
            .field("request_id", &self.request_id)
            .field("call_id", &self.call_id)
            .field(
                "peers",
                &self.peers.iter().map(|p| &p.key).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Network {
        subnets: Vec<String>,
    }

    fn instance(service: &str, state: BackendState) -> BackendInstance {
        BackendInstance::new(BackendKey::new(service, "us-east-1"), 1, state)
    }

    #[test]
    fn typed_access_checks_the_type() {
        let inst = instance("net", Box::new(Network { subnets: vec![] }));
        inst.with_mut(|n: &mut Network| n.subnets.push("subnet-1".to_string()));
        assert_eq!(inst.with(|n: &Network| n.subnets.len()), Some(1));
        assert_eq!(inst.with(|n: &String| n.len()), None);
    }

    #[test]
    fn context_exposes_declared_peers_only() {
        let net = instance(
            "net",
            Box::new(Network {
                subnets: vec!["subnet-1".to_string()],
            }),
        );
        let peers = vec![LockedBackend::new(net.key().clone(), net.lock())];
        let mut ctx = HandlerContext::new(
            "scaling",
            Protocol::Query,
            "us-east-1",
            "req",
            "123456789012",
            1,
            peers,
        );

        assert_eq!(ctx.backend::<Network>("net").unwrap().subnets.len(), 1);
        ctx.backend_mut::<Network>("net")
            .unwrap()
            .subnets
            .push("subnet-2".to_string());
        assert_eq!(ctx.backend::<Network>("net").unwrap().subnets.len(), 2);

        assert!(matches!(
            ctx.backend::<Network>("storage"),
            Err(HandlerError::Internal(_))
        ));
        assert!(matches!(
            ctx.backend::<String>("net"),
            Err(HandlerError::Internal(_))
        ));
    }
}
