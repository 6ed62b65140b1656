//! Scope handles, stacks, and the RAII guard.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::ThreadId;

use super::{ActivationError, ActivationManager};
use crate::backend::{BackendInstance, BackendKey, BackendRegistry};
use crate::config::MockConfig;

/// Which stack a scope lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOwner {
    Thread(ThreadId),
    Process,
}

/// Token returned by `enter`, consumed by `exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeHandle {
    pub(crate) id: u64,
    pub(crate) owner: StackOwner,
}

impl ScopeHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> StackOwner {
        self.owner
    }

    #[must_use]
    pub fn is_process_wide(&self) -> bool {
        self.owner == StackOwner::Process
    }
}

/// One live activation scope.
#[derive(Debug)]
pub(crate) struct Scope {
    pub(crate) handle: ScopeHandle,
    pub(crate) config: MockConfig,
    /// Services this scope intercepts, resolved against the catalog.
    pub(crate) services: BTreeSet<String>,
    /// Instances removed on entry, put back on exit.
    pub(crate) stash: Vec<(BackendKey, Arc<BackendInstance>)>,
    /// Ids of the instances of `services` that were live on entry and kept.
    pub(crate) inherited: BTreeSet<u64>,
}

impl Scope {
    /// Whether `instance` belongs to this scope's services and was created
    /// after the scope was entered.
    pub(crate) fn created(&self, instance: &BackendInstance) -> bool {
        self.services.contains(&instance.key().service_id)
            && !self.inherited.contains(&instance.instance_id())
    }
}

/// One owner's scope stack and the registry its scopes work on.
///
/// The process-wide lane works on the engine's shared registry. A thread
/// lane works on a fork of it, taken when the thread enters its outermost
/// scope, so resets on one thread never touch another thread's instances.
#[derive(Debug)]
pub(crate) struct Lane {
    pub(crate) scopes: Vec<Scope>,
    pub(crate) registry: Arc<BackendRegistry>,
    /// Ids of the instances copied in from the shared registry.
    pub(crate) forked: BTreeSet<u64>,
}

impl Lane {
    pub(crate) fn shared(registry: &Arc<BackendRegistry>) -> Self {
        Self {
            scopes: Vec::new(),
            registry: Arc::clone(registry),
            forked: BTreeSet::new(),
        }
    }

    pub(crate) fn fork(registry: &BackendRegistry) -> Self {
        let registry = registry.fork();
        let forked = registry
            .snapshot()
            .iter()
            .map(|instance| instance.instance_id())
            .collect();
        Self {
            scopes: Vec::new(),
            registry: Arc::new(registry),
            forked,
        }
    }
}

/// What the calling thread currently intercepts.
#[derive(Debug, Clone)]
pub struct Visibility {
    pub services: BTreeSet<String>,
    /// `region_default` of the innermost visible scope that sets one.
    pub region_default: Option<String>,
    pub(crate) backends: Arc<BackendRegistry>,
}

impl Visibility {
    #[must_use]
    pub fn intercepts(&self, service_id: &str) -> bool {
        self.services.contains(service_id)
    }

    /// Registry that intercepted calls on this thread dispatch into.
    #[must_use]
    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }
}

// ---------------------------------------------------------------------------
// ScopeGuard
// ---------------------------------------------------------------------------

/// RAII guard that exits its scope when dropped.
///
/// Dropping out of order (an inner guard outliving an outer one) cannot
/// exit cleanly; the mismatch is logged instead of panicking in `Drop`.
#[derive(Debug)]
#[must_use = "the scope exits as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    manager: &'a ActivationManager,
    handle: Option<ScopeHandle>,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn new(manager: &'a ActivationManager, handle: ScopeHandle) -> Self {
        Self {
            manager,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<ScopeHandle> {
        self.handle
    }

    /// Exits now, reporting a mismatch instead of logging it.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::ScopeMismatch`] if the scope is not the
    /// innermost one of its stack.
    pub fn exit(mut self) -> Result<(), ActivationError> {
        match self.handle.take() {
            Some(handle) => self.manager.exit(handle),
            None => Ok(()),
        }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(error) = self.manager.exit(handle) {
                tracing::warn!(scope = handle.id, error = %error, "scope guard could not exit");
            }
        }
    }
}
