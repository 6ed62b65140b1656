//! Mock Activation Manager: nested scopes, interceptor attachment, and
//! backend reset policy.
//!
//! Scope stacks are thread-affine. Each thread has its own stack, and one
//! extra stack holds process-wide scopes (`MockConfig::process_wide`). A
//! thread sees its own stack plus the process-wide one; other threads'
//! scopes never make it intercept anything.
//!
//! Each stack is a lane with its own view of backend state. Process-wide
//! scopes reset the engine's shared registry. A thread's scopes reset a
//! fork of it, opened on the thread's outermost `enter`. When that lane
//! closes, instances its scopes kept are published to the shared registry.
//!
//! The interceptor is attached while at least one scope is live anywhere:
//! 0 -> 1 live scopes attaches it, 1 -> 0 detaches it.

pub mod scope;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

pub use scope::{ScopeGuard, ScopeHandle, StackOwner, Visibility};

use crate::backend::BackendRegistry;
use crate::config::MockConfig;
use crate::transport::InterceptorSwitch;
use scope::{Lane, Scope};

// ---------------------------------------------------------------------------
// ActivationError
// ---------------------------------------------------------------------------

/// Activation lifecycle misuse. Fatal to the calling test setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    /// `exit` with a handle that is not the innermost scope of its stack,
    /// or with no scope left to exit.
    #[error("scope mismatch: innermost scope is {expected:?}, exit requested for {found:?}")]
    ScopeMismatch {
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("cannot activate unregistered service {service}")]
    UnknownService { service: String },
}

// ---------------------------------------------------------------------------
// ActivationManager
// ---------------------------------------------------------------------------

/// Owns the scope stacks and applies reset policy to each lane's registry.
#[derive(Debug)]
pub struct ActivationManager {
    lanes: Mutex<HashMap<StackOwner, Lane>>,
    next_id: AtomicU64,
    known_services: BTreeSet<String>,
    registry: Arc<BackendRegistry>,
    switch: Arc<InterceptorSwitch>,
}

impl ActivationManager {
    #[must_use]
    pub fn new(
        known_services: BTreeSet<String>,
        registry: Arc<BackendRegistry>,
        switch: Arc<InterceptorSwitch>,
    ) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            known_services,
            registry,
            switch,
        }
    }

    /// Pushes a new scope.
    ///
    /// With `reset_on_enter` the live instances of the scope's services are
    /// stashed away, so the scope starts from empty state. Only the calling
    /// thread's lane is touched (the shared one for a process-wide scope).
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::UnknownService`] if `config.services`
    /// names a service that is not registered.
    pub fn enter(&self, config: MockConfig) -> Result<ScopeHandle, ActivationError> {
        let services = match &config.services {
            Some(requested) => {
                if let Some(unknown) = requested
                    .iter()
                    .find(|s| !self.known_services.contains(*s))
                {
                    return Err(ActivationError::UnknownService {
                        service: unknown.clone(),
                    });
                }
                requested.clone()
            }
            None => self.known_services.clone(),
        };
        let owner = if config.process_wide {
            StackOwner::Process
        } else {
            StackOwner::Thread(thread::current().id())
        };
        let handle = ScopeHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            owner,
        };

        let mut lanes = self.lanes.lock();
        let was_idle = lanes.values().all(|lane| lane.scopes.is_empty());
        let lane = lanes.entry(owner).or_insert_with(|| match owner {
            StackOwner::Process => Lane::shared(&self.registry),
            StackOwner::Thread(_) => Lane::fork(&self.registry),
        });
        let stash = if config.reset_on_enter {
            lane.registry.take(|instance| services.contains(&instance.key().service_id))
        } else {
            Vec::new()
        };
        let inherited = lane
            .registry
            .snapshot()
            .iter()
            .filter(|instance| services.contains(&instance.key().service_id))
            .map(|instance| instance.instance_id())
            .collect();
        tracing::debug!(
            scope = handle.id,
            process_wide = config.process_wide,
            stashed = stash.len(),
            "scope entered"
        );
        lane.scopes.push(Scope {
            handle,
            config,
            services,
            stash,
            inherited,
        });
        if was_idle {
            self.switch.attach();
        }
        Ok(handle)
    }

    /// Pops the scope identified by `handle`.
    ///
    /// With `reset_on_exit` the instances the scope created are discarded
    /// and the stash is restored; inherited instances stay live. Without it
    /// the scope's instances survive, and stashed instances come back only
    /// for keys the scope did not recreate.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::ScopeMismatch`] if `handle` is not the
    /// innermost scope of its stack.
    pub fn exit(&self, handle: ScopeHandle) -> Result<(), ActivationError> {
        let mut lanes = self.lanes.lock();
        let expected = lanes
            .get(&handle.owner)
            .and_then(|lane| lane.scopes.last())
            .map(|scope| scope.handle.id);
        let mismatch = ActivationError::ScopeMismatch {
            expected,
            found: Some(handle.id),
        };
        if expected != Some(handle.id) {
            return Err(mismatch);
        }
        let Some(lane) = lanes.get_mut(&handle.owner) else {
            return Err(mismatch);
        };
        let Some(scope) = lane.scopes.pop() else {
            return Err(mismatch);
        };

        let restored = scope.stash.len();
        if scope.config.reset_on_exit {
            let discarded = lane.registry.take(|instance| scope.created(instance));
            tracing::debug!(
                scope = handle.id,
                discarded = discarded.len(),
                restored,
                "scope exited"
            );
            lane.registry.restore(scope.stash, true);
        } else {
            tracing::debug!(scope = handle.id, restored, "scope exited, state kept");
            lane.registry.restore(scope.stash, false);
        }

        if lane.scopes.is_empty() {
            if let Some(lane) = lanes.remove(&handle.owner) {
                self.close(lane);
            }
        }
        if lanes.values().all(|lane| lane.scopes.is_empty()) {
            self.switch.detach();
        }
        Ok(())
    }

    /// Publishes what a thread lane's scopes kept to the shared registry.
    fn close(&self, lane: Lane) {
        if Arc::ptr_eq(&lane.registry, &self.registry) {
            return;
        }
        let kept = lane
            .registry
            .take(|instance| !lane.forked.contains(&instance.instance_id()));
        if !kept.is_empty() {
            tracing::debug!(published = kept.len(), "thread lane closed");
            self.registry.restore(kept, true);
        }
    }

    /// Exits the innermost scope visible to the calling thread: its own
    /// stack first, then the process-wide stack.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::ScopeMismatch`] if no scope is visible.
    pub fn stop(&self) -> Result<(), ActivationError> {
        let innermost = {
            let lanes = self.lanes.lock();
            let thread_top = lanes
                .get(&StackOwner::Thread(thread::current().id()))
                .and_then(|lane| lane.scopes.last());
            let process_top = lanes
                .get(&StackOwner::Process)
                .and_then(|lane| lane.scopes.last());
            thread_top.or(process_top).map(|scope| scope.handle)
        };
        match innermost {
            Some(handle) => self.exit(handle),
            None => Err(ActivationError::ScopeMismatch {
                expected: None,
                found: None,
            }),
        }
    }

    /// Enters a scope that exits when the returned guard drops.
    ///
    /// # Errors
    ///
    /// See [`ActivationManager::enter`].
    pub fn scope(&self, config: MockConfig) -> Result<ScopeGuard<'_>, ActivationError> {
        let handle = self.enter(config)?;
        Ok(ScopeGuard::new(self, handle))
    }

    /// Services, region default and backend registry the calling thread
    /// sees, or `None` when no scope is visible.
    #[must_use]
    pub fn visible(&self) -> Option<Visibility> {
        let lanes = self.lanes.lock();
        let process = lanes.get(&StackOwner::Process);
        let own = lanes.get(&StackOwner::Thread(thread::current().id()));
        // Outermost first: process-wide scopes enclose the thread's own.
        let scopes: Vec<&Scope> = process
            .into_iter()
            .chain(own)
            .flat_map(|lane| lane.scopes.iter())
            .collect();
        if scopes.is_empty() {
            return None;
        }
        let backends = own.or(process).map_or_else(
            || Arc::clone(&self.registry),
            |lane| Arc::clone(&lane.registry),
        );
        Some(Visibility {
            services: scopes
                .iter()
                .flat_map(|scope| scope.services.iter().cloned())
                .collect(),
            region_default: scopes
                .iter()
                .rev()
                .find_map(|scope| scope.config.region_default.clone()),
            backends,
        })
    }

    /// Registry the calling thread's calls land in: its own lane's while it
    /// has a scope of its own, the shared one otherwise.
    #[must_use]
    pub fn backends(&self) -> Arc<BackendRegistry> {
        let lanes = self.lanes.lock();
        lanes
            .get(&StackOwner::Thread(thread::current().id()))
            .map_or_else(
                || Arc::clone(&self.registry),
                |lane| Arc::clone(&lane.registry),
            )
    }

    /// Number of live scopes across all stacks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lanes.lock().values().map(|lane| lane.scopes.len()).sum()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendState;

    fn manager() -> (ActivationManager, Arc<BackendRegistry>, Arc<InterceptorSwitch>) {
        let registry = Arc::new(BackendRegistry::new());
        for service in ["alpha", "beta"] {
            registry.register_factory(service, Arc::new(|_: &str| Box::new(0_u32) as BackendState));
        }
        let switch = Arc::new(InterceptorSwitch::new());
        let known = ["alpha", "beta"].into_iter().map(String::from).collect();
        let manager = ActivationManager::new(known, Arc::clone(&registry), Arc::clone(&switch));
        (manager, registry, switch)
    }

    #[test]
    fn nested_scopes_attach_once() {
        let (manager, _, switch) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let inner = manager.enter(MockConfig::default()).unwrap();
        assert_eq!(manager.depth(), 2);

        manager.exit(inner).unwrap();
        assert!(switch.is_attached());
        manager.exit(outer).unwrap();
        assert!(!switch.is_attached());
        assert_eq!(switch.attachments(), 1);

        let err = manager.exit(outer).unwrap_err();
        assert!(matches!(err, ActivationError::ScopeMismatch { expected: None, .. }));
        assert!(manager.stop().is_err());
    }

    #[test]
    fn exiting_out_of_order_is_a_mismatch() {
        let (manager, _, _) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let inner = manager.enter(MockConfig::default()).unwrap();
        assert_eq!(
            manager.exit(outer).unwrap_err(),
            ActivationError::ScopeMismatch {
                expected: Some(inner.id()),
                found: Some(outer.id()),
            }
        );
        manager.exit(inner).unwrap();
        manager.exit(outer).unwrap();
    }

    #[test]
    fn unknown_service_is_rejected() {
        let (manager, _, switch) = manager();
        let err = manager
            .enter(MockConfig::default().services(["gamma"]))
            .unwrap_err();
        assert_eq!(
            err,
            ActivationError::UnknownService {
                service: "gamma".to_string()
            }
        );
        assert!(!switch.is_attached());
    }

    #[test]
    fn reset_on_enter_stashes_and_exit_restores() {
        let (manager, shared, _) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let registry = manager.backends();
        let original = registry.get_or_create("alpha", "us-east-1").unwrap();

        let inner = manager.enter(MockConfig::default()).unwrap();
        assert!(registry.get("alpha", "us-east-1").is_none());
        let scoped = registry.get_or_create("alpha", "us-east-1").unwrap();
        assert_ne!(scoped.instance_id(), original.instance_id());

        manager.exit(inner).unwrap();
        let back = registry.get("alpha", "us-east-1").unwrap();
        assert_eq!(back.instance_id(), original.instance_id());
        manager.exit(outer).unwrap();
        assert!(registry.is_empty());
        assert!(shared.is_empty());
    }

    #[test]
    fn inherited_state_survives_without_reset() {
        let (manager, _, _) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let registry = manager.backends();
        let original = registry.get_or_create("alpha", "us-east-1").unwrap();

        let inner = manager
            .enter(MockConfig::default().reset_on_enter(false).reset_on_exit(false))
            .unwrap();
        assert_eq!(
            registry.get("alpha", "us-east-1").unwrap().instance_id(),
            original.instance_id()
        );
        let created = registry.get_or_create("beta", "eu-west-1").unwrap();
        manager.exit(inner).unwrap();

        assert_eq!(
            registry.get("beta", "eu-west-1").unwrap().instance_id(),
            created.instance_id()
        );
        manager.exit(outer).unwrap();
    }

    #[test]
    fn reset_only_touches_scope_services() {
        let (manager, _, _) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let registry = manager.backends();
        let beta = registry.get_or_create("beta", "us-east-1").unwrap();

        let inner = manager.enter(MockConfig::default().services(["alpha"])).unwrap();
        assert_eq!(
            registry.get("beta", "us-east-1").unwrap().instance_id(),
            beta.instance_id()
        );
        manager.exit(inner).unwrap();
        manager.exit(outer).unwrap();
    }

    #[test]
    fn reset_on_exit_discards_only_what_the_scope_created() {
        let (manager, _, _) = manager();
        let outer = manager.enter(MockConfig::default()).unwrap();
        let registry = manager.backends();
        let inherited = registry.get_or_create("alpha", "us-east-1").unwrap();

        let inner = manager.enter(MockConfig::default().reset_on_enter(false)).unwrap();
        inherited.with_mut(|n: &mut u32| *n = 5);
        registry.get_or_create("alpha", "eu-west-1").unwrap();
        manager.exit(inner).unwrap();

        let live = registry.get("alpha", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&live, &inherited));
        assert_eq!(live.with(|n: &u32| *n), Some(5));
        assert!(registry.get("alpha", "eu-west-1").is_none());
        manager.exit(outer).unwrap();
    }

    #[test]
    fn thread_scopes_reset_only_their_own_lane() {
        let (manager, shared, _) = manager();
        let manager = Arc::new(manager);
        let mine = manager.enter(MockConfig::default()).unwrap();
        let live = manager.backends().get_or_create("alpha", "us-east-1").unwrap();
        live.with_mut(|n: &mut u32| *n = 3);

        let other = Arc::clone(&manager);
        let seen_elsewhere = thread::spawn(move || {
            let handle = other.enter(MockConfig::default()).unwrap();
            let fresh = other.backends().get_or_create("alpha", "us-east-1").unwrap();
            let value = fresh.with(|n: &u32| *n);
            other.exit(handle).unwrap();
            value
        })
        .join()
        .unwrap();
        assert_eq!(seen_elsewhere, Some(0));

        let after = manager.backends().get("alpha", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&after, &live));
        assert_eq!(after.with(|n: &u32| *n), Some(3));
        assert!(shared.is_empty());
        manager.exit(mine).unwrap();
    }

    #[test]
    fn kept_state_is_published_when_the_lane_closes() {
        let (manager, shared, _) = manager();
        let handle = manager.enter(MockConfig::default().reset_on_exit(false)).unwrap();
        let kept = manager.backends().get_or_create("beta", "ap-south-1").unwrap();
        assert!(shared.get("beta", "ap-south-1").is_none());

        manager.exit(handle).unwrap();
        let published = shared.get("beta", "ap-south-1").unwrap();
        assert!(Arc::ptr_eq(&published, &kept));
        assert!(Arc::ptr_eq(&manager.backends(), &shared));
    }

    #[test]
    fn visibility_is_thread_affine() {
        let (manager, _, switch) = manager();
        let manager = Arc::new(manager);
        let handle = manager
            .enter(MockConfig::default().services(["alpha"]).region_default("eu-west-1"))
            .unwrap();

        let seen = manager.visible().unwrap();
        assert!(seen.intercepts("alpha"));
        assert!(!seen.intercepts("beta"));
        assert_eq!(seen.region_default.as_deref(), Some("eu-west-1"));

        let other = Arc::clone(&manager);
        let elsewhere = thread::spawn(move || other.visible()).join().unwrap();
        assert!(elsewhere.is_none());
        assert!(switch.is_attached());

        manager.exit(handle).unwrap();
    }

    #[test]
    fn process_wide_scopes_are_seen_everywhere() {
        let (manager, _, _) = manager();
        let manager = Arc::new(manager);
        let global = manager
            .enter(MockConfig::default().services(["beta"]).process_wide(true))
            .unwrap();
        let local = manager.enter(MockConfig::default().services(["alpha"])).unwrap();

        let seen = manager.visible().unwrap();
        assert!(seen.intercepts("alpha") && seen.intercepts("beta"));

        let other = Arc::clone(&manager);
        let elsewhere = thread::spawn(move || other.visible()).join().unwrap().unwrap();
        assert!(elsewhere.intercepts("beta"));
        assert!(!elsewhere.intercepts("alpha"));

        // stop() prefers the calling thread's own stack.
        manager.stop().unwrap();
        assert!(manager.exit(local).is_err());
        manager.exit(global).unwrap();
    }

    #[test]
    fn guard_exits_on_drop() {
        let (manager, _, switch) = manager();
        {
            let _guard = manager.scope(MockConfig::default()).unwrap();
            assert!(switch.is_attached());
        }
        assert!(!switch.is_attached());
        assert!(!manager.is_active());

        let guard = manager.scope(MockConfig::default()).unwrap();
        assert!(guard.handle().is_some());
        guard.exit().unwrap();
        assert_eq!(manager.depth(), 0);
    }
}
