use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::instance::BackendInstance;
use super::{BackendFactory, BackendState};

// ---------------------------------------------------------------------------
// BackendKey
// ---------------------------------------------------------------------------

/// Identity of a backend instance. Ordering is the lock-acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendKey {
    pub service_id: String,
    pub region: String,
}

impl BackendKey {
    #[must_use]
    pub fn new(service_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.region)
    }
}

/// Errors from [`BackendRegistry`] lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no backend factory registered for service {service}")]
    UnknownService { service: String },
}

// ---------------------------------------------------------------------------
// BackendRegistry
// ---------------------------------------------------------------------------

/// Mapping from (service id, region) to the live [`BackendInstance`].
///
/// Lookups are create-if-absent: the factory for a key runs inside the map's
/// entry lock, so it runs exactly once per key until the key is reset.
/// Factories must not call back into the registry.
///
/// A registry can be [forked](BackendRegistry::fork): the fork starts with
/// the same live instances and shares factories and instance ids with its
/// parent, but keys created or reset in one are invisible to the other.
pub struct BackendRegistry {
    instances: DashMap<BackendKey, Arc<BackendInstance>>,
    factories: Arc<DashMap<String, BackendFactory>>,
    next_instance_id: Arc<AtomicU64>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            factories: Arc::new(DashMap::new()),
            next_instance_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A new registry holding the same instances as this one right now.
    #[must_use]
    pub fn fork(&self) -> Self {
        let instances = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        Self {
            instances,
            factories: Arc::clone(&self.factories),
            next_instance_id: Arc::clone(&self.next_instance_id),
        }
    }

    /// Registers (or replaces) the factory for a service.
    pub fn register_factory(&self, service_id: &str, factory: BackendFactory) {
        self.factories.insert(service_id.to_string(), factory);
    }

    #[must_use]
    pub fn has_factory(&self, service_id: &str) -> bool {
        self.factories.contains_key(service_id)
    }

    /// Returns the live instance for the key, creating it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownService`] when no factory is registered.
    pub fn get_or_create(
        &self,
        service_id: &str,
        region: &str,
    ) -> Result<Arc<BackendInstance>, RegistryError> {
        let key = BackendKey::new(service_id, region);
        if let Some(existing) = self.instances.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let factory = self
            .factories
            .get(service_id)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| RegistryError::UnknownService {
                service: service_id.to_string(),
            })?;

        let instance = match self.instances.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let state: BackendState = factory(region);
                let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
                let instance = Arc::new(BackendInstance::new(
                    entry.key().clone(),
                    instance_id,
                    state,
                ));
                tracing::debug!(key = %entry.key(), instance_id, "created backend instance");
                entry.insert(Arc::clone(&instance));
                instance
            }
        };
        Ok(instance)
    }

    /// Live instance for the key, without creating one.
    #[must_use]
    pub fn get(&self, service_id: &str, region: &str) -> Option<Arc<BackendInstance>> {
        self.instances
            .get(&BackendKey::new(service_id, region))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drops matching instances. `None` matches any service or region.
    /// Returns the number of instances removed.
    pub fn reset(&self, service_id: Option<&str>, region: Option<&str>) -> usize {
        let removed = self.take(|instance| {
            let key = instance.key();
            service_id.is_none_or(|s| s == key.service_id) && region.is_none_or(|r| r == key.region)
        });
        if !removed.is_empty() {
            tracing::debug!(?service_id, ?region, removed = removed.len(), "reset backends");
        }
        removed.len()
    }

    /// All live instances of a service, ordered by region.
    #[must_use]
    pub fn all_instances(&self, service_id: &str) -> Vec<Arc<BackendInstance>> {
        let mut instances: Vec<Arc<BackendInstance>> = self
            .instances
            .iter()
            .filter(|entry| entry.key().service_id == service_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        instances.sort_by(|a, b| a.key().cmp(b.key()));
        instances
    }

    /// Regions with a live instance of the service, sorted.
    #[must_use]
    pub fn regions(&self, service_id: &str) -> Vec<String> {
        self.all_instances(service_id)
            .iter()
            .map(|instance| instance.key().region.clone())
            .collect()
    }

    /// Every live instance, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<BackendInstance>> {
        let mut instances: Vec<Arc<BackendInstance>> = self
            .instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        instances.sort_by(|a, b| a.key().cmp(b.key()));
        instances
    }

    /// Removes and returns every instance matching `filter`.
    pub fn take(
        &self,
        filter: impl Fn(&BackendInstance) -> bool,
    ) -> Vec<(BackendKey, Arc<BackendInstance>)> {
        let keys: Vec<BackendKey> = self
            .instances
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.instances.remove(&key))
            .collect()
    }

    /// Puts previously taken instances back. Existing keys are replaced only
    /// when `overwrite` is set.
    pub fn restore(&self, stash: Vec<(BackendKey, Arc<BackendInstance>)>, overwrite: bool) {
        for (key, instance) in stash {
            match self.instances.entry(key) {
                Entry::Occupied(mut entry) if overwrite => {
                    entry.insert(instance);
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(instance);
                }
            }
        }
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("instances", &self.instances.len())
            .field("factories", &self.factories.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        region: String,
        value: u32,
    }

    fn registry_with_counter(calls: Arc<AtomicUsize>) -> BackendRegistry {
        let registry = BackendRegistry::new();
        registry.register_factory(
            "counter",
            Arc::new(move |region: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::new(Counter {
                    region: region.to_string(),
                    value: 0,
                }) as BackendState
            }),
        );
        registry
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(Arc::clone(&calls));

        let a = registry.get_or_create("counter", "us-east-1").unwrap();
        let b = registry.get_or_create("counter", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            a.with(|c: &Counter| c.region.clone()).as_deref(),
            Some("us-east-1")
        );
    }

    #[test]
    fn reset_yields_a_fresh_instance() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        let first = registry.get_or_create("counter", "us-east-1").unwrap();
        first.with_mut(|c: &mut Counter| c.value = 7);

        assert_eq!(registry.reset(Some("counter"), None), 1);
        let second = registry.get_or_create("counter", "us-east-1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.instance_id(), second.instance_id());
        assert_eq!(second.with(|c: &Counter| c.value), Some(0));
    }

    #[test]
    fn reset_wildcards_by_region() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        registry.get_or_create("counter", "us-east-1").unwrap();
        registry.get_or_create("counter", "eu-west-1").unwrap();

        assert_eq!(registry.reset(None, Some("eu-west-1")), 1);
        assert_eq!(registry.regions("counter"), vec!["us-east-1".to_string()]);
        assert_eq!(registry.reset(None, None), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_service_is_an_error() {
        let registry = BackendRegistry::new();
        assert_eq!(
            registry.get_or_create("nope", "us-east-1").unwrap_err(),
            RegistryError::UnknownService {
                service: "nope".to_string()
            }
        );
    }

    #[test]
    fn all_instances_are_sorted_by_region() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        registry.get_or_create("counter", "us-west-2").unwrap();
        registry.get_or_create("counter", "ap-northeast-1").unwrap();
        assert_eq!(
            registry.regions("counter"),
            vec!["ap-northeast-1".to_string(), "us-west-2".to_string()]
        );
        assert!(registry.all_instances("other").is_empty());
    }

    #[test]
    fn take_and_restore_round_trip() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        let original = registry.get_or_create("counter", "us-east-1").unwrap();

        let stash = registry.take(|instance| instance.key().service_id == "counter");
        assert_eq!(stash.len(), 1);
        assert!(registry.get("counter", "us-east-1").is_none());

        let replacement = registry.get_or_create("counter", "us-east-1").unwrap();
        registry.restore(stash.clone(), false);
        let live = registry.get("counter", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&live, &replacement));

        registry.restore(stash, true);
        let live = registry.get("counter", "us-east-1").unwrap();
        assert!(Arc::ptr_eq(&live, &original));
    }

    #[test]
    fn forks_share_instances_but_not_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let parent = registry_with_counter(Arc::clone(&calls));
        let shared = parent.get_or_create("counter", "us-east-1").unwrap();

        let fork = parent.fork();
        assert!(Arc::ptr_eq(&fork.get("counter", "us-east-1").unwrap(), &shared));

        let local = fork.get_or_create("counter", "eu-west-1").unwrap();
        assert!(parent.get("counter", "eu-west-1").is_none());
        assert!(local.instance_id() > shared.instance_id());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(fork.reset(None, Some("us-east-1")), 1);
        assert!(Arc::ptr_eq(&parent.get("counter", "us-east-1").unwrap(), &shared));
        assert_eq!(
            fork.snapshot().iter().map(|i| i.key().to_string()).collect::<Vec<_>>(),
            vec!["counter/eu-west-1"]
        );
    }

    #[test]
    fn concurrent_first_access_runs_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(registry_with_counter(Arc::clone(&calls)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("counter", "us-east-1").unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
