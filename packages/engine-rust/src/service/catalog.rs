use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{RegistrationError, ServiceDescriptor};

/// A service matched for an origin, with the URL base's capture groups.
#[derive(Debug, Clone)]
pub struct ServiceMatch {
    pub descriptor: Arc<ServiceDescriptor>,
    pub captures: Vec<Option<String>>,
}

// ---------------------------------------------------------------------------
// ServiceCatalog
// ---------------------------------------------------------------------------

/// The registered Service Descriptors, in registration order.
///
/// Provides two lookup mechanisms:
/// - **By id** (`get`): the descriptor's service id
/// - **By origin** (`match_origin`): URL bases tried in registration order,
///   first match wins
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: Vec<Arc<ServiceDescriptor>>,
    by_id: HashMap<String, usize>,
}

impl ServiceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateService`] if the id is taken.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<(), RegistrationError> {
        let id = descriptor.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(RegistrationError::DuplicateService { service: id });
        }
        self.by_id.insert(id, self.services.len());
        self.services.push(Arc::new(descriptor));
        Ok(())
    }

    /// Checks that every declared dependency is registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::UnknownDependency`] for the first
    /// dependency that is not.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        for descriptor in &self.services {
            if let Some(missing) = descriptor
                .depends_on()
                .iter()
                .find(|dep| !self.by_id.contains_key(*dep))
            {
                return Err(RegistrationError::UnknownDependency {
                    service: descriptor.id().to_string(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.by_id.get(id).map(|&index| &self.services[index])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Service ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.services.iter().map(|d| d.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// First service (in registration order) accepted by `visible` whose URL
    /// bases match `origin`.
    #[must_use]
    pub fn match_origin(
        &self,
        origin: &str,
        visible: impl Fn(&str) -> bool,
    ) -> Option<ServiceMatch> {
        self.services
            .iter()
            .filter(|d| visible(d.id()))
            .find_map(|d| {
                d.match_origin(origin).map(|captures| ServiceMatch {
                    descriptor: Arc::clone(d),
                    captures,
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
