//! Service Descriptors and the registration builder.

use std::any::{type_name, Any};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use cloudmock_core::{Params, PathTemplate, Protocol, Shape, TemplateError};
use http::Method;
use regex::Regex;

use crate::backend::{BackendFactory, BackendState, HandlerContext};
use crate::service::operation::{HandlerError, HandlerResult};

/// Type-erased handler stored in a descriptor's action table.
pub(crate) type BoxedHandler =
    Arc<dyn Fn(&mut BackendState, &Params, &mut HandlerContext<'_>) -> HandlerResult + Send + Sync>;

// ---------------------------------------------------------------------------
// RegistrationError
// ---------------------------------------------------------------------------

/// A malformed Service Descriptor, reported at registration time.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("service id must not be empty")]
    EmptyServiceId,
    #[error("service {service}: unknown protocol tag {tag:?}")]
    UnknownProtocol { service: String, tag: String },
    #[error("service {service}: no URL base registered")]
    NoUrlBases { service: String },
    #[error("service {service}: invalid URL pattern {pattern:?}: {source}")]
    BadUrlPattern {
        service: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("service {service}: {source}")]
    BadPathTemplate {
        service: String,
        #[source]
        source: TemplateError,
    },
    #[error("service {service}: route targets unregistered action {action}")]
    RouteToUnknownAction { service: String, action: String },
    #[error("service {service}: action {action} registered twice")]
    DuplicateAction { service: String, action: String },
    #[error("service {service} registered twice")]
    DuplicateService { service: String },
    #[error("service {service}: no backend factory")]
    MissingFactory { service: String },
    #[error("service {service}: depends on unregistered service {dependency}")]
    UnknownDependency { service: String, dependency: String },
    #[error("service {service}: protocol {protocol} requires at least one route")]
    MissingRoutes { service: String, protocol: Protocol },
}

// ---------------------------------------------------------------------------
// Descriptor parts
// ---------------------------------------------------------------------------

/// Where the target region of a request is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSource {
    /// A capture group of the matched URL base.
    UrlCapture(usize),
    /// The credential scope of a SigV4 `Authorization` header.
    AuthorizationHeader,
    /// A request header holding the region name.
    Header(String),
    /// A top-level string parameter.
    Param(String),
}

/// Region sources used when a descriptor declares none.
#[must_use]
pub fn default_region_sources() -> Vec<RegionSource> {
    vec![RegionSource::UrlCapture(1), RegionSource::AuthorizationHeader]
}

/// One REST route: method plus path template, bound to an action.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: Method,
    pub template: PathTemplate,
    pub action: String,
}

/// One entry of the action table.
pub struct ActionSpec {
    name: String,
    shape: Shape,
    handler: BoxedHandler,
}

impl ActionSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub(crate) fn invoke(
        &self,
        state: &mut BackendState,
        params: &Params,
        ctx: &mut HandlerContext<'_>,
    ) -> HandlerResult {
        (self.handler)(state, params, ctx)
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// Static metadata of one emulated service. Immutable once built.
pub struct ServiceDescriptor {
    id: String,
    protocol: Protocol,
    url_bases: Vec<Regex>,
    routes: Vec<RouteSpec>,
    actions: HashMap<String, ActionSpec>,
    xmlns: Option<String>,
    target_prefix: Option<String>,
    region_sources: Vec<RegionSource>,
    depends_on: BTreeSet<String>,
    factory: BackendFactory,
}

impl ServiceDescriptor {
    /// Starts a descriptor for a service speaking `protocol`.
    #[must_use]
    pub fn builder<B: Any + Send>(id: &str, protocol: Protocol) -> ServiceBuilder<B> {
        ServiceBuilder::new(id, protocol)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn xmlns(&self) -> Option<&str> {
        self.xmlns.as_deref()
    }

    #[must_use]
    pub fn target_prefix(&self) -> Option<&str> {
        self.target_prefix.as_deref()
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    #[must_use]
    pub fn region_sources(&self) -> &[RegionSource] {
        &self.region_sources
    }

    /// Other services whose same-region backends the handlers may touch.
    #[must_use]
    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Registered action names, sorted.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn factory(&self) -> &BackendFactory {
        &self.factory
    }

    /// Matches `scheme://host` against the URL bases in registration order.
    /// Returns the capture groups of the first match (index 0 is the whole
    /// origin).
    #[must_use]
    pub fn match_origin(&self, origin: &str) -> Option<Vec<Option<String>>> {
        self.url_bases.iter().find_map(|base| {
            base.captures(origin).map(|caps| {
                caps.iter()
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect()
            })
        })
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("url_bases", &self.url_bases)
            .field("routes", &self.routes)
            .field("actions", &self.action_names())
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceBuilder
// ---------------------------------------------------------------------------

/// Registration interface for one service whose backend state is a `B`.
///
/// Errors are collected while chaining and reported by [`ServiceBuilder::build`].
///
/// ```ignore
/// let descriptor = ServiceDescriptor::builder::<Things>("thing-service", Protocol::Query)
///     .url_base(r"https?://things\.(.+)\.amazonaws\.com")
///     .xml_namespace("https://things.amazonaws.com/doc/2020-01-01/")
///     .backend(|_region| Things::default())
///     .action("CreateThing", create_thing)
///     .build()?;
/// ```
pub struct ServiceBuilder<B> {
    id: String,
    protocol: Option<Protocol>,
    url_bases: Vec<Regex>,
    routes: Vec<(Method, String, String)>,
    actions: HashMap<String, ActionSpec>,
    xmlns: Option<String>,
    target_prefix: Option<String>,
    region_sources: Option<Vec<RegionSource>>,
    depends_on: BTreeSet<String>,
    factory: Option<BackendFactory>,
    error: Option<RegistrationError>,
    _backend: std::marker::PhantomData<fn() -> B>,
}

impl<B: Any + Send> ServiceBuilder<B> {
    #[must_use]
    pub fn new(id: &str, protocol: Protocol) -> Self {
        Self {
            id: id.to_string(),
            protocol: Some(protocol),
            url_bases: Vec::new(),
            routes: Vec::new(),
            actions: HashMap::new(),
            xmlns: None,
            target_prefix: None,
            region_sources: None,
            depends_on: BTreeSet::new(),
            factory: None,
            error: None,
            _backend: std::marker::PhantomData,
        }
    }

    /// Like [`ServiceBuilder::new`] with a textual protocol tag
    /// (`query`, `ec2`, `json`, `rest-json`).
    #[must_use]
    pub fn with_protocol_tag(id: &str, tag: &str) -> Self {
        match tag.parse::<Protocol>() {
            Ok(protocol) => Self::new(id, protocol),
            Err(_) => {
                let mut builder = Self::new(id, Protocol::Query);
                builder.protocol = None;
                builder.fail(RegistrationError::UnknownProtocol {
                    service: id.to_string(),
                    tag: tag.to_string(),
                });
                builder
            }
        }
    }

    fn fail(&mut self, error: RegistrationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Adds a URL base: a regex over `scheme://host`, anchored at both ends.
    #[must_use]
    pub fn url_base(mut self, pattern: &str) -> Self {
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(regex) => self.url_bases.push(regex),
            Err(source) => {
                let service = self.id.clone();
                self.fail(RegistrationError::BadUrlPattern {
                    service,
                    pattern: pattern.to_string(),
                    source,
                });
            }
        }
        self
    }

    /// Binds `method template` to an action.
    #[must_use]
    pub fn route(mut self, method: Method, template: &str, action: &str) -> Self {
        self.routes
            .push((method, template.to_string(), action.to_string()));
        self
    }

    #[must_use]
    pub fn xml_namespace(mut self, xmlns: &str) -> Self {
        self.xmlns = Some(xmlns.to_string());
        self
    }

    /// JSON target prefix, e.g. `AWSSupport_20130415`.
    #[must_use]
    pub fn target_prefix(mut self, prefix: &str) -> Self {
        self.target_prefix = Some(prefix.to_string());
        self
    }

    /// Replaces the default region sources.
    #[must_use]
    pub fn region_sources(mut self, sources: Vec<RegionSource>) -> Self {
        self.region_sources = Some(sources);
        self
    }

    /// Declares a same-region dependency on another service's backend.
    #[must_use]
    pub fn depends_on(mut self, service_id: &str) -> Self {
        if service_id != self.id {
            self.depends_on.insert(service_id.to_string());
        }
        self
    }

    /// Sets the factory that builds the backend state for a region.
    #[must_use]
    pub fn backend<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> B + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(move |region: &str| {
            Box::new(factory(region)) as BackendState
        }));
        self
    }

    /// Registers a handler that declares no input shape.
    #[must_use]
    pub fn action<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut B, &Params, &mut HandlerContext<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.action_with_shape(name, Shape::new(), handler)
    }

    /// Registers a handler whose parameters are validated against `shape`
    /// before it runs.
    #[must_use]
    pub fn action_with_shape<F>(mut self, name: &str, shape: Shape, handler: F) -> Self
    where
        F: Fn(&mut B, &Params, &mut HandlerContext<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        if self.actions.contains_key(name) {
            let service = self.id.clone();
            self.fail(RegistrationError::DuplicateAction {
                service,
                action: name.to_string(),
            });
            return self;
        }
        let handler: BoxedHandler = Arc::new(
            move |state: &mut BackendState, params: &Params, ctx: &mut HandlerContext<'_>| {
                let backend = (**state).downcast_mut::<B>().ok_or_else(|| {
                    HandlerError::internal(format!(
                        "backend state of {} is not a {}",
                        ctx.service_id(),
                        type_name::<B>()
                    ))
                })?;
                handler(backend, params, ctx)
            },
        );
        self.actions.insert(
            name.to_string(),
            ActionSpec {
                name: name.to_string(),
                shape,
                handler,
            },
        );
        self
    }

    /// Validates and freezes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`] found: errors recorded while
    /// chaining, then missing URL bases, templates that do not parse, routes
    /// to unregistered actions, a missing factory, and a REST protocol
    /// without routes.
    pub fn build(self) -> Result<ServiceDescriptor, RegistrationError> {
        if self.id.trim().is_empty() {
            return Err(RegistrationError::EmptyServiceId);
        }
        if let Some(error) = self.error {
            return Err(error);
        }
        let service = self.id.clone();
        let protocol = self.protocol.ok_or_else(|| RegistrationError::UnknownProtocol {
            service: service.clone(),
            tag: String::new(),
        })?;
        if self.url_bases.is_empty() {
            return Err(RegistrationError::NoUrlBases { service });
        }

        let mut routes = Vec::with_capacity(self.routes.len());
        for (method, template, action) in self.routes {
            let template = PathTemplate::parse(&template).map_err(|source| {
                RegistrationError::BadPathTemplate {
                    service: service.clone(),
                    source,
                }
            })?;
            if !self.actions.contains_key(&action) {
                return Err(RegistrationError::RouteToUnknownAction { service, action });
            }
            routes.push(RouteSpec {
                method,
                template,
                action,
            });
        }
        if protocol == Protocol::RestJson && routes.is_empty() {
            return Err(RegistrationError::MissingRoutes { service, protocol });
        }

        let factory = self
            .factory
            .ok_or_else(|| RegistrationError::MissingFactory {
                service: service.clone(),
            })?;

        Ok(ServiceDescriptor {
            id: self.id,
            protocol,
            url_bases: self.url_bases,
            routes,
            actions: self.actions,
            xmlns: self.xmlns,
            target_prefix: self.target_prefix,
            region_sources: self.region_sources.unwrap_or_else(default_region_sources),
            depends_on: self.depends_on,
            factory,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Things {
        names: Vec<String>,
    }

    fn things(protocol: Protocol) -> ServiceBuilder<Things> {
        ServiceDescriptor::builder::<Things>("thing-service", protocol)
            .url_base(r"https?://things\.(.+)\.amazonaws\.com")
            .backend(|_region| Things::default())
            .action("CreateThing", |things, params, _ctx| {
                things
                    .names
                    .push(params.str("Name").unwrap_or_default().to_string());
                Ok(json!({"Count": things.names.len()}))
            })
    }

    #[test]
    fn builds_a_query_descriptor() {
        let desc = things(Protocol::Query)
            .xml_namespace("https://things.amazonaws.com/doc/2020-01-01/")
            .build()
            .unwrap();
        assert_eq!(desc.id(), "thing-service");
        assert_eq!(desc.protocol(), Protocol::Query);
        assert_eq!(desc.action_names(), vec!["CreateThing"]);
        assert_eq!(desc.region_sources(), default_region_sources().as_slice());
        assert!(desc.action("Missing").is_none());
    }

    #[test]
    fn url_bases_are_anchored() {
        let desc = things(Protocol::Query).build().unwrap();
        let caps = desc.match_origin("https://things.eu-west-1.amazonaws.com").unwrap();
        assert_eq!(caps[1].as_deref(), Some("eu-west-1"));
        assert!(desc.match_origin("https://evil.com/https://things.x.amazonaws.com").is_none());
        assert!(desc.match_origin("https://things.eu-west-1.amazonaws.com.evil").is_none());
    }

    #[test]
    fn unknown_protocol_tag_fails_at_build() {
        let err = ServiceBuilder::<Things>::with_protocol_tag("svc", "soap")
            .url_base("https://svc")
            .backend(|_| Things::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownProtocol { tag, .. } if tag == "soap"));
    }

    #[test]
    fn protocol_tag_parses_known_tags() {
        let desc = ServiceBuilder::<Things>::with_protocol_tag("svc", "rest-json")
            .url_base("https://svc")
            .backend(|_| Things::default())
            .action("GetThing", |_, _, _| Ok(json!({})))
            .route(Method::GET, "/things/{id}", "GetThing")
            .build()
            .unwrap();
        assert_eq!(desc.protocol(), Protocol::RestJson);
        assert_eq!(desc.routes().len(), 1);
    }

    #[test]
    fn rejects_duplicate_actions() {
        let err = things(Protocol::Query)
            .action("CreateThing", |_, _, _| Ok(json!(null)))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateAction { action, .. } if action == "CreateThing"));
    }

    #[test]
    fn rejects_bad_url_patterns_and_templates() {
        let err = things(Protocol::Query).url_base("https://(").build().unwrap_err();
        assert!(matches!(err, RegistrationError::BadUrlPattern { .. }));

        let err = things(Protocol::Query)
            .route(Method::GET, "things", "CreateThing")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::BadPathTemplate { .. }));
    }

    #[test]
    fn rejects_routes_to_unknown_actions() {
        let err = things(Protocol::RestJson)
            .route(Method::POST, "/things", "DeleteThing")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::RouteToUnknownAction { action, .. } if action == "DeleteThing"));
    }

    #[test]
    fn rest_json_requires_routes() {
        let err = things(Protocol::RestJson).build().unwrap_err();
        assert!(matches!(err, RegistrationError::MissingRoutes { .. }));
    }

    #[test]
    fn rejects_missing_factory_and_url_bases() {
        let err = ServiceDescriptor::builder::<Things>("svc", Protocol::Json)
            .url_base("https://svc")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::MissingFactory { .. }));

        let err = ServiceDescriptor::builder::<Things>("svc", Protocol::Json)
            .backend(|_| Things::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::NoUrlBases { .. }));

        let err = ServiceDescriptor::builder::<Things>(" ", Protocol::Json)
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistrationError::EmptyServiceId));
    }

    #[test]
    fn self_dependency_is_ignored() {
        let desc = things(Protocol::Query)
            .depends_on("thing-service")
            .depends_on("ec2")
            .build()
            .unwrap();
        assert_eq!(desc.depends_on().iter().collect::<Vec<_>>(), vec!["ec2"]);
    }
}
