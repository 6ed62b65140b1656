//! Classic load balancers.

use std::collections::BTreeMap;

use cloudmock_core::{Fault, FieldKind, Params, Protocol, Shape};
use serde_json::{json, Map, Value};

use crate::backend::HandlerContext;
use crate::service::descriptor::{RegistrationError, ServiceDescriptor};
use crate::service::operation::HandlerResult;

pub const SERVICE_ID: &str = "elb";

const XMLNS: &str = "http://elasticloadbalancing.amazonaws.com/doc/2012-06-01/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub protocol: String,
    pub load_balancer_port: i64,
    pub instance_port: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    pub dns_name: String,
    pub scheme: String,
    pub listeners: Vec<Listener>,
    pub availability_zones: Vec<String>,
}

impl LoadBalancer {
    fn to_value(&self) -> Value {
        let listeners: Vec<Value> = self
            .listeners
            .iter()
            .map(|l| {
                json!({
                    "Listener": {
                        "Protocol": l.protocol,
                        "LoadBalancerPort": l.load_balancer_port,
                        "InstancePort": l.instance_port,
                    },
                    "PolicyNames": [],
                })
            })
            .collect();
        json!({
            "LoadBalancerName": self.name,
            "DNSName": self.dns_name,
            "Scheme": self.scheme,
            "ListenerDescriptions": listeners,
            "AvailabilityZones": self.availability_zones,
        })
    }
}

/// ELB state of one region, load balancers keyed by name.
#[derive(Debug)]
pub struct ElbBackend {
    region: String,
    load_balancers: BTreeMap<String, LoadBalancer>,
}

impl ElbBackend {
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            load_balancers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&LoadBalancer> {
        self.load_balancers.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.load_balancers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.load_balancers.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// `DuplicateLoadBalancerName` if the name is taken.
    pub fn create(
        &mut self,
        name: &str,
        scheme: &str,
        listeners: Vec<Listener>,
        availability_zones: Vec<String>,
    ) -> Result<&LoadBalancer, Fault> {
        if self.load_balancers.contains_key(name) {
            return Err(Fault::new(
                "DuplicateLoadBalancerName",
                format!("The specified load balancer name already exists for this account: {name}"),
            ));
        }
        let load_balancer = LoadBalancer {
            name: name.to_string(),
            dns_name: format!("{name}.{}.elb.amazonaws.com", self.region),
            scheme: scheme.to_string(),
            listeners,
            availability_zones,
        };
        Ok(self
            .load_balancers
            .entry(name.to_string())
            .or_insert(load_balancer))
    }

    /// Deletes a load balancer; deleting a missing one is not an error.
    pub fn delete(&mut self, name: &str) -> Option<LoadBalancer> {
        self.load_balancers.remove(name)
    }
}

fn listener_port(item: &Map<String, Value>, field: &str) -> Result<i64, Fault> {
    let port = match item.get(field) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    port.ok_or_else(|| {
        Fault::invalid_parameter(
            Protocol::Query,
            &format!("Listeners.{field}"),
            "must be a port number",
        )
    })
}

fn parse_listeners(params: &Params) -> Result<Vec<Listener>, Fault> {
    params
        .list("Listeners")
        .iter()
        .map(|item| {
            let item = item.as_object().ok_or_else(|| {
                Fault::invalid_parameter(
                    Protocol::Query,
                    "Listeners",
                    "must be a list of listeners",
                )
            })?;
            let protocol = item
                .get("Protocol")
                .and_then(Value::as_str)
                .ok_or_else(|| Fault::missing_parameter(Protocol::Query, "Listeners.Protocol"))?;
            Ok(Listener {
                protocol: protocol.to_string(),
                load_balancer_port: listener_port(item, "LoadBalancerPort")?,
                instance_port: listener_port(item, "InstancePort")?,
            })
        })
        .collect()
}

fn create_load_balancer(
    elb: &mut ElbBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let name = params.required_str(Protocol::Query, "LoadBalancerName")?;
    let listeners = parse_listeners(params)?;
    let scheme = params.str("Scheme").unwrap_or("internet-facing");
    let created = elb.create(name, scheme, listeners, params.strings("AvailabilityZones"))?;
    tracing::debug!(load_balancer = %created.name, "load balancer created");
    Ok(json!({"DNSName": created.dns_name}))
}

fn describe_load_balancers(
    elb: &mut ElbBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("LoadBalancerNames");
    if let Some(missing) = wanted.iter().find(|name| !elb.contains(name)) {
        return Err(Fault::new(
            "LoadBalancerNotFound",
            format!("The specified load balancer does not exist: {missing}"),
        )
        .into());
    }
    let descriptions: Vec<Value> = elb
        .load_balancers
        .values()
        .filter(|lb| wanted.is_empty() || wanted.contains(&lb.name))
        .map(LoadBalancer::to_value)
        .collect();
    Ok(json!({"LoadBalancerDescriptions": descriptions}))
}

fn delete_load_balancer(
    elb: &mut ElbBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let name = params.required_str(Protocol::Query, "LoadBalancerName")?;
    elb.delete(name);
    Ok(json!({}))
}

/// The `elb` Service Descriptor.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if the descriptor is malformed.
pub fn descriptor() -> Result<ServiceDescriptor, RegistrationError> {
    ServiceDescriptor::builder::<ElbBackend>(SERVICE_ID, Protocol::Query)
        .url_base(r"https?://elasticloadbalancing\.(.+)\.amazonaws\.com")
        .xml_namespace(XMLNS)
        .backend(ElbBackend::new)
        .action_with_shape(
            "CreateLoadBalancer",
            Shape::new()
                .required("LoadBalancerName", FieldKind::String)
                .required("Listeners", FieldKind::List)
                .optional("AvailabilityZones", FieldKind::List)
                .optional("Scheme", FieldKind::String),
            create_load_balancer,
        )
        .action_with_shape(
            "DescribeLoadBalancers",
            Shape::new().optional("LoadBalancerNames", FieldKind::List),
            describe_load_balancers,
        )
        .action_with_shape(
            "DeleteLoadBalancer",
            Shape::new().required("LoadBalancerName", FieldKind::String),
            delete_load_balancer,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_listener() -> Vec<Listener> {
        vec![Listener {
            protocol: "http".to_string(),
            load_balancer_port: 80,
            instance_port: 8080,
        }]
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let mut elb = ElbBackend::new("us-east-1");
        let lb = elb.create("web", "internet-facing", http_listener(), vec![]).unwrap();
        assert_eq!(lb.dns_name, "web.us-east-1.elb.amazonaws.com");

        let err = elb.create("web", "internal", vec![], vec![]).unwrap_err();
        assert_eq!(err.code, "DuplicateLoadBalancerName");
        assert_eq!(elb.get("web").unwrap().scheme, "internet-facing");
    }

    #[test]
    fn delete_is_idempotent() {
        let mut elb = ElbBackend::new("us-east-1");
        elb.create("web", "internet-facing", http_listener(), vec![]).unwrap();
        assert!(elb.delete("web").is_some());
        assert!(elb.delete("web").is_none());
        assert_eq!(elb.names().count(), 0);
    }

    #[test]
    fn parses_member_listeners() {
        let params = cloudmock_core::form::nest([
            ("Listeners.member.1.Protocol", "http"),
            ("Listeners.member.1.LoadBalancerPort", "80"),
            ("Listeners.member.1.InstancePort", "8080"),
        ]);
        assert_eq!(parse_listeners(&params).unwrap(), http_listener());

        let params = cloudmock_core::form::nest([
            ("Listeners.member.1.Protocol", "http"),
            ("Listeners.member.1.LoadBalancerPort", "eighty"),
            ("Listeners.member.1.InstancePort", "8080"),
        ]);
        assert_eq!(parse_listeners(&params).unwrap_err().code, "InvalidParameterValue");
    }
}
