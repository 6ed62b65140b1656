//! EC2: default networking per region plus instance lifecycle.

use cloudmock_core::{Fault, FieldKind, Params, Protocol, Shape};
use serde_json::{json, Value};

use super::resource_id;
use crate::backend::HandlerContext;
use crate::service::descriptor::{RegistrationError, ServiceDescriptor};
use crate::service::operation::HandlerResult;

pub const SERVICE_ID: &str = "ec2";

/// Most instances a single launch may ask for.
pub const MAX_INSTANCES_PER_LAUNCH: usize = 1000;

const XMLNS: &str = "http://ec2.amazonaws.com/doc/2016-11-15/";
const ZONE_SUFFIXES: [char; 3] = ['a', 'b', 'c'];
const DEFAULT_INSTANCE_TYPE: &str = "m1.small";

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Terminated,
}

impl InstanceState {
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            InstanceState::Running => 16,
            InstanceState::Terminated => 48,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            InstanceState::Running => "running",
            InstanceState::Terminated => "terminated",
        }
    }

    fn to_value(self) -> Value {
        json!({"code": self.code(), "name": self.name()})
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
    pub default_for_az: bool,
}

impl Subnet {
    fn to_value(&self) -> Value {
        json!({
            "subnetId": self.subnet_id,
            "state": "available",
            "vpcId": self.vpc_id,
            "cidrBlock": self.cidr_block,
            "availabilityZone": self.availability_zone,
            "defaultForAz": self.default_for_az,
            "mapPublicIpOnLaunch": self.default_for_az,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub state: InstanceState,
}

impl Instance {
    fn to_value(&self) -> Value {
        json!({
            "instanceId": self.instance_id,
            "imageId": self.image_id,
            "instanceState": self.state.to_value(),
            "instanceType": self.instance_type,
            "placement": {"availabilityZone": self.availability_zone},
            "subnetId": self.subnet_id,
            "vpcId": self.vpc_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub reservation_id: String,
    pub owner_id: String,
    pub instances: Vec<Instance>,
}

impl Reservation {
    fn to_value(&self, instances: Vec<Value>) -> Value {
        json!({
            "reservationId": self.reservation_id,
            "ownerId": self.owner_id,
            "groupSet": [],
            "instancesSet": instances,
        })
    }
}

/// Result of a state transition on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub instance_id: String,
    pub previous: InstanceState,
    pub current: InstanceState,
}

/// Parameters of one launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub image_id: &'a str,
    pub instance_type: &'a str,
    pub count: usize,
    /// Target subnet; the first default subnet when absent.
    pub subnet_id: Option<&'a str>,
    pub owner_id: &'a str,
}

// ---------------------------------------------------------------------------
// Ec2Backend
// ---------------------------------------------------------------------------

/// EC2 state of one region.
#[derive(Debug)]
pub struct Ec2Backend {
    region: String,
    vpcs: Vec<Vpc>,
    subnets: Vec<Subnet>,
    reservations: Vec<Reservation>,
}

impl Ec2Backend {
    /// A region with its default VPC and one default subnet per zone.
    #[must_use]
    pub fn new(region: &str) -> Self {
        let vpc = Vpc {
            vpc_id: resource_id("vpc", 17),
            cidr_block: "172.31.0.0/16".to_string(),
            is_default: true,
        };
        let subnets = ZONE_SUFFIXES
            .iter()
            .enumerate()
            .map(|(i, suffix)| Subnet {
                subnet_id: resource_id("subnet", 17),
                vpc_id: vpc.vpc_id.clone(),
                availability_zone: format!("{region}{suffix}"),
                cidr_block: format!("172.31.{}.0/20", i * 16),
                default_for_az: true,
            })
            .collect();
        Self {
            region: region.to_string(),
            vpcs: vec![vpc],
            subnets,
            reservations: Vec::new(),
        }
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn default_vpc(&self) -> Option<&Vpc> {
        self.vpcs.iter().find(|vpc| vpc.is_default)
    }

    #[must_use]
    pub fn availability_zones(&self) -> Vec<String> {
        ZONE_SUFFIXES
            .iter()
            .map(|suffix| format!("{}{suffix}", self.region))
            .collect()
    }

    #[must_use]
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    #[must_use]
    pub fn subnet(&self, subnet_id: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.subnet_id == subnet_id)
    }

    /// Default subnet of a zone.
    #[must_use]
    pub fn default_subnet(&self, zone: &str) -> Option<&Subnet> {
        self.subnets
            .iter()
            .find(|s| s.default_for_az && s.availability_zone == zone)
    }

    #[must_use]
    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<&Instance> {
        self.reservations
            .iter()
            .flat_map(|r| &r.instances)
            .find(|i| i.instance_id == instance_id)
    }

    /// Launches `request.count` instances as one reservation.
    ///
    /// # Errors
    ///
    /// `InvalidSubnetID.NotFound` for an unknown subnet,
    /// `InvalidParameterValue` for a zero count and `InstanceLimitExceeded`
    /// above [`MAX_INSTANCES_PER_LAUNCH`].
    pub fn run_instances(&mut self, request: &LaunchRequest<'_>) -> Result<Reservation, Fault> {
        if request.count == 0 {
            return Err(Fault::invalid_parameter(
                Protocol::Ec2,
                "MaxCount",
                "must be at least 1",
            ));
        }
        if request.count > MAX_INSTANCES_PER_LAUNCH {
            return Err(Fault::new(
                "InstanceLimitExceeded",
                format!(
                    "Your requested instance count ({}) is more than the limit of \
                     {MAX_INSTANCES_PER_LAUNCH} instances per launch",
                    request.count
                ),
            ));
        }
        let subnet = match request.subnet_id {
            Some(id) => self.subnet(id).ok_or_else(|| {
                Fault::new(
                    "InvalidSubnetID.NotFound",
                    format!("The subnet ID '{id}' does not exist"),
                )
            })?,
            None => self
                .subnets
                .iter()
                .find(|s| s.default_for_az)
                .ok_or_else(|| Fault::new("MissingInput", "No default subnet is available"))?,
        };
        let instances = (0..request.count)
            .map(|_| Instance {
                instance_id: resource_id("i", 17),
                image_id: request.image_id.to_string(),
                instance_type: request.instance_type.to_string(),
                subnet_id: subnet.subnet_id.clone(),
                vpc_id: subnet.vpc_id.clone(),
                availability_zone: subnet.availability_zone.clone(),
                state: InstanceState::Running,
            })
            .collect();
        let reservation = Reservation {
            reservation_id: resource_id("r", 17),
            owner_id: request.owner_id.to_string(),
            instances,
        };
        self.reservations.push(reservation.clone());
        Ok(reservation)
    }

    /// Terminates the named instances. Nothing changes if any id is unknown.
    ///
    /// # Errors
    ///
    /// `InvalidInstanceID.NotFound` naming the first unknown id.
    pub fn terminate_instances(
        &mut self,
        instance_ids: &[String],
    ) -> Result<Vec<StateChange>, Fault> {
        if let Some(missing) = instance_ids.iter().find(|id| self.instance(id).is_none()) {
            return Err(instance_not_found(missing));
        }
        let mut changes = Vec::with_capacity(instance_ids.len());
        for instance in self.reservations.iter_mut().flat_map(|r| &mut r.instances) {
            if instance_ids.contains(&instance.instance_id) {
                changes.push(StateChange {
                    instance_id: instance.instance_id.clone(),
                    previous: instance.state,
                    current: InstanceState::Terminated,
                });
                instance.state = InstanceState::Terminated;
            }
        }
        Ok(changes)
    }
}

fn instance_not_found(instance_id: &str) -> Fault {
    Fault::new(
        "InvalidInstanceID.NotFound",
        format!("The instance ID '{instance_id}' does not exist"),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn run_instances(
    ec2: &mut Ec2Backend,
    params: &Params,
    ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let min = params.i64("MinCount").unwrap_or(1);
    let max = params.i64("MaxCount").unwrap_or(min);
    if min < 1 || min > max {
        return Err(Fault::invalid_parameter(
            Protocol::Ec2,
            "MinCount",
            "must be at least 1 and no greater than MaxCount",
        )
        .into());
    }
    let count = usize::try_from(max)
        .map_err(|_| Fault::invalid_parameter(Protocol::Ec2, "MaxCount", "is out of range"))?;

    let reservation = ec2.run_instances(&LaunchRequest {
        image_id: params.required_str(Protocol::Ec2, "ImageId")?,
        instance_type: params.str("InstanceType").unwrap_or(DEFAULT_INSTANCE_TYPE),
        count,
        subnet_id: params.str("SubnetId"),
        owner_id: ctx.account_id(),
    })?;
    tracing::debug!(
        reservation = %reservation.reservation_id,
        count = reservation.instances.len(),
        "instances launched"
    );

    let instances = reservation.instances.iter().map(Instance::to_value).collect();
    Ok(reservation.to_value(instances))
}

fn describe_instances(
    ec2: &mut Ec2Backend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("InstanceId");
    if let Some(missing) = wanted.iter().find(|id| ec2.instance(id).is_none()) {
        return Err(instance_not_found(missing).into());
    }
    let reservations: Vec<Value> = ec2
        .reservations
        .iter()
        .filter_map(|reservation| {
            let instances: Vec<Value> = reservation
                .instances
                .iter()
                .filter(|i| wanted.is_empty() || wanted.contains(&i.instance_id))
                .map(Instance::to_value)
                .collect();
            (!instances.is_empty()).then(|| reservation.to_value(instances))
        })
        .collect();
    Ok(json!({"reservationSet": reservations}))
}

fn terminate_instances(
    ec2: &mut Ec2Backend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let ids = params.strings("InstanceId");
    if ids.is_empty() {
        return Err(Fault::missing_parameter(Protocol::Ec2, "InstanceId").into());
    }
    let changes: Vec<Value> = ec2
        .terminate_instances(&ids)?
        .into_iter()
        .map(|change| {
            json!({
                "instanceId": change.instance_id,
                "currentState": change.current.to_value(),
                "previousState": change.previous.to_value(),
            })
        })
        .collect();
    Ok(json!({"instancesSet": changes}))
}

/// One `Filter.N` entry: a name and the values any of which may match.
struct Filter {
    name: String,
    values: Vec<String>,
}

fn parse_filters(params: &Params) -> Result<Vec<Filter>, Fault> {
    params
        .list("Filter")
        .iter()
        .map(|item| {
            let name = item
                .get("Name")
                .and_then(Value::as_str)
                .ok_or_else(|| Fault::missing_parameter(Protocol::Ec2, "Filter.Name"))?;
            let values = match item.get("Value") {
                Some(Value::Array(values)) => values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                Some(Value::String(value)) => vec![value.clone()],
                _ => Vec::new(),
            };
            Ok(Filter {
                name: name.to_string(),
                values,
            })
        })
        .collect()
}

fn subnet_matches(subnet: &Subnet, filter: &Filter) -> Result<bool, Fault> {
    let field = match filter.name.as_str() {
        "availability-zone" => subnet.availability_zone.as_str(),
        "vpc-id" => subnet.vpc_id.as_str(),
        "subnet-id" => subnet.subnet_id.as_str(),
        "default-for-az" => {
            if subnet.default_for_az {
                "true"
            } else {
                "false"
            }
        }
        other => {
            return Err(Fault::new(
                "InvalidParameterValue",
                format!("The filter '{other}' is invalid"),
            ))
        }
    };
    Ok(filter.values.iter().any(|v| v == field))
}

fn describe_subnets(
    ec2: &mut Ec2Backend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("SubnetId");
    if let Some(missing) = wanted.iter().find(|id| ec2.subnet(id).is_none()) {
        return Err(Fault::new(
            "InvalidSubnetID.NotFound",
            format!("The subnet ID '{missing}' does not exist"),
        )
        .into());
    }
    let filters = parse_filters(params)?;

    let mut subnets = Vec::new();
    for subnet in &ec2.subnets {
        if !wanted.is_empty() && !wanted.contains(&subnet.subnet_id) {
            continue;
        }
        let mut keep = true;
        for filter in &filters {
            keep &= subnet_matches(subnet, filter)?;
        }
        if keep {
            subnets.push(subnet.to_value());
        }
    }
    Ok(json!({"subnetSet": subnets}))
}

fn describe_availability_zones(
    ec2: &mut Ec2Backend,
    _params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let zones: Vec<Value> = ec2
        .availability_zones()
        .into_iter()
        .map(|zone| {
            json!({
                "zoneName": zone,
                "zoneState": "available",
                "regionName": ec2.region,
            })
        })
        .collect();
    Ok(json!({"availabilityZoneInfo": zones}))
}

/// The `ec2` Service Descriptor.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if the descriptor is malformed.
pub fn descriptor() -> Result<ServiceDescriptor, RegistrationError> {
    ServiceDescriptor::builder::<Ec2Backend>(SERVICE_ID, Protocol::Ec2)
        .url_base(r"https?://ec2\.(.+)\.amazonaws\.com(?:\.cn)?")
        .url_base(r"https?://ec2\.amazonaws\.com")
        .xml_namespace(XMLNS)
        .backend(Ec2Backend::new)
        .action_with_shape(
            "RunInstances",
            Shape::new()
                .required("ImageId", FieldKind::String)
                .optional("MinCount", FieldKind::Integer)
                .optional("MaxCount", FieldKind::Integer)
                .optional("InstanceType", FieldKind::String)
                .optional("SubnetId", FieldKind::String),
            run_instances,
        )
        .action_with_shape(
            "DescribeInstances",
            Shape::new().optional("InstanceId", FieldKind::List),
            describe_instances,
        )
        .action_with_shape(
            "TerminateInstances",
            Shape::new().required("InstanceId", FieldKind::List),
            terminate_instances,
        )
        .action_with_shape(
            "DescribeSubnets",
            Shape::new()
                .optional("SubnetId", FieldKind::List)
                .optional("Filter", FieldKind::List),
            describe_subnets,
        )
        .action("DescribeAvailabilityZones", describe_availability_zones)
        .build()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn launch<'a>(
        image_id: &'a str,
        count: usize,
        subnet_id: Option<&'a str>,
    ) -> LaunchRequest<'a> {
        LaunchRequest {
            image_id,
            instance_type: DEFAULT_INSTANCE_TYPE,
            count,
            subnet_id,
            owner_id: "123456789012",
        }
    }

    #[test]
    fn new_region_has_default_networking() {
        let ec2 = Ec2Backend::new("ap-northeast-1");
        let vpc = ec2.default_vpc().unwrap();
        assert_eq!(
            ec2.availability_zones(),
            vec!["ap-northeast-1a", "ap-northeast-1b", "ap-northeast-1c"]
        );
        assert_eq!(ec2.subnets().len(), 3);
        assert!(ec2.subnets().iter().all(|s| s.vpc_id == vpc.vpc_id));
        assert!(ec2.default_subnet("ap-northeast-1c").is_some());
        assert!(ec2.default_subnet("us-east-1a").is_none());
    }

    #[test]
    fn run_and_terminate() {
        let mut ec2 = Ec2Backend::new("us-east-1");
        let reservation = ec2.run_instances(&launch("ami-1", 2, None)).unwrap();
        assert_eq!(reservation.instances.len(), 2);
        assert_eq!(ec2.reservations().len(), 1);

        let id = reservation.instances[0].instance_id.clone();
        let changes = ec2.terminate_instances(std::slice::from_ref(&id)).unwrap();
        assert_eq!(changes[0].previous, InstanceState::Running);
        assert_eq!(ec2.instance(&id).unwrap().state, InstanceState::Terminated);
        assert_eq!(
            ec2.instance(&reservation.instances[1].instance_id).unwrap().state,
            InstanceState::Running
        );
    }

    #[test]
    fn launch_into_named_subnet() {
        let mut ec2 = Ec2Backend::new("us-east-1");
        let subnet = ec2.default_subnet("us-east-1c").unwrap().clone();
        let reservation = ec2
            .run_instances(&launch("ami-1", 1, Some(&subnet.subnet_id)))
            .unwrap();
        assert_eq!(reservation.instances[0].availability_zone, "us-east-1c");

        let err = ec2.run_instances(&launch("ami-1", 1, Some("subnet-nope"))).unwrap_err();
        assert_eq!(err.code, "InvalidSubnetID.NotFound");
        let err = ec2.run_instances(&launch("ami-1", 0, None)).unwrap_err();
        assert_eq!(err.code, "InvalidParameterValue");
    }

    #[test]
    fn launch_count_is_capped() {
        let mut ec2 = Ec2Backend::new("us-east-1");
        let err = ec2
            .run_instances(&launch("ami-1", MAX_INSTANCES_PER_LAUNCH + 1, None))
            .unwrap_err();
        assert_eq!(err.code, "InstanceLimitExceeded");
        assert!(ec2.reservations().is_empty());

        let reservation = ec2
            .run_instances(&launch("ami-1", MAX_INSTANCES_PER_LAUNCH, None))
            .unwrap();
        assert_eq!(reservation.instances.len(), MAX_INSTANCES_PER_LAUNCH);
    }

    #[test]
    fn terminate_unknown_instance_changes_nothing() {
        let mut ec2 = Ec2Backend::new("us-east-1");
        let reservation = ec2.run_instances(&launch("ami-1", 1, None)).unwrap();
        let ids = vec![reservation.instances[0].instance_id.clone(), "i-missing".to_string()];
        let err = ec2.terminate_instances(&ids).unwrap_err();
        assert_eq!(err.code, "InvalidInstanceID.NotFound");
        assert_eq!(ec2.instance(&ids[0]).unwrap().state, InstanceState::Running);
    }

    #[test]
    fn subnet_filters() {
        let ec2 = Ec2Backend::new("us-east-1");
        let subnet = &ec2.subnets()[1];
        let by_zone = Filter {
            name: "availability-zone".to_string(),
            values: vec!["us-east-1b".to_string()],
        };
        assert!(subnet_matches(subnet, &by_zone).unwrap());
        assert!(!subnet_matches(&ec2.subnets()[0], &by_zone).unwrap());

        let unknown = Filter {
            name: "tag:Name".to_string(),
            values: vec![],
        };
        assert_eq!(subnet_matches(subnet, &unknown).unwrap_err().code, "InvalidParameterValue");
    }

    #[test]
    fn parses_nested_filters() {
        let params = cloudmock_core::form::nest([
            ("Filter.1.Name", "availability-zone"),
            ("Filter.1.Value.1", "us-east-1a"),
            ("Filter.1.Value.2", "us-east-1b"),
        ]);
        let filters = parse_filters(&params).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].name, "availability-zone");
        assert_eq!(filters[0].values, vec!["us-east-1a", "us-east-1b"]);
    }
}
