//! Auto Scaling: launch configurations and groups.
//!
//! Groups reference same-region resources owned by other services: load
//! balancers in `elb`, subnets in `ec2`. Creating a group also launches its
//! desired capacity into the `ec2` backend.

use std::collections::BTreeMap;

use cloudmock_core::{Fault, FieldKind, Params, Protocol, Shape};
use serde_json::{json, Value};
use uuid::Uuid;

use super::ec2::{self, Ec2Backend, LaunchRequest};
use super::elb::{self, ElbBackend};
use crate::backend::HandlerContext;
use crate::service::descriptor::{RegistrationError, ServiceDescriptor};
use crate::service::operation::HandlerResult;

pub const SERVICE_ID: &str = "autoscaling";

const XMLNS: &str = "http://autoscaling.amazonaws.com/doc/2011-01-01/";
const DEFAULT_COOLDOWN: i64 = 300;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfiguration {
    pub name: String,
    pub arn: String,
    pub image_id: String,
    pub instance_type: String,
}

impl LaunchConfiguration {
    fn to_value(&self) -> Value {
        json!({
            "LaunchConfigurationName": self.name,
            "LaunchConfigurationARN": self.arn,
            "ImageId": self.image_id,
            "InstanceType": self.instance_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInstance {
    pub instance_id: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub arn: String,
    pub launch_configuration_name: String,
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: i64,
    pub default_cooldown: i64,
    pub health_check_grace_period: i64,
    pub health_check_type: String,
    pub availability_zones: Vec<String>,
    pub load_balancer_names: Vec<String>,
    pub placement_group: Option<String>,
    pub vpc_zone_identifier: String,
    pub termination_policies: Vec<String>,
    pub instances: Vec<GroupInstance>,
}

impl AutoScalingGroup {
    fn to_value(&self) -> Value {
        let instances: Vec<Value> = self
            .instances
            .iter()
            .map(|i| {
                json!({
                    "InstanceId": i.instance_id,
                    "AvailabilityZone": i.availability_zone,
                    "LifecycleState": "InService",
                    "HealthStatus": "Healthy",
                    "LaunchConfigurationName": self.launch_configuration_name,
                })
            })
            .collect();
        json!({
            "AutoScalingGroupName": self.name,
            "AutoScalingGroupARN": self.arn,
            "LaunchConfigurationName": self.launch_configuration_name,
            "MinSize": self.min_size,
            "MaxSize": self.max_size,
            "DesiredCapacity": self.desired_capacity,
            "DefaultCooldown": self.default_cooldown,
            "AvailabilityZones": self.availability_zones,
            "LoadBalancerNames": self.load_balancer_names,
            "HealthCheckType": self.health_check_type,
            "HealthCheckGracePeriod": self.health_check_grace_period,
            "Instances": instances,
            "PlacementGroup": self.placement_group,
            "VPCZoneIdentifier": self.vpc_zone_identifier,
            "TerminationPolicies": self.termination_policies,
        })
    }
}

/// Auto Scaling state of one region.
#[derive(Debug, Default)]
pub struct AutoScalingBackend {
    launch_configurations: BTreeMap<String, LaunchConfiguration>,
    groups: BTreeMap<String, AutoScalingGroup>,
}

impl AutoScalingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn launch_configuration(&self, name: &str) -> Option<&LaunchConfiguration> {
        self.launch_configurations.get(name)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&AutoScalingGroup> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &AutoScalingGroup> {
        self.groups.values()
    }
}

fn validation_error(message: impl Into<String>) -> Fault {
    Fault::new("ValidationError", message)
}

fn arn(ctx: &HandlerContext<'_>, resource: &str, name: &str) -> String {
    format!(
        "arn:aws:autoscaling:{}:{}:{resource}:{}:{resource}Name/{name}",
        ctx.region(),
        ctx.account_id(),
        Uuid::new_v4()
    )
}

// ---------------------------------------------------------------------------
// Launch configurations
// ---------------------------------------------------------------------------

fn create_launch_configuration(
    autoscaling: &mut AutoScalingBackend,
    params: &Params,
    ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let name = params.required_str(Protocol::Query, "LaunchConfigurationName")?;
    if autoscaling.launch_configurations.contains_key(name) {
        return Err(Fault::new(
            "AlreadyExists",
            format!("Launch Configuration by this name already exists - A launch configuration already exists with the name {name}"),
        )
        .into());
    }
    let config = LaunchConfiguration {
        name: name.to_string(),
        arn: arn(ctx, "launchConfiguration", name),
        image_id: params.required_str(Protocol::Query, "ImageId")?.to_string(),
        instance_type: params.str("InstanceType").unwrap_or("m1.small").to_string(),
    };
    autoscaling
        .launch_configurations
        .insert(name.to_string(), config);
    Ok(json!(null))
}

fn describe_launch_configurations(
    autoscaling: &mut AutoScalingBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("LaunchConfigurationNames");
    let configs: Vec<Value> = autoscaling
        .launch_configurations
        .values()
        .filter(|c| wanted.is_empty() || wanted.contains(&c.name))
        .map(LaunchConfiguration::to_value)
        .collect();
    Ok(json!({"LaunchConfigurations": configs}))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Subnet ids of a comma-separated `VPCZoneIdentifier`.
fn split_zone_identifier(identifier: &str) -> Vec<&str> {
    identifier
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}

fn create_auto_scaling_group(
    autoscaling: &mut AutoScalingBackend,
    params: &Params,
    ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let name = params.required_str(Protocol::Query, "AutoScalingGroupName")?;
    if autoscaling.groups.contains_key(name) {
        return Err(Fault::new(
            "AlreadyExists",
            format!("AutoScalingGroup by this name already exists - A group with the name {name} already exists"),
        )
        .into());
    }

    let config_name = params.required_str(Protocol::Query, "LaunchConfigurationName")?;
    let config = autoscaling
        .launch_configurations
        .get(config_name)
        .ok_or_else(|| {
            validation_error(format!("Launch configuration name not found - {config_name}"))
        })?
        .clone();

    let min_size = params.i64("MinSize").unwrap_or(0);
    let max_size = params.i64("MaxSize").unwrap_or(0);
    let desired = params.i64("DesiredCapacity").unwrap_or(min_size);
    if min_size > max_size {
        return Err(validation_error(format!(
            "MinSize ({min_size}) must be less than or equal to MaxSize ({max_size})"
        ))
        .into());
    }
    if usize::try_from(max_size).is_ok_and(|max| max > ec2::MAX_INSTANCES_PER_LAUNCH) {
        return Err(validation_error(format!(
            "MaxSize ({max_size}) must be at most {}",
            ec2::MAX_INSTANCES_PER_LAUNCH
        ))
        .into());
    }
    if desired < min_size || desired > max_size {
        return Err(validation_error(format!(
            "Desired capacity:{desired} must be between the specified min size:{min_size} and max size:{max_size}"
        ))
        .into());
    }

    let load_balancer_names = params.strings("LoadBalancerNames");
    {
        let elb = ctx.backend::<ElbBackend>(elb::SERVICE_ID)?;
        if load_balancer_names.iter().any(|lb| !elb.contains(lb)) {
            return Err(validation_error(
                "Provided Load Balancers may not be valid. Please ensure they exist and try again.",
            )
            .into());
        }
    }

    let vpc_zone_identifier = params.str("VPCZoneIdentifier").unwrap_or_default().to_string();
    let subnet_ids = split_zone_identifier(&vpc_zone_identifier);
    let mut availability_zones = params.strings("AvailabilityZones");
    let owner_id = ctx.account_id().to_string();
    let ec2 = ctx.backend_mut::<Ec2Backend>(ec2::SERVICE_ID)?;

    let mut subnet_zones = Vec::with_capacity(subnet_ids.len());
    for subnet_id in &subnet_ids {
        let subnet = ec2
            .subnet(subnet_id)
            .ok_or_else(|| {
                validation_error(format!("The subnet ID '{subnet_id}' does not exist"))
            })?;
        subnet_zones.push(subnet.availability_zone.clone());
    }
    if availability_zones.is_empty() {
        availability_zones = subnet_zones;
        availability_zones.sort();
        availability_zones.dedup();
    }
    if availability_zones.is_empty() {
        return Err(validation_error(
            "At least one Availability Zone or VPC Subnet is required.",
        )
        .into());
    }

    let launch_subnet = match subnet_ids.first() {
        Some(id) => (*id).to_string(),
        None => ec2
            .default_subnet(&availability_zones[0])
            .map(|s| s.subnet_id.clone())
            .ok_or_else(|| {
                validation_error(format!(
                    "Invalid Availability Zone: {}",
                    availability_zones[0]
                ))
            })?,
    };
    let count = usize::try_from(desired).unwrap_or_default();
    let instances = if count == 0 {
        Vec::new()
    } else {
        ec2.run_instances(&LaunchRequest {
            image_id: &config.image_id,
            instance_type: &config.instance_type,
            count,
            subnet_id: Some(&launch_subnet),
            owner_id: &owner_id,
        })?
        .instances
        .into_iter()
        .map(|i| GroupInstance {
            instance_id: i.instance_id,
            availability_zone: i.availability_zone,
        })
        .collect()
    };

    let group = AutoScalingGroup {
        name: name.to_string(),
        arn: arn(ctx, "autoScalingGroup", name),
        launch_configuration_name: config.name,
        min_size,
        max_size,
        desired_capacity: desired,
        default_cooldown: params.i64("DefaultCooldown").unwrap_or(DEFAULT_COOLDOWN),
        health_check_grace_period: params.i64("HealthCheckGracePeriod").unwrap_or(0),
        health_check_type: params.str("HealthCheckType").unwrap_or("EC2").to_string(),
        availability_zones,
        load_balancer_names,
        placement_group: params.str("PlacementGroup").map(str::to_string),
        vpc_zone_identifier,
        termination_policies: match params.strings("TerminationPolicies") {
            policies if policies.is_empty() => vec!["Default".to_string()],
            policies => policies,
        },
        instances,
    };
    tracing::debug!(
        group = %group.name,
        instances = group.instances.len(),
        "auto scaling group created"
    );
    autoscaling.groups.insert(name.to_string(), group);
    Ok(json!(null))
}

fn describe_auto_scaling_groups(
    autoscaling: &mut AutoScalingBackend,
    params: &Params,
    _ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let wanted = params.strings("AutoScalingGroupNames");
    let groups: Vec<Value> = autoscaling
        .groups
        .values()
        .filter(|g| wanted.is_empty() || wanted.contains(&g.name))
        .map(AutoScalingGroup::to_value)
        .collect();
    Ok(json!({"AutoScalingGroups": groups}))
}

fn delete_auto_scaling_group(
    autoscaling: &mut AutoScalingBackend,
    params: &Params,
    ctx: &mut HandlerContext<'_>,
) -> HandlerResult {
    let name = params.required_str(Protocol::Query, "AutoScalingGroupName")?;
    let group = autoscaling
        .groups
        .get(name)
        .ok_or_else(|| validation_error(format!("AutoScalingGroup name not found - {name}")))?;

    let force = params.bool("ForceDelete").unwrap_or(false);
    if !group.instances.is_empty() {
        if !force {
            return Err(Fault::new(
                "ResourceInUse",
                "You cannot delete an AutoScalingGroup while there are instances or pending Spot instance request(s) still in the group.",
            )
            .into());
        }
        let ids: Vec<String> = group.instances.iter().map(|i| i.instance_id.clone()).collect();
        ctx.backend_mut::<Ec2Backend>(ec2::SERVICE_ID)?
            .terminate_instances(&ids)?;
    }
    autoscaling.groups.remove(name);
    Ok(json!(null))
}

/// The `autoscaling` Service Descriptor.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if the descriptor is malformed.
pub fn descriptor() -> Result<ServiceDescriptor, RegistrationError> {
    ServiceDescriptor::builder::<AutoScalingBackend>(SERVICE_ID, Protocol::Query)
        .url_base(r"https?://autoscaling\.(.+)\.amazonaws\.com")
        .xml_namespace(XMLNS)
        .depends_on(ec2::SERVICE_ID)
        .depends_on(elb::SERVICE_ID)
        .backend(|_region| AutoScalingBackend::new())
        .action_with_shape(
            "CreateLaunchConfiguration",
            Shape::new()
                .required("LaunchConfigurationName", FieldKind::String)
                .required("ImageId", FieldKind::String)
                .optional("InstanceType", FieldKind::String),
            create_launch_configuration,
        )
        .action_with_shape(
            "DescribeLaunchConfigurations",
            Shape::new().optional("LaunchConfigurationNames", FieldKind::List),
            describe_launch_configurations,
        )
        .action_with_shape(
            "CreateAutoScalingGroup",
            Shape::new()
                .required("AutoScalingGroupName", FieldKind::String)
                .required("LaunchConfigurationName", FieldKind::String)
                .required("MinSize", FieldKind::Integer)
                .required("MaxSize", FieldKind::Integer)
                .optional("DesiredCapacity", FieldKind::Integer)
                .optional("DefaultCooldown", FieldKind::Integer)
                .optional("HealthCheckGracePeriod", FieldKind::Integer)
                .optional("HealthCheckType", FieldKind::String)
                .optional("AvailabilityZones", FieldKind::List)
                .optional("LoadBalancerNames", FieldKind::List)
                .optional("PlacementGroup", FieldKind::String)
                .optional("VPCZoneIdentifier", FieldKind::String)
                .optional("TerminationPolicies", FieldKind::List),
            create_auto_scaling_group,
        )
        .action_with_shape(
            "DescribeAutoScalingGroups",
            Shape::new().optional("AutoScalingGroupNames", FieldKind::List),
            describe_auto_scaling_groups,
        )
        .action_with_shape(
            "DeleteAutoScalingGroup",
            Shape::new()
                .required("AutoScalingGroupName", FieldKind::String)
                .optional("ForceDelete", FieldKind::Boolean),
            delete_auto_scaling_group,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_identifier_splits_on_commas() {
        assert_eq!(
            split_zone_identifier("subnet-a, subnet-b,,"),
            vec!["subnet-a", "subnet-b"]
        );
        assert!(split_zone_identifier("").is_empty());
    }

    #[test]
    fn descriptor_depends_on_networking() {
        let desc = descriptor().unwrap();
        assert_eq!(
            desc.depends_on().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["ec2", "elb"]
        );
        assert_eq!(desc.protocol(), Protocol::Query);
    }

    #[test]
    fn group_value_carries_every_field() {
        let group = AutoScalingGroup {
            name: "g".to_string(),
            arn: "arn".to_string(),
            launch_configuration_name: "lc".to_string(),
            min_size: 2,
            max_size: 2,
            desired_capacity: 2,
            default_cooldown: 60,
            health_check_grace_period: 100,
            health_check_type: "EC2".to_string(),
            availability_zones: vec!["us-east-1c".to_string()],
            load_balancer_names: vec!["lb".to_string()],
            placement_group: None,
            vpc_zone_identifier: "subnet-1".to_string(),
            termination_policies: vec!["Default".to_string()],
            instances: vec![],
        };
        let value = group.to_value();
        assert_eq!(value["DefaultCooldown"], json!(60));
        assert_eq!(value["LoadBalancerNames"], json!(["lb"]));
        assert!(value["PlacementGroup"].is_null());
    }
}
