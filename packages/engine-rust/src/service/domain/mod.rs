//! Reference services built on the registration interface.
//!
//! Each module exposes a `descriptor()` constructor plus its typed backend
//! state. Resource rules are intentionally small; the services exist to
//! exercise every protocol family and cross-service references.

pub mod autoscaling;
pub mod ec2;
pub mod elb;
pub mod support;

use uuid::Uuid;

use super::descriptor::{RegistrationError, ServiceDescriptor};

/// Descriptors of every reference service, dependencies first.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if any descriptor fails to build.
pub fn reference_services() -> Result<Vec<ServiceDescriptor>, RegistrationError> {
    Ok(vec![
        ec2::descriptor()?,
        elb::descriptor()?,
        autoscaling::descriptor()?,
        support::descriptor()?,
    ])
}

/// Random resource id in the provider's `prefix-hex` style.
pub(crate) fn resource_id(prefix: &str, hex_len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..hex_len.min(hex.len())])
}
