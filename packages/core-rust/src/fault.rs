//! Protocol-renderable failures raised by handlers and by the engine.

use http::StatusCode;

use crate::protocol::Protocol;
use crate::shape::ShapeViolation;

/// A typed failure carrying the service's error code, an HTTP status and a
/// human-readable message.
///
/// Faults are expected outcomes: the codec renders them into the protocol's
/// error envelope and the caller's SDK surfaces them as service errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} ({status}): {message}")]
pub struct Fault {
    /// Service-defined error code, e.g. `"DuplicateName"`.
    pub code: String,
    /// HTTP status of the rendered error response.
    pub status: StatusCode,
    /// Message shown to the caller.
    pub message: String,
}

impl Fault {
    /// Creates a client-side (400) fault.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Replaces the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Generic server-side failure used for unexpected handler errors.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("InternalFailure", message).with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// `true` when the caller is at fault (4xx), `false` for server faults.
    #[must_use]
    pub fn is_sender_fault(&self) -> bool {
        self.status.is_client_error()
    }

    /// A required parameter was absent.
    #[must_use]
    pub fn missing_parameter(protocol: Protocol, name: &str) -> Self {
        if protocol.is_form_encoded() {
            Self::new(
                "MissingParameter",
                format!("The request must contain the parameter {name}"),
            )
        } else {
            Self::new(
                "ValidationException",
                format!(
                    "1 validation error detected: Value null at '{name}' failed to satisfy constraint: Member must not be null"
                ),
            )
        }
    }

    /// A parameter was present but unusable.
    #[must_use]
    pub fn invalid_parameter(protocol: Protocol, name: &str, detail: &str) -> Self {
        if protocol.is_form_encoded() {
            Self::new(
                "InvalidParameterValue",
                format!("Invalid value for parameter {name}: {detail}"),
            )
        } else {
            Self::new(
                "ValidationException",
                format!("1 validation error detected: Value at '{name}' {detail}"),
            )
        }
    }

    /// Maps a boundary shape violation onto the protocol's validation fault.
    #[must_use]
    pub fn from_violation(protocol: Protocol, violation: &ShapeViolation) -> Self {
        match violation {
            ShapeViolation::Missing { field } => Self::missing_parameter(protocol, field),
            ShapeViolation::WrongType { field, expected, found } => Self::invalid_parameter(
                protocol,
                field,
                &format!("expected {expected}, found {found}"),
            ),
            ShapeViolation::OutOfRange { field, value } => {
                Self::invalid_parameter(protocol, field, &format!("{value} is out of range"))
            }
        }
    }

    /// The requested operation is not recognized by the service.
    #[must_use]
    pub fn unknown_operation(protocol: Protocol, action: Option<&str>) -> Self {
        let message = match action {
            Some(action) => format!("The action {action} is not valid for this web service."),
            None => "Could not determine the action for this request.".to_string(),
        };
        match protocol {
            Protocol::Query | Protocol::Ec2 => Self::new("InvalidAction", message),
            Protocol::Json => Self::new("UnknownOperationException", message),
            Protocol::RestJson => {
                Self::new("UnknownOperationException", message).with_status(StatusCode::NOT_FOUND)
            }
        }
    }

    /// The request body could not be decoded.
    #[must_use]
    pub fn malformed_body(protocol: Protocol, reason: &str) -> Self {
        if protocol.is_form_encoded() {
            Self::new("MalformedInput", reason.to_string())
        } else {
            Self::new("SerializationException", reason.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::FieldKind;

    #[test]
    fn new_defaults_to_bad_request() {
        let fault = Fault::new("DuplicateName", "already exists");
        assert_eq!(fault.status, StatusCode::BAD_REQUEST);
        assert!(fault.is_sender_fault());
    }

    #[test]
    fn internal_is_receiver_fault() {
        let fault = Fault::internal("boom");
        assert_eq!(fault.code, "InternalFailure");
        assert_eq!(fault.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!fault.is_sender_fault());
    }

    #[test]
    fn missing_parameter_code_depends_on_protocol() {
        assert_eq!(Fault::missing_parameter(Protocol::Query, "Name").code, "MissingParameter");
        assert_eq!(Fault::missing_parameter(Protocol::Json, "name").code, "ValidationException");
    }

    #[test]
    fn unknown_operation_per_protocol() {
        let query = Fault::unknown_operation(Protocol::Query, Some("Nope"));
        assert_eq!(query.code, "InvalidAction");
        assert!(query.message.contains("Nope"));

        let rest = Fault::unknown_operation(Protocol::RestJson, None);
        assert_eq!(rest.code, "UnknownOperationException");
        assert_eq!(rest.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn wrong_type_violation_mentions_expected_kind() {
        let violation = ShapeViolation::WrongType {
            field: "MinSize".to_string(),
            expected: FieldKind::Integer,
            found: "string",
        };
        let fault = Fault::from_violation(Protocol::Query, &violation);
        assert_eq!(fault.code, "InvalidParameterValue");
        assert!(fault.message.contains("expected integer"));
    }

    #[test]
    fn out_of_range_violation_is_an_invalid_value() {
        let violation = ShapeViolation::OutOfRange {
            field: "MaxCount".to_string(),
            value: "18446744073709551615".to_string(),
        };
        let fault = Fault::from_violation(Protocol::Ec2, &violation);
        assert_eq!(fault.code, "InvalidParameterValue");
        assert!(fault.message.ends_with("18446744073709551615 is out of range"));
    }

    #[test]
    fn display_includes_code_and_message() {
        let fault = Fault::new("Oops", "it broke");
        assert_eq!(fault.to_string(), "Oops (400 Bad Request): it broke");
    }
}
