//! Resolved operations and the errors raised while resolving and running them.

use cloudmock_core::{CapturedRequest, Fault, Params, Protocol};
use serde_json::Value;

/// A captured request paired with its action name and parameters.
///
/// Lives for one dispatch cycle.
#[derive(Debug, Clone)]
pub struct ResolvedOperation {
    /// Monotonically increasing per resolver.
    pub call_id: u64,
    pub service_id: String,
    pub action: String,
    pub params: Params,
    pub region: String,
    pub request: CapturedRequest,
}

/// Why a captured request could not be mapped onto an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("request carries no action")]
    MissingAction,
    #[error("action {action} is not registered")]
    UnknownAction { action: String },
    #[error("request names more than one action: {candidates:?}")]
    AmbiguousAction { candidates: Vec<String> },
    #[error("no route matches {method} {path}")]
    NoRoute { method: String, path: String },
    #[error("malformed request body: {reason}")]
    MalformedBody { reason: String },
}

impl ResolutionError {
    /// The protocol's "operation not recognized" (or malformed input) fault.
    #[must_use]
    pub fn to_fault(&self, protocol: Protocol) -> Fault {
        match self {
            ResolutionError::UnknownAction { action } => {
                Fault::unknown_operation(protocol, Some(action))
            }
            ResolutionError::MissingAction
            | ResolutionError::AmbiguousAction { .. }
            | ResolutionError::NoRoute { .. } => Fault::unknown_operation(protocol, None),
            ResolutionError::MalformedBody { reason } => Fault::malformed_body(protocol, reason),
        }
    }
}

/// Result of a handler invocation.
pub type HandlerResult = Result<Value, HandlerError>;

/// Failure returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Expected, user-visible domain error.
    #[error(transparent)]
    Fault(#[from] Fault),
    /// Unexpected error; rendered as `InternalFailure` and recorded.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Shorthand for an internal error with a message.
    #[must_use]
    pub fn internal(message: impl std::fmt::Display) -> Self {
        HandlerError::Internal(anyhow::anyhow!("{message}"))
    }
}

/// An unexpected failure inside dispatch: a handler error that is not a
/// [`Fault`], a handler panic, or a backend that could not be created.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("internal failure in {service}.{action} ({region}): {source}")]
    Internal {
        service: String,
        action: String,
        region: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn unknown_action_fault_names_the_action() {
        let fault = ResolutionError::UnknownAction {
            action: "Frobnicate".to_string(),
        }
        .to_fault(Protocol::Query);
        assert_eq!(fault.code, "InvalidAction");
        assert!(fault.message.contains("Frobnicate"));
    }

    #[test]
    fn no_route_on_rest_json_is_not_found() {
        let fault = ResolutionError::NoRoute {
            method: "GET".to_string(),
            path: "/nowhere".to_string(),
        }
        .to_fault(Protocol::RestJson);
        assert_eq!(fault.code, "UnknownOperationException");
        assert_eq!(fault.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn malformed_body_maps_per_protocol() {
        let err = ResolutionError::MalformedBody {
            reason: "expected object".to_string(),
        };
        assert_eq!(err.to_fault(Protocol::Json).code, "SerializationException");
        assert_eq!(err.to_fault(Protocol::Ec2).code, "MalformedInput");
    }

    #[test]
    fn question_mark_converts_faults_and_anyhow() {
        fn fails_with_fault() -> HandlerResult {
            let outcome: Result<Value, Fault> = Err(Fault::new("DuplicateName", "taken"));
            Ok(outcome?)
        }
        fn fails_internally() -> HandlerResult {
            let outcome: anyhow::Result<Value> = Err(anyhow::anyhow!("boom"));
            Ok(outcome?)
        }
        assert!(matches!(fails_with_fault(), Err(HandlerError::Fault(f)) if f.code == "DuplicateName"));
        assert!(matches!(fails_internally(), Err(HandlerError::Internal(_))));
    }
}
