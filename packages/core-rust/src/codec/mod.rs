//! Response Codec: renders handler results and faults into each protocol's
//! wire envelope.
//!
//! | protocol    | success body                                  | error body                          |
//! |-------------|-----------------------------------------------|-------------------------------------|
//! | `query`     | `<XResponse><XResult>..</XResult><ResponseMetadata>` | `<ErrorResponse><Error>..`   |
//! | `ec2`       | `<XResponse><requestId>..`                    | `<Response><Errors><Error>..`       |
//! | `json`      | JSON document                                 | `{"__type", "message"}`             |
//! | `rest-json` | JSON document                                 | `{"message"}`                       |
//!
//! Every response carries the `x-amzn-RequestId` header; JSON errors also
//! carry `x-amzn-ErrorType`.

mod json;
mod xml;

use http::StatusCode;
use serde_json::Value;

use crate::fault::Fault;
use crate::protocol::Protocol;
use crate::wire::{WireResponse, REQUEST_ID_HEADER};

/// Per-response envelope inputs that do not come from the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeMeta {
    pub request_id: String,
    /// XML namespace of the service, used by the `query` and `ec2` envelopes.
    pub xmlns: Option<String>,
}

impl EnvelopeMeta {
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            xmlns: None,
        }
    }

    #[must_use]
    pub fn with_xmlns(mut self, xmlns: Option<&str>) -> Self {
        self.xmlns = xmlns.map(str::to_string);
        self
    }
}

/// Renders a successful result as a 200 response.
#[must_use]
pub fn render_success(
    protocol: Protocol,
    operation: &str,
    result: &Value,
    meta: &EnvelopeMeta,
) -> WireResponse {
    let rendered = match protocol {
        Protocol::Query => xml::query_success(operation, result, meta),
        Protocol::Ec2 => xml::ec2_success(operation, result, meta),
        Protocol::Json | Protocol::RestJson => json::success(result),
    };
    finish(protocol, StatusCode::OK, rendered, meta)
}

/// Renders a fault using the protocol's error envelope and the fault's status.
#[must_use]
pub fn render_fault(protocol: Protocol, fault: &Fault, meta: &EnvelopeMeta) -> WireResponse {
    let rendered = match protocol {
        Protocol::Query => xml::query_fault(fault, meta),
        Protocol::Ec2 => xml::ec2_fault(fault, meta),
        Protocol::Json => json::json_fault(fault),
        Protocol::RestJson => json::rest_fault(fault),
    };
    let response = finish(protocol, fault.status, rendered, meta);
    if protocol.is_xml() {
        response
    } else {
        response.with_header(crate::wire::ERROR_TYPE_HEADER, &fault.code)
    }
}

fn finish(
    protocol: Protocol,
    status: StatusCode,
    rendered: anyhow::Result<Vec<u8>>,
    meta: &EnvelopeMeta,
) -> WireResponse {
    let response = match rendered {
        Ok(body) => WireResponse::new(status, protocol.content_type(), body),
        Err(error) => {
            tracing::error!(%protocol, error = %error, "failed to render response envelope");
            WireResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "InternalFailure: response rendering failed",
            )
        }
    };
    response.with_header(REQUEST_ID_HEADER, &meta.request_id)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta() -> EnvelopeMeta {
        EnvelopeMeta::new("req-1").with_xmlns(Some("http://example.com/doc/2012-06-01/"))
    }

    #[test]
    fn query_success_envelope() {
        let response = render_success(
            Protocol::Query,
            "CreateThing",
            &json!({"ThingId": "1", "Tags": ["a", "b"]}),
            &meta(),
        );
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(response.header(REQUEST_ID_HEADER), Some("req-1"));
        assert_eq!(
            response.body_str().unwrap(),
            "<CreateThingResponse xmlns=\"http://example.com/doc/2012-06-01/\">\
             <CreateThingResult><ThingId>1</ThingId>\
             <Tags><member>a</member><member>b</member></Tags></CreateThingResult>\
             <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>\
             </CreateThingResponse>"
        );
    }

    #[test]
    fn query_null_result_omits_result_element() {
        let response = render_success(Protocol::Query, "DeleteThing", &Value::Null, &meta());
        assert_eq!(
            response.body_str().unwrap(),
            "<DeleteThingResponse xmlns=\"http://example.com/doc/2012-06-01/\">\
             <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>\
             </DeleteThingResponse>"
        );
    }

    #[test]
    fn query_fault_envelope() {
        let fault = Fault::new("DuplicateName", "Thing a already exists");
        let response = render_fault(Protocol::Query, &fault, &meta());
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body_str().unwrap(),
            "<ErrorResponse xmlns=\"http://example.com/doc/2012-06-01/\">\
             <Error><Type>Sender</Type><Code>DuplicateName</Code>\
             <Message>Thing a already exists</Message></Error>\
             <RequestId>req-1</RequestId></ErrorResponse>"
        );
        assert_eq!(response.header(crate::wire::ERROR_TYPE_HEADER), None);
    }

    #[test]
    fn internal_query_fault_is_receiver() {
        let response = render_fault(Protocol::Query, &Fault::internal("boom"), &meta());
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body_str().unwrap().contains("<Type>Receiver</Type>"));
    }

    #[test]
    fn ec2_envelopes() {
        let meta = EnvelopeMeta::new("req-2").with_xmlns(Some("http://ec2.amazonaws.com/doc/2016-11-15/"));
        let ok = render_success(
            Protocol::Ec2,
            "DescribeSubnets",
            &json!({"subnetSet": [{"subnetId": "subnet-1"}]}),
            &meta,
        );
        assert_eq!(
            ok.body_str().unwrap(),
            "<DescribeSubnetsResponse xmlns=\"http://ec2.amazonaws.com/doc/2016-11-15/\">\
             <requestId>req-2</requestId>\
             <subnetSet><item><subnetId>subnet-1</subnetId></item></subnetSet>\
             </DescribeSubnetsResponse>"
        );

        let err = render_fault(
            Protocol::Ec2,
            &Fault::new("InvalidSubnetID.NotFound", "no such subnet"),
            &meta,
        );
        assert_eq!(
            err.body_str().unwrap(),
            "<Response><Errors><Error><Code>InvalidSubnetID.NotFound</Code>\
             <Message>no such subnet</Message></Error></Errors>\
             <RequestID>req-2</RequestID></Response>"
        );
    }

    #[test]
    fn xml_text_is_escaped() {
        let fault = Fault::new("Bad", "a < b & c");
        let response = render_fault(Protocol::Query, &fault, &meta());
        assert!(response
            .body_str()
            .unwrap()
            .contains("<Message>a &lt; b &amp; c</Message>"));
    }

    #[test]
    fn json_envelopes() {
        let ok = render_success(Protocol::Json, "CreateCase", &json!({"caseId": "c-1"}), &meta());
        assert_eq!(ok.header("content-type"), Some("application/x-amz-json-1.1"));
        assert_eq!(ok.body_str().unwrap(), r#"{"caseId":"c-1"}"#);

        let empty = render_success(Protocol::Json, "ResolveCase", &Value::Null, &meta());
        assert_eq!(empty.body_str().unwrap(), "{}");

        let err = render_fault(Protocol::Json, &Fault::new("CaseIdNotFound", "missing"), &meta());
        assert_eq!(err.header(crate::wire::ERROR_TYPE_HEADER), Some("CaseIdNotFound"));
        let body: Value = serde_json::from_slice(&err.body).unwrap();
        assert_eq!(body, json!({"__type": "CaseIdNotFound", "message": "missing"}));
    }

    #[test]
    fn rest_json_fault_uses_header_for_code() {
        let fault = Fault::unknown_operation(Protocol::RestJson, None);
        let err = render_fault(Protocol::RestJson, &fault, &meta());
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.header("content-type"), Some("application/json"));
        assert_eq!(
            err.header(crate::wire::ERROR_TYPE_HEADER),
            Some("UnknownOperationException")
        );
        let body: Value = serde_json::from_slice(&err.body).unwrap();
        assert_eq!(body, json!({"message": fault.message}));
    }
}
