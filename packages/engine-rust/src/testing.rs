//! Client-side request builders for exercising the engine.
//!
//! These produce the same wire shapes an SDK would send (form-encoded query
//! and EC2 calls, JSON-target calls, REST-JSON calls) and a small XML reader
//! for pulling values back out of query-protocol responses. Useful for tests
//! and demos; nothing here is signed for real.

use bytes::Bytes;
use cloudmock_core::form::{encode_pairs, flatten};
use http::{header, Method, Request};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const EC2_API_VERSION: &str = "2016-11-15";

/// `https://{prefix}.{region}.amazonaws.com`
#[must_use]
pub fn aws_host(prefix: &str, region: &str) -> String {
    format!("https://{prefix}.{region}.amazonaws.com")
}

/// A SigV4-shaped `Authorization` value whose credential scope names
/// `region` and `service`.
#[must_use]
pub fn sigv4_authorization(region: &str, service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260101/{region}/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=0000000000000000"
    )
}

/// Query-protocol call: `Action`, `Version` and `params` flattened with
/// `member` list markers, form-encoded in a POST body.
///
/// # Errors
///
/// Returns an [`http::Error`] if `url` is not a valid URI.
pub fn query_request(
    url: &str,
    action: &str,
    version: &str,
    params: &Value,
) -> Result<Request<Bytes>, http::Error> {
    form_request(url, action, version, flatten(params, Some("member")))
}

/// EC2-protocol call: like [`query_request`] but lists are written as
/// `Name.N`.
///
/// # Errors
///
/// Returns an [`http::Error`] if `url` is not a valid URI.
pub fn ec2_request(url: &str, action: &str, params: &Value) -> Result<Request<Bytes>, http::Error> {
    form_request(url, action, EC2_API_VERSION, flatten(params, None))
}

fn form_request(
    url: &str,
    action: &str,
    version: &str,
    pairs: Vec<(String, String)>,
) -> Result<Request<Bytes>, http::Error> {
    let body = encode_pairs(
        [("Action", action), ("Version", version)]
            .into_iter()
            .chain(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
    );
    Request::post(url)
        .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(Bytes::from(body))
}

/// JSON-protocol call: `X-Amz-Target: {target}` with `params` as the body.
///
/// # Errors
///
/// Returns an [`http::Error`] if `url` is not a valid URI.
pub fn json_request(
    url: &str,
    target: &str,
    params: &Value,
) -> Result<Request<Bytes>, http::Error> {
    Request::post(url)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .header("x-amz-target", target)
        .body(Bytes::from(params.to_string()))
}

/// REST-JSON call. `url` carries the full path and query string.
///
/// # Errors
///
/// Returns an [`http::Error`] if `url` is not a valid URI.
pub fn rest_request(
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> Result<Request<Bytes>, http::Error> {
    let builder = Request::builder().method(method).uri(url);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(body.to_string())),
        None => builder.body(Bytes::new()),
    }
}

/// Text content of every `<tag>` element in document order. Self-closing
/// elements yield an empty string. Stops at the first malformed event.
#[must_use]
pub fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut values = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == tag.as_bytes() => {
                current = Some(String::new());
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == tag.as_bytes() => {
                values.push(String::new());
            }
            Ok(Event::Text(text)) => {
                if let (Some(value), Ok(text)) = (current.as_mut(), text.unescape()) {
                    value.push_str(&text);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == tag.as_bytes() => {
                if let Some(value) = current.take() {
                    values.push(value);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    values
}

/// First value of `<tag>`, if any.
#[must_use]
pub fn xml_value(body: &str, tag: &str) -> Option<String> {
    xml_values(body, tag).into_iter().next()
}

/// Text of each direct child of the first `<parent>` element: the members of
/// a rendered list such as `<Names><member>a</member></Names>`.
#[must_use]
pub fn xml_members(body: &str, parent: &str) -> Vec<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    // 0: outside `parent`, 1: directly inside it, 2+: inside a member.
    let mut depth = 0usize;
    let mut members: Vec<String> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if e.name().as_ref() == parent.as_bytes() {
                        depth = 1;
                    }
                } else {
                    depth += 1;
                    if depth == 2 {
                        members.push(String::new());
                    }
                }
            }
            Ok(Event::Empty(_)) if depth == 1 => members.push(String::new()),
            Ok(Event::Text(text)) if depth >= 2 => {
                if let (Some(member), Ok(text)) = (members.last_mut(), text.unescape()) {
                    member.push_str(&text);
                }
            }
            Ok(Event::End(_)) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use cloudmock_core::form::decode_pairs;

    #[test]
    fn query_request_flattens_with_member_markers() {
        let request = query_request(
            "https://elasticloadbalancing.us-east-1.amazonaws.com",
            "CreateLoadBalancer",
            "2012-06-01",
            &json!({"LoadBalancerName": "lb", "AvailabilityZones": ["us-east-1a", "us-east-1b"]}),
        )
        .unwrap();
        assert_eq!(request.method(), Method::POST);
        let pairs = decode_pairs(request.body());
        assert!(pairs.contains(&("Action".into(), "CreateLoadBalancer".into())));
        assert!(pairs.contains(&("Version".into(), "2012-06-01".into())));
        assert!(pairs.contains(&("AvailabilityZones.member.2".into(), "us-east-1b".into())));
    }

    #[test]
    fn ec2_request_uses_plain_indices() {
        let request = ec2_request(
            &aws_host("ec2", "us-west-2"),
            "TerminateInstances",
            &json!({"InstanceId": ["i-1"]}),
        )
        .unwrap();
        let pairs = decode_pairs(request.body());
        assert!(pairs.contains(&("InstanceId.1".into(), "i-1".into())));
        assert!(pairs.contains(&("Version".into(), EC2_API_VERSION.into())));
    }

    #[test]
    fn xml_values_reads_text_and_empty_elements() {
        let body = "<R><Name>a</Name><Group><Name>b&amp;c</Name></Group><Name/></R>";
        assert_eq!(xml_values(body, "Name"), vec!["a", "b&c", ""]);
        assert_eq!(xml_value(body, "Group"), Some("b&c".to_string()));
        assert!(xml_values(body, "Missing").is_empty());
    }

    #[test]
    fn xml_members_reads_one_list() {
        let body = "<G><Zones><member>a</member><member>b</member></Zones>\
                    <Policies><member>Oldest</member></Policies><Zones><member>z</member></Zones></G>";
        assert_eq!(xml_members(body, "Zones"), vec!["a", "b"]);
        assert_eq!(xml_members(body, "Policies"), vec!["Oldest"]);
        assert!(xml_members("<G><Zones></Zones></G>", "Zones").is_empty());
    }
}
