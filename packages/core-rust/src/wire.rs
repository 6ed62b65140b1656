//! Captured requests and rendered responses.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use http::uri::Authority;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};

/// Header carrying the per-request id on every rendered response.
pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// Header carrying the error code on JSON error responses.
pub const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Header naming the JSON-protocol action (`Prefix.Action`).
pub const TARGET_HEADER: &str = "x-amz-target";

/// One intercepted outbound call. Lives for a single request/response cycle.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn from_http(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts.method, parts.uri, parts.headers, body)
    }

    /// `scheme://host` of the target, see [`request_origin`].
    #[must_use]
    pub fn origin(&self) -> Option<String> {
        request_origin(&self.uri, &self.headers)
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self.uri.path() {
            "" => "/",
            path => path,
        }
    }

    /// Decoded query-string pairs, in order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| crate::form::decode_pairs(q.as_bytes()))
            .unwrap_or_default()
    }

    /// A header value as text; non-UTF-8 values are treated as absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Builds `scheme://host` from an absolute URI, falling back to the `Host`
/// header (and `https`) for origin-form URIs. Ports are not included; IPv6
/// hosts keep their brackets.
#[must_use]
pub fn request_origin(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let scheme = uri.scheme_str().unwrap_or("https");
    if let Some(host) = uri.host() {
        return Some(format!("{scheme}://{}", host.to_ascii_lowercase()));
    }
    let authority: Authority = headers.get(HOST)?.to_str().ok()?.parse().ok()?;
    Some(format!("{scheme}://{}", authority.host().to_ascii_lowercase()))
}

/// A fully-formed response handed back to the caller's transport.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WireResponse {
    #[must_use]
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Sets a header; values that are not valid header text are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as text, if it is valid UTF-8.
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    #[must_use]
    pub fn into_http(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_from_absolute_uri_drops_port_and_path() {
        let uri: Uri = "https://EC2.us-east-1.amazonaws.com:443/path?x=1".parse().unwrap();
        assert_eq!(
            request_origin(&uri, &HeaderMap::new()).as_deref(),
            Some("https://ec2.us-east-1.amazonaws.com")
        );
    }

    #[test]
    fn origin_falls_back_to_host_header() {
        let uri: Uri = "/".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("support.us-east-1.amazonaws.com:8443"));
        assert_eq!(
            request_origin(&uri, &headers).as_deref(),
            Some("https://support.us-east-1.amazonaws.com")
        );
        assert_eq!(request_origin(&uri, &HeaderMap::new()), None);
    }

    #[test]
    fn ipv6_host_header_keeps_its_brackets() {
        let uri: Uri = "/".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("[::1]:8080"));
        assert_eq!(request_origin(&uri, &headers).as_deref(), Some("https://[::1]"));

        let uri: Uri = "http://[2001:DB8::1]:4566/".parse().unwrap();
        assert_eq!(
            request_origin(&uri, &HeaderMap::new()).as_deref(),
            Some("http://[2001:db8::1]")
        );

        headers.insert(HOST, HeaderValue::from_static("not a host"));
        assert_eq!(request_origin(&"/".parse().unwrap(), &headers), None);
    }

    #[test]
    fn captured_request_exposes_query_pairs() {
        let request = Request::builder()
            .uri("https://ec2.us-east-1.amazonaws.com/?Action=DescribeInstances&Version=2016-11-15")
            .body(Bytes::new())
            .unwrap();
        let captured = CapturedRequest::from_http(request);
        assert_eq!(captured.path(), "/");
        assert_eq!(captured.query_pairs()[0], ("Action".to_string(), "DescribeInstances".to_string()));
    }

    #[test]
    fn wire_response_converts_to_http() {
        let response = WireResponse::new(StatusCode::CREATED, "application/json", "{}")
            .with_header(REQUEST_ID_HEADER, "abc");
        assert_eq!(response.body_str(), Some("{}"));
        let http = response.into_http();
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers()[REQUEST_ID_HEADER], "abc");
        assert_eq!(http.headers()[CONTENT_TYPE], "application/json");
    }
}
