//! Protocol families spoken by emulated services.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire protocol family of an emulated service.
///
/// The tag decides how actions are named on the wire, how parameters are
/// structured, and which success/error envelopes the codec produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Form-encoded `Action` parameter, XML responses with `<member>` lists.
    Query,
    /// EC2 dialect of the query protocol: `<item>` lists, `<Response><Errors>` faults.
    Ec2,
    /// JSON-RPC style: action in `X-Amz-Target`, JSON body in and out.
    Json,
    /// Path-based REST routes with JSON bodies.
    RestJson,
}

impl Protocol {
    /// All known protocol tags, in declaration order.
    pub const ALL: [Protocol; 4] = [
        Protocol::Query,
        Protocol::Ec2,
        Protocol::Json,
        Protocol::RestJson,
    ];

    /// The registration tag for this protocol.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::Query => "query",
            Protocol::Ec2 => "ec2",
            Protocol::Json => "json",
            Protocol::RestJson => "rest-json",
        }
    }

    /// Whether requests carry flattened form-encoded parameters.
    #[must_use]
    pub fn is_form_encoded(self) -> bool {
        matches!(self, Protocol::Query | Protocol::Ec2)
    }

    /// Whether responses are rendered as XML documents.
    #[must_use]
    pub fn is_xml(self) -> bool {
        self.is_form_encoded()
    }

    /// `Content-Type` of rendered responses.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Protocol::Query | Protocol::Ec2 => "text/xml",
            Protocol::Json => "application/x-amz-json-1.1",
            Protocol::RestJson => "application/json",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A protocol tag that does not name any known [`Protocol`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol tag: {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}
