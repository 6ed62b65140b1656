//! Flattened form encoding used by the query protocols.
//!
//! Query-style services send nested input as dotted keys:
//!
//! ```text
//! Listeners.member.1.Protocol=http
//! Listeners.member.1.LoadBalancerPort=80
//! Filter.1.Name=availability-zone
//! Filter.1.Value.1=us-east-1a
//! ```
//!
//! [`nest`] turns such pairs into a JSON tree: dotted segments nest, numeric
//! segments are 1-based list positions, and the `member`/`item` list markers
//! that precede an index are dropped. [`flatten`] is the inverse used by
//! request builders.

use serde_json::{Map, Value};

use crate::params::Params;

/// Decodes an `application/x-www-form-urlencoded` payload into ordered pairs.
#[must_use]
pub fn decode_pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Encodes pairs as an `application/x-www-form-urlencoded` payload.
#[must_use]
pub fn encode_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[derive(Debug)]
enum Node {
    Leaf(String),
    Tree(Vec<(String, Node)>),
}

impl Node {
    fn insert(&mut self, segments: &[&str], value: String) {
        let Some((head, rest)) = segments.split_first() else {
            *self = Node::Leaf(value);
            return;
        };
        if let Node::Leaf(_) = self {
            *self = Node::Tree(Vec::new());
        }
        let Node::Tree(children) = self else {
            return;
        };
        let index = match children.iter().position(|(name, _)| name == head) {
            Some(index) => index,
            None => {
                children.push(((*head).to_string(), Node::Tree(Vec::new())));
                children.len() - 1
            }
        };
        children[index].1.insert(rest, value);
    }

    fn into_value(self) -> Value {
        match self {
            Node::Leaf(value) => Value::String(value),
            Node::Tree(children) => {
                if !children.is_empty() && children.iter().all(|(name, _)| is_index(name)) {
                    let mut items: Vec<(usize, Node)> = children
                        .into_iter()
                        .filter_map(|(name, node)| name.parse().ok().map(|i| (i, node)))
                        .collect();
                    items.sort_by_key(|(i, _)| *i);
                    Value::Array(items.into_iter().map(|(_, node)| node.into_value()).collect())
                } else {
                    let map: Map<String, Value> = children
                        .into_iter()
                        .map(|(name, node)| (name, node.into_value()))
                        .collect();
                    Value::Object(map)
                }
            }
        }
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_list_marker(segment: &str) -> bool {
    segment == "member" || segment == "item"
}

/// Nests flattened pairs into a parameter tree.
///
/// Later duplicates of the same key replace earlier ones. A bare `Name=`
/// nests as an empty string: the wire does not say whether it was an empty
/// list, so a [`Shape`](crate::Shape) declaring `Name` as a list turns it
/// back into `[]` at validation.
#[must_use]
pub fn nest<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut root = Node::Tree(Vec::new());
    for (key, value) in pairs {
        let raw: Vec<&str> = key.as_ref().split('.').collect();
        let segments: Vec<&str> = raw
            .iter()
            .enumerate()
            .filter(|(i, segment)| {
                !(is_list_marker(segment) && raw.get(i + 1).is_some_and(|next| is_index(next)))
            })
            .map(|(_, segment)| *segment)
            .collect();
        root.insert(&segments, value.into());
    }
    match root.into_value() {
        Value::Object(map) => Params::from(map),
        _ => Params::new(),
    }
}

/// Flattens a parameter tree into dotted pairs.
///
/// Lists are written as `Name.{marker}.N` when `list_marker` is given
/// (`"member"` for the query protocol) and as `Name.N` otherwise (EC2). An
/// empty list is written as `Name=`; see [`nest`] for the way back.
#[must_use]
pub fn flatten(params: &Value, list_marker: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            flatten_into(key, value, list_marker, &mut out);
        }
    }
    out
}

fn flatten_into(
    prefix: &str,
    value: &Value,
    marker: Option<&str>,
    out: &mut Vec<(String, String)>,
) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Array(items) => {
            if items.is_empty() {
                out.push((prefix.to_string(), String::new()));
            }
            for (i, item) in items.iter().enumerate() {
                let key = match marker {
                    Some(marker) => format!("{prefix}.{marker}.{}", i + 1),
                    None => format!("{prefix}.{}", i + 1),
                };
                flatten_into(&key, item, marker, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(&format!("{prefix}.{key}"), item, marker, out);
            }
        }
    }
}
