//! REST path templates such as `/things/{thingId}` or `/objects/{key+}`.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Matches the remaining path, slashes included. Must be last.
    Greedy(String),
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

/// Why a path template failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("path template must start with '/': {0:?}")]
    NotAbsolute(String),
    #[error("unbalanced or empty braces in path template segment {0:?}")]
    BadSegment(String),
    #[error("greedy parameter must be the last segment in {0:?}")]
    GreedyNotLast(String),
}

impl PathTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] for relative templates, malformed `{}`
    /// segments, or a greedy `{name+}` segment that is not last.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let Some(body) = template.strip_prefix('/') else {
            return Err(TemplateError::NotAbsolute(template.to_string()));
        };
        let parts: Vec<&str> = if body.is_empty() {
            Vec::new()
        } else {
            body.trim_end_matches('/').split('/').collect()
        };

        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) if name.is_empty() || name.contains(['{', '}']) => {
                    return Err(TemplateError::BadSegment((*part).to_string()));
                }
                Some(name) => match name.strip_suffix('+') {
                    Some(_) if i + 1 != parts.len() => {
                        return Err(TemplateError::GreedyNotLast(template.to_string()));
                    }
                    Some(greedy) => Segment::Greedy(greedy.to_string()),
                    None => Segment::Param(name.to_string()),
                },
                None if part.contains(['{', '}']) => {
                    return Err(TemplateError::BadSegment((*part).to_string()));
                }
                None => Segment::Literal((*part).to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// The template text as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of literal segments; more literals means a more specific route.
    #[must_use]
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Matches a request path, returning percent-decoded parameters in
    /// template order.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let body = path.strip_prefix('/').unwrap_or(path);
        let body = body.strip_suffix('/').unwrap_or(body);
        let parts: Vec<&str> = if body.is_empty() {
            Vec::new()
        } else {
            body.split('/').collect()
        };

        let mut params = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let part = parts.get(i).filter(|p| !p.is_empty())?;
                    params.push((name.clone(), decode(part)));
                }
                Segment::Greedy(name) => {
                    let rest = parts.get(i..).filter(|rest| !rest.is_empty())?;
                    params.push((name.clone(), decode(&rest.join("/"))));
                    return Some(params);
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

impl FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
