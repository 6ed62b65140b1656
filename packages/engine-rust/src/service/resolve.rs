//! Action Resolver: captured request -> resolved operation.

use std::sync::atomic::{AtomicU64, Ordering};

use cloudmock_core::wire::TARGET_HEADER;
use cloudmock_core::{form, CapturedRequest, Params, Protocol};
use http::header::AUTHORIZATION;
use serde_json::Value;

use super::descriptor::{RegionSource, ServiceDescriptor};
use super::operation::{ResolutionError, ResolvedOperation};

const ACTION_PARAM: &str = "Action";
const VERSION_PARAM: &str = "Version";

// ---------------------------------------------------------------------------
// ActionResolver
// ---------------------------------------------------------------------------

/// Maps captured requests onto a descriptor's action table.
///
/// Resolution order, first match wins:
/// 1. REST route table (most literal segments wins)
/// 2. form protocols: the `Action` field of the query string or form body
/// 3. JSON protocol: the `X-Amz-Target` header, then a top-level `Action`
///
/// Each successful resolution gets a fresh call id.
#[derive(Debug)]
pub struct ActionResolver {
    call_id_counter: AtomicU64,
}

impl ActionResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves `request` against `descriptor`.
    ///
    /// `fallback_region` is used when none of the descriptor's region
    /// sources yields a region.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] when the action is missing, ambiguous,
    /// unregistered, has no route, or the body cannot be decoded.
    pub fn resolve(
        &self,
        descriptor: &ServiceDescriptor,
        request: &CapturedRequest,
        fallback_region: &str,
    ) -> Result<ResolvedOperation, ResolutionError> {
        let protocol = descriptor.protocol();
        let (action, params) = match match_route(descriptor, request)? {
            Some((action, path_params)) => {
                let mut params = payload_params(protocol, request)?;
                params.merge(path_params);
                (action, params)
            }
            None => match protocol {
                Protocol::Query | Protocol::Ec2 => form_action(request)?,
                Protocol::Json => json_action(descriptor, request)?,
                Protocol::RestJson => {
                    return Err(ResolutionError::NoRoute {
                        method: request.method.to_string(),
                        path: request.path().to_string(),
                    });
                }
            },
        };

        if descriptor.action(&action).is_none() {
            return Err(ResolutionError::UnknownAction { action });
        }

        let region = resolve_region(descriptor, request, &params)
            .unwrap_or_else(|| fallback_region.to_string());

        Ok(ResolvedOperation {
            call_id: self.next_call_id(),
            service_id: descriptor.id().to_string(),
            action,
            params,
            region,
            request: request.clone(),
        })
    }
}

impl Default for ActionResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

fn match_route(
    descriptor: &ServiceDescriptor,
    request: &CapturedRequest,
) -> Result<Option<(String, Params)>, ResolutionError> {
    let mut best: Option<(usize, &str, Vec<(String, String)>)> = None;
    let mut tied: Vec<&str> = Vec::new();

    for route in descriptor.routes() {
        if route.method != request.method {
            continue;
        }
        let Some(captured) = route.template.matches(request.path()) else {
            continue;
        };
        let specificity = route.template.specificity();
        match &best {
            Some((top, _, _)) if specificity < *top => {}
            Some((top, action, _)) if specificity == *top => {
                if *action != route.action && !tied.contains(&route.action.as_str()) {
                    tied.push(route.action.as_str());
                }
            }
            _ => {
                tied.clear();
                best = Some((specificity, route.action.as_str(), captured));
            }
        }
    }

    let Some((_, action, captured)) = best else {
        return Ok(None);
    };
    if !tied.is_empty() {
        let mut candidates: Vec<String> = std::iter::once(action)
            .chain(tied)
            .map(str::to_string)
            .collect();
        candidates.sort();
        return Err(ResolutionError::AmbiguousAction { candidates });
    }

    let mut params = Params::new();
    for (name, value) in captured {
        params.insert(name, value);
    }
    Ok(Some((action.to_string(), params)))
}

/// Parameters carried outside the path of a routed request.
fn payload_params(
    protocol: Protocol,
    request: &CapturedRequest,
) -> Result<Params, ResolutionError> {
    if protocol.is_form_encoded() {
        let pairs = form_pairs(request)?;
        return Ok(form::nest(
            pairs
                .into_iter()
                .filter(|(k, _)| k != ACTION_PARAM && k != VERSION_PARAM),
        ));
    }
    let mut params = form::nest(request.query_pairs());
    params.merge(json_body(request)?);
    Ok(params)
}

// ---------------------------------------------------------------------------
// Form protocols
// ---------------------------------------------------------------------------

fn form_pairs(request: &CapturedRequest) -> Result<Vec<(String, String)>, ResolutionError> {
    let body = std::str::from_utf8(&request.body).map_err(|e| ResolutionError::MalformedBody {
        reason: format!("form body is not UTF-8: {e}"),
    })?;
    let mut pairs = request.query_pairs();
    pairs.extend(form::decode_pairs(body.as_bytes()));
    Ok(pairs)
}

fn form_action(request: &CapturedRequest) -> Result<(String, Params), ResolutionError> {
    let pairs = form_pairs(request)?;

    let mut names: Vec<&str> = pairs
        .iter()
        .filter(|(k, v)| k == ACTION_PARAM && !v.is_empty())
        .map(|(_, v)| v.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();
    let action = match names.as_slice() {
        [] => return Err(ResolutionError::MissingAction),
        [single] => (*single).to_string(),
        many => {
            return Err(ResolutionError::AmbiguousAction {
                candidates: many.iter().map(|s| (*s).to_string()).collect(),
            })
        }
    };

    let params = form::nest(
        pairs
            .iter()
            .filter(|(k, _)| k != ACTION_PARAM && k != VERSION_PARAM)
            .map(|(k, v)| (k.as_str(), v.clone())),
    );
    Ok((action, params))
}

// ---------------------------------------------------------------------------
// JSON protocol
// ---------------------------------------------------------------------------

fn json_body(request: &CapturedRequest) -> Result<Params, ResolutionError> {
    if request.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::new());
    }
    let value: Value =
        serde_json::from_slice(&request.body).map_err(|e| ResolutionError::MalformedBody {
            reason: e.to_string(),
        })?;
    Params::from_value(value).ok_or_else(|| ResolutionError::MalformedBody {
        reason: "request body must be a JSON object".to_string(),
    })
}

fn json_action(
    descriptor: &ServiceDescriptor,
    request: &CapturedRequest,
) -> Result<(String, Params), ResolutionError> {
    let mut params = json_body(request)?;

    if let Some(target) = request.header(TARGET_HEADER).filter(|t| !t.is_empty()) {
        let action = match (target.rsplit_once('.'), descriptor.target_prefix()) {
            (Some((prefix, action)), Some(expected)) if prefix == expected => action,
            (Some(_), Some(_)) => {
                return Err(ResolutionError::UnknownAction {
                    action: target.to_string(),
                })
            }
            (Some((_, action)), None) => action,
            (None, _) => target,
        };
        if action.is_empty() {
            return Err(ResolutionError::MissingAction);
        }
        return Ok((action.to_string(), params));
    }

    let action = match params.str(ACTION_PARAM) {
        Some(action) if !action.is_empty() => action.to_string(),
        _ => return Err(ResolutionError::MissingAction),
    };
    params.remove(ACTION_PARAM);
    Ok((action, params))
}

// ---------------------------------------------------------------------------
// Region resolution
// ---------------------------------------------------------------------------

/// First region named by the descriptor's region sources, if any.
#[must_use]
pub fn resolve_region(
    descriptor: &ServiceDescriptor,
    request: &CapturedRequest,
    params: &Params,
) -> Option<String> {
    let captures = request
        .origin()
        .and_then(|origin| descriptor.match_origin(&origin))
        .unwrap_or_default();

    descriptor.region_sources().iter().find_map(|source| {
        let found = match source {
            RegionSource::UrlCapture(index) => captures.get(*index).cloned().flatten(),
            RegionSource::AuthorizationHeader => request
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(credential_scope_region),
            RegionSource::Header(name) => request.header(name).map(str::to_string),
            RegionSource::Param(name) => params.str(name).map(str::to_string),
        };
        found.filter(|region| !region.trim().is_empty())
    })
}

/// Region of a SigV4 credential scope:
/// `Credential=AKID/20240101/us-west-2/ec2/aws4_request`.
#[must_use]
pub fn credential_scope_region(authorization: &str) -> Option<String> {
    let credential = authorization
        .split([',', ' '])
        .find_map(|part| part.trim().strip_prefix("Credential="))?;
    let mut scope = credential.split('/');
    let _access_key = scope.next()?;
    let _date = scope.next()?;
    scope.next().map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
