//! Request extractors: authentication and common query parameters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::FromRequestParts;
use http::request::Parts;
use trellis_core::Error;
use trellis_model::NdSlice;
use trellis_security::{scopes, tokens, AccessClaims, Identity, Principal, PrincipalType};

use crate::AppState;

pub const API_KEY_COOKIE: &str = "trellis_api_key";

/// Shared slot the request-logging middleware plants in the request
/// extensions; the [`Auth`] extractor fills it so the final log line
/// can report the principal and the scopes used.
#[derive(Clone, Default)]
pub struct AuthLog(Arc<Mutex<Option<AuthLogEntry>>>);

#[derive(Clone, Debug)]
struct AuthLogEntry {
    principal: Option<String>,
    scopes: Vec<String>,
}

impl AuthLog {
    pub fn record(&self, auth: &Auth) {
        let mut scopes: Vec<String> = auth.authn_scopes.iter().cloned().collect();
        scopes.sort();
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(AuthLogEntry {
                principal: auth.principal_uuid(),
                scopes,
            });
        }
    }

    /// `(principal, scopes)` for the log line: `-` when no extractor
    /// ran, `anonymous` for credential-less access.
    pub fn principal_and_scopes(&self) -> (String, String) {
        let Ok(slot) = self.0.lock() else {
            return ("-".to_string(), String::new());
        };
        match slot.as_ref() {
            Some(entry) => (
                entry
                    .principal
                    .clone()
                    .unwrap_or_else(|| "anonymous".to_string()),
                entry.scopes.join(" "),
            ),
            None => ("-".to_string(), String::new()),
        }
    }
}

/// The authenticated caller: principal (if any), the authn scope set,
/// and any API-key tag restriction.
#[derive(Clone, Debug)]
pub struct Auth {
    pub principal: Option<Principal>,
    pub authn_scopes: HashSet<String>,
    pub authn_access_tags: Option<Vec<String>>,
}

impl Auth {
    pub fn anonymous(state: &AppState) -> Self {
        Self {
            principal: None,
            authn_scopes: state.anonymous_scopes(),
            authn_access_tags: None,
        }
    }

    /// Reject unless the authn scope set includes every required scope.
    /// These are request-level checks (API surface); per-node scopes go
    /// through the policy in `resolve`.
    pub fn require_scopes(&self, required: &[&str]) -> Result<(), Error> {
        for scope in required {
            if !self.authn_scopes.contains(*scope) {
                return Err(Error::Unauthorized(format!(
                    "this operation requires the {scope} scope"
                )));
            }
        }
        Ok(())
    }

    pub fn principal_uuid(&self) -> Option<String> {
        self.principal.as_ref().map(|p| p.uuid.to_string())
    }
}

fn query_pairs(parts: &Parts) -> Vec<(String, String)> {
    let query = parts.uri.query().unwrap_or("");
    url_decode_pairs(query)
}

/// Minimal application/x-www-form-urlencoded pair decoding.
pub fn url_decode_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' if index + 2 < bytes.len() => {
                let hex = &text[index + 1..index + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        index += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        index += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                index += 1;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<Auth, Error> {
    // Credential sources, in order: Authorization header, the API-key
    // cookie, and the `api_key` query parameter (which a browser
    // navigation is expected to move into the cookie).
    if let Some(header) = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let (scheme, credential) = header.split_once(' ').ok_or_else(|| {
            Error::BadRequest(
                "Authorization header must be formatted like 'Apikey SECRET' or \
                 'Bearer TOKEN'"
                    .to_string(),
            )
        })?;
        return match scheme.to_ascii_lowercase().as_str() {
            "apikey" => api_key_auth(credential.trim(), state).await,
            "bearer" => bearer_auth(credential.trim(), state),
            _ => Err(Error::BadRequest(
                "Authorization header must use the 'Apikey' or 'Bearer' scheme".to_string(),
            )),
        };
    }

    if let Some(cookie_header) = parts
        .headers
        .get(http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
    {
        for cookie in cookie_header.split(';') {
            if let Some((name, value)) = cookie.trim().split_once('=') {
                if name == API_KEY_COOKIE {
                    return api_key_auth(value.trim(), state).await;
                }
            }
        }
    }

    if let Some((_, secret)) = query_pairs(parts)
        .into_iter()
        .find(|(key, _)| key == "api_key")
    {
        return api_key_auth(&secret, state).await;
    }

    if state.settings.allow_anonymous_access {
        return Ok(Auth::anonymous(state));
    }
    Err(Error::Unauthorized("authentication required".to_string()))
}

async fn api_key_auth(secret: &str, state: &AppState) -> Result<Auth, Error> {
    let (principal, api_key) = state
        .authn
        .lookup_api_key(secret)
        .await
        .map_err(security_err)?
        .ok_or_else(|| Error::Unauthorized("invalid API key".to_string()))?;

    let role_scopes = principal.role_scopes();
    let authn_scopes: HashSet<String> = if api_key.scopes.iter().any(|s| s == scopes::INHERIT) {
        // The inherit metascope: all current principal scopes.
        role_scopes
    } else {
        api_key
            .scopes
            .iter()
            .filter(|scope| role_scopes.contains(*scope))
            .cloned()
            .collect()
    };
    Ok(Auth {
        authn_access_tags: api_key.access_tags.clone(),
        principal: Some(principal),
        authn_scopes,
    })
}

fn bearer_auth(token: &str, state: &AppState) -> Result<Auth, Error> {
    let claims: AccessClaims =
        tokens::decode_token(token, &state.tokens).map_err(security_err)?;
    if claims.token_type != "access" {
        return Err(Error::Unauthorized(
            "expected an access token".to_string(),
        ));
    }
    let uuid = claims
        .sub
        .parse()
        .map_err(|_| Error::Unauthorized("malformed token subject".to_string()))?;
    let principal_type = match claims.sub_typ.as_str() {
        "service" => PrincipalType::Service,
        _ => PrincipalType::User,
    };
    let principal = Principal {
        uuid,
        principal_type,
        identities: claims
            .ids
            .iter()
            .map(|id| Identity {
                provider: id.idp.clone(),
                id: id.id.clone(),
            })
            .collect(),
        roles: Vec::new(),
        api_keys: Vec::new(),
        sessions: Vec::new(),
    };
    Ok(Auth {
        principal: Some(principal),
        authn_scopes: claims.scp.into_iter().collect(),
        authn_access_tags: None,
    })
}

/// Map security-layer errors onto HTTP kinds. Authorization failures
/// are never swallowed.
pub fn security_err(err: trellis_security::SecurityError) -> Error {
    use trellis_security::SecurityError;
    match err {
        SecurityError::Unauthorized(msg) => Error::Unauthorized(msg),
        SecurityError::Token(msg) => Error::Unauthorized(msg),
        SecurityError::TokenExpired => Error::Unauthorized("token expired".to_string()),
        SecurityError::Conflict(msg) => Error::Conflict(msg),
        SecurityError::NotFound(msg) => Error::NotFound(msg),
        SecurityError::Configuration(msg) | SecurityError::Database(msg) => Error::Internal(msg),
    }
}

pub fn catalog_err(err: trellis_catalog::CatalogError) -> Error {
    use trellis_catalog::CatalogError;
    match err {
        CatalogError::NotFound(msg) => Error::NotFound(msg),
        CatalogError::Conflict(msg) => Error::Conflict(msg),
        CatalogError::BadRequest(msg) => Error::BadRequest(msg),
        CatalogError::Unsupported(msg) => Error::MethodNotAllowed(msg),
        CatalogError::Database(msg) | CatalogError::Io(msg) => Error::Internal(msg),
    }
}

pub fn policy_err(err: trellis_security::PolicyError) -> Error {
    use trellis_security::PolicyError;
    match err {
        PolicyError::Denied(msg) => Error::BadRequest(msg),
        PolicyError::Unresolvable(msg) => Error::Internal(msg),
    }
}

impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Error> {
        let auth = authenticate(parts, state).await?;
        if let Some(log) = parts.extensions.get::<AuthLog>() {
            log.record(&auth);
        }
        Ok(auth)
    }
}

// ── Common parameters ────────────────────────────────────────────────────

/// The raw decoded query pairs, for parameter families the typed
/// extractors cannot express (`filter[...]`, repeated `fields`).
#[derive(Clone, Debug, Default)]
pub struct RawQuery(pub Vec<(String, String)>);

impl RawQuery {
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, key: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Parse the `slice=` parameter.
    pub fn slice(&self) -> Result<NdSlice, Error> {
        match self.first("slice") {
            None => Ok(NdSlice::all()),
            Some(text) => text
                .parse()
                .map_err(|err: trellis_model::SliceError| Error::BadRequest(err.to_string())),
        }
    }

    /// Parse the `block=` parameter: comma-separated non-negative ints.
    pub fn block(&self) -> Result<Vec<u64>, Error> {
        let text = self
            .first("block")
            .ok_or_else(|| Error::BadRequest("missing required parameter: block".to_string()))?;
        text.split(',')
            .map(|part| {
                part.parse::<u64>().map_err(|_| {
                    Error::BadRequest(format!("malformed block index: {text:?}"))
                })
            })
            .collect()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RawQuery {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RawQuery(query_pairs(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        let pairs = url_decode_pairs("a=1%2C2&b=x+y&flag");
        assert_eq!(pairs[0], ("a".to_string(), "1,2".to_string()));
        assert_eq!(pairs[1], ("b".to_string(), "x y".to_string()));
        assert_eq!(pairs[2], ("flag".to_string(), String::new()));
    }

    #[test]
    fn auth_log_reports_principal_and_sorted_scopes() {
        let log = AuthLog::default();
        assert_eq!(log.principal_and_scopes().0, "-");

        let auth = Auth {
            principal: None,
            authn_scopes: ["read:metadata", "read:data"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            authn_access_tags: None,
        };
        log.record(&auth);
        let (principal, scopes) = log.principal_and_scopes();
        assert_eq!(principal, "anonymous");
        assert_eq!(scopes, "read:data read:metadata");
    }

    #[test]
    fn raw_query_block_and_slice() {
        let query = RawQuery(url_decode_pairs("block=2%2C1&slice=0:5"));
        assert_eq!(query.block().unwrap(), vec![2, 1]);
        assert!(!query.slice().unwrap().is_all());

        let bad = RawQuery(url_decode_pairs("block=a,b"));
        assert!(bad.block().is_err());

        let evil = RawQuery(url_decode_pairs("slice=1%3B+drop"));
        assert!(evil.slice().is_err());
    }
}
