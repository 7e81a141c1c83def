//! The `/auth` surface: sessions, tokens, API keys, principals, and
//! the device-code flow.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use trellis_core::pagination::PageParams;
use trellis_core::{Envelope, Error, PageLinks};
use trellis_security::store::PendingPoll;
use trellis_security::{
    device, scopes, tokens, ApiKeyParams, DeviceCodeGrant, Principal, RevokeOutcome,
};
use uuid::Uuid;

use crate::extract::{security_err, Auth};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/session/refresh", post(refresh_session))
        .route("/session/revoke/{uuid}", delete(revoke_session))
        .route("/apikey", post(create_apikey).get(current_apikey).delete(revoke_apikey))
        .route("/principal", get(list_principals))
        .route("/principal/{uuid}", get(get_principal))
        .route("/principal/{uuid}/apikey", post(admin_create_apikey))
        .route("/provider/{provider}/token", post(token_endpoint))
        .route("/provider/{provider}/authorize", post(device_authorize))
        .route("/provider/{provider}/device_code", post(device_code_submit))
}

fn require_principal(auth: &Auth) -> Result<&Principal, Error> {
    auth.principal
        .as_ref()
        .ok_or_else(|| Error::Unauthorized("authentication required".to_string()))
}

async fn whoami(State(state): State<AppState>, auth: Auth) -> Result<Json<Envelope>, Error> {
    let principal = require_principal(&auth)?;
    // Refresh from the store when known there (bearer principals are
    // claim-skeletons); fall back to the claims view.
    let full = state
        .authn
        .principal_by_uuid(&principal.uuid)
        .await
        .map_err(security_err)?
        .unwrap_or_else(|| principal.clone());
    Ok(Json(Envelope::of(full)?))
}

// ── Sessions & tokens ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh_session(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, Error> {
    let claims: trellis_security::RefreshClaims =
        tokens::decode_token(&body.refresh_token, &state.tokens).map_err(security_err)?;
    if claims.token_type != "refresh" {
        return Err(Error::Unauthorized("expected a refresh token".to_string()));
    }
    let session_uuid: Uuid = claims
        .sid
        .parse()
        .map_err(|_| Error::Unauthorized("malformed session id".to_string()))?;
    let (principal, session) = state
        .authn
        .refresh_session(&session_uuid)
        .await
        .map_err(security_err)?;
    token_pair(&state, &principal, &session.uuid.to_string())
}

fn token_pair(
    state: &AppState,
    principal: &Principal,
    session_uuid: &str,
) -> Result<Json<serde_json::Value>, Error> {
    let scopes: Vec<String> = principal.role_scopes().into_iter().collect();
    let access_token = tokens::create_access_token(&state.tokens, principal, &scopes, None)
        .map_err(security_err)?;
    let refresh_token =
        tokens::create_refresh_token(&state.tokens, session_uuid).map_err(security_err)?;
    Ok(Json(serde_json::json!({
        "access_token": access_token,
        "expires_in": state.tokens.access_token_max_age.num_seconds(),
        "refresh_token": refresh_token,
        "refresh_token_expires_in": state.tokens.refresh_token_max_age.num_seconds(),
        "token_type": "bearer",
    })))
}

async fn revoke_session(
    State(state): State<AppState>,
    auth: Auth,
    Path(session_uuid): Path<Uuid>,
) -> Result<Json<serde_json::Value>, Error> {
    require_principal(&auth)?;
    match state
        .authn
        .revoke_session(&session_uuid)
        .await
        .map_err(security_err)?
    {
        RevokeOutcome::Revoked => Ok(Json(serde_json::json!({"revoked": session_uuid}))),
        RevokeOutcome::AlreadyRevoked => Err(Error::Conflict(format!(
            "session {session_uuid} is already revoked"
        ))),
        RevokeOutcome::NotFound => {
            Err(Error::NotFound(format!("no such session: {session_uuid}")))
        }
    }
}

// ── API keys ─────────────────────────────────────────────────────────────

async fn create_apikey(
    State(state): State<AppState>,
    auth: Auth,
    Json(params): Json<ApiKeyParams>,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::CREATE_APIKEYS])?;
    let principal = require_principal(&auth)?;

    // A key may not carry scopes its principal does not hold.
    if let Some(requested) = &params.scopes {
        let held = principal.role_scopes();
        for scope in requested {
            if scope != scopes::INHERIT && !held.contains(scope) {
                return Err(Error::BadRequest(format!(
                    "cannot create a key with scope {scope:?} not held by the principal"
                )));
            }
        }
    }
    let (secret, api_key) = state
        .authn
        .create_api_key(&principal.uuid, &params)
        .await
        .map_err(security_err)?;
    let mut body = serde_json::to_value(&api_key)
        .map_err(|err| Error::Internal(err.to_string()))?;
    body["secret"] = serde_json::json!(secret);
    Ok(Json(serde_json::json!({"data": body})))
}

async fn current_apikey(auth: Auth) -> Result<Json<Envelope>, Error> {
    let principal = require_principal(&auth)?;
    // The authenticating key is the most recently used one.
    let api_key = principal
        .api_keys
        .iter()
        .max_by_key(|key| key.latest_activity)
        .cloned()
        .ok_or_else(|| {
            Error::NotFound("this request did not authenticate with an API key".to_string())
        })?;
    Ok(Json(Envelope::of(api_key)?))
}

#[derive(Deserialize)]
struct RevokeApikeyParams {
    first_eight: String,
}

async fn revoke_apikey(
    State(state): State<AppState>,
    auth: Auth,
    axum::extract::Query(params): axum::extract::Query<RevokeApikeyParams>,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::REVOKE_APIKEYS])?;
    let principal = require_principal(&auth)?;
    let removed = state
        .authn
        .revoke_api_key(&principal.uuid, &params.first_eight)
        .await
        .map_err(security_err)?;
    if !removed {
        return Err(Error::NotFound(format!(
            "no API key starting with {:?}",
            params.first_eight
        )));
    }
    Ok(Json(serde_json::json!({"revoked": params.first_eight})))
}

async fn admin_create_apikey(
    State(state): State<AppState>,
    auth: Auth,
    Path(principal_uuid): Path<Uuid>,
    Json(params): Json<ApiKeyParams>,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::ADMIN_APIKEYS])?;
    let (secret, api_key) = state
        .authn
        .create_api_key(&principal_uuid, &params)
        .await
        .map_err(security_err)?;
    let mut body = serde_json::to_value(&api_key)
        .map_err(|err| Error::Internal(err.to_string()))?;
    body["secret"] = serde_json::json!(secret);
    Ok(Json(serde_json::json!({"data": body})))
}

// ── Principals (admin) ───────────────────────────────────────────────────

async fn list_principals(
    State(state): State<AppState>,
    auth: Auth,
    axum::extract::Query(page): axum::extract::Query<PageParams>,
) -> Result<Json<Envelope>, Error> {
    auth.require_scopes(&[scopes::READ_PRINCIPALS])?;
    page.validate()?;
    let (principals, total) = state
        .authn
        .list_principals(page.offset as i64, page.limit as i64)
        .await
        .map_err(security_err)?;
    Ok(Json(
        Envelope::of(principals)?.with_links(PageLinks::compute(
            "/auth/principal",
            page.offset,
            page.limit,
            total,
        )),
    ))
}

async fn get_principal(
    State(state): State<AppState>,
    auth: Auth,
    Path(principal_uuid): Path<Uuid>,
) -> Result<Json<Envelope>, Error> {
    auth.require_scopes(&[scopes::READ_PRINCIPALS])?;
    let principal = state
        .authn
        .principal_by_uuid(&principal_uuid)
        .await
        .map_err(security_err)?
        .ok_or_else(|| Error::NotFound(format!("no such principal: {principal_uuid}")))?;
    Ok(Json(Envelope::of(principal)?))
}

// ── Providers: password grant and the device-code flow ───────────────────

fn provider_for<'a>(
    state: &'a AppState,
    name: &str,
) -> Result<&'a std::sync::Arc<dyn trellis_security::AuthProvider>, Error> {
    state
        .providers
        .iter()
        .find(|provider| provider.provider_name() == name)
        .ok_or_else(|| Error::NotFound(format!("no such provider: {name}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRequest {
    Password { username: String, password: String },
    DeviceCode { device_code: String },
}

/// Token endpoint. A password grant authenticates directly; a
/// device-code grant polls the pending session created by `authorize`.
async fn token_endpoint(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>, Error> {
    match body {
        TokenRequest::Password { username, password } => {
            let provider = provider_for(&state, &provider_name)?;
            let external_id = provider
                .authenticate(&username, &password)
                .await
                .map_err(security_err)?
                .ok_or_else(|| {
                    Error::Unauthorized("incorrect username or password".to_string())
                })?;
            let principal = state
                .authn
                .principal_for_identity(provider.provider_name(), &external_id)
                .await
                .map_err(security_err)?;
            let session = state
                .authn
                .create_session(&principal.uuid, state.tokens.session_max_age)
                .await
                .map_err(security_err)?;
            token_pair(&state, &principal, &session.uuid.to_string())
        }
        TokenRequest::DeviceCode { device_code } => {
            provider_for(&state, &provider_name)?;
            let hashed = device::hash_device_code(&device_code).ok_or_else(|| {
                Error::BadRequest("malformed device code".to_string())
            })?;
            match state
                .authn
                .poll_pending_session(&hashed)
                .await
                .map_err(security_err)?
            {
                PendingPoll::AuthorizationPending => {
                    Ok(Json(serde_json::json!({"error": "authorization_pending"})))
                }
                PendingPoll::ExpiredOrUnknown => {
                    Ok(Json(serde_json::json!({"error": "expired_token"})))
                }
                PendingPoll::Granted { principal_uuid } => {
                    let principal = state
                        .authn
                        .principal_by_uuid(&principal_uuid)
                        .await
                        .map_err(security_err)?
                        .ok_or_else(|| {
                            Error::Internal("granted principal disappeared".to_string())
                        })?;
                    let session = state
                        .authn
                        .create_session(&principal.uuid, state.tokens.session_max_age)
                        .await
                        .map_err(security_err)?;
                    token_pair(&state, &principal, &session.uuid.to_string())
                }
            }
        }
    }
}

/// Device endpoint: issue `(user_code, device_code, ...)` and store the
/// pending session.
async fn device_authorize(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
) -> Result<Json<DeviceCodeGrant>, Error> {
    provider_for(&state, &provider_name)?;
    let (device_code, hashed) = device::generate_device_code();
    // The short user code can collide with an outstanding one; retry.
    let mut user_code = device::generate_user_code();
    for _ in 0..3 {
        match state
            .authn
            .create_pending_session(&user_code, &hashed, device::device_code_max_age())
            .await
        {
            Ok(()) => {
                return Ok(Json(DeviceCodeGrant {
                    user_code: device::format_user_code(&user_code),
                    device_code,
                    verification_uri: format!("/auth/provider/{provider_name}/device_code"),
                    authorization_uri: format!("/auth/provider/{provider_name}/authorize"),
                    interval: device::DEVICE_CODE_POLLING_INTERVAL,
                }))
            }
            Err(trellis_security::SecurityError::Conflict(_)) => {
                user_code = device::generate_user_code();
            }
            Err(err) => return Err(security_err(err)),
        }
    }
    Err(Error::Internal(
        "could not allocate a unique user code".to_string(),
    ))
}

#[derive(Deserialize)]
struct DeviceCodeSubmission {
    user_code: String,
    username: String,
    password: String,
}

/// Browser side of the device flow: the operator submits the user code
/// plus credentials.
async fn device_code_submit(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Json(body): Json<DeviceCodeSubmission>,
) -> Result<Json<serde_json::Value>, Error> {
    let provider = provider_for(&state, &provider_name)?;
    let external_id = provider
        .authenticate(&body.username, &body.password)
        .await
        .map_err(security_err)?
        .ok_or_else(|| Error::Unauthorized("incorrect username or password".to_string()))?;
    let principal = state
        .authn
        .principal_for_identity(provider.provider_name(), &external_id)
        .await
        .map_err(security_err)?;
    let user_code = device::normalize_user_code(&body.user_code);
    let granted = state
        .authn
        .grant_pending_session(&user_code, &principal.uuid)
        .await
        .map_err(security_err)?;
    if !granted {
        return Err(Error::BadRequest(
            "invalid or expired user code".to_string(),
        ));
    }
    Ok(Json(serde_json::json!({"success": true})))
}
