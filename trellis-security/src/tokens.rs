//! HS256 access and refresh tokens with key rotation.
//!
//! The first secret in the list is used for encoding; all are tried for
//! decoding, so keys can be rotated by prepending a new secret and
//! retiring old ones once outstanding tokens expire.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::SecurityError;
use crate::principal::{Identity, Principal};

/// Token and session lifetime configuration.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// Ordered secrets; the first encodes, all decode.
    pub secret_keys: Vec<String>,
    pub access_token_max_age: Duration,
    pub refresh_token_max_age: Duration,
    pub session_max_age: Duration,
}

impl TokenConfig {
    pub fn new(secret_keys: Vec<String>) -> Self {
        Self {
            secret_keys,
            access_token_max_age: Duration::minutes(15),
            refresh_token_max_age: Duration::days(7),
            session_max_age: Duration::days(365),
        }
    }

    fn encoding_key(&self) -> Result<EncodingKey, SecurityError> {
        let secret = self
            .secret_keys
            .first()
            .ok_or_else(|| SecurityError::Configuration("no token secret configured".into()))?;
        Ok(EncodingKey::from_secret(secret.as_bytes()))
    }
}

/// Claims of an access token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Principal UUID.
    pub sub: String,
    /// Principal type, `user` or `service`.
    pub sub_typ: String,
    /// Authenticated scopes.
    pub scp: Vec<String>,
    /// Provider session state, when the identity provider issued any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Identities, as `{"id": ..., "idp": ...}` pairs.
    pub ids: Vec<IdentityClaim>,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub id: String,
    pub idp: String,
}

/// Claims of a refresh token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Session UUID.
    pub sid: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub fn create_access_token(
    config: &TokenConfig,
    principal: &Principal,
    scopes: &[String],
    state: Option<String>,
) -> Result<String, SecurityError> {
    let claims = AccessClaims {
        sub: principal.uuid.to_string(),
        sub_typ: principal.principal_type.as_str().to_string(),
        scp: scopes.to_vec(),
        state,
        ids: principal
            .identities
            .iter()
            .map(|Identity { provider, id }| IdentityClaim {
                id: id.clone(),
                idp: provider.clone(),
            })
            .collect(),
        exp: (Utc::now() + config.access_token_max_age).timestamp(),
        token_type: "access".to_string(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &config.encoding_key()?)
        .map_err(|err| SecurityError::Token(err.to_string()))
}

pub fn create_refresh_token(
    config: &TokenConfig,
    session_uuid: &str,
) -> Result<String, SecurityError> {
    let claims = RefreshClaims {
        sid: session_uuid.to_string(),
        exp: (Utc::now() + config.refresh_token_max_age).timestamp(),
        token_type: "refresh".to_string(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &config.encoding_key()?)
        .map_err(|err| SecurityError::Token(err.to_string()))
}

/// Decode against the ordered secret list. Expiration fails immediately;
/// signature mismatches fall through to the next key.
pub fn decode_token<T: DeserializeOwned>(
    token: &str,
    config: &TokenConfig,
) -> Result<T, SecurityError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    for secret in &config.secret_keys {
        match decode::<T>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => return Ok(data.claims),
            Err(err) if matches!(err.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) => {
                return Err(SecurityError::TokenExpired)
            }
            Err(_) => continue,
        }
    }
    Err(SecurityError::Token("could not validate credentials".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::PrincipalType;
    use uuid::Uuid;

    fn principal() -> Principal {
        Principal {
            uuid: Uuid::new_v4(),
            principal_type: PrincipalType::User,
            identities: vec![Identity {
                provider: "toy".into(),
                id: "alice".into(),
            }],
            roles: Vec::new(),
            api_keys: Vec::new(),
            sessions: Vec::new(),
        }
    }

    #[test]
    fn access_token_round_trip() {
        let config = TokenConfig::new(vec!["secret-one".into()]);
        let token = create_access_token(
            &config,
            &principal(),
            &["read:metadata".to_string()],
            None,
        )
        .unwrap();
        let claims: AccessClaims = decode_token(&token, &config).unwrap();
        assert_eq!(claims.token_type, "access");
        assert_eq!(claims.scp, vec!["read:metadata"]);
        assert_eq!(claims.ids[0].idp, "toy");
    }

    #[test]
    fn key_rotation_decodes_with_older_key() {
        let old = TokenConfig::new(vec!["old-secret".into()]);
        let token = create_refresh_token(&old, "some-session").unwrap();

        let rotated = TokenConfig::new(vec!["new-secret".into(), "old-secret".into()]);
        let claims: RefreshClaims = decode_token(&token, &rotated).unwrap();
        assert_eq!(claims.sid, "some-session");

        let unrelated = TokenConfig::new(vec!["other".into()]);
        assert!(decode_token::<RefreshClaims>(&token, &unrelated).is_err());
    }

    #[test]
    fn expired_token_reports_expiry() {
        let mut config = TokenConfig::new(vec!["secret".into()]);
        config.access_token_max_age = Duration::seconds(-90);
        let token =
            create_access_token(&config, &principal(), &[], None).unwrap();
        assert!(matches!(
            decode_token::<AccessClaims>(&token, &config),
            Err(SecurityError::TokenExpired)
        ));
    }
}
