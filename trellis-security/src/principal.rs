//! The principal model: users and services with identities, roles,
//! API keys, and sessions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Service,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "user",
            PrincipalType::Service => "service",
        }
    }
}

impl std::str::FromStr for PrincipalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PrincipalType::User),
            "service" => Ok(PrincipalType::Service),
            other => Err(format!("unknown principal type: {other}")),
        }
    }
}

/// One external identity, scoped to the provider that authenticated it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub provider: String,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub scopes: Vec<String>,
}

/// An API key as exposed to clients: digest metadata only, never the
/// secret (which is shown once, at creation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// First eight hex characters of the secret, for display and
    /// revocation.
    pub first_eight: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub scopes: Vec<String>,
    /// Tags this key may act within, when restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_tags: Option<Vec<String>>,
    pub time_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_activity: Option<DateTime<Utc>>,
}

/// One login. Refresh tokens carry the session UUID; revoking the
/// session invalidates the whole refresh chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uuid: Uuid,
    pub expiration_time: DateTime<Utc>,
    pub revoked: bool,
    #[serde(default)]
    pub refresh_count: u64,
    pub time_created: DateTime<Utc>,
}

/// An authenticated identity: a user or service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl Principal {
    /// The union of scopes granted by this principal's roles.
    pub fn role_scopes(&self) -> HashSet<String> {
        self.roles
            .iter()
            .flat_map(|role| role.scopes.iter().cloned())
            .collect()
    }

    /// The external identity from a given provider, if any.
    pub fn identity_for(&self, provider: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.provider == provider)
    }

    /// The identifier the access policy keys on: the provider identity
    /// for users, the UUID for services.
    pub fn policy_identifier(&self, provider: &str) -> Option<String> {
        match self.principal_type {
            PrincipalType::Service => Some(self.uuid.to_string()),
            PrincipalType::User => self.identity_for(provider).map(|i| i.id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            uuid: Uuid::new_v4(),
            principal_type: PrincipalType::User,
            identities: vec![Identity {
                provider: "toy".into(),
                id: "alice".into(),
            }],
            roles: vec![
                Role {
                    name: "user".into(),
                    scopes: vec!["read:metadata".into(), "read:data".into()],
                },
                Role {
                    name: "extra".into(),
                    scopes: vec!["read:data".into(), "metrics".into()],
                },
            ],
            api_keys: Vec::new(),
            sessions: Vec::new(),
        }
    }

    #[test]
    fn role_scopes_union() {
        let scopes = principal().role_scopes();
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains("metrics"));
    }

    #[test]
    fn policy_identifier_by_type() {
        let p = principal();
        assert_eq!(p.policy_identifier("toy").as_deref(), Some("alice"));
        assert_eq!(p.policy_identifier("other"), None);

        let mut service = principal();
        service.principal_type = PrincipalType::Service;
        assert_eq!(
            service.policy_identifier("toy"),
            Some(service.uuid.to_string())
        );
    }
}
