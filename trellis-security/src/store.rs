//! The authentication database: principals, identities, roles, API
//! keys, sessions, and pending device-code sessions.
//!
//! Backed by a bounded sqlx pool. Schema changes are linear, versioned
//! migrations applied at startup.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::apikeys::{self, ApiKeyParams};
use crate::error::SecurityError;
use crate::principal::{ApiKey, Identity, Principal, PrincipalType, Role, Session};
use crate::scopes;

/// Caps mirroring the serving limits: listing routes for keys and
/// sessions are unpaginated, so the totals must stay small.
pub const API_KEY_LIMIT: i64 = 100;
pub const SESSION_LIMIT: i64 = 200;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/0001_initialize.sql"))];

/// Outcome of a session revocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    NotFound,
}

/// Outcome of polling a pending device-code session.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingPoll {
    AuthorizationPending,
    Granted { principal_uuid: Uuid },
    ExpiredOrUnknown,
}

#[derive(Clone)]
pub struct AuthnStore {
    pool: SqlitePool,
}

impl AuthnStore {
    /// Connect with a bounded pool. The URI scheme must be `sqlite:`.
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, SecurityError> {
        if !uri.starts_with("sqlite:") {
            return Err(SecurityError::Configuration(format!(
                "authentication database URI must use the sqlite: scheme, got {uri:?}"
            )));
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, SecurityError> {
        let store = Self::connect("sqlite::memory:", 1).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply pending migrations in order.
    pub async fn migrate(&self) -> Result<(), SecurityError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS authn_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM authn_migrations")
                .fetch_one(&self.pool)
                .await?;
        let applied = applied.unwrap_or(0);
        for (version, sql) in MIGRATIONS {
            if *version <= applied {
                continue;
            }
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            sqlx::query("INSERT INTO authn_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // ── Principals ──

    /// Create a principal, optionally bound to an external identity,
    /// holding the named roles.
    pub async fn create_principal(
        &self,
        principal_type: PrincipalType,
        identity: Option<(&str, &str)>,
        role_names: &[&str],
    ) -> Result<Principal, SecurityError> {
        let uuid = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO principals (uuid, type, time_created) VALUES (?, ?, ?)",
        )
        .bind(uuid.to_string())
        .bind(principal_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        let principal_id = result.last_insert_rowid();

        if let Some((provider, external_id)) = identity {
            sqlx::query(
                "INSERT INTO identities (provider, external_id, principal_id, time_created)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(provider)
            .bind(external_id)
            .bind(principal_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        }
        for role in role_names {
            sqlx::query(
                "INSERT INTO principal_role_association (principal_id, role_id)
                 SELECT ?, id FROM roles WHERE name = ?",
            )
            .bind(principal_id)
            .bind(role)
            .execute(&self.pool)
            .await?;
        }
        self.assemble_principal(principal_id).await
    }

    /// Look up (or create) the principal bound to an external identity.
    pub async fn principal_for_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Principal, SecurityError> {
        match self.lookup_principal_id(provider, external_id).await? {
            Some(id) => self.assemble_principal(id).await,
            None => {
                self.create_principal(
                    PrincipalType::User,
                    Some((provider, external_id)),
                    &["user"],
                )
                .await
            }
        }
    }

    async fn lookup_principal_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<i64>, SecurityError> {
        let id = sqlx::query_scalar(
            "SELECT principal_id FROM identities WHERE provider = ? AND external_id = ?",
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn principal_by_uuid(
        &self,
        uuid: &Uuid,
    ) -> Result<Option<Principal>, SecurityError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM principals WHERE uuid = ?")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match id {
            Some(id) => Ok(Some(self.assemble_principal(id).await?)),
            None => Ok(None),
        }
    }

    /// Paginated listing plus the total count, for the admin surface.
    pub async fn list_principals(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Principal>, u64), SecurityError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM principals")
            .fetch_one(&self.pool)
            .await?;
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM principals ORDER BY id LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
        let mut principals = Vec::with_capacity(ids.len());
        for id in ids {
            principals.push(self.assemble_principal(id).await?);
        }
        Ok((principals, total as u64))
    }

    /// Grant a named role to a principal.
    pub async fn grant_role(&self, uuid: &Uuid, role: &str) -> Result<(), SecurityError> {
        let affected = sqlx::query(
            "INSERT OR IGNORE INTO principal_role_association (principal_id, role_id)
             SELECT p.id, r.id FROM principals p, roles r WHERE p.uuid = ? AND r.name = ?",
        )
        .bind(uuid.to_string())
        .bind(role)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(SecurityError::NotFound(format!(
                "no such principal or role: {uuid} / {role}"
            )));
        }
        Ok(())
    }

    async fn assemble_principal(&self, principal_id: i64) -> Result<Principal, SecurityError> {
        let row = sqlx::query("SELECT uuid, type FROM principals WHERE id = ?")
            .bind(principal_id)
            .fetch_one(&self.pool)
            .await?;
        let uuid: String = row.try_get("uuid")?;
        let principal_type: String = row.try_get("type")?;

        let identities = sqlx::query(
            "SELECT provider, external_id FROM identities WHERE principal_id = ?",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            Ok(Identity {
                provider: row.try_get("provider")?,
                id: row.try_get("external_id")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let roles = sqlx::query(
            "SELECT r.name, r.scopes FROM roles r
             JOIN principal_role_association a ON a.role_id = r.id
             WHERE a.principal_id = ?",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            let name: String = row.try_get("name")?;
            let scopes_json: String = row.try_get("scopes")?;
            Ok(Role {
                name,
                scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let api_keys = sqlx::query(
            "SELECT first_eight, expiration_time, note, scopes, access_tags,
                    time_created, latest_activity
             FROM api_keys WHERE principal_id = ? ORDER BY time_created",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(api_key_from_row)
        .collect::<Result<Vec<_>, SecurityError>>()?;

        let sessions = sqlx::query(
            "SELECT uuid, expiration_time, revoked, refresh_count, time_created
             FROM sessions WHERE principal_id = ? ORDER BY time_created",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(session_from_row)
        .collect::<Result<Vec<_>, SecurityError>>()?;

        Ok(Principal {
            uuid: parse_uuid(&uuid)?,
            principal_type: principal_type
                .parse()
                .map_err(SecurityError::Database)?,
            identities,
            roles,
            api_keys,
            sessions,
        })
    }

    // ── API keys ──

    /// Create an API key. Returns the secret (shown once) and the
    /// stored attributes.
    pub async fn create_api_key(
        &self,
        principal_uuid: &Uuid,
        params: &ApiKeyParams,
    ) -> Result<(String, ApiKey), SecurityError> {
        let principal_id = self.require_principal_id(principal_uuid).await?;
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM api_keys WHERE principal_id = ?")
                .bind(principal_id)
                .fetch_one(&self.pool)
                .await?;
        if count >= API_KEY_LIMIT {
            return Err(SecurityError::Conflict(format!(
                "API key limit ({API_KEY_LIMIT}) reached"
            )));
        }
        let scopes = params
            .scopes
            .clone()
            .unwrap_or_else(|| vec![scopes::INHERIT.to_string()]);
        for scope in &scopes {
            if !scopes::is_known_scope(scope) {
                return Err(SecurityError::Conflict(format!("unknown scope: {scope}")));
            }
        }
        let secret = apikeys::generate_secret();
        let now = Utc::now();
        let expiration_time = params.expires_in.map(|seconds| now + Duration::seconds(seconds));

        sqlx::query(
            "INSERT INTO api_keys
               (first_eight, hashed_secret, principal_id, expiration_time, note,
                scopes, access_tags, time_created)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(apikeys::first_eight(&secret))
        .bind(apikeys::hash_secret(&secret))
        .bind(principal_id)
        .bind(expiration_time)
        .bind(&params.note)
        .bind(serde_json::to_string(&scopes).unwrap_or_default())
        .bind(
            params
                .access_tags
                .as_ref()
                .map(|tags| serde_json::to_string(tags).unwrap_or_default()),
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let api_key = ApiKey {
            first_eight: apikeys::first_eight(&secret),
            expiration_time,
            note: params.note.clone(),
            scopes,
            access_tags: params.access_tags.clone(),
            time_created: now,
            latest_activity: None,
        };
        Ok((secret, api_key))
    }

    /// Resolve an API key secret to its principal and attributes.
    /// Expired keys read as absent. Updates the last-use timestamp.
    pub async fn lookup_api_key(
        &self,
        secret: &str,
    ) -> Result<Option<(Principal, ApiKey)>, SecurityError> {
        let hashed = apikeys::hash_secret(secret);
        let row = sqlx::query(
            "SELECT principal_id, first_eight, expiration_time, note, scopes,
                    access_tags, time_created, latest_activity
             FROM api_keys WHERE hashed_secret = ?",
        )
        .bind(&hashed)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let principal_id: i64 = row.try_get("principal_id")?;
        let api_key = api_key_from_row(row)?;
        if let Some(expiration) = api_key.expiration_time {
            if expiration <= Utc::now() {
                return Ok(None);
            }
        }
        sqlx::query("UPDATE api_keys SET latest_activity = ? WHERE hashed_secret = ?")
            .bind(Utc::now())
            .bind(&hashed)
            .execute(&self.pool)
            .await?;
        let principal = self.assemble_principal(principal_id).await?;
        Ok(Some((principal, api_key)))
    }

    /// Revoke a key by its display prefix.
    pub async fn revoke_api_key(
        &self,
        principal_uuid: &Uuid,
        first_eight: &str,
    ) -> Result<bool, SecurityError> {
        let principal_id = self.require_principal_id(principal_uuid).await?;
        let affected = sqlx::query(
            "DELETE FROM api_keys WHERE principal_id = ? AND first_eight = ?",
        )
        .bind(principal_id)
        .bind(&first_eight[..first_eight.len().min(8)])
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    // ── Sessions ──

    pub async fn create_session(
        &self,
        principal_uuid: &Uuid,
        max_age: Duration,
    ) -> Result<Session, SecurityError> {
        let principal_id = self.require_principal_id(principal_uuid).await?;
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE principal_id = ?")
                .bind(principal_id)
                .fetch_one(&self.pool)
                .await?;
        if count >= SESSION_LIMIT {
            return Err(SecurityError::Conflict(format!(
                "session limit ({SESSION_LIMIT}) reached"
            )));
        }
        let uuid = Uuid::new_v4();
        let now = Utc::now();
        let expiration_time = now + max_age;
        sqlx::query(
            "INSERT INTO sessions (uuid, principal_id, expiration_time, revoked,
                                   refresh_count, time_created)
             VALUES (?, ?, ?, 0, 0, ?)",
        )
        .bind(uuid.to_string())
        .bind(principal_id)
        .bind(expiration_time)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Session {
            uuid,
            expiration_time,
            revoked: false,
            refresh_count: 0,
            time_created: now,
        })
    }

    /// Validate a session for refresh: not revoked, not expired. Bumps
    /// the refresh count and returns the principal for token minting.
    pub async fn refresh_session(
        &self,
        session_uuid: &Uuid,
    ) -> Result<(Principal, Session), SecurityError> {
        let row = sqlx::query(
            "SELECT principal_id, uuid, expiration_time, revoked, refresh_count, time_created
             FROM sessions WHERE uuid = ?",
        )
        .bind(session_uuid.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SecurityError::Unauthorized("session not found".into()))?;
        let principal_id: i64 = row.try_get("principal_id")?;
        let mut session = session_from_row(row)?;
        if session.revoked {
            return Err(SecurityError::Unauthorized("session was revoked".into()));
        }
        if session.expiration_time <= Utc::now() {
            return Err(SecurityError::Unauthorized("session expired".into()));
        }
        sqlx::query("UPDATE sessions SET refresh_count = refresh_count + 1 WHERE uuid = ?")
            .bind(session_uuid.to_string())
            .execute(&self.pool)
            .await?;
        session.refresh_count += 1;
        let principal = self.assemble_principal(principal_id).await?;
        Ok((principal, session))
    }

    pub async fn revoke_session(
        &self,
        session_uuid: &Uuid,
    ) -> Result<RevokeOutcome, SecurityError> {
        let revoked: Option<bool> =
            sqlx::query_scalar("SELECT revoked FROM sessions WHERE uuid = ?")
                .bind(session_uuid.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match revoked {
            None => Ok(RevokeOutcome::NotFound),
            Some(true) => Ok(RevokeOutcome::AlreadyRevoked),
            Some(false) => {
                sqlx::query("UPDATE sessions SET revoked = 1 WHERE uuid = ?")
                    .bind(session_uuid.to_string())
                    .execute(&self.pool)
                    .await?;
                Ok(RevokeOutcome::Revoked)
            }
        }
    }

    // ── Pending device-code sessions ──

    pub async fn create_pending_session(
        &self,
        user_code: &str,
        hashed_device_code: &[u8],
        max_age: Duration,
    ) -> Result<(), SecurityError> {
        sqlx::query(
            "INSERT INTO pending_sessions (user_code, hashed_device_code, expiration_time)
             VALUES (?, ?, ?)",
        )
        .bind(user_code)
        .bind(hashed_device_code)
        .bind(Utc::now() + max_age)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            // The short user code can collide; callers retry.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SecurityError::Conflict("user code collision".into())
            }
            other => other.into(),
        })?;
        Ok(())
    }

    /// Attach a principal to a valid pending session, completing the
    /// browser side of the flow.
    pub async fn grant_pending_session(
        &self,
        user_code: &str,
        principal_uuid: &Uuid,
    ) -> Result<bool, SecurityError> {
        let principal_id = self.require_principal_id(principal_uuid).await?;
        let affected = sqlx::query(
            "UPDATE pending_sessions SET principal_id = ?
             WHERE user_code = ? AND expiration_time > ?",
        )
        .bind(principal_id)
        .bind(user_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Poll from the terminal client. A granted session is consumed.
    pub async fn poll_pending_session(
        &self,
        hashed_device_code: &[u8],
    ) -> Result<PendingPoll, SecurityError> {
        self.gc_pending_sessions().await?;
        let row = sqlx::query(
            "SELECT p.uuid AS principal_uuid
             FROM pending_sessions s LEFT JOIN principals p ON p.id = s.principal_id
             WHERE s.hashed_device_code = ? AND s.expiration_time > ?",
        )
        .bind(hashed_device_code)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(PendingPoll::ExpiredOrUnknown);
        };
        let principal_uuid: Option<String> = row.try_get("principal_uuid")?;
        match principal_uuid {
            None => Ok(PendingPoll::AuthorizationPending),
            Some(uuid) => {
                sqlx::query("DELETE FROM pending_sessions WHERE hashed_device_code = ?")
                    .bind(hashed_device_code)
                    .execute(&self.pool)
                    .await?;
                Ok(PendingPoll::Granted {
                    principal_uuid: parse_uuid(&uuid)?,
                })
            }
        }
    }

    async fn gc_pending_sessions(&self) -> Result<(), SecurityError> {
        sqlx::query("DELETE FROM pending_sessions WHERE expiration_time <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn require_principal_id(&self, uuid: &Uuid) -> Result<i64, SecurityError> {
        sqlx::query_scalar("SELECT id FROM principals WHERE uuid = ?")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SecurityError::NotFound(format!("no such principal: {uuid}")))
    }
}

fn parse_uuid(text: &str) -> Result<Uuid, SecurityError> {
    Uuid::parse_str(text).map_err(|err| SecurityError::Database(format!("bad uuid: {err}")))
}

fn api_key_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ApiKey, SecurityError> {
    let scopes_json: String = row.try_get("scopes")?;
    let access_tags_json: Option<String> = row.try_get("access_tags")?;
    Ok(ApiKey {
        first_eight: row.try_get("first_eight")?,
        expiration_time: row.try_get("expiration_time")?,
        note: row.try_get("note")?,
        scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
        access_tags: access_tags_json.and_then(|json| serde_json::from_str(&json).ok()),
        time_created: row.try_get("time_created")?,
        latest_activity: row.try_get("latest_activity")?,
    })
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Session, SecurityError> {
    let uuid: String = row.try_get("uuid")?;
    let refresh_count: i64 = row.try_get("refresh_count")?;
    Ok(Session {
        uuid: parse_uuid(&uuid)?,
        expiration_time: row.try_get("expiration_time")?,
        revoked: row.try_get("revoked")?,
        refresh_count: refresh_count as u64,
        time_created: row.try_get("time_created")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn principal_round_trip_with_roles() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store
            .principal_for_identity("toy", "alice")
            .await
            .unwrap();
        assert_eq!(principal.identities[0].id, "alice");
        assert_eq!(principal.roles[0].name, "user");
        assert!(principal.role_scopes().contains("read:data"));

        // Looking up again resolves the same principal.
        let again = store.principal_for_identity("toy", "alice").await.unwrap();
        assert_eq!(again.uuid, principal.uuid);
    }

    #[tokio::test]
    async fn api_key_lifecycle() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store.principal_for_identity("toy", "alice").await.unwrap();
        let params = ApiKeyParams {
            scopes: Some(vec!["read:metadata".to_string()]),
            note: Some("ci".to_string()),
            ..Default::default()
        };
        let (secret, key) = store.create_api_key(&principal.uuid, &params).await.unwrap();
        assert_eq!(key.first_eight, &secret[..8]);

        let (found, found_key) = store.lookup_api_key(&secret).await.unwrap().unwrap();
        assert_eq!(found.uuid, principal.uuid);
        assert_eq!(found_key.scopes, vec!["read:metadata"]);

        assert!(store
            .revoke_api_key(&principal.uuid, &key.first_eight)
            .await
            .unwrap());
        assert!(store.lookup_api_key(&secret).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_api_key_reads_as_absent() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store.principal_for_identity("toy", "alice").await.unwrap();
        let params = ApiKeyParams {
            expires_in: Some(-60),
            ..Default::default()
        };
        let (secret, _) = store.create_api_key(&principal.uuid, &params).await.unwrap();
        assert!(store.lookup_api_key(&secret).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_scope_rejected() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store.principal_for_identity("toy", "alice").await.unwrap();
        let params = ApiKeyParams {
            scopes: Some(vec!["launch:rockets".to_string()]),
            ..Default::default()
        };
        assert!(store.create_api_key(&principal.uuid, &params).await.is_err());
    }

    #[tokio::test]
    async fn session_refresh_and_revoke() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store.principal_for_identity("toy", "alice").await.unwrap();
        let session = store
            .create_session(&principal.uuid, Duration::days(365))
            .await
            .unwrap();

        let (_, refreshed) = store.refresh_session(&session.uuid).await.unwrap();
        assert_eq!(refreshed.refresh_count, 1);

        assert_eq!(
            store.revoke_session(&session.uuid).await.unwrap(),
            RevokeOutcome::Revoked
        );
        assert_eq!(
            store.revoke_session(&session.uuid).await.unwrap(),
            RevokeOutcome::AlreadyRevoked
        );
        assert!(store.refresh_session(&session.uuid).await.is_err());
        assert_eq!(
            store.revoke_session(&Uuid::new_v4()).await.unwrap(),
            RevokeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn device_code_flow_via_store() {
        let store = AuthnStore::in_memory().await.unwrap();
        let principal = store.principal_for_identity("toy", "alice").await.unwrap();
        let (device_code, hashed) = crate::device::generate_device_code();
        let user_code = crate::device::generate_user_code();
        store
            .create_pending_session(&user_code, &hashed, Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(
            store.poll_pending_session(&hashed).await.unwrap(),
            PendingPoll::AuthorizationPending
        );
        assert!(store
            .grant_pending_session(&user_code, &principal.uuid)
            .await
            .unwrap());
        match store.poll_pending_session(&hashed).await.unwrap() {
            PendingPoll::Granted { principal_uuid } => {
                assert_eq!(principal_uuid, principal.uuid)
            }
            other => panic!("expected granted, got {other:?}"),
        }
        // Consumed: a second poll is unknown.
        assert_eq!(
            store.poll_pending_session(&hashed).await.unwrap(),
            PendingPoll::ExpiredOrUnknown
        );
        let _ = device_code;
    }
}
