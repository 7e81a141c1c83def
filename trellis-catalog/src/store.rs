//! The catalog store handle: pool, migrations, and shared helpers.

use std::path::PathBuf;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use trellis_model::Structure;

use crate::CatalogError;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/0001_initialize.sql"))];

/// Handle to the catalog database plus the managed data directory where
/// internally-managed (writable) node data lives.
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
    data_dir: PathBuf,
}

impl CatalogStore {
    /// Connect with a bounded pool. The URI scheme selects the driver;
    /// this build compiles the sqlite driver.
    pub async fn connect(
        uri: &str,
        max_connections: u32,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, CatalogError> {
        if uri.starts_with("postgresql:") {
            return Err(CatalogError::Database(
                "this build was compiled without the postgres driver; \
                 use a sqlite: URI"
                    .to_string(),
            ));
        }
        if !uri.starts_with("sqlite:") {
            return Err(CatalogError::Database(format!(
                "catalog database URI must use the sqlite: scheme, got {uri:?}"
            )));
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        // SQLite needs this per-connection pragma for ON DELETE CASCADE.
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            data_dir: data_dir.into(),
        })
    }

    /// An in-memory catalog with a temporary data directory (tests).
    pub async fn in_memory(data_dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let store = Self::connect("sqlite::memory:", 1, data_dir).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Apply pending migrations in order.
    pub async fn migrate(&self) -> Result<(), CatalogError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS catalog_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM catalog_migrations")
                .fetch_one(&self.pool)
                .await?;
        let applied = applied.unwrap_or(0);
        for (version, sql) in MIGRATIONS {
            if *version <= applied {
                continue;
            }
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            sqlx::query("INSERT INTO catalog_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Insert the structure if new and return its content address.
    pub(crate) async fn intern_structure(
        &self,
        structure: &Structure,
    ) -> Result<String, CatalogError> {
        let json = serde_json::to_string(structure)
            .map_err(|err| CatalogError::Database(err.to_string()))?;
        let id = structure_id(&json);
        sqlx::query("INSERT OR IGNORE INTO structures (id, structure) VALUES (?, ?)")
            .bind(&id)
            .bind(&json)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Content address of a structure: SHA-256 of its canonical JSON,
/// truncated to 32 hex chars.
pub fn structure_id(structure_json: &str) -> String {
    let digest = Sha256::digest(structure_json.as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// `/`-join ancestors for the denormalized parent column. The root's
/// children have parent `""`.
pub(crate) fn parent_path(ancestors: &[String]) -> String {
    ancestors.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_ids_are_stable_and_distinct() {
        let a = structure_id("{\"family\":\"container\"}");
        let b = structure_id("{\"family\":\"container\"}");
        let c = structure_id("{\"family\":\"array\"}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
