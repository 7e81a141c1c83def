//! Metadata revision history.

use sqlx::Row;
use trellis_model::Revision;

use crate::{CatalogError, CatalogStore};

impl CatalogStore {
    /// List a node's revisions, oldest first.
    pub async fn revisions(
        &self,
        node_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Revision>, CatalogError> {
        let rows = sqlx::query(
            "SELECT revision_number, metadata, specs, access_blob, time_updated
             FROM revisions WHERE node_id = ?
             ORDER BY revision_number LIMIT ? OFFSET ?",
        )
        .bind(node_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool())
        .await?;
        let mut revisions = Vec::with_capacity(rows.len());
        for row in rows {
            let revision_number: i64 = row.try_get("revision_number")?;
            let metadata: String = row.try_get("metadata")?;
            let specs: String = row.try_get("specs")?;
            let access_blob: Option<String> = row.try_get("access_blob")?;
            revisions.push(Revision {
                revision_number: revision_number as u64,
                metadata: serde_json::from_str(&metadata)
                    .map_err(|err| CatalogError::Database(err.to_string()))?,
                specs: serde_json::from_str(&specs)
                    .map_err(|err| CatalogError::Database(err.to_string()))?,
                access_blob: access_blob
                    .map(|json| serde_json::from_str(&json))
                    .transpose()
                    .map_err(|err| CatalogError::Database(err.to_string()))?,
                time_updated: row.try_get("time_updated")?,
            });
        }
        Ok(revisions)
    }

    /// Delete one historical revision.
    pub async fn delete_revision(
        &self,
        node_id: i64,
        revision_number: u64,
    ) -> Result<(), CatalogError> {
        let affected = sqlx::query(
            "DELETE FROM revisions WHERE node_id = ? AND revision_number = ?",
        )
        .bind(node_id)
        .bind(revision_number as i64)
        .execute(self.pool())
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(CatalogError::NotFound(format!(
                "no revision {revision_number} for node {node_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use trellis_model::NodeAttributes;

    use super::*;

    #[tokio::test]
    async fn delete_revision_then_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::in_memory(dir.path()).await.unwrap();
        let record = store
            .create_node(&[], "a", NodeAttributes::container(), None)
            .await
            .unwrap();
        store
            .update_metadata(record.id, &serde_json::json!({"v": 2}), &[], None, None)
            .await
            .unwrap();
        store.delete_revision(record.id, 1).await.unwrap();
        assert!(matches!(
            store.delete_revision(record.id, 1).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(store.revisions(record.id, 0, 10).await.unwrap().is_empty());
    }
}
