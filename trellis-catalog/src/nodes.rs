//! Node CRUD and child listing.

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use trellis_adapters::filter::{matches_all, ChildView};
use trellis_model::{
    validate_key, AccessBlob, Asset, DataSource, Management, Node, NodeAttributes, SortingItem,
    Spec, Structure, StructureFamily,
};
use trellis_query::Query;

use crate::assets::delete_asset_bytes;
use crate::queries::{partition_queries, push_order_by, push_query_predicates};
use crate::store::parent_path;
use crate::{CatalogError, CatalogStore};

/// A node plus its database identity.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: i64,
    pub node: Node,
}

const NODE_COLUMNS: &str =
    "id, key, ancestors, structure_family, metadata, specs, sorting, access_blob, \
     time_created, time_updated";

impl CatalogStore {
    /// Create a node with its data sources and assets, atomically.
    ///
    /// Key collisions under the same parent surface as `Conflict`.
    /// Writable data sources with no assets get a managed directory
    /// allocated under the catalog's data directory.
    pub async fn create_node(
        &self,
        ancestors: &[String],
        key: &str,
        attributes: NodeAttributes,
        created_by: Option<&str>,
    ) -> Result<NodeRecord, CatalogError> {
        validate_key(key).map_err(|err| CatalogError::BadRequest(err.to_string()))?;
        if let Some(structure) = &attributes.structure {
            structure
                .validate()
                .map_err(CatalogError::BadRequest)?;
            if structure.family() != attributes.structure_family {
                return Err(CatalogError::BadRequest(format!(
                    "structure family {} does not match declared family {}",
                    structure.family(),
                    attributes.structure_family
                )));
            }
        }
        let data_sources = attributes.data_sources.clone().unwrap_or_default();
        if data_sources.is_empty()
            && !matches!(
                attributes.structure_family,
                StructureFamily::Container | StructureFamily::Composite
            )
        {
            return Err(CatalogError::BadRequest(
                "only containers may have zero data sources".to_string(),
            ));
        }

        // Intern structures before opening the transaction; the insert
        // below must not re-acquire from the (possibly size-1) pool.
        let mut structure_ids = Vec::with_capacity(data_sources.len());
        for data_source in &data_sources {
            structure_ids.push(match &data_source.structure {
                Some(structure) => Some(self.intern_structure(structure).await?),
                None => None,
            });
        }

        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "INSERT INTO nodes (key, ancestors, parent, structure_family, metadata, specs,
                                sorting, access_blob, created_by, updated_by,
                                time_created, time_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(to_json(&ancestors)?)
        .bind(parent_path(ancestors))
        .bind(attributes.structure_family.as_str())
        .bind(to_json(&attributes.metadata)?)
        .bind(to_json(&attributes.specs)?)
        .bind(to_json(&attributes.sorting)?)
        .bind(
            attributes
                .access_blob
                .as_ref()
                .map(|blob| to_json(blob))
                .transpose()?,
        )
        .bind(created_by)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| match CatalogError::from(err) {
            CatalogError::Conflict(_) => CatalogError::Conflict(format!(
                "a node with key {key:?} already exists here"
            )),
            other => other,
        })?;
        let node_id = result.last_insert_rowid();

        let mut stored_sources = Vec::with_capacity(data_sources.len());
        for (index, mut data_source) in data_sources.into_iter().enumerate() {
            let structure_id = structure_ids[index].clone();
            let ds_result = sqlx::query(
                "INSERT INTO data_sources (node_id, structure_id, mimetype, parameters, management)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(node_id)
            .bind(&structure_id)
            .bind(&data_source.mimetype)
            .bind(to_json(&data_source.parameters)?)
            .bind(management_str(data_source.management))
            .execute(&mut *tx)
            .await?;
            let data_source_id = ds_result.last_insert_rowid();

            if data_source.assets.is_empty() && data_source.management.deletes_bytes() {
                // Allocate managed storage for internally-owned data.
                let dir = self
                    .data_dir()
                    .join(node_id.to_string())
                    .join(format!("ds-{index}"));
                data_source.assets.push(Asset {
                    id: None,
                    data_uri: format!("file://{}", dir.display()),
                    is_directory: true,
                    parameter: Some("data_uri".to_string()),
                    num: None,
                });
            }
            for asset in &mut data_source.assets {
                let asset_result = sqlx::query(
                    "INSERT INTO assets (data_source_id, data_uri, is_directory, parameter, num)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(data_source_id)
                .bind(&asset.data_uri)
                .bind(asset.is_directory)
                .bind(&asset.parameter)
                .bind(asset.num)
                .execute(&mut *tx)
                .await?;
                asset.id = Some(asset_result.last_insert_rowid());
            }
            data_source.id = Some(data_source_id);
            stored_sources.push(data_source);
        }
        tx.commit().await?;

        // Create managed directories outside the transaction.
        for data_source in &stored_sources {
            if data_source.management.deletes_bytes() {
                for asset in &data_source.assets {
                    if asset.is_directory {
                        if let Some(path) = crate::assets::file_path(&asset.data_uri) {
                            tokio::fs::create_dir_all(&path).await?;
                        }
                    }
                }
            }
        }

        let mut attributes = attributes;
        attributes.data_sources = Some(stored_sources);
        attributes.time_created = Some(now);
        attributes.time_updated = Some(now);
        Ok(NodeRecord {
            id: node_id,
            node: Node {
                key: key.to_string(),
                ancestors: ancestors.to_vec(),
                attributes,
            },
        })
    }

    /// Look up one node by its full path. `None` for the empty path is
    /// not meaningful here; the root is virtual and handled by callers.
    pub async fn lookup_node(&self, segments: &[&str]) -> Result<Option<NodeRecord>, CatalogError> {
        let Some((key, ancestors)) = segments.split_last() else {
            return Ok(None);
        };
        let parent = ancestors.join("/");
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent = ? AND key = ?"
        ))
        .bind(&parent)
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(row) => Ok(Some(self.record_from_row(row).await?)),
            None => Ok(None),
        }
    }

    /// Keys of a container's children: stable order, O(limit) after
    /// offset via the covering index, filterable by the query algebra.
    pub async fn keys_range(
        &self,
        parent: &str,
        offset: u64,
        limit: u64,
        queries: &[Query],
        sorting: &[SortingItem],
    ) -> Result<Vec<String>, CatalogError> {
        let records = self
            .items_range(parent, offset, limit, queries, sorting)
            .await?;
        Ok(records.into_iter().map(|r| r.node.key).collect())
    }

    /// Children of a container as full records.
    pub async fn items_range(
        &self,
        parent: &str,
        offset: u64,
        limit: u64,
        queries: &[Query],
        sorting: &[SortingItem],
    ) -> Result<Vec<NodeRecord>, CatalogError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (sql_queries, post_queries) = partition_queries(queries);
        let mut collected = Vec::new();
        let mut scan_offset = offset;
        // Post-filters (Regex, FullText) are evaluated in Rust, so keep
        // fetching batches until the page fills or rows run out. With no
        // post-filters this loop runs exactly once.
        loop {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE parent = "));
            builder.push_bind(parent.to_string());
            push_query_predicates(&mut builder, &sql_queries)?;
            push_order_by(&mut builder, sorting);
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
            builder.push(" OFFSET ");
            builder.push_bind(scan_offset as i64);

            let rows = builder.build().fetch_all(self.pool()).await?;
            let fetched = rows.len() as u64;
            for row in rows {
                let record = self.record_from_row(row).await?;
                if post_queries.is_empty() || matches_post_filters(&post_queries, &record) {
                    collected.push(record);
                    if collected.len() as u64 == limit {
                        return Ok(collected);
                    }
                }
            }
            if fetched < limit {
                return Ok(collected);
            }
            scan_offset += fetched;
            if post_queries.is_empty() {
                return Ok(collected);
            }
        }
    }

    /// Exact child count under the given filters.
    pub async fn count(&self, parent: &str, queries: &[Query]) -> Result<u64, CatalogError> {
        let (sql_queries, post_queries) = partition_queries(queries);
        if !post_queries.is_empty() {
            // Post-filters force a scan.
            let items = self
                .items_range(parent, 0, u64::MAX / 2, queries, &[])
                .await?;
            return Ok(items.len() as u64);
        }
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM nodes WHERE parent = ");
        builder.push_bind(parent.to_string());
        push_query_predicates(&mut builder, &sql_queries)?;
        let count: i64 = builder.build_query_scalar().fetch_one(self.pool()).await?;
        Ok(count as u64)
    }

    /// `(count, exact)`: exact when the count is at most `threshold`,
    /// otherwise the threshold as a lower bound.
    pub async fn lbound_len(
        &self,
        parent: &str,
        queries: &[Query],
        threshold: u64,
    ) -> Result<(u64, bool), CatalogError> {
        let (sql_queries, post_queries) = partition_queries(queries);
        if !post_queries.is_empty() {
            return Ok((self.count(parent, queries).await?, true));
        }
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) FROM (SELECT id FROM nodes WHERE parent = ",
        );
        builder.push_bind(parent.to_string());
        push_query_predicates(&mut builder, &sql_queries)?;
        builder.push(" LIMIT ");
        builder.push_bind((threshold + 1) as i64);
        builder.push(")");
        let count: i64 = builder.build_query_scalar().fetch_one(self.pool()).await?;
        let count = count as u64;
        if count > threshold {
            Ok((threshold, false))
        } else {
            Ok((count, true))
        }
    }

    /// Record a revision of the current state, then apply the new
    /// metadata, specs, and access blob. Returns the revision number.
    pub async fn update_metadata(
        &self,
        node_id: i64,
        metadata: &serde_json::Value,
        specs: &[Spec],
        access_blob: Option<&AccessBlob>,
        updated_by: Option<&str>,
    ) -> Result<u64, CatalogError> {
        let mut tx = self.pool().begin().await?;
        let current = sqlx::query(
            "SELECT metadata, specs, access_blob, time_updated FROM nodes WHERE id = ?",
        )
        .bind(node_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("no node {node_id}")))?;

        let next_revision: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(revision_number), 0) + 1 FROM revisions WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_one(&mut *tx)
        .await?;

        let current_metadata: String = current.try_get("metadata")?;
        let current_specs: String = current.try_get("specs")?;
        let current_blob: Option<String> = current.try_get("access_blob")?;
        let current_updated: chrono::DateTime<Utc> = current.try_get("time_updated")?;
        sqlx::query(
            "INSERT INTO revisions (node_id, revision_number, metadata, specs, access_blob,
                                    time_updated)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(node_id)
        .bind(next_revision)
        .bind(current_metadata)
        .bind(current_specs)
        .bind(current_blob)
        .bind(current_updated)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE nodes SET metadata = ?, specs = ?, access_blob = ?, updated_by = ?,
                              time_updated = ?
             WHERE id = ?",
        )
        .bind(to_json(metadata)?)
        .bind(to_json(&specs)?)
        .bind(access_blob.map(to_json).transpose()?)
        .bind(updated_by)
        .bind(Utc::now())
        .bind(node_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next_revision as u64)
    }

    /// Delete a node. Refuses when the node has children. Backing bytes
    /// of non-external data sources are deleted from disk.
    pub async fn delete_node(&self, record: &NodeRecord) -> Result<(), CatalogError> {
        let own_path = {
            let mut segments = record.node.ancestors.clone();
            segments.push(record.node.key.clone());
            segments.join("/")
        };
        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE parent = ?")
            .bind(&own_path)
            .fetch_one(self.pool())
            .await?;
        if children > 0 {
            return Err(CatalogError::BadRequest(
                "cannot delete a node that has children".to_string(),
            ));
        }
        if let Some(data_sources) = &record.node.attributes.data_sources {
            for data_source in data_sources {
                if data_source.management.deletes_bytes() {
                    for asset in &data_source.assets {
                        delete_asset_bytes(self.data_dir(), asset).await?;
                    }
                }
            }
        }
        let affected = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(record.id)
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(CatalogError::NotFound(format!("no node {}", record.id)));
        }
        Ok(())
    }

    /// Unique values of the requested metadata fields (and optionally
    /// structure families and specs) among a container's children.
    pub async fn distinct(
        &self,
        parent: &str,
        metadata_keys: &[String],
        structure_families: bool,
        specs: bool,
        counts: bool,
    ) -> Result<serde_json::Value, CatalogError> {
        let mut out = serde_json::Map::new();
        let mut metadata_out = serde_json::Map::new();
        for key in metadata_keys {
            let rows = sqlx::query(
                "SELECT json_extract(metadata, ?) AS value, COUNT(*) AS n
                 FROM nodes WHERE parent = ? AND json_extract(metadata, ?) IS NOT NULL
                 GROUP BY value ORDER BY value",
            )
            .bind(format!("$.{key}"))
            .bind(parent)
            .bind(format!("$.{key}"))
            .fetch_all(self.pool())
            .await?;
            metadata_out.insert(key.clone(), distinct_rows(rows, counts)?);
        }
        if !metadata_out.is_empty() {
            out.insert("metadata".to_string(), metadata_out.into());
        }
        if structure_families {
            let rows = sqlx::query(
                "SELECT structure_family AS value, COUNT(*) AS n
                 FROM nodes WHERE parent = ? GROUP BY value ORDER BY value",
            )
            .bind(parent)
            .fetch_all(self.pool())
            .await?;
            out.insert(
                "structure_families".to_string(),
                distinct_rows(rows, counts)?,
            );
        }
        if specs {
            let rows = sqlx::query(
                "SELECT json_each.value AS value, COUNT(*) AS n
                 FROM nodes, json_each(nodes.specs) WHERE parent = ?
                 GROUP BY json_each.value ORDER BY json_each.value",
            )
            .bind(parent)
            .fetch_all(self.pool())
            .await?;
            out.insert("specs".to_string(), distinct_rows(rows, counts)?);
        }
        Ok(out.into())
    }

    async fn record_from_row(&self, row: sqlx::sqlite::SqliteRow) -> Result<NodeRecord, CatalogError> {
        let id: i64 = row.try_get("id")?;
        let key: String = row.try_get("key")?;
        let ancestors_json: String = row.try_get("ancestors")?;
        let family: String = row.try_get("structure_family")?;
        let metadata_json: String = row.try_get("metadata")?;
        let specs_json: String = row.try_get("specs")?;
        let sorting_json: String = row.try_get("sorting")?;
        let access_blob_json: Option<String> = row.try_get("access_blob")?;

        let data_sources = self.data_sources_for(id).await?;
        let structure = data_sources
            .iter()
            .find_map(|source| source.structure.clone());

        Ok(NodeRecord {
            id,
            node: Node {
                key,
                ancestors: from_json(&ancestors_json)?,
                attributes: NodeAttributes {
                    structure_family: family
                        .parse()
                        .map_err(CatalogError::Database)?,
                    specs: from_json(&specs_json)?,
                    metadata: from_json(&metadata_json)?,
                    structure,
                    sorting: from_json(&sorting_json)?,
                    data_sources: Some(data_sources),
                    access_blob: access_blob_json
                        .map(|json| from_json(&json))
                        .transpose()?,
                    time_created: row.try_get("time_created")?,
                    time_updated: row.try_get("time_updated")?,
                },
            },
        })
    }

    pub(crate) async fn data_sources_for(
        &self,
        node_id: i64,
    ) -> Result<Vec<DataSource>, CatalogError> {
        let rows = sqlx::query(
            "SELECT d.id, d.mimetype, d.parameters, d.management, s.structure
             FROM data_sources d LEFT JOIN structures s ON s.id = d.structure_id
             WHERE d.node_id = ? ORDER BY d.id",
        )
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;
        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            let data_source_id: i64 = row.try_get("id")?;
            let parameters_json: Option<String> = row.try_get("parameters")?;
            let structure_json: Option<String> = row.try_get("structure")?;
            let management: String = row.try_get("management")?;
            let assets = sqlx::query(
                "SELECT id, data_uri, is_directory, parameter, num
                 FROM assets WHERE data_source_id = ? ORDER BY num, id",
            )
            .bind(data_source_id)
            .fetch_all(self.pool())
            .await?
            .into_iter()
            .map(|row| {
                Ok(Asset {
                    id: Some(row.try_get("id")?),
                    data_uri: row.try_get("data_uri")?,
                    is_directory: row.try_get("is_directory")?,
                    parameter: row.try_get("parameter")?,
                    num: row.try_get("num")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
            sources.push(DataSource {
                id: Some(data_source_id),
                mimetype: row.try_get("mimetype")?,
                structure: structure_json
                    .map(|json| from_json::<Structure>(&json))
                    .transpose()?,
                parameters: parameters_json
                    .map(|json| from_json(&json))
                    .transpose()?
                    .unwrap_or(serde_json::Value::Null),
                management: management_from_str(&management)?,
                assets,
            });
        }
        Ok(sources)
    }
}

fn matches_post_filters(queries: &[&Query], record: &NodeRecord) -> bool {
    let attributes = &record.node.attributes;
    let view = ChildView {
        key: &record.node.key,
        metadata: &attributes.metadata,
        structure_family: attributes.structure_family,
        specs: &attributes.specs,
        access_blob: attributes.access_blob.as_ref(),
    };
    let owned: Vec<Query> = queries.iter().map(|q| (*q).clone()).collect();
    matches_all(&owned, &view)
}

fn distinct_rows(
    rows: Vec<sqlx::sqlite::SqliteRow>,
    counts: bool,
) -> Result<serde_json::Value, CatalogError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        // json_extract returns dynamically-typed values; read as JSON
        // text first and fall back to a plain string.
        let value: serde_json::Value = match row.try_get::<String, _>("value") {
            Ok(text) => serde_json::from_str(&text)
                .unwrap_or(serde_json::Value::String(text)),
            Err(_) => match row.try_get::<f64, _>("value") {
                Ok(number) => serde_json::json!(number),
                Err(_) => serde_json::Value::Null,
            },
        };
        if counts {
            let n: i64 = row.try_get("n")?;
            out.push(serde_json::json!({"value": value, "count": n}));
        } else {
            out.push(serde_json::json!({"value": value}));
        }
    }
    Ok(serde_json::Value::Array(out))
}

fn management_str(management: Management) -> &'static str {
    match management {
        Management::Internal => "internal",
        Management::External => "external",
        Management::Writable => "writable",
        Management::Locked => "locked",
    }
}

fn management_from_str(text: &str) -> Result<Management, CatalogError> {
    match text {
        "internal" => Ok(Management::Internal),
        "external" => Ok(Management::External),
        "writable" => Ok(Management::Writable),
        "locked" => Ok(Management::Locked),
        other => Err(CatalogError::Database(format!(
            "unknown management: {other}"
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CatalogError> {
    serde_json::to_string(value).map_err(|err| CatalogError::Database(err.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, CatalogError> {
    serde_json::from_str(json).map_err(|err| CatalogError::Database(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (CatalogStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::in_memory(dir.path()).await.unwrap();
        (store, dir)
    }

    fn container(metadata: serde_json::Value) -> NodeAttributes {
        let mut attributes = NodeAttributes::container();
        attributes.metadata = metadata;
        attributes
    }

    #[tokio::test]
    async fn create_lookup_round_trip() {
        let (store, _dir) = store().await;
        store
            .create_node(&[], "a", container(serde_json::json!({"num": 1})), None)
            .await
            .unwrap();
        let found = store.lookup_node(&["a"]).await.unwrap().unwrap();
        assert_eq!(found.node.key, "a");
        assert_eq!(found.node.attributes.metadata["num"], 1);
        assert!(store.lookup_node(&["b"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_key_conflicts() {
        let (store, _dir) = store().await;
        store
            .create_node(&[], "a", container(serde_json::json!({})), None)
            .await
            .unwrap();
        let err = store
            .create_node(&[], "a", container(serde_json::json!({})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn keys_range_insertion_order_and_filters() {
        let (store, _dir) = store().await;
        for (key, num) in [("c", 2), ("a", 0), ("b", 1)] {
            store
                .create_node(&[], key, container(serde_json::json!({"num": num})), None)
                .await
                .unwrap();
        }
        let keys = store.keys_range("", 0, 10, &[], &[]).await.unwrap();
        assert_eq!(keys, vec!["c", "a", "b"]);

        let keys = store.keys_range("", 1, 1, &[], &[]).await.unwrap();
        assert_eq!(keys, vec!["a"]);

        let queries = vec![Query::Comparison {
            operator: trellis_query::ComparisonOperator::Ge,
            key: "num".into(),
            value: serde_json::json!(1),
        }];
        let keys = store.keys_range("", 0, 10, &queries, &[]).await.unwrap();
        assert_eq!(keys, vec!["c", "b"]);
        assert_eq!(store.count("", &queries).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sort_by_metadata_key() {
        let (store, _dir) = store().await;
        for (key, num) in [("c", 2), ("a", 0), ("b", 1)] {
            store
                .create_node(&[], key, container(serde_json::json!({"num": num})), None)
                .await
                .unwrap();
        }
        let sorting = vec![SortingItem {
            key: "num".into(),
            direction: -1,
        }];
        let keys = store.keys_range("", 0, 10, &[], &sorting).await.unwrap();
        assert_eq!(keys, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn regex_post_filter() {
        let (store, _dir) = store().await;
        for (key, name) in [("a", "run-001"), ("b", "calib"), ("c", "run-002")] {
            store
                .create_node(&[], key, container(serde_json::json!({"name": name})), None)
                .await
                .unwrap();
        }
        let queries = vec![Query::Regex {
            key: "name".into(),
            pattern: "^run-".into(),
            case_sensitive: true,
        }];
        let keys = store.keys_range("", 0, 10, &queries, &[]).await.unwrap();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn revisions_record_prior_state() {
        let (store, _dir) = store().await;
        let record = store
            .create_node(&[], "a", container(serde_json::json!({"v": 1})), None)
            .await
            .unwrap();
        let revision = store
            .update_metadata(
                record.id,
                &serde_json::json!({"v": 2}),
                &[],
                None,
                Some("alice"),
            )
            .await
            .unwrap();
        assert_eq!(revision, 1);
        let revisions = store.revisions(record.id, 0, 10).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].metadata["v"], 1);
        assert_eq!(revisions[0].revision_number, 1);

        let updated = store.lookup_node(&["a"]).await.unwrap().unwrap();
        assert_eq!(updated.node.attributes.metadata["v"], 2);
    }

    #[tokio::test]
    async fn delete_refuses_children() {
        let (store, _dir) = store().await;
        let parent = store
            .create_node(&[], "p", container(serde_json::json!({})), None)
            .await
            .unwrap();
        store
            .create_node(&["p".to_string()], "child", container(serde_json::json!({})), None)
            .await
            .unwrap();
        assert!(matches!(
            store.delete_node(&parent).await,
            Err(CatalogError::BadRequest(_))
        ));
        let child = store.lookup_node(&["p", "child"]).await.unwrap().unwrap();
        store.delete_node(&child).await.unwrap();
        store.delete_node(&parent).await.unwrap();
        assert!(store.lookup_node(&["p"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn distinct_values() {
        let (store, _dir) = store().await;
        for (key, color) in [("a", "red"), ("b", "blue"), ("c", "red")] {
            store
                .create_node(&[], key, container(serde_json::json!({"color": color})), None)
                .await
                .unwrap();
        }
        let distinct = store
            .distinct("", &["color".to_string()], true, false, true)
            .await
            .unwrap();
        let colors = distinct["metadata"]["color"].as_array().unwrap();
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[1]["value"], "red");
        assert_eq!(colors[1]["count"], 2);
        let families = distinct["structure_families"].as_array().unwrap();
        assert_eq!(families[0]["value"], "container");
    }
}
