//! Translation of the query algebra into parameterized SQL predicates.
//!
//! Predicates are appended to a `sqlx::QueryBuilder` with every value
//! bound, never interpolated. Queries that SQLite cannot evaluate
//! natively (Regex, FullText) are classified as post-filters and
//! evaluated in Rust against fetched rows.

use sqlx::{QueryBuilder, Sqlite};
use trellis_query::Query;

use crate::CatalogError;

/// Whether a query must be evaluated in Rust after the SQL fetch.
pub fn is_post_filter(query: &Query) -> bool {
    matches!(query, Query::Regex { .. } | Query::FullText { .. })
}

/// Split queries into SQL-translatable and post-filter sets.
pub fn partition_queries(queries: &[Query]) -> (Vec<&Query>, Vec<&Query>) {
    queries.iter().partition(|q| !is_post_filter(q))
}

fn json_path(key: &str) -> String {
    format!("$.{key}")
}

fn push_json_scalar(builder: &mut QueryBuilder<'_, Sqlite>, value: &serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            builder.push_bind(s.clone());
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else {
                builder.push_bind(n.as_f64().unwrap_or(f64::NAN));
            }
        }
        serde_json::Value::Bool(b) => {
            builder.push_bind(*b);
        }
        other => {
            // Arrays and objects compare by canonical JSON text.
            builder.push("json_extract(");
            builder.push_bind(other.to_string());
            builder.push(", '$')");
        }
    }
}

/// Append ` AND (...)` for each SQL-translatable query.
pub fn push_query_predicates(
    builder: &mut QueryBuilder<'_, Sqlite>,
    queries: &[&Query],
) -> Result<(), CatalogError> {
    for query in queries {
        builder.push(" AND (");
        match query {
            Query::Eq { key, value } => {
                if value.is_null() {
                    builder.push("json_extract(metadata, ");
                    builder.push_bind(json_path(key));
                    builder.push(") IS NULL");
                } else {
                    builder.push("json_extract(metadata, ");
                    builder.push_bind(json_path(key));
                    builder.push(") = ");
                    push_json_scalar(builder, value);
                }
            }
            Query::NotEq { key, value } => {
                builder.push("json_extract(metadata, ");
                builder.push_bind(json_path(key));
                builder.push(") IS NULL OR json_extract(metadata, ");
                builder.push_bind(json_path(key));
                builder.push(") != ");
                push_json_scalar(builder, value);
            }
            Query::In { key, values } => {
                if values.is_empty() {
                    builder.push("1 = 0");
                } else {
                    builder.push("json_extract(metadata, ");
                    builder.push_bind(json_path(key));
                    builder.push(") IN (");
                    for (index, value) in values.iter().enumerate() {
                        if index > 0 {
                            builder.push(", ");
                        }
                        push_json_scalar(builder, value);
                    }
                    builder.push(")");
                }
            }
            Query::Comparison {
                operator,
                key,
                value,
            } => {
                builder.push("CAST(json_extract(metadata, ");
                builder.push_bind(json_path(key));
                builder.push(format!(") AS REAL) {} ", operator.as_sql()));
                builder.push_bind(value.as_f64().ok_or_else(|| {
                    CatalogError::BadRequest(
                        "comparison queries require a numeric value".to_string(),
                    )
                })?);
            }
            Query::StructureFamily { value } => {
                builder.push("structure_family = ");
                builder.push_bind(value.as_str());
            }
            Query::KeysFilter { keys } => {
                if keys.is_empty() {
                    builder.push("1 = 0");
                } else {
                    builder.push("key IN (");
                    for (index, key) in keys.iter().enumerate() {
                        if index > 0 {
                            builder.push(", ");
                        }
                        builder.push_bind(key.clone());
                    }
                    builder.push(")");
                }
            }
            Query::SpecsQuery { include, exclude } => {
                builder.push("1 = 1");
                for name in include {
                    builder.push(
                        " AND EXISTS (SELECT 1 FROM json_each(specs) \
                         WHERE json_extract(json_each.value, '$.name') = ",
                    );
                    builder.push_bind(name.clone());
                    builder.push(")");
                }
                for name in exclude {
                    builder.push(
                        " AND NOT EXISTS (SELECT 1 FROM json_each(specs) \
                         WHERE json_extract(json_each.value, '$.name') = ",
                    );
                    builder.push_bind(name.clone());
                    builder.push(")");
                }
            }
            Query::AccessBlobFilter { user_id, tags } => {
                let mut any = false;
                if let Some(user) = user_id {
                    builder.push("json_extract(access_blob, '$.user') = ");
                    builder.push_bind(user.clone());
                    any = true;
                }
                if !tags.is_empty() {
                    if any {
                        builder.push(" OR ");
                    }
                    builder.push(
                        "EXISTS (SELECT 1 FROM json_each(access_blob, '$.tags') \
                         WHERE json_each.value IN (",
                    );
                    for (index, tag) in tags.iter().enumerate() {
                        if index > 0 {
                            builder.push(", ");
                        }
                        builder.push_bind(tag.clone());
                    }
                    builder.push("))");
                    any = true;
                }
                if !any {
                    // A filter granting nothing matches nothing.
                    builder.push("1 = 0");
                }
            }
            Query::Regex { .. } | Query::FullText { .. } => {
                return Err(CatalogError::Database(
                    "post-filter query reached the SQL translator".to_string(),
                ));
            }
        }
        builder.push(")");
    }
    Ok(())
}

/// Append an ORDER BY clause for the sorting spec. The insertion-order
/// key `_` maps onto the covering index `(parent, time_created, id)`.
pub fn push_order_by(
    builder: &mut QueryBuilder<'_, Sqlite>,
    sorting: &[trellis_model::SortingItem],
) {
    builder.push(" ORDER BY ");
    let effective: Vec<_> = if sorting.is_empty() {
        vec![trellis_model::SortingItem::insertion_order()]
    } else {
        sorting.to_vec()
    };
    for (index, item) in effective.iter().enumerate() {
        if index > 0 {
            builder.push(", ");
        }
        let direction = if item.direction < 0 { "DESC" } else { "ASC" };
        if item.key == "_" {
            builder.push(format!("time_created {direction}, id {direction}"));
        } else {
            builder.push("json_extract(metadata, ");
            builder.push_bind(json_path(&item.key));
            builder.push(format!(") {direction}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(is_post_filter(&Query::FullText { text: "x".into() }));
        assert!(!is_post_filter(&Query::Eq {
            key: "a".into(),
            value: serde_json::json!(1),
        }));
    }

    #[test]
    fn eq_renders_bound_predicate() {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT key FROM nodes WHERE parent = ''");
        let query = Query::Eq {
            key: "color".into(),
            value: serde_json::json!("red"),
        };
        push_query_predicates(&mut builder, &[&query]).unwrap();
        let sql = builder.sql();
        assert!(sql.contains("json_extract(metadata, "));
        assert!(!sql.contains("red"), "values must be bound, not inlined");
    }

    #[test]
    fn access_blob_filter_matches_nothing_when_empty() {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT key FROM nodes WHERE parent = ''");
        let query = Query::AccessBlobFilter {
            user_id: None,
            tags: Vec::new(),
        };
        push_query_predicates(&mut builder, &[&query]).unwrap();
        assert!(builder.sql().contains("1 = 0"));
    }
}
