//! `/search` and `/distinct`: filtered, paginated listings.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Response;
use http::HeaderMap;
use trellis_core::pagination::EXACT_COUNT_THRESHOLD;
use trellis_core::{Envelope, Error, FieldSelection, PageLinks, PageParams};
use trellis_model::StructureFamily;
use trellis_query::{parse_filter_params, parse_sort};

use crate::extract::{catalog_err, Auth, RawQuery};
use crate::resolve::{listing_filters, secure_lookup};
use crate::routers::metadata::{path_str, OptionalPath};
use crate::routers::{node_resource, respond};
use crate::AppState;

fn page_params(query: &RawQuery) -> Result<PageParams, Error> {
    let mut params = PageParams::default();
    if let Some(offset) = query.first("page[offset]") {
        params.offset = offset
            .parse()
            .map_err(|_| Error::BadRequest("malformed page[offset]".to_string()))?;
    }
    if let Some(limit) = query.first("page[limit]") {
        params.limit = limit
            .parse()
            .map_err(|_| Error::BadRequest("malformed page[limit]".to_string()))?;
    }
    params.validate()?;
    Ok(params)
}

fn require_container(resolved: &crate::resolve::ResolvedNode) -> Result<(), Error> {
    if let Some(record) = &resolved.record {
        if !matches!(
            record.node.attributes.structure_family,
            StructureFamily::Container | StructureFamily::Composite
        ) {
            return Err(Error::MethodNotAllowed(
                "this node is not a container".to_string(),
            ));
        }
    }
    Ok(())
}

pub async fn search(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:metadata"]).await?;
    require_container(&resolved)?;
    let page = page_params(&query)?;
    let fields = FieldSelection::parse(&query.all("fields"))?;

    // Caller-supplied filters plus policy-synthesized access filters.
    let mut queries = parse_filter_params(&query.0, &state.queries)
        .map_err(|err| Error::BadRequest(err.to_string()))?;
    let access_filters = listing_filters(&state, &auth, &["read:metadata"]).await?;
    let parent = resolved.parent_path();

    let (resources, count) = match access_filters {
        None => (Vec::new(), 0),
        Some(access_filters) => {
            queries.extend(access_filters);
            let sorting = match query.first("sort") {
                Some(sort) => parse_sort(sort),
                None => resolved
                    .record
                    .as_ref()
                    .map(|record| record.node.attributes.sorting.clone())
                    .unwrap_or_default(),
            };
            let (count, _exact) = state
                .catalog
                .lbound_len(&parent, &queries, EXACT_COUNT_THRESHOLD)
                .await
                .map_err(catalog_err)?;
            if fields.count_only() {
                (Vec::new(), count)
            } else {
                let records = state
                    .catalog
                    .items_range(&parent, page.offset, page.limit, &queries, &sorting)
                    .await
                    .map_err(catalog_err)?;
                let resources = records
                    .iter()
                    .map(|record| node_resource(record, &query, &fields, None))
                    .collect();
                (resources, count)
            }
        }
    };

    let base = if path.is_empty() {
        "/search/".to_string()
    } else {
        format!("/search/{}", path.trim_matches('/'))
    };
    let envelope = Envelope::of(resources)?
        .with_links(PageLinks::compute(&base, page.offset, page.limit, count))
        .with_meta(serde_json::json!({"count": count}));
    respond(&headers, &envelope)
}

fn flag(query: &RawQuery, name: &str) -> bool {
    matches!(query.first(name), Some("true") | Some("1") | Some(""))
}

pub async fn distinct(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:metadata"]).await?;
    require_container(&resolved)?;
    let metadata_keys = query.all("metadata");
    let structure_families = flag(&query, "structure_families");
    let specs = flag(&query, "specs");
    let counts = flag(&query, "counts");
    let parent = resolved.parent_path();

    let access_filters = listing_filters(&state, &auth, &["read:metadata"]).await?;
    let body = match access_filters {
        None => serde_json::json!({}),
        Some(filters) if filters.is_empty() => {
            // Unrestricted caller: the indexed path.
            state
                .catalog
                .distinct(&parent, &metadata_keys, structure_families, specs, counts)
                .await
                .map_err(catalog_err)?
        }
        Some(filters) => {
            // Restricted caller: aggregate over the visible children
            // only.
            let records = state
                .catalog
                .items_range(&parent, 0, EXACT_COUNT_THRESHOLD, &filters, &[])
                .await
                .map_err(catalog_err)?;
            distinct_in_memory(&records, &metadata_keys, structure_families, specs, counts)
        }
    };
    let envelope = Envelope::of(body)?;
    respond(&headers, &envelope)
}

fn distinct_in_memory(
    records: &[trellis_catalog::nodes::NodeRecord],
    metadata_keys: &[String],
    structure_families: bool,
    specs: bool,
    counts: bool,
) -> serde_json::Value {
    fn tally(values: impl Iterator<Item = serde_json::Value>, counts: bool) -> serde_json::Value {
        let mut grouped: BTreeMap<String, (serde_json::Value, u64)> = BTreeMap::new();
        for value in values {
            let key = value.to_string();
            grouped.entry(key).or_insert((value, 0)).1 += 1;
        }
        grouped
            .into_values()
            .map(|(value, n)| {
                if counts {
                    serde_json::json!({"value": value, "count": n})
                } else {
                    serde_json::json!({"value": value})
                }
            })
            .collect()
    }

    let mut out = serde_json::Map::new();
    let mut metadata_out = serde_json::Map::new();
    for key in metadata_keys {
        let values = records.iter().filter_map(|record| {
            let value = crate::routers::project_metadata(&record.node.attributes.metadata, key);
            (!value.is_null()).then_some(value)
        });
        metadata_out.insert(key.clone(), tally(values, counts));
    }
    if !metadata_out.is_empty() {
        out.insert("metadata".to_string(), metadata_out.into());
    }
    if structure_families {
        let values = records
            .iter()
            .map(|record| serde_json::json!(record.node.attributes.structure_family));
        out.insert("structure_families".to_string(), tally(values, counts));
    }
    if specs {
        let values = records
            .iter()
            .flat_map(|record| record.node.attributes.specs.iter())
            .map(|spec| serde_json::json!(spec));
        out.insert("specs".to_string(), tally(values, counts));
    }
    out.into()
}
