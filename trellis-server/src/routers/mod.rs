//! Endpoint handlers.

pub mod assets;
pub mod data;
pub mod metadata;
pub mod observe;
pub mod revisions;
pub mod search;
pub mod stream;

use axum::body::Body;
use axum::response::Response;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, EXPIRES, IF_NONE_MATCH};
use http::{HeaderMap, StatusCode};
use trellis_catalog::nodes::NodeRecord;
use trellis_core::{compute_etag, if_none_match_matches, EntryField, Envelope, Error, FieldSelection, Resource, WireFormat};
use trellis_model::StructureFamily;

use crate::extract::RawQuery;

/// Render an envelope under content negotiation with ETag handling.
/// A matching `If-None-Match` yields `304 Not Modified`.
pub fn respond(
    headers: &HeaderMap,
    envelope: &Envelope,
) -> Result<Response, Error> {
    let accept = headers
        .get(http::header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let format = WireFormat::negotiate(accept);
    let body = format.encode(envelope)?;
    let etag = compute_etag(&body, format.content_type());

    let not_modified = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|header| if_none_match_matches(header, &etag))
        .unwrap_or(false);

    let builder = Response::builder()
        .header(ETAG, &etag)
        .header(CACHE_CONTROL, "private, max-age=0, must-revalidate")
        .header(EXPIRES, "0");
    let response = if not_modified {
        builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, format.content_type())
            .body(Body::from(body))
    };
    response.map_err(|err| Error::Internal(err.to_string()))
}

/// Raw payload response with an ETag.
pub fn respond_bytes(
    headers: &HeaderMap,
    body: bytes::Bytes,
    media_type: &str,
) -> Result<Response, Error> {
    let etag = compute_etag(&body, media_type);
    let not_modified = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|header| if_none_match_matches(header, &etag))
        .unwrap_or(false);
    let builder = Response::builder().header(ETAG, &etag);
    let response = if not_modified {
        builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, media_type.to_string())
            .body(Body::from(body))
    };
    response.map_err(|err| Error::Internal(err.to_string()))
}

/// Dotted-path projection for `select_metadata`.
pub fn project_metadata(metadata: &serde_json::Value, path: &str) -> serde_json::Value {
    let mut current = metadata;
    for part in path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => return serde_json::Value::Null,
        }
    }
    current.clone()
}

/// Family-specific links for a node, mirroring the route layout.
pub fn links_for(family: StructureFamily, path: &str) -> serde_json::Value {
    let path = path.trim_matches('/');
    match family {
        StructureFamily::Container | StructureFamily::Composite => serde_json::json!({
            "self": format!("/metadata/{path}"),
            "search": format!("/search/{path}"),
            "full": format!("/container/full/{path}"),
        }),
        StructureFamily::Array => serde_json::json!({
            "self": format!("/metadata/{path}"),
            "full": format!("/array/full/{path}"),
            "block": format!("/array/block/{path}?block={{index}}"),
        }),
        StructureFamily::Sparse => serde_json::json!({
            "self": format!("/metadata/{path}"),
            "full": format!("/sparse/full/{path}"),
            "block": format!("/sparse/block/{path}?block={{index}}"),
        }),
        StructureFamily::Table => serde_json::json!({
            "self": format!("/metadata/{path}"),
            "full": format!("/table/full/{path}"),
            "partition": format!("/table/partition/{path}?partition={{index}}"),
        }),
        StructureFamily::Awkward => serde_json::json!({
            "self": format!("/metadata/{path}"),
            "full": format!("/awkward/full/{path}"),
            "buffers": format!("/awkward/buffers/{path}"),
        }),
    }
}

/// Assemble the JSON API resource for a node under field selection.
pub fn node_resource(
    record: &NodeRecord,
    query: &RawQuery,
    fields: &FieldSelection,
    count: Option<u64>,
) -> Resource {
    let node = &record.node;
    let mut attributes = serde_json::Map::new();
    if fields.includes(EntryField::StructureFamily) {
        attributes.insert(
            "structure_family".to_string(),
            serde_json::json!(node.attributes.structure_family),
        );
    }
    if fields.includes(EntryField::Metadata) {
        let metadata = match query.first("select_metadata") {
            Some(path) => project_metadata(&node.attributes.metadata, path),
            None => node.attributes.metadata.clone(),
        };
        attributes.insert("metadata".to_string(), metadata);
    }
    if fields.includes(EntryField::Structure) {
        attributes.insert(
            "structure".to_string(),
            serde_json::json!(node.attributes.structure),
        );
    }
    if fields.includes(EntryField::Specs) {
        attributes.insert("specs".to_string(), serde_json::json!(node.attributes.specs));
    }
    if fields.includes(EntryField::Sorting) {
        attributes.insert(
            "sorting".to_string(),
            serde_json::json!(node.attributes.sorting),
        );
    }
    if fields.includes(EntryField::AccessBlob) {
        attributes.insert(
            "access_blob".to_string(),
            serde_json::json!(node.attributes.access_blob),
        );
    }
    if fields.includes(EntryField::DataSources)
        && query.first("include_data_sources").is_some()
    {
        attributes.insert(
            "data_sources".to_string(),
            serde_json::json!(node.attributes.data_sources),
        );
    }
    if let Some(count) = count {
        if fields.includes(EntryField::Count) {
            attributes.insert("count".to_string(), serde_json::json!(count));
        }
    }
    attributes.insert(
        "time_created".to_string(),
        serde_json::json!(node.attributes.time_created),
    );
    attributes.insert(
        "time_updated".to_string(),
        serde_json::json!(node.attributes.time_updated),
    );

    let omit_links = query.first("omit_links").is_some();
    Resource {
        id: node.key.clone(),
        attributes: attributes.into(),
        links: if omit_links {
            None
        } else {
            Some(links_for(node.attributes.structure_family, &node.path()))
        },
        meta: None,
    }
}
