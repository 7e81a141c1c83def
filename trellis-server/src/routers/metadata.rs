//! `/metadata` and `/register`: node attributes and lifecycle.

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use http::HeaderMap;
use serde::Deserialize;
use trellis_core::{Envelope, Error, FieldSelection, Resource};
use trellis_model::{
    AccessBlob, DataSource, Management, NodeAttributes, SortingItem, Spec, Structure,
    StructureFamily,
};
use trellis_security::scopes;
use trellis_stream::{child_created, child_metadata_updated, publish};
use uuid::Uuid;

use crate::extract::{catalog_err, policy_err, Auth, RawQuery};
use crate::resolve::secure_lookup;
use crate::routers::{links_for, node_resource, respond};
use crate::AppState;

/// Trailing `{*path}` routes also serve the bare prefix; both map onto
/// an optional path parameter.
pub type OptionalPath = Option<axum::extract::Path<String>>;

pub fn path_str(path: &OptionalPath) -> String {
    path.as_ref().map(|p| p.0.clone()).unwrap_or_default()
}

pub async fn get_metadata(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:metadata"]).await?;
    let fields = FieldSelection::parse(&query.all("fields"))?;

    let want_inline = query.first("inline").is_some();
    let envelope = match &resolved.record {
        Some(record) => {
            let count = match record.node.attributes.structure_family {
                StructureFamily::Container | StructureFamily::Composite => Some(
                    state
                        .catalog
                        .count(&resolved.parent_path(), &[])
                        .await
                        .map_err(catalog_err)?,
                ),
                _ => None,
            };
            let mut resource = node_resource(record, &query, &fields, count);
            if want_inline
                && matches!(
                    record.node.attributes.structure_family,
                    StructureFamily::Container | StructureFamily::Composite
                )
            {
                if let Some(contents) = inline_contents(
                    &state,
                    &auth,
                    &query,
                    &fields,
                    resolved.parent_path(),
                    trellis_core::DEPTH_LIMIT,
                )
                .await?
                {
                    resource.attributes["contents"] = contents;
                }
            }
            Envelope::of(resource)?
        }
        None => {
            // The virtual root container.
            let count = state
                .catalog
                .count("", &[])
                .await
                .map_err(catalog_err)?;
            Envelope::of(Resource {
                id: String::new(),
                attributes: serde_json::json!({
                    "structure_family": StructureFamily::Container,
                    "metadata": {},
                    "specs": [],
                    "sorting": [SortingItem::insertion_order()],
                    "count": count,
                }),
                links: Some(links_for(StructureFamily::Container, "")),
                meta: None,
            })?
        }
    };
    respond(&headers, &envelope)
}

/// Inline a container's children into its metadata response, saving
/// round-trips for small, wide containers. Falls back to `None` (plain
/// pagination) past the child-count or recursion-depth cap.
fn inline_contents<'a>(
    state: &'a AppState,
    auth: &'a Auth,
    query: &'a RawQuery,
    fields: &'a FieldSelection,
    parent: String,
    depth_left: usize,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Option<serde_json::Value>, Error>> + Send + 'a>,
> {
    Box::pin(async move {
        if depth_left == 0 {
            return Ok(None);
        }
        let Some(filters) = crate::resolve::listing_filters(state, auth, &["read:metadata"])
            .await?
        else {
            return Ok(Some(serde_json::json!({})));
        };
        let (count, exact) = state
            .catalog
            .lbound_len(&parent, &filters, trellis_core::INLINED_CONTENTS_LIMIT)
            .await
            .map_err(catalog_err)?;
        if !exact || count > trellis_core::INLINED_CONTENTS_LIMIT {
            return Ok(None);
        }
        let records = state
            .catalog
            .items_range(&parent, 0, count, &filters, &[])
            .await
            .map_err(catalog_err)?;
        let mut contents = serde_json::Map::new();
        for record in records {
            let mut resource = node_resource(&record, query, fields, None);
            if matches!(
                record.node.attributes.structure_family,
                StructureFamily::Container | StructureFamily::Composite
            ) {
                let child_parent = {
                    let mut segments = record.node.ancestors.clone();
                    segments.push(record.node.key.clone());
                    segments.join("/")
                };
                if let Some(nested) =
                    inline_contents(state, auth, query, fields, child_parent, depth_left - 1)
                        .await?
                {
                    resource.attributes["contents"] = nested;
                }
            }
            contents.insert(
                record.node.key.clone(),
                serde_json::to_value(resource).map_err(|err| Error::Internal(err.to_string()))?,
            );
        }
        Ok(Some(contents.into()))
    })
}

/// Composite members may not be containers, and every child key plus
/// every column of every member table must stay unique in one flat
/// namespace.
async fn check_composite_member(
    state: &AppState,
    parent: &crate::resolve::ResolvedNode,
    body: &CreateNodeBody,
) -> Result<(), Error> {
    if matches!(
        body.structure_family,
        StructureFamily::Container | StructureFamily::Composite
    ) {
        return Err(Error::Unprocessable(
            "composite nodes cannot contain nested containers".to_string(),
        ));
    }
    let siblings = state
        .catalog
        .items_range(&parent.parent_path(), 0, u64::MAX / 2, &[], &[])
        .await
        .map_err(catalog_err)?;
    let mut keys: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    for sibling in &siblings {
        keys.push(sibling.node.key.clone());
        if let Some(Structure::Table(table)) = &sibling.node.attributes.structure {
            columns.extend(table.column_names().iter().map(|c| c.to_string()));
        }
    }
    keys.push(
        body.id
            .clone()
            .unwrap_or_default(),
    );
    if let Some(Structure::Table(table)) = &body.structure {
        columns.extend(table.column_names().iter().map(|c| c.to_string()));
    }
    trellis_model::container::composite_flat_keys(
        keys.iter().map(String::as_str).filter(|k| !k.is_empty()),
        columns.iter().map(String::as_str),
    )
    .map_err(Error::Unprocessable)?;
    Ok(())
}

// ── Create ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateNodeBody {
    /// Key for the new node; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub structure_family: StructureFamily,
    #[serde(default)]
    pub structure: Option<Structure>,
    #[serde(default)]
    pub specs: Vec<Spec>,
    #[serde(default)]
    pub data_sources: Option<Vec<DataSource>>,
    #[serde(default)]
    pub access_blob: Option<AccessBlob>,
}

pub async fn create_node(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    body: Json<CreateNodeBody>,
) -> Result<Json<Envelope>, Error> {
    create_node_inner(state, auth, path, query, body, false).await
}

/// `/register` creates nodes whose data sources reference
/// externally-managed assets.
pub async fn register_node(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    body: Json<CreateNodeBody>,
) -> Result<Json<Envelope>, Error> {
    create_node_inner(state, auth, path, query, body, true).await
}

async fn create_node_inner(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    Json(body): Json<CreateNodeBody>,
    register: bool,
) -> Result<Json<Envelope>, Error> {
    let required: &[&str] = if register {
        &["register"]
    } else {
        &["create:node"]
    };
    auth.require_scopes(required)?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, required).await?;
    if let Some(record) = &resolved.record {
        if !matches!(
            record.node.attributes.structure_family,
            StructureFamily::Container | StructureFamily::Composite
        ) {
            return Err(Error::BadRequest(
                "nodes can only be created inside containers".to_string(),
            ));
        }
        if record.node.attributes.structure_family == StructureFamily::Composite {
            check_composite_member(&state, &resolved, &body).await?;
        }
    }

    // Spec sanity: no duplicates.
    let mut seen = std::collections::HashSet::new();
    for spec in &body.specs {
        if !seen.insert(&spec.name) {
            return Err(Error::Unprocessable(format!(
                "specs must be unique; {:?} repeats",
                spec.name
            )));
        }
    }
    if body.specs.len() > 20 {
        return Err(Error::Unprocessable(
            "at most 20 specs are allowed per node".to_string(),
        ));
    }

    if register {
        let has_external = body
            .data_sources
            .as_ref()
            .map(|sources| {
                !sources.is_empty()
                    && sources
                        .iter()
                        .all(|source| source.management == Management::External)
            })
            .unwrap_or(false);
        if !has_external {
            return Err(Error::BadRequest(
                "registration requires externally-managed data sources".to_string(),
            ));
        }
    }

    // Validators may normalize the metadata.
    let (metadata, validators_modified) = state
        .validation
        .run(
            &body.metadata,
            body.structure_family,
            body.structure.as_ref(),
            &body.specs,
        )
        .map_err(|err| Error::BadRequest(err.to_string()))?;

    // The policy may normalize the access blob.
    let principal = auth
        .principal
        .as_ref()
        .ok_or_else(|| Error::Unauthorized("creating nodes requires authentication".to_string()))?;
    let (blob_modified, access_blob) = state
        .policy
        .init_node(
            principal,
            auth.authn_access_tags.as_deref(),
            &auth.authn_scopes,
            body.access_blob.as_ref(),
        )
        .await
        .map_err(policy_err)?;

    let key = match &body.id {
        Some(key) => key.clone(),
        None => Uuid::new_v4().simple().to_string(),
    };
    let attributes = NodeAttributes {
        structure_family: body.structure_family,
        specs: body.specs.clone(),
        metadata,
        structure: body.structure.clone(),
        sorting: vec![SortingItem::insertion_order()],
        data_sources: body.data_sources.clone(),
        access_blob,
        time_created: None,
        time_updated: None,
    };
    let ancestors = resolved.segments.clone();
    let record = state
        .catalog
        .create_node(&ancestors, &key, attributes, auth.principal_uuid().as_deref())
        .await
        .map_err(catalog_err)?;

    // Parent-container event stream.
    let _ = publish(
        state.stream.as_ref(),
        &resolved.stream_topic(),
        child_created(&key),
        None,
    )
    .await;

    let modified = validators_modified || blob_modified;
    let fields = FieldSelection::All;
    let envelope = Envelope::of(node_resource(&record, &query, &fields, None))?
        .with_meta(serde_json::json!({"modified": modified}));
    Ok(Json(envelope))
}

// ── Update ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PatchBody {
    /// A metadata patch document (merge patch by default; RFC 6902 when
    /// the `Content-Type` is `application/json-patch+json`).
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub specs: Option<Vec<Spec>>,
    #[serde(default)]
    pub access_blob: Option<AccessBlob>,
}

pub async fn patch_metadata(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    headers: HeaderMap,
    body: Json<PatchBody>,
) -> Result<Json<Envelope>, Error> {
    let json_patch = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json-patch+json"))
        .unwrap_or(false);
    update_metadata_inner(state, auth, path, body, UpdateMode::Patch { json_patch }).await
}

pub async fn replace_metadata(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    _headers: HeaderMap,
    body: Json<PatchBody>,
) -> Result<Json<Envelope>, Error> {
    update_metadata_inner(state, auth, path, body, UpdateMode::Replace).await
}

enum UpdateMode {
    Patch { json_patch: bool },
    Replace,
}

async fn update_metadata_inner(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    Json(body): Json<PatchBody>,
    mode: UpdateMode,
) -> Result<Json<Envelope>, Error> {
    auth.require_scopes(&[scopes::WRITE_METADATA])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["write:metadata"]).await?;
    let record = resolved
        .record
        .as_ref()
        .ok_or_else(|| Error::BadRequest("the root node cannot be edited".to_string()))?;
    let current = &record.node.attributes;

    // Metadata: patch or replace.
    let mut metadata = current.metadata.clone();
    match (&mode, &body.metadata) {
        (_, None) => {}
        (UpdateMode::Replace, Some(replacement)) => metadata = replacement.clone(),
        (UpdateMode::Patch { json_patch: true }, Some(patch)) => {
            trellis_core::patch::apply_json_patch(&mut metadata, patch)?;
        }
        (UpdateMode::Patch { json_patch: false }, Some(patch)) => {
            trellis_core::patch::apply_merge_patch(&mut metadata, patch);
        }
    }
    let specs = body.specs.clone().unwrap_or_else(|| current.specs.clone());

    // Access blob changes go through the policy.
    let mut blob_modified = false;
    let access_blob = match &body.access_blob {
        None => current.access_blob.clone(),
        Some(proposed) => {
            let principal = auth.principal.as_ref().ok_or_else(|| {
                Error::Unauthorized("changing access requires authentication".to_string())
            })?;
            let (modified, blob) = state
                .policy
                .modify_node(
                    current.access_blob.as_ref(),
                    principal,
                    auth.authn_access_tags.as_deref(),
                    &auth.authn_scopes,
                    proposed,
                )
                .await
                .map_err(policy_err)?;
            blob_modified = modified;
            Some(blob)
        }
    };

    // Re-run validators on the new metadata.
    let (metadata, validators_modified) = state
        .validation
        .run(
            &metadata,
            current.structure_family,
            current.structure.as_ref(),
            &specs,
        )
        .map_err(|err| Error::BadRequest(err.to_string()))?;

    let revision = state
        .catalog
        .update_metadata(
            record.id,
            &metadata,
            &specs,
            access_blob.as_ref(),
            auth.principal_uuid().as_deref(),
        )
        .await
        .map_err(catalog_err)?;

    // Notify subscribers of the parent container.
    let parent_topic = match record.node.ancestors.len() {
        0 => "root".to_string(),
        _ => {
            let parent_segments: Vec<&str> = record
                .node
                .ancestors
                .iter()
                .map(String::as_str)
                .collect();
            match state
                .catalog
                .lookup_node(&parent_segments)
                .await
                .map_err(catalog_err)?
            {
                Some(parent) => parent.id.to_string(),
                None => "root".to_string(),
            }
        }
    };
    let _ = publish(
        state.stream.as_ref(),
        &parent_topic,
        child_metadata_updated(&record.node.key),
        None,
    )
    .await;

    Ok(Json(
        Envelope::of(serde_json::json!({
            "id": record.node.key,
            "metadata": metadata,
            "specs": specs,
            "access_blob": access_blob,
        }))?
        .with_meta(serde_json::json!({
            "modified": validators_modified || blob_modified,
            "revision": revision,
        })),
    ))
}

pub async fn delete_node(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::DELETE_NODE])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["delete:node"]).await?;
    let record = resolved
        .record
        .as_ref()
        .ok_or_else(|| Error::BadRequest("the root node cannot be deleted".to_string()))?;
    state
        .catalog
        .delete_node(record)
        .await
        .map_err(catalog_err)?;
    Ok(Json(serde_json::json!({"deleted": record.node.key})))
}
