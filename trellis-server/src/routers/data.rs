//! Data routes: container, array, table, sparse, and awkward payloads.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use http::HeaderMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use trellis_adapters::payload::{Column, Payload, SparsePayload, TablePayload};
use trellis_adapters::{AnyAdapter, ArrayPayload};
use trellis_catalog::adapter_for_node;
use trellis_catalog::nodes::NodeRecord;
use trellis_core::{Error, DEPTH_LIMIT};
use trellis_model::{NdSlice, Structure, StructureFamily, TableStructure};
use trellis_security::scopes;
use trellis_stream::publish;

use crate::extract::{catalog_err, Auth, RawQuery};
use crate::resolve::{listing_filters, secure_lookup, ResolvedNode};
use crate::routers::metadata::{path_str, OptionalPath};
use crate::routers::respond_bytes;
use crate::AppState;

/// Resolve a path to a data-bearing node and its adapter.
async fn data_node(
    state: &AppState,
    auth: &Auth,
    path: &str,
    required: &[&str],
) -> Result<(ResolvedNode, NodeRecord, AnyAdapter), Error> {
    let resolved = secure_lookup(state, auth, path, required).await?;
    let record = resolved
        .record
        .clone()
        .ok_or_else(|| Error::MethodNotAllowed("the root is a container".to_string()))?;
    let adapter = adapter_for_node(&record).map_err(catalog_err)?;
    Ok((resolved, record, adapter))
}

/// The response size guard: reject payloads whose size (or upper bound)
/// exceeds the configured limit.
fn guard_size(state: &AppState, byte_size: u64) -> Result<(), Error> {
    let limit = state.settings.response_bytesize_limit;
    if byte_size > limit {
        return Err(Error::BadRequest(format!(
            "response would be {byte_size} bytes, exceeding the limit of {limit}; \
             request a narrower slice, fewer columns, or individual partitions"
        )));
    }
    Ok(())
}

/// Negotiate a media type and encode the payload.
fn encode_payload(
    state: &AppState,
    query: &RawQuery,
    headers: &HeaderMap,
    family: StructureFamily,
    specs: &[trellis_model::Spec],
    payload: &Payload,
) -> Result<Response, Error> {
    guard_size(state, payload.byte_size())?;
    let accept = headers
        .get(http::header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let (media_type, encoder) =
        state
            .serialization
            .negotiate(query.first("format"), accept, family, specs)?;
    let body = encoder(payload).map_err(Error::from)?;
    guard_size(state, body.len() as u64)?;
    respond_bytes(headers, body, &media_type)
}

// ── Containers ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ContainerFullBody {
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

pub async fn container_full(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let body = ContainerFullBody {
        fields: {
            let fields = query.all("field");
            (!fields.is_empty()).then_some(fields)
        },
        max_depth: query
            .first("max_depth")
            .map(|depth| {
                depth
                    .parse()
                    .map_err(|_| Error::BadRequest("malformed max_depth".to_string()))
            })
            .transpose()?,
    };
    container_full_inner(state, auth, path, query, headers, body).await
}

/// POST variant carrying the field selection in the body, for wide
/// selections that do not fit a query string.
pub async fn container_full_post(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
    Json(body): Json<ContainerFullBody>,
) -> Result<Response, Error> {
    container_full_inner(state, auth, path, query, headers, body).await
}

async fn container_full_inner(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
    body: ContainerFullBody,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:data"]).await?;
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
    let max_depth = body.max_depth.unwrap_or(DEPTH_LIMIT).min(DEPTH_LIMIT);
    let payload = read_container(
        &state,
        &auth,
        resolved.parent_path(),
        body.fields.as_deref(),
        max_depth,
    )
    .await?;
    guard_size(&state, payload.byte_size())?;
    let family = resolved
        .record
        .as_ref()
        .map(|record| record.node.attributes.structure_family)
        .unwrap_or(StructureFamily::Container);
    encode_payload(&state, &query, &headers, family, &[], &payload)
}

/// Recursive container read over the catalog, respecting access
/// filters and the depth limit.
fn read_container<'a>(
    state: &'a AppState,
    auth: &'a Auth,
    parent: String,
    fields: Option<&'a [String]>,
    max_depth: usize,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Payload, Error>> + Send + 'a>,
> {
    Box::pin(async move {
        let Some(filters) = listing_filters(state, auth, &["read:data"]).await? else {
            return Ok(Payload::Container(Vec::new()));
        };
        let records = state
            .catalog
            .items_range(&parent, 0, u64::MAX / 2, &filters, &[])
            .await
            .map_err(catalog_err)?;
        let mut entries = Vec::new();
        for record in records {
            let key = record.node.key.clone();
            if let Some(selection) = fields {
                if !selection.is_empty() && !selection.iter().any(|field| field == &key) {
                    continue;
                }
            }
            let value = match record.node.attributes.structure_family {
                StructureFamily::Container | StructureFamily::Composite => {
                    if max_depth == 0 {
                        return Err(Error::BadRequest(
                            "container recursion exceeds the depth limit; \
                             read sub-containers individually"
                                .to_string(),
                        ));
                    }
                    let child_parent = {
                        let mut segments = record.node.ancestors.clone();
                        segments.push(key.clone());
                        segments.join("/")
                    };
                    read_container(state, auth, child_parent, None, max_depth - 1).await?
                }
                family => {
                    let adapter = adapter_for_node(&record).map_err(catalog_err)?;
                    read_leaf(&adapter, family).await?
                }
            };
            entries.push((key, value));
        }
        Ok(Payload::Container(entries))
    })
}

async fn read_leaf(adapter: &AnyAdapter, family: StructureFamily) -> Result<Payload, Error> {
    Ok(match family {
        StructureFamily::Array => {
            Payload::Array(adapter.as_array_read()?.read(&NdSlice::all()).await?)
        }
        StructureFamily::Sparse => {
            Payload::Sparse(adapter.as_sparse_read()?.read(&NdSlice::all()).await?)
        }
        StructureFamily::Table => Payload::Table(adapter.as_table_read()?.read(None).await?),
        StructureFamily::Awkward => Payload::Awkward(adapter.as_awkward()?.read_buffers(&[]).await?),
        StructureFamily::Container | StructureFamily::Composite => {
            return Err(Error::Internal("containers handled by caller".to_string()))
        }
    })
}

// ── Arrays ───────────────────────────────────────────────────────────────

pub async fn array_full(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let slice = query.slice()?;

    // Guard on the projected size before materializing.
    if let Some(Structure::Array(structure)) = &record.node.attributes.structure {
        let shape = slice
            .output_shape(&structure.shape)
            .map_err(|err| Error::BadRequest(err.to_string()))?;
        let projected: u64 =
            shape.iter().product::<u64>() * u64::from(structure.data_type.item_size);
        guard_size(&state, projected)?;
    }
    let payload = adapter.as_array_read()?.read(&slice).await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Array,
        &record.node.attributes.specs,
        &Payload::Array(payload),
    )
}

pub async fn array_block(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let block = query.block()?;
    let slice = query.slice()?;
    let slice = if slice.is_all() { None } else { Some(slice) };
    let payload = adapter
        .as_array_read()?
        .read_block(&block, slice.as_ref())
        .await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Array,
        &record.node.attributes.specs,
        &Payload::Array(payload),
    )
}

fn array_structure(record: &NodeRecord) -> Result<&trellis_model::ArrayStructure, Error> {
    match &record.node.attributes.structure {
        Some(Structure::Array(structure)) => Ok(structure),
        _ => Err(Error::MethodNotAllowed(
            "this node is not an array".to_string(),
        )),
    }
}

pub async fn array_full_put(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (resolved, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let structure = array_structure(&record)?;
    let payload = ArrayPayload::new(
        structure.data_type.clone(),
        structure.shape.clone(),
        body.clone(),
    );
    adapter.as_array_write()?.write(payload).await?;

    let _ = publish(
        state.stream.as_ref(),
        &resolved.stream_topic(),
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "array",
            "shape": structure.shape,
        }),
        Some(body),
    )
    .await;
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

pub async fn array_block_put(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (resolved, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let structure = array_structure(&record)?;
    let block = query.block()?;
    let shape = structure
        .block_shape(&block)
        .map_err(|err| Error::BadRequest(err.to_string()))?;
    let origin = structure
        .block_origin(&block)
        .map_err(|err| Error::BadRequest(err.to_string()))?;
    let payload = ArrayPayload::new(structure.data_type.clone(), shape.clone(), body.clone());
    adapter.as_array_write()?.write_block(&block, payload).await?;

    let _ = publish(
        state.stream.as_ref(),
        &resolved.stream_topic(),
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "array",
            "shape": structure.shape,
            "patch": {"offset": origin, "shape": shape},
        }),
        Some(body),
    )
    .await;
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

// ── Tables ───────────────────────────────────────────────────────────────

fn table_structure(record: &NodeRecord) -> Result<&TableStructure, Error> {
    match &record.node.attributes.structure {
        Some(Structure::Table(structure)) => Ok(structure),
        _ => Err(Error::MethodNotAllowed(
            "this node is not a table".to_string(),
        )),
    }
}

fn columns_param(query: &RawQuery) -> Option<Vec<String>> {
    let columns = query.all("column");
    (!columns.is_empty()).then_some(columns)
}

fn partition_param(query: &RawQuery) -> Result<usize, Error> {
    query
        .first("partition")
        .ok_or_else(|| Error::BadRequest("missing required parameter: partition".to_string()))?
        .parse()
        .map_err(|_| Error::BadRequest("malformed partition index".to_string()))
}

/// Decode `{"columns": {name: [values]}}` against the table schema.
fn parse_table_body(
    body: &serde_json::Value,
    structure: &TableStructure,
) -> Result<TablePayload, Error> {
    let columns_in = body
        .get("columns")
        .and_then(|value| value.as_object())
        .ok_or_else(|| {
            Error::BadRequest("table payload must be {\"columns\": {name: [values]}}".to_string())
        })?;
    let mut columns = Vec::with_capacity(structure.columns.len());
    for schema_column in &structure.columns {
        let values = columns_in
            .get(&schema_column.name)
            .and_then(|value| value.as_array())
            .ok_or_else(|| {
                Error::BadRequest(format!("missing column: {}", schema_column.name))
            })?;
        let column = match schema_column.data_type {
            trellis_model::ColumnType::Bool => Column::Bool(
                values
                    .iter()
                    .map(|v| v.as_bool().ok_or(&schema_column.name))
                    .collect::<Result<_, _>>()
                    .map_err(|name| Error::BadRequest(format!("column {name}: expected bools")))?,
            ),
            trellis_model::ColumnType::Int64 => Column::Int64(
                values
                    .iter()
                    .map(|v| v.as_i64().ok_or(&schema_column.name))
                    .collect::<Result<_, _>>()
                    .map_err(|name| Error::BadRequest(format!("column {name}: expected ints")))?,
            ),
            trellis_model::ColumnType::Float64 => Column::Float64(
                values
                    .iter()
                    .map(|v| v.as_f64().ok_or(&schema_column.name))
                    .collect::<Result<_, _>>()
                    .map_err(|name| Error::BadRequest(format!("column {name}: expected floats")))?,
            ),
            trellis_model::ColumnType::Utf8 => Column::Utf8(
                values
                    .iter()
                    .map(|v| v.as_str().map(String::from).ok_or(&schema_column.name))
                    .collect::<Result<_, _>>()
                    .map_err(|name| Error::BadRequest(format!("column {name}: expected strings")))?,
            ),
        };
        columns.push((schema_column.name.clone(), column));
    }
    let payload = TablePayload { columns };
    payload.validate()?;
    Ok(payload)
}

/// After table writes the structure row counts change; refresh the
/// content-addressed structure row.
async fn refresh_table_structure(
    state: &AppState,
    record: &NodeRecord,
    adapter: &AnyAdapter,
) -> Result<(), Error> {
    let mut structure = table_structure(record)?.clone();
    let mut counts = Vec::with_capacity(structure.npartitions);
    for index in 0..structure.npartitions {
        let partition = adapter.as_table_read()?.read_partition(index, None).await?;
        counts.push(partition.row_count() as u64);
    }
    structure.row_count = Some(counts.iter().sum());
    structure.partition_row_counts = Some(counts);
    if let Some(data_source_id) = record
        .node
        .attributes
        .data_sources
        .as_ref()
        .and_then(|sources| sources.first())
        .and_then(|source| source.id)
    {
        state
            .catalog
            .update_data_source_structure(data_source_id, &Structure::Table(structure))
            .await
            .map_err(catalog_err)?;
    }
    Ok(())
}

pub async fn table_full(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let columns = columns_param(&query);
    let payload = adapter.as_table_read()?.read(columns.as_deref()).await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Table,
        &record.node.attributes.specs,
        &Payload::Table(payload),
    )
}

pub async fn table_partition(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let partition = partition_param(&query)?;
    let columns = columns_param(&query);
    let payload = adapter
        .as_table_read()?
        .read_partition(partition, columns.as_deref())
        .await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Table,
        &record.node.attributes.specs,
        &Payload::Table(payload),
    )
}

pub async fn table_full_put(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (resolved, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let payload = parse_table_body(&body, table_structure(&record)?)?;
    adapter.as_table_write()?.write(payload).await?;
    refresh_table_structure(&state, &record, &adapter).await?;
    let _ = publish(
        state.stream.as_ref(),
        &resolved.stream_topic(),
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "table",
        }),
        None,
    )
    .await;
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

pub async fn table_partition_put(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    body: Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, Error> {
    table_partition_write(state, auth, path, query, body, false).await
}

/// PATCH appends rows to a partition.
pub async fn table_partition_append(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    body: Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, Error> {
    table_partition_write(state, auth, path, query, body, true).await
}

async fn table_partition_write(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    Json(body): Json<serde_json::Value>,
    append: bool,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (resolved, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let partition = partition_param(&query)?;
    let payload = parse_table_body(&body, table_structure(&record)?)?;
    let writer = adapter.as_table_write()?;
    if append {
        writer.append_partition(partition, payload).await?;
    } else {
        writer.write_partition(partition, payload).await?;
    }
    refresh_table_structure(&state, &record, &adapter).await?;
    let _ = publish(
        state.stream.as_ref(),
        &resolved.stream_topic(),
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "table",
            "partition": partition,
        }),
        None,
    )
    .await;
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

// ── Awkward ──────────────────────────────────────────────────────────────

pub async fn awkward_buffers(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let form_keys = query.all("form_key");
    let buffers = adapter.as_awkward()?.read_buffers(&form_keys).await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Awkward,
        &record.node.attributes.specs,
        &Payload::Awkward(buffers),
    )
}

pub async fn awkward_full(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    awkward_buffers(state, auth, path, query, headers).await
}

#[derive(Deserialize)]
pub struct AwkwardBody {
    pub form: serde_json::Value,
    pub length: u64,
    /// Buffer name -> base64-encoded bytes.
    pub buffers: BTreeMap<String, String>,
}

pub async fn awkward_put(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    Json(body): Json<AwkwardBody>,
) -> Result<Json<serde_json::Value>, Error> {
    use base64::Engine;
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let engine = base64::engine::general_purpose::STANDARD;
    let mut buffers = BTreeMap::new();
    for (name, encoded) in &body.buffers {
        let bytes = engine
            .decode(encoded)
            .map_err(|err| Error::BadRequest(format!("buffer {name}: {err}")))?;
        buffers.insert(name.clone(), Bytes::from(bytes));
    }
    let structure = trellis_model::AwkwardStructure {
        form: body.form.clone(),
        length: body.length,
        buffer_sizes: buffers
            .iter()
            .map(|(name, bytes)| (name.clone(), bytes.len() as u64))
            .collect(),
    };
    adapter
        .as_awkward_write()?
        .write(body.form, body.length, buffers)
        .await?;
    if let Some(data_source_id) = record
        .node
        .attributes
        .data_sources
        .as_ref()
        .and_then(|sources| sources.first())
        .and_then(|source| source.id)
    {
        state
            .catalog
            .update_data_source_structure(data_source_id, &Structure::Awkward(structure))
            .await
            .map_err(catalog_err)?;
    }
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

// ── Sparse ───────────────────────────────────────────────────────────────

pub async fn sparse_full(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let slice = query.slice()?;
    let payload = adapter.as_sparse_read()?.read(&slice).await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Sparse,
        &record.node.attributes.specs,
        &Payload::Sparse(payload),
    )
}

pub async fn sparse_block(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["read:data"]).await?;
    let block = query.block()?;
    let slice = query.slice()?;
    let slice = if slice.is_all() { None } else { Some(slice) };
    let payload = adapter
        .as_sparse_read()?
        .read_block(&block, slice.as_ref())
        .await?;
    encode_payload(
        &state,
        &query,
        &headers,
        StructureFamily::Sparse,
        &record.node.attributes.specs,
        &Payload::Sparse(payload),
    )
}

#[derive(Deserialize)]
pub struct SparseBody {
    pub coords: Vec<Vec<u64>>,
    pub data: Vec<f64>,
}

pub async fn sparse_block_put(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    Json(body): Json<SparseBody>,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let (_, record, adapter) = data_node(&state, &auth, &path, &["write:data"]).await?;
    let block = query.block()?;
    let payload = SparsePayload {
        coords: body.coords,
        data: ArrayPayload::from_f64(vec![body.data.len() as u64], &body.data),
    };
    adapter
        .as_sparse_write()?
        .write_block(&block, payload)
        .await?;
    Ok(Json(serde_json::json!({"written": record.node.key})))
}

// ── Deprecated combined alias ────────────────────────────────────────────

/// `/node/full`: dispatches on the node's structure family. Kept for
/// older clients; new clients use the per-family routes.
pub async fn node_full(
    state: State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA])?;
    let raw_path = path_str(&path);
    let resolved = secure_lookup(&state.0, &auth, &raw_path, &["read:data"]).await?;
    match resolved
        .record
        .as_ref()
        .map(|record| record.node.attributes.structure_family)
    {
        None | Some(StructureFamily::Container) | Some(StructureFamily::Composite) => {
            container_full(state, auth, path, query, headers).await
        }
        Some(StructureFamily::Array) => array_full(state, auth, path, query, headers).await,
        Some(StructureFamily::Sparse) => sparse_full(state, auth, path, query, headers).await,
        Some(StructureFamily::Table) => table_full(state, auth, path, query, headers).await,
        Some(StructureFamily::Awkward) => awkward_full(state, auth, path, query, headers).await,
    }
}
