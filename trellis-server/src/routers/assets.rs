//! `/asset/bytes` and `/asset/manifest`: raw asset access.
//!
//! Guarded by `register` in addition to `read:data`, since raw assets
//! can reveal more than the node's published structure.

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use http::header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::{HeaderMap, StatusCode};
use trellis_catalog::assets::{asset_manifest as manifest, read_asset_bytes, ByteRange};
use trellis_core::{Envelope, Error};
use trellis_model::Asset;
use trellis_security::scopes;

use crate::extract::{Auth, RawQuery};
use crate::resolve::secure_lookup;
use crate::routers::metadata::{path_str, OptionalPath};
use crate::AppState;

async fn resolve_asset(
    state: &AppState,
    auth: &Auth,
    path: &str,
    query: &RawQuery,
) -> Result<Asset, Error> {
    let resolved = secure_lookup(state, auth, path, &["read:data"]).await?;
    let record = resolved
        .record
        .ok_or_else(|| Error::BadRequest("the root node has no assets".to_string()))?;
    let asset_id: i64 = query
        .first("id")
        .ok_or_else(|| Error::BadRequest("missing required parameter: id".to_string()))?
        .parse()
        .map_err(|_| Error::BadRequest("malformed asset id".to_string()))?;
    record
        .node
        .attributes
        .data_sources
        .iter()
        .flatten()
        .flat_map(|source| source.assets.iter())
        .find(|asset| asset.id == Some(asset_id))
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("no asset {asset_id} on this node")))
}

/// `Range: bytes=a-b` (inclusive), per RFC 7233.
fn parse_range(headers: &HeaderMap) -> Result<Option<ByteRange>, Error> {
    let Some(header) = headers.get(RANGE).and_then(|value| value.to_str().ok()) else {
        return Ok(None);
    };
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| Error::RangeNotSatisfiable("only byte ranges are supported".to_string()))?;
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| Error::RangeNotSatisfiable(format!("malformed range: {header}")))?;
    let start: u64 = start
        .parse()
        .map_err(|_| Error::RangeNotSatisfiable(format!("malformed range: {header}")))?;
    let end: u64 = end
        .parse()
        .map_err(|_| Error::RangeNotSatisfiable(format!("malformed range: {header}")))?;
    Ok(Some(ByteRange {
        start,
        end: end + 1,
    }))
}

pub async fn asset_bytes(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    auth.require_scopes(&[scopes::READ_DATA, scopes::REGISTER])?;
    let path = path_str(&path);
    let asset = resolve_asset(&state, &auth, &path, &query).await?;
    if asset.is_directory {
        return Err(Error::BadRequest(
            "asset is a directory; request its manifest and fetch files individually"
                .to_string(),
        ));
    }
    let range = parse_range(&headers)?;
    let result = read_asset_bytes(&asset, range).await.map_err(|err| {
        match err {
            trellis_catalog::CatalogError::BadRequest(msg) if range.is_some() => {
                Error::RangeNotSatisfiable(msg)
            }
            other => crate::extract::catalog_err(other),
        }
    })?;

    let mut builder = Response::builder()
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(ACCEPT_RANGES, "bytes");
    let status = match result.range {
        Some(range) => {
            builder = builder.header(
                CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end - 1, result.total_size),
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };
    builder
        .status(status)
        .body(Body::from(result.bytes))
        .map_err(|err| Error::Internal(err.to_string()))
}

pub async fn asset_manifest(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
) -> Result<Json<Envelope>, Error> {
    auth.require_scopes(&[scopes::READ_DATA, scopes::REGISTER])?;
    let path = path_str(&path);
    let asset = resolve_asset(&state, &auth, &path, &query).await?;
    let listing = manifest(&asset).await.map_err(crate::extract::catalog_err)?;
    Ok(Json(Envelope::of(
        serde_json::json!({"manifest": listing}),
    )?))
}
