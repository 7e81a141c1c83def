//! `/revisions`: metadata revision history.

use axum::extract::State;
use axum::Json;
use trellis_core::{Envelope, Error, PageLinks};
use trellis_security::scopes;

use crate::extract::{catalog_err, Auth, RawQuery};
use crate::resolve::secure_lookup;
use crate::routers::metadata::{path_str, OptionalPath};
use crate::AppState;

pub async fn list_revisions(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
) -> Result<Json<Envelope>, Error> {
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:metadata"]).await?;
    let record = resolved
        .record
        .as_ref()
        .ok_or_else(|| Error::BadRequest("the root node has no revisions".to_string()))?;

    let offset: u64 = query
        .first("page[offset]")
        .map(|value| value.parse())
        .transpose()
        .map_err(|_| Error::BadRequest("malformed page[offset]".to_string()))?
        .unwrap_or(0);
    let limit: u64 = query
        .first("page[limit]")
        .map(|value| value.parse())
        .transpose()
        .map_err(|_| Error::BadRequest("malformed page[limit]".to_string()))?
        .unwrap_or(trellis_core::DEFAULT_PAGE_SIZE);

    let revisions = state
        .catalog
        .revisions(record.id, offset, limit)
        .await
        .map_err(catalog_err)?;
    let count = revisions.len() as u64 + offset;
    let base = format!("/revisions/{}", path.trim_matches('/'));
    Ok(Json(
        Envelope::of(revisions)?.with_links(PageLinks::compute(&base, offset, limit, count)),
    ))
}

pub async fn delete_revision(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::DELETE_REVISION])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["delete:revision"]).await?;
    let record = resolved
        .record
        .as_ref()
        .ok_or_else(|| Error::BadRequest("the root node has no revisions".to_string()))?;
    let number: u64 = query
        .first("number")
        .ok_or_else(|| Error::BadRequest("missing required parameter: number".to_string()))?
        .parse()
        .map_err(|_| Error::BadRequest("malformed revision number".to_string()))?;
    state
        .catalog
        .delete_revision(record.id, number)
        .await
        .map_err(catalog_err)?;
    Ok(Json(serde_json::json!({"deleted": number})))
}
