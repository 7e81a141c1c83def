//! Path resolution with per-segment access filtering.
//!
//! Resolution of `/a/b/c` walks one segment at a time. Each
//! intermediate node is filtered for `read:metadata`; a node the caller
//! cannot read is indistinguishable from a missing node. Only at the
//! terminal segment is the operation's required scope checked: failing
//! that while holding `read:metadata` is a 403.

use std::collections::HashSet;

use trellis_adapters::filter::{matches_all, ChildView};
use trellis_catalog::nodes::NodeRecord;
use trellis_core::Error;
use trellis_query::Query;
use trellis_security::PolicyFilters;

use crate::extract::{policy_err, Auth};
use crate::AppState;

/// The outcome of a secure path resolution. `record` is `None` for the
/// virtual root container.
pub struct ResolvedNode {
    pub record: Option<NodeRecord>,
    pub allowed_scopes: HashSet<String>,
    /// Path segments from the root.
    pub segments: Vec<String>,
}

impl ResolvedNode {
    /// The `parent` column value for listing this node's children.
    pub fn parent_path(&self) -> String {
        self.segments.join("/")
    }

    /// Streaming topic for this node.
    pub fn stream_topic(&self) -> String {
        match &self.record {
            Some(record) => record.id.to_string(),
            None => "root".to_string(),
        }
    }
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(String::from)
        .collect()
}

fn not_found(segments: &[String]) -> Error {
    Error::NotFound(format!("no such entry: /{}", segments.join("/")))
}

/// Filters the caller must satisfy to see children with the given
/// required scopes. `Ok(None)` means "no access at all".
pub async fn listing_filters(
    state: &AppState,
    auth: &Auth,
    required_scopes: &[&str],
) -> Result<Option<Vec<Query>>, Error> {
    let required: HashSet<String> = required_scopes.iter().map(|s| s.to_string()).collect();
    let filters = state
        .policy
        .filters(
            auth.principal.as_ref(),
            auth.authn_access_tags.as_deref(),
            &auth.authn_scopes,
            &required,
        )
        .await
        .map_err(policy_err)?;
    match filters {
        PolicyFilters::Queries(queries) => Ok(Some(queries)),
        PolicyFilters::NoAccess => Ok(None),
    }
}

/// Whether a node is visible under the given listing filters.
fn visible(record: &NodeRecord, filters: &[Query]) -> bool {
    let attributes = &record.node.attributes;
    let view = ChildView {
        key: &record.node.key,
        metadata: &attributes.metadata,
        structure_family: attributes.structure_family,
        specs: &attributes.specs,
        access_blob: attributes.access_blob.as_ref(),
    };
    matches_all(filters, &view)
}

/// Resolve a path, filtering every intermediate by `read:metadata` and
/// checking `required_scopes` on the terminal node.
pub async fn secure_lookup(
    state: &AppState,
    auth: &Auth,
    path: &str,
    required_scopes: &[&str],
) -> Result<ResolvedNode, Error> {
    let segments = split_path(path);

    // Intermediate visibility: the read:metadata filters apply to every
    // node along the path, including the terminal one.
    let read_filters = listing_filters(state, auth, &["read:metadata"])
        .await?
        .ok_or_else(|| not_found(&segments))?;

    let mut record: Option<NodeRecord> = None;
    for depth in 1..=segments.len() {
        let prefix: Vec<&str> = segments[..depth].iter().map(String::as_str).collect();
        let found = state
            .catalog
            .lookup_node(&prefix)
            .await
            .map_err(crate::extract::catalog_err)?
            .ok_or_else(|| not_found(&segments))?;
        if !read_filters.is_empty() && !visible(&found, &read_filters) {
            // Invisible nodes read as missing.
            return Err(not_found(&segments));
        }
        record = Some(found);
    }

    let access_blob = record
        .as_ref()
        .and_then(|r| r.node.attributes.access_blob.as_ref());
    let allowed_scopes = state
        .policy
        .allowed_scopes(
            access_blob,
            auth.principal.as_ref(),
            auth.authn_access_tags.as_deref(),
            &auth.authn_scopes,
        )
        .await
        .map_err(policy_err)?;
    // The per-node grant never exceeds what the credentials carry.
    let effective: HashSet<String> = allowed_scopes
        .intersection(&auth.authn_scopes)
        .cloned()
        .collect();

    let missing: Vec<&str> = required_scopes
        .iter()
        .copied()
        .filter(|scope| !effective.contains(*scope))
        .collect();
    if !missing.is_empty() {
        if !effective.contains("read:metadata") {
            return Err(not_found(&segments));
        }
        return Err(Error::Forbidden(format!(
            "not enough permissions to perform this action on this node; \
             requires scopes {missing:?}"
        )));
    }
    Ok(ResolvedNode {
        record,
        allowed_scopes: effective,
        segments,
    })
}
