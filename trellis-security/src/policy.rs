//! The access policy contract and the tag-based implementation.
//!
//! A policy mediates four operations: normalizing the access blob when a
//! node is created (`init_node`) or its blob is mutated (`modify_node`),
//! computing the scopes a principal holds on a node (`allowed_scopes`),
//! and synthesizing listing filters (`filters`).

use std::collections::HashSet;

use async_trait::async_trait;
use trellis_model::{node::PUBLIC_TAG, AccessBlob};
use trellis_query::Query;

use crate::error::PolicyError;
use crate::principal::{Principal, PrincipalType};
use crate::scopes;
use crate::tags::TagTable;

/// The outcome of `filters`: queries to AND into the listing, or a
/// sentinel meaning the caller gets an empty-container view.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyFilters {
    Queries(Vec<Query>),
    NoAccess,
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Evaluate (and possibly normalize) the access blob for a node
    /// being created. Returns `(modified, blob)` where `modified`
    /// reports whether the blob differs from the caller's input.
    async fn init_node(
        &self,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: Option<&AccessBlob>,
    ) -> Result<(bool, Option<AccessBlob>), PolicyError>;

    /// Evaluate a mutation of an existing node's access blob.
    async fn modify_node(
        &self,
        current: Option<&AccessBlob>,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: &AccessBlob,
    ) -> Result<(bool, AccessBlob), PolicyError>;

    /// The scopes the principal may exercise on a node with the given
    /// access blob.
    async fn allowed_scopes(
        &self,
        node_access_blob: Option<&AccessBlob>,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
    ) -> Result<HashSet<String>, PolicyError>;

    /// Filters a listing must apply so the principal sees only nodes on
    /// which it holds every scope in `scopes`.
    async fn filters(
        &self,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        scopes: &HashSet<String>,
    ) -> Result<PolicyFilters, PolicyError>;
}

// ── Open policy ──────────────────────────────────────────────────────────

/// Imposes no access restrictions. For tests and single-user
/// deployments.
pub struct OpenAccessPolicy;

#[async_trait]
impl AccessPolicy for OpenAccessPolicy {
    async fn init_node(
        &self,
        _principal: &Principal,
        _authn_access_tags: Option<&[String]>,
        _authn_scopes: &HashSet<String>,
        access_blob: Option<&AccessBlob>,
    ) -> Result<(bool, Option<AccessBlob>), PolicyError> {
        Ok((false, access_blob.cloned()))
    }

    async fn modify_node(
        &self,
        _current: Option<&AccessBlob>,
        _principal: &Principal,
        _authn_access_tags: Option<&[String]>,
        _authn_scopes: &HashSet<String>,
        access_blob: &AccessBlob,
    ) -> Result<(bool, AccessBlob), PolicyError> {
        Ok((false, access_blob.clone()))
    }

    async fn allowed_scopes(
        &self,
        _node_access_blob: Option<&AccessBlob>,
        _principal: Option<&Principal>,
        _authn_access_tags: Option<&[String]>,
        _authn_scopes: &HashSet<String>,
    ) -> Result<HashSet<String>, PolicyError> {
        Ok(scopes::all_scopes())
    }

    async fn filters(
        &self,
        _principal: Option<&Principal>,
        _authn_access_tags: Option<&[String]>,
        _authn_scopes: &HashSet<String>,
        _scopes: &HashSet<String>,
    ) -> Result<PolicyFilters, PolicyError> {
        Ok(PolicyFilters::Queries(Vec::new()))
    }
}

// ── Tag-based policy ─────────────────────────────────────────────────────

/// Tag-based access control over a compiled tag table.
pub struct TagBasedPolicy {
    provider: String,
    table: TagTable,
    /// The maximum scope set this policy will ever grant.
    scopes: HashSet<String>,
    read_scopes: HashSet<String>,
    unremovable_scopes: Vec<String>,
    admin_scopes: Vec<String>,
}

impl TagBasedPolicy {
    pub fn new(provider: impl Into<String>, table: TagTable) -> Self {
        Self {
            provider: provider.into(),
            table,
            scopes: scopes::all_scopes(),
            read_scopes: scopes::public_scopes(),
            unremovable_scopes: vec![
                scopes::READ_METADATA.to_string(),
                scopes::WRITE_METADATA.to_string(),
            ],
            admin_scopes: vec![scopes::ADMIN_APIKEYS.to_string()],
        }
    }

    /// Cap the scopes this policy may grant.
    pub fn with_scopes(mut self, scopes: HashSet<String>) -> Self {
        self.scopes = scopes;
        self
    }

    fn is_admin(&self, authn_scopes: &HashSet<String>) -> bool {
        self.admin_scopes.iter().all(|s| authn_scopes.contains(s))
    }

    fn identifier(&self, principal: &Principal) -> Result<String, PolicyError> {
        principal.policy_identifier(&self.provider).ok_or_else(|| {
            PolicyError::Unresolvable(format!(
                "principal {} has no identity from provider {:?}",
                principal.uuid, self.provider
            ))
        })
    }

    /// Shared validation for a tag being applied to a node.
    fn check_tag_application(
        &self,
        tag: &str,
        identifier: &str,
        authn_access_tags: Option<&[String]>,
        is_admin: bool,
        verb: &str,
    ) -> Result<bool, PolicyError> {
        if let Some(allowed) = authn_access_tags {
            if !allowed.iter().any(|t| t == tag) {
                return Err(PolicyError::Denied(format!(
                    "cannot {verb} tag: API key is restricted to access tags {allowed:?}"
                )));
            }
        }
        if tag.eq_ignore_ascii_case(PUBLIC_TAG) {
            if !is_admin {
                return Err(PolicyError::Denied(format!(
                    "cannot {verb} 'public' tag: only admins can {verb} the 'public' tag"
                )));
            }
            return Ok(true);
        }
        if !self.table.is_tag_defined(tag) {
            return Err(PolicyError::Denied(format!(
                "cannot {verb} tag: tag {tag:?} is not defined"
            )));
        }
        if !self.table.is_tag_owner(tag, identifier) && !is_admin {
            return Err(PolicyError::Denied(format!(
                "cannot {verb} tag: user {identifier:?} is not an owner of tag {tag:?}"
            )));
        }
        Ok(false)
    }

    /// Verify the resulting tag set still grants the caller the scopes
    /// it must never lose on its own nodes.
    fn check_unremovable(
        &self,
        tags: &HashSet<String>,
        identifier: &str,
    ) -> Result<(), PolicyError> {
        let mut granted: HashSet<String> = HashSet::new();
        for tag in tags {
            granted.extend(self.table.scopes_from_tag(tag, identifier));
        }
        if !self
            .unremovable_scopes
            .iter()
            .all(|scope| granted.contains(scope))
        {
            return Err(PolicyError::Denied(format!(
                "operation does not grant the minimum scopes {:?} to the caller",
                self.unremovable_scopes
            )));
        }
        Ok(())
    }

    fn normalize_tags(tags: &[String]) -> (HashSet<String>, bool) {
        let requested: HashSet<String> = tags.iter().cloned().collect();
        let has_public = requested
            .iter()
            .any(|t| t.eq_ignore_ascii_case(PUBLIC_TAG));
        let mut normalized: HashSet<String> = requested
            .iter()
            .filter(|t| !t.eq_ignore_ascii_case(PUBLIC_TAG))
            .cloned()
            .collect();
        if has_public {
            normalized.insert(PUBLIC_TAG.to_string());
        }
        let modified = normalized != requested;
        (normalized, modified)
    }
}

#[async_trait]
impl AccessPolicy for TagBasedPolicy {
    async fn init_node(
        &self,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: Option<&AccessBlob>,
    ) -> Result<(bool, Option<AccessBlob>), PolicyError> {
        let identifier = self.identifier(principal)?;
        let is_admin = self.is_admin(authn_scopes);

        let Some(blob) = access_blob else {
            // No blob proposed: the node becomes user-owned. A
            // tag-restricted API key cannot create user-owned nodes.
            if let Some(allowed) = authn_access_tags {
                return Err(PolicyError::Denied(format!(
                    "cannot create a user-owned node: API key is restricted \
                     to access tags {allowed:?}"
                )));
            }
            return Ok((true, Some(AccessBlob::user(identifier))));
        };

        let AccessBlob::Tags { tags } = blob else {
            return Err(PolicyError::Denied(
                "access_blob must be in the form {\"tags\": [\"tag1\", ...]}".to_string(),
            ));
        };
        if tags.is_empty() && !is_admin {
            return Err(PolicyError::Denied(
                "only admins can apply an empty tag list to a node".to_string(),
            ));
        }
        for tag in tags.iter().collect::<HashSet<_>>() {
            self.check_tag_application(tag, &identifier, authn_access_tags, is_admin, "apply")?;
        }
        let (normalized, modified) = Self::normalize_tags(tags);
        if !is_admin {
            self.check_unremovable(&normalized, &identifier)?;
        }
        let mut tag_list: Vec<String> = normalized.into_iter().collect();
        tag_list.sort();
        Ok((modified, Some(AccessBlob::Tags { tags: tag_list })))
    }

    async fn modify_node(
        &self,
        current: Option<&AccessBlob>,
        principal: &Principal,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        access_blob: &AccessBlob,
    ) -> Result<(bool, AccessBlob), PolicyError> {
        let identifier = self.identifier(principal)?;
        let is_admin = self.is_admin(authn_scopes);

        if current == Some(access_blob) {
            return Ok((false, access_blob.clone()));
        }
        let AccessBlob::Tags { tags } = access_blob else {
            return Err(PolicyError::Denied(
                "access_blob must be in the form {\"tags\": [\"tag1\", ...]}; \
                 if this was a merge patch on a user-owned node, use a \
                 replace instead"
                    .to_string(),
            ));
        };
        if tags.is_empty() && !is_admin {
            return Err(PolicyError::Denied(
                "only admins can apply an empty tag list to a node".to_string(),
            ));
        }

        let current_tags: HashSet<String> = current
            .map(|blob| blob.tag_list().iter().cloned().collect())
            .unwrap_or_default();

        // Tags being added.
        for tag in tags.iter().collect::<HashSet<_>>() {
            if current_tags.contains(tag) {
                continue;
            }
            self.check_tag_application(tag, &identifier, authn_access_tags, is_admin, "apply")?;
        }

        let (normalized, modified) = Self::normalize_tags(tags);

        // Tags being removed.
        for tag in current_tags.difference(&normalized) {
            self.check_tag_application(tag, &identifier, authn_access_tags, is_admin, "remove")?;
        }

        if !is_admin {
            self.check_unremovable(&normalized, &identifier)?;
        }
        let mut tag_list: Vec<String> = normalized.into_iter().collect();
        tag_list.sort();
        Ok((modified, AccessBlob::Tags { tags: tag_list }))
    }

    async fn allowed_scopes(
        &self,
        node_access_blob: Option<&AccessBlob>,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
    ) -> Result<HashSet<String>, PolicyError> {
        let Some(blob) = node_access_blob else {
            // Nodes with no blob (the root) are governed by authn
            // scopes alone.
            return Ok(self.scopes.clone());
        };
        if self.is_admin(authn_scopes) {
            return Ok(self.scopes.clone());
        }
        let identifier = match principal {
            None => None,
            Some(p) if p.principal_type == PrincipalType::Service => Some(p.uuid.to_string()),
            Some(p) => Some(self.identifier(p)?),
        };

        let mut allowed = HashSet::new();
        match blob {
            AccessBlob::User { user } => {
                if authn_access_tags.is_none() && identifier.as_deref() == Some(user.as_str()) {
                    allowed = self.scopes.clone();
                }
            }
            AccessBlob::Tags { tags } => {
                for tag in tags {
                    if let Some(restricted) = authn_access_tags {
                        if !restricted.iter().any(|t| t == tag) {
                            continue;
                        }
                    }
                    if self.table.is_tag_public(tag) {
                        allowed.extend(self.read_scopes.iter().cloned());
                        if tag.eq_ignore_ascii_case(PUBLIC_TAG) {
                            continue;
                        }
                    } else if !self.table.is_tag_defined(tag) {
                        continue;
                    }
                    if let Some(identifier) = &identifier {
                        let tag_scopes = self.table.scopes_from_tag(tag, identifier);
                        if tag_scopes.is_subset(&self.scopes) {
                            allowed.extend(tag_scopes);
                        }
                    }
                }
            }
        }
        Ok(allowed)
    }

    async fn filters(
        &self,
        principal: Option<&Principal>,
        authn_access_tags: Option<&[String]>,
        authn_scopes: &HashSet<String>,
        scopes: &HashSet<String>,
    ) -> Result<PolicyFilters, PolicyError> {
        if !scopes.is_subset(&self.scopes) {
            return Ok(PolicyFilters::NoAccess);
        }

        let mut tag_list: HashSet<String> = HashSet::new();
        let mut identifier = None;
        if let Some(principal) = principal {
            if principal.principal_type == PrincipalType::Service {
                identifier = Some(principal.uuid.to_string());
            } else if self.is_admin(authn_scopes) {
                // Admins see everything; no filtering.
                return Ok(PolicyFilters::Queries(Vec::new()));
            } else {
                identifier = Some(self.identifier(principal)?);
            }
            if let Some(identifier) = &identifier {
                let mut per_scope = scopes
                    .iter()
                    .map(|scope| self.table.tags_from_scope(scope, identifier));
                if let Some(first) = per_scope.next() {
                    let intersection = per_scope.fold(first, |acc, next| {
                        acc.intersection(&next).cloned().collect()
                    });
                    tag_list.extend(intersection);
                }
            }
        }

        // Public tags satisfy any requirement made purely of read scopes.
        if !scopes.is_empty() && scopes.iter().all(|s| self.read_scopes.contains(s)) {
            tag_list.extend(self.table.public_tags());
        }

        if let Some(restricted) = authn_access_tags {
            identifier = None;
            tag_list.retain(|tag| restricted.iter().any(|t| t == tag));
        }

        let mut tags: Vec<String> = tag_list.into_iter().collect();
        tags.sort();
        Ok(PolicyFilters::Queries(vec![Query::AccessBlobFilter {
            user_id: identifier,
            tags,
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Identity, Role};
    use uuid::Uuid;

    fn table() -> TagTable {
        TagTable::from_json(&serde_json::json!({
            "tags": {
                "alice_tag": {
                    "owners": ["alice"],
                    "members": {
                        "alice": ["read:metadata", "read:data", "write:metadata", "write:data"]
                    }
                },
                "chemists_tag": {
                    "owners": ["bob"],
                    "members": {
                        "bob": ["read:metadata", "read:data", "write:metadata", "write:data"],
                        "sue": ["read:metadata", "read:data"]
                    }
                },
                "weak_tag": {
                    "owners": ["alice"],
                    "members": {
                        "alice": ["read:metadata"]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn user(id: &str) -> Principal {
        Principal {
            uuid: Uuid::new_v4(),
            principal_type: PrincipalType::User,
            identities: vec![Identity {
                provider: "toy".into(),
                id: id.into(),
            }],
            roles: vec![Role {
                name: "user".into(),
                scopes: scopes::USER_SCOPES.iter().map(|s| s.to_string()).collect(),
            }],
            api_keys: Vec::new(),
            sessions: Vec::new(),
        }
    }

    fn policy() -> TagBasedPolicy {
        TagBasedPolicy::new("toy", table())
    }

    fn user_authn_scopes() -> HashSet<String> {
        scopes::user_scopes()
    }

    #[tokio::test]
    async fn init_without_blob_becomes_user_owned() {
        let policy = policy();
        let alice = user("alice");
        let (modified, blob) = policy
            .init_node(&alice, None, &user_authn_scopes(), None)
            .await
            .unwrap();
        assert!(modified);
        assert_eq!(blob, Some(AccessBlob::user("alice")));
    }

    #[tokio::test]
    async fn init_with_owned_tag_succeeds() {
        let policy = policy();
        let alice = user("alice");
        let proposed = AccessBlob::tags(["alice_tag"]);
        let (modified, blob) = policy
            .init_node(&alice, None, &user_authn_scopes(), Some(&proposed))
            .await
            .unwrap();
        assert!(!modified);
        assert_eq!(blob, Some(proposed));
    }

    #[tokio::test]
    async fn init_with_unowned_tag_denied() {
        let policy = policy();
        let alice = user("alice");
        let proposed = AccessBlob::tags(["chemists_tag"]);
        let err = policy
            .init_node(&alice, None, &user_authn_scopes(), Some(&proposed))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Denied(_)));
    }

    #[tokio::test]
    async fn public_tag_requires_admin() {
        let policy = policy();
        let alice = user("alice");
        let proposed = AccessBlob::tags(["public"]);
        assert!(policy
            .init_node(&alice, None, &user_authn_scopes(), Some(&proposed))
            .await
            .is_err());

        let mut admin_scopes = user_authn_scopes();
        admin_scopes.insert(scopes::ADMIN_APIKEYS.to_string());
        let (_, blob) = policy
            .init_node(&alice, None, &admin_scopes, Some(&proposed))
            .await
            .unwrap();
        assert_eq!(blob, Some(AccessBlob::tags(["public"])));
    }

    #[tokio::test]
    async fn self_lockout_prevented() {
        let policy = policy();
        let alice = user("alice");
        // weak_tag grants alice read:metadata only, which is below the
        // unremovable floor.
        let proposed = AccessBlob::tags(["weak_tag"]);
        let err = policy
            .init_node(&alice, None, &user_authn_scopes(), Some(&proposed))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Denied(_)));
    }

    #[tokio::test]
    async fn allowed_scopes_for_owner_and_tag_member() {
        let policy = policy();
        let alice = user("alice");
        let bob = user("bob");
        let foo_blob = AccessBlob::tags(["alice_tag"]);
        let bar_blob = AccessBlob::tags(["chemists_tag"]);

        let alice_on_foo = policy
            .allowed_scopes(Some(&foo_blob), Some(&alice), None, &user_authn_scopes())
            .await
            .unwrap();
        assert!(alice_on_foo.contains("read:data"));
        assert!(alice_on_foo.contains("write:data"));

        let alice_on_bar = policy
            .allowed_scopes(Some(&bar_blob), Some(&alice), None, &user_authn_scopes())
            .await
            .unwrap();
        assert!(alice_on_bar.is_empty());

        let bob_on_bar = policy
            .allowed_scopes(Some(&bar_blob), Some(&bob), None, &user_authn_scopes())
            .await
            .unwrap();
        assert!(bob_on_bar.contains("write:data"));
    }

    #[tokio::test]
    async fn user_owned_node_scopes() {
        let policy = policy();
        let alice = user("alice");
        let blob = AccessBlob::user("alice");
        let scopes_on_own = policy
            .allowed_scopes(Some(&blob), Some(&alice), None, &user_authn_scopes())
            .await
            .unwrap();
        assert!(scopes_on_own.contains("delete:node"));

        // A tag-restricted API key gets nothing on user-owned nodes.
        let restricted = vec!["alice_tag".to_string()];
        let scopes_restricted = policy
            .allowed_scopes(
                Some(&blob),
                Some(&alice),
                Some(&restricted),
                &user_authn_scopes(),
            )
            .await
            .unwrap();
        assert!(scopes_restricted.is_empty());
    }

    #[tokio::test]
    async fn public_tag_confers_read_scopes_to_anonymous() {
        let policy = policy();
        let blob = AccessBlob::tags(["public"]);
        let anonymous = policy
            .allowed_scopes(Some(&blob), None, None, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(anonymous, scopes::public_scopes());
    }

    #[tokio::test]
    async fn filters_synthesize_access_blob_filter() {
        let policy = policy();
        let bob = user("bob");
        let required: HashSet<String> =
            ["read:metadata".to_string(), "read:data".to_string()].into();
        let filters = policy
            .filters(Some(&bob), None, &user_authn_scopes(), &required)
            .await
            .unwrap();
        match filters {
            PolicyFilters::Queries(queries) => {
                assert_eq!(queries.len(), 1);
                match &queries[0] {
                    Query::AccessBlobFilter { user_id, tags } => {
                        assert_eq!(user_id.as_deref(), Some("bob"));
                        assert!(tags.contains(&"chemists_tag".to_string()));
                        assert!(tags.contains(&"public".to_string()));
                        assert!(!tags.contains(&"alice_tag".to_string()));
                    }
                    other => panic!("expected AccessBlobFilter, got {other:?}"),
                }
            }
            PolicyFilters::NoAccess => panic!("expected queries"),
        }
    }

    #[tokio::test]
    async fn filters_outside_policy_scopes_is_no_access() {
        let policy = policy().with_scopes(scopes::public_scopes());
        let bob = user("bob");
        let required: HashSet<String> = ["write:data".to_string()].into();
        let filters = policy
            .filters(Some(&bob), None, &user_authn_scopes(), &required)
            .await
            .unwrap();
        assert_eq!(filters, PolicyFilters::NoAccess);
    }
}
