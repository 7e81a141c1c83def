//! The compiled tag table.
//!
//! Tag definitions are compiled ahead of time (group membership
//! resolved, role names expanded to scope lists) and loaded here as a
//! plain lookup structure. The policy consults it on every decision, so
//! all lookups are in-memory and synchronous.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::SecurityError;

/// One compiled tag: owners, a public flag, and the scopes each member
/// holds under this tag.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TagDef {
    #[serde(default)]
    pub owners: HashSet<String>,
    #[serde(default)]
    pub public: bool,
    /// Member identifier -> scopes granted by this tag.
    #[serde(default)]
    pub members: HashMap<String, HashSet<String>>,
}

/// The compiled `(tag, principal) -> scopes` table.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TagTable {
    #[serde(default)]
    pub tags: HashMap<String, TagDef>,
}

impl TagTable {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SecurityError> {
        serde_json::from_value(value.clone())
            .map_err(|err| SecurityError::Configuration(format!("invalid tag table: {err}")))
    }

    pub fn is_tag_defined(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn is_tag_owner(&self, tag: &str, identifier: &str) -> bool {
        self.tags
            .get(tag)
            .map(|def| def.owners.contains(identifier))
            .unwrap_or(false)
    }

    /// A tag is public if it is flagged public or is the literal
    /// `public` tag.
    pub fn is_tag_public(&self, tag: &str) -> bool {
        if tag.eq_ignore_ascii_case(trellis_model::node::PUBLIC_TAG) {
            return true;
        }
        self.tags
            .get(tag)
            .map(|def| def.public)
            .unwrap_or(false)
    }

    pub fn public_tags(&self) -> HashSet<String> {
        let mut tags: HashSet<String> = self
            .tags
            .iter()
            .filter(|(_, def)| def.public)
            .map(|(name, _)| name.clone())
            .collect();
        tags.insert(trellis_model::node::PUBLIC_TAG.to_string());
        tags
    }

    /// Scopes `identifier` holds under `tag` (owners hold every scope
    /// any member holds).
    pub fn scopes_from_tag(&self, tag: &str, identifier: &str) -> HashSet<String> {
        let Some(def) = self.tags.get(tag) else {
            return HashSet::new();
        };
        if def.owners.contains(identifier) {
            return def.members.values().flatten().cloned().collect();
        }
        def.members.get(identifier).cloned().unwrap_or_default()
    }

    /// Tags under which `identifier` holds `scope`.
    pub fn tags_from_scope(&self, scope: &str, identifier: &str) -> HashSet<String> {
        self.tags
            .keys()
            .filter(|tag| self.scopes_from_tag(tag, identifier).contains(scope))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn table() -> TagTable {
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
                "open_tag": {
                    "public": true,
                    "members": {}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn lookups() {
        let table = table();
        assert!(table.is_tag_defined("alice_tag"));
        assert!(!table.is_tag_defined("nope"));
        assert!(table.is_tag_owner("chemists_tag", "bob"));
        assert!(!table.is_tag_owner("chemists_tag", "sue"));
        assert!(table.is_tag_public("open_tag"));
        assert!(table.is_tag_public("public"));
        assert!(!table.is_tag_public("alice_tag"));
    }

    #[test]
    fn scopes_and_reverse_lookup() {
        let table = table();
        assert!(table
            .scopes_from_tag("chemists_tag", "sue")
            .contains("read:data"));
        assert!(!table
            .scopes_from_tag("chemists_tag", "sue")
            .contains("write:data"));
        // Owners hold the union of member scopes.
        assert!(table
            .scopes_from_tag("chemists_tag", "bob")
            .contains("write:data"));

        let tags = table.tags_from_scope("read:data", "sue");
        assert_eq!(tags, HashSet::from(["chemists_tag".to_string()]));
    }
}
