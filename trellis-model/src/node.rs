//! Node schema: the catalog's fundamental entity and its satellites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Structure, StructureFamily};

/// A named, optionally versioned tag that selects validators and
/// serializers for a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Spec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// How the backing bytes of a data source are managed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Management {
    /// Owned by the catalog; bytes are deleted with the node.
    Internal,
    /// Registered but owned elsewhere; never deleted by the catalog.
    External,
    /// Owned by the catalog and open for writes.
    Writable,
    /// Owned by the catalog, write-locked.
    Locked,
}

impl Management {
    /// Whether deleting the node also deletes the backing bytes.
    pub fn deletes_bytes(&self) -> bool {
        !matches!(self, Management::External)
    }
}

/// A single storable unit (file or directory) backing a data source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub data_uri: String,
    pub is_directory: bool,
    /// Adapter-constructor argument this asset binds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    /// Ordinal for asset sequences bound to one parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<i32>,
}

/// The binding from a node to its backing storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    /// Opaque adapter parameters.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
    pub management: Management,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl DataSource {
    pub fn new(mimetype: impl Into<String>, structure: Structure, management: Management) -> Self {
        Self {
            id: None,
            mimetype: mimetype.into(),
            structure: Some(structure),
            parameters: serde_json::Value::Null,
            management,
            assets: Vec::new(),
        }
    }
}

/// Authorization payload stored on each node: either owner-only or
/// governed by a set of tags.
///
/// The literal tag `"public"` confers read scopes to any principal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessBlob {
    User { user: String },
    Tags { tags: Vec<String> },
}

pub const PUBLIC_TAG: &str = "public";

impl AccessBlob {
    pub fn user(identifier: impl Into<String>) -> Self {
        AccessBlob::User {
            user: identifier.into(),
        }
    }

    pub fn tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AccessBlob::Tags {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tag_list(&self) -> &[String] {
        match self {
            AccessBlob::Tags { tags } => tags,
            AccessBlob::User { .. } => &[],
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            AccessBlob::User { user } => Some(user),
            AccessBlob::Tags { .. } => None,
        }
    }

    pub fn has_public_tag(&self) -> bool {
        self.tag_list()
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(PUBLIC_TAG))
    }
}

/// How a container orders its children. The key `"_"` with direction 1
/// denotes insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortingItem {
    pub key: String,
    /// 1 for ascending, -1 for descending.
    pub direction: i32,
}

impl SortingItem {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: 1,
        }
    }

    pub fn insertion_order() -> Self {
        Self::ascending("_")
    }
}

/// Attributes of one catalog node, as stored and as served.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub structure_family: StructureFamily,
    #[serde(default)]
    pub specs: Vec<Spec>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorting: Vec<SortingItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<DataSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_blob: Option<AccessBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_updated: Option<DateTime<Utc>>,
}

impl NodeAttributes {
    pub fn container() -> Self {
        Self {
            structure_family: StructureFamily::Container,
            specs: Vec::new(),
            metadata: serde_json::json!({}),
            structure: None,
            sorting: vec![SortingItem::insertion_order()],
            data_sources: None,
            access_blob: None,
            time_created: None,
            time_updated: None,
        }
    }
}

/// A node paired with its position in the tree.
///
/// The key is kept outside the attributes, mirroring the JSON API layout
/// where it is served as the resource `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: String,
    pub ancestors: Vec<String>,
    #[serde(flatten)]
    pub attributes: NodeAttributes,
}

impl Node {
    /// Full path from the root, `/`-joined.
    pub fn path(&self) -> String {
        let mut segments = self.ancestors.clone();
        segments.push(self.key.clone());
        segments.join("/")
    }
}

/// Immutable snapshot of `(metadata, specs, access_blob)` taken before
/// each metadata mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revision_number: u64,
    pub metadata: serde_json::Value,
    pub specs: Vec<Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_blob: Option<AccessBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_updated: Option<DateTime<Utc>>,
}

/// Errors validating a node key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyError {
    Empty,
    ContainsSlash(String),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::Empty => write!(f, "node key must not be empty"),
            KeyError::ContainsSlash(key) => {
                write!(f, "node key must not contain '/': {key:?}")
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// Validate a node key: non-empty, no slashes.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.contains('/') {
        return Err(KeyError::ContainsSlash(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_blob_round_trip() {
        let user = AccessBlob::user("alice");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json, serde_json::json!({"user": "alice"}));
        let back: AccessBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);

        let tags = AccessBlob::tags(["public", "chemists"]);
        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json, serde_json::json!({"tags": ["public", "chemists"]}));
        assert!(tags.has_public_tag());
        assert!(!user.has_public_tag());
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("x").is_ok());
        assert_eq!(validate_key(""), Err(KeyError::Empty));
        assert!(matches!(
            validate_key("a/b"),
            Err(KeyError::ContainsSlash(_))
        ));
    }

    #[test]
    fn node_path_joins_ancestors() {
        let node = Node {
            key: "c".into(),
            ancestors: vec!["a".into(), "b".into()],
            attributes: NodeAttributes::container(),
        };
        assert_eq!(node.path(), "a/b/c");
    }
}
