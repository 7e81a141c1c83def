//! Typed query algebra for searching the catalog.
//!
//! A [`Query`] is a structured predicate over node attributes. Backends
//! translate queries into their own expression language: the persistent
//! catalog renders parameterized SQL; in-memory adapters evaluate them
//! directly. The [`QueryRegistry`] maps the URL filter-parameter form
//! (`filter[{name}][condition][{field}]=...`) onto typed queries.

mod parse;

pub use parse::{parse_filter_params, parse_sort, QueryParseError, QueryRegistry};

use serde::{Deserialize, Serialize};
use trellis_model::StructureFamily;

/// Comparison operators for [`Query::Comparison`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Le => "<=",
        }
    }
}

impl std::str::FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(ComparisonOperator::Gt),
            "ge" => Ok(ComparisonOperator::Ge),
            "lt" => Ok(ComparisonOperator::Lt),
            "le" => Ok(ComparisonOperator::Le),
            other => Err(format!("unknown comparison operator: {other}")),
        }
    }
}

/// A structured search predicate over node attributes.
///
/// `key` fields address into the node metadata with dotted paths
/// (`"color"`, `"sample.temperature"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    /// Metadata field equals a value.
    Eq {
        key: String,
        value: serde_json::Value,
    },
    /// Metadata field does not equal a value.
    NotEq {
        key: String,
        value: serde_json::Value,
    },
    /// Metadata field is one of a set of values.
    In {
        key: String,
        values: Vec<serde_json::Value>,
    },
    /// Metadata field matches a regular expression.
    Regex {
        key: String,
        pattern: String,
        case_sensitive: bool,
    },
    /// Any string in the metadata contains the given text.
    FullText { text: String },
    /// Ordered comparison against a metadata field.
    Comparison {
        operator: ComparisonOperator,
        key: String,
        value: serde_json::Value,
    },
    /// Node has the given structure family.
    StructureFamily { value: StructureFamily },
    /// Node key is one of the given keys.
    KeysFilter { keys: Vec<String> },
    /// Node declares all of `include` and none of `exclude` specs.
    SpecsQuery {
        include: Vec<String>,
        exclude: Vec<String>,
    },
    /// Node is owned by `user_id` or carries one of `tags`.
    ///
    /// Synthesized by the access policy; not parseable from the URL.
    AccessBlobFilter {
        user_id: Option<String>,
        tags: Vec<String>,
    },
}

impl Query {
    /// The registered name used in `filter[{name}]` URL parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Eq { .. } => "eq",
            Query::NotEq { .. } => "noteq",
            Query::In { .. } => "in",
            Query::Regex { .. } => "regex",
            Query::FullText { .. } => "fulltext",
            Query::Comparison { .. } => "comparison",
            Query::StructureFamily { .. } => "structure_family",
            Query::KeysFilter { .. } => "keys_filter",
            Query::SpecsQuery { .. } => "specs",
            Query::AccessBlobFilter { .. } => "access_blob_filter",
        }
    }
}
