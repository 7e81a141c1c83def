//! Query evaluation for in-memory containers.
//!
//! The persistent catalog translates queries to SQL; in-memory adapters
//! evaluate them directly against each child's attributes.

use trellis_model::{AccessBlob, Spec, StructureFamily};
use trellis_query::{ComparisonOperator, Query};

/// The attributes of one child a query is evaluated against.
pub struct ChildView<'a> {
    pub key: &'a str,
    pub metadata: &'a serde_json::Value,
    pub structure_family: StructureFamily,
    pub specs: &'a [Spec],
    pub access_blob: Option<&'a AccessBlob>,
}

/// Whether a child satisfies every query in the list.
pub fn matches_all(queries: &[Query], child: &ChildView<'_>) -> bool {
    queries.iter().all(|query| matches(query, child))
}

pub fn matches(query: &Query, child: &ChildView<'_>) -> bool {
    match query {
        Query::Eq { key, value } => lookup(child.metadata, key) == Some(value),
        Query::NotEq { key, value } => lookup(child.metadata, key) != Some(value),
        Query::In { key, values } => match lookup(child.metadata, key) {
            Some(found) => values.iter().any(|v| v == found),
            None => false,
        },
        Query::Regex {
            key,
            pattern,
            case_sensitive,
        } => {
            let Some(serde_json::Value::String(text)) = lookup(child.metadata, key) else {
                return false;
            };
            let built = regex::RegexBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build();
            match built {
                Ok(re) => re.is_match(text),
                Err(_) => false,
            }
        }
        Query::FullText { text } => {
            let needle = text.to_lowercase();
            any_string(child.metadata, &|s| s.to_lowercase().contains(&needle))
        }
        Query::Comparison {
            operator,
            key,
            value,
        } => match (lookup(child.metadata, key), value.as_f64()) {
            (Some(found), Some(bound)) => match found.as_f64() {
                Some(found) => match operator {
                    ComparisonOperator::Gt => found > bound,
                    ComparisonOperator::Ge => found >= bound,
                    ComparisonOperator::Lt => found < bound,
                    ComparisonOperator::Le => found <= bound,
                },
                None => false,
            },
            _ => false,
        },
        Query::StructureFamily { value } => child.structure_family == *value,
        Query::KeysFilter { keys } => keys.iter().any(|k| k == child.key),
        Query::SpecsQuery { include, exclude } => {
            include
                .iter()
                .all(|name| child.specs.iter().any(|spec| spec.name == *name))
                && !exclude
                    .iter()
                    .any(|name| child.specs.iter().any(|spec| spec.name == *name))
        }
        Query::AccessBlobFilter { user_id, tags } => match child.access_blob {
            Some(AccessBlob::User { user }) => user_id.as_deref() == Some(user.as_str()),
            Some(AccessBlob::Tags { tags: node_tags }) => {
                node_tags.iter().any(|tag| tags.contains(tag))
            }
            // A node with no access blob is never matched by an
            // access filter; unrestricted callers get no filter at all.
            None => false,
        },
    }
}

/// Resolve a dotted path into nested metadata.
fn lookup<'a>(metadata: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    let mut current = metadata;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn any_string(value: &serde_json::Value, predicate: &dyn Fn(&str) -> bool) -> bool {
    match value {
        serde_json::Value::String(s) => predicate(s),
        serde_json::Value::Array(items) => items.iter().any(|v| any_string(v, predicate)),
        serde_json::Value::Object(map) => map.values().any(|v| any_string(v, predicate)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child<'a>(metadata: &'a serde_json::Value) -> ChildView<'a> {
        ChildView {
            key: "x",
            metadata,
            structure_family: StructureFamily::Array,
            specs: &[],
            access_blob: None,
        }
    }

    #[test]
    fn eq_with_dotted_path() {
        let metadata = serde_json::json!({"sample": {"color": "red"}});
        let query = Query::Eq {
            key: "sample.color".into(),
            value: serde_json::json!("red"),
        };
        assert!(matches(&query, &child(&metadata)));
    }

    #[test]
    fn comparison_on_numbers() {
        let metadata = serde_json::json!({"temperature": 300});
        let query = Query::Comparison {
            operator: ComparisonOperator::Ge,
            key: "temperature".into(),
            value: serde_json::json!(273.15),
        };
        assert!(matches(&query, &child(&metadata)));
    }

    #[test]
    fn fulltext_searches_nested_strings() {
        let metadata = serde_json::json!({"notes": ["first RUN", "second"]});
        let query = Query::FullText { text: "run".into() };
        assert!(matches(&query, &child(&metadata)));
        let query = Query::FullText {
            text: "absent".into(),
        };
        assert!(!matches(&query, &child(&metadata)));
    }

    #[test]
    fn access_blob_filter_on_tags() {
        let metadata = serde_json::json!({});
        let blob = AccessBlob::tags(["chemists"]);
        let view = ChildView {
            access_blob: Some(&blob),
            ..child(&metadata)
        };
        let query = Query::AccessBlobFilter {
            user_id: None,
            tags: vec!["chemists".into()],
        };
        assert!(matches(&query, &view));
        let query = Query::AccessBlobFilter {
            user_id: Some("alice".into()),
            tags: vec!["physicists".into()],
        };
        assert!(!matches(&query, &view));
    }
}
