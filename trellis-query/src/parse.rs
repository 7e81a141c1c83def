//! URL filter-parameter codec.
//!
//! Listings accept repeatable parameters of the form
//! `filter[{name}][condition][{field}]={value}`. Values are JSON-encoded
//! where a typed value is meaningful (`"red"` vs `3.5`); bare strings are
//! accepted as a convenience.

use std::collections::HashMap;

use trellis_model::SortingItem;

use crate::{ComparisonOperator, Query};

/// Errors turning filter parameters into typed queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParseError {
    UnknownQuery(String),
    MissingField {
        query: String,
        field: &'static str,
    },
    InvalidField {
        query: String,
        field: &'static str,
        message: String,
    },
    MalformedParameter(String),
}

impl std::fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryParseError::UnknownQuery(name) => write!(f, "unknown query type: {name}"),
            QueryParseError::MissingField { query, field } => {
                write!(f, "query '{query}' requires field '{field}'")
            }
            QueryParseError::InvalidField {
                query,
                field,
                message,
            } => write!(f, "query '{query}', field '{field}': {message}"),
            QueryParseError::MalformedParameter(param) => {
                write!(f, "malformed filter parameter: {param}")
            }
        }
    }
}

impl std::error::Error for QueryParseError {}

type Condition = HashMap<String, String>;
type ParserFn = fn(&Condition) -> Result<Query, QueryParseError>;

/// Registry mapping query names onto condition parsers.
///
/// Constructed once at startup and read-only afterwards.
pub struct QueryRegistry {
    parsers: HashMap<&'static str, ParserFn>,
}

impl QueryRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, parser: ParserFn) {
        self.parsers.insert(name, parser);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn parse(&self, name: &str, condition: &Condition) -> Result<Query, QueryParseError> {
        match self.parsers.get(name) {
            Some(parser) => parser(condition),
            None => Err(QueryParseError::UnknownQuery(name.to_string())),
        }
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("eq", parse_eq);
        registry.register("noteq", parse_noteq);
        registry.register("in", parse_in);
        registry.register("regex", parse_regex);
        registry.register("fulltext", parse_fulltext);
        registry.register("comparison", parse_comparison);
        registry.register("structure_family", parse_structure_family);
        registry.register("keys_filter", parse_keys_filter);
        registry.register("specs", parse_specs);
        registry
    }
}

fn require<'a>(
    condition: &'a Condition,
    query: &str,
    field: &'static str,
) -> Result<&'a str, QueryParseError> {
    condition
        .get(field)
        .map(String::as_str)
        .ok_or(QueryParseError::MissingField {
            query: query.to_string(),
            field,
        })
}

/// JSON-decode a value, falling back to a bare string.
fn json_value(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn json_list(
    text: &str,
    query: &str,
    field: &'static str,
) -> Result<Vec<serde_json::Value>, QueryParseError> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Array(values)) => Ok(values),
        Ok(_) | Err(_) => Err(QueryParseError::InvalidField {
            query: query.to_string(),
            field,
            message: "expected a JSON list".to_string(),
        }),
    }
}

fn parse_eq(condition: &Condition) -> Result<Query, QueryParseError> {
    Ok(Query::Eq {
        key: require(condition, "eq", "key")?.to_string(),
        value: json_value(require(condition, "eq", "value")?),
    })
}

fn parse_noteq(condition: &Condition) -> Result<Query, QueryParseError> {
    Ok(Query::NotEq {
        key: require(condition, "noteq", "key")?.to_string(),
        value: json_value(require(condition, "noteq", "value")?),
    })
}

fn parse_in(condition: &Condition) -> Result<Query, QueryParseError> {
    Ok(Query::In {
        key: require(condition, "in", "key")?.to_string(),
        values: json_list(require(condition, "in", "value")?, "in", "value")?,
    })
}

fn parse_regex(condition: &Condition) -> Result<Query, QueryParseError> {
    let pattern = require(condition, "regex", "pattern")?.to_string();
    // Validate at parse time so a bad pattern is a 400, not a 500 later.
    regex::Regex::new(&pattern).map_err(|err| QueryParseError::InvalidField {
        query: "regex".to_string(),
        field: "pattern",
        message: err.to_string(),
    })?;
    let case_sensitive = match condition.get("case_sensitive").map(String::as_str) {
        None => true,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(QueryParseError::InvalidField {
                query: "regex".to_string(),
                field: "case_sensitive",
                message: format!("expected 'true' or 'false', got {other:?}"),
            })
        }
    };
    Ok(Query::Regex {
        key: require(condition, "regex", "key")?.to_string(),
        pattern,
        case_sensitive,
    })
}

fn parse_fulltext(condition: &Condition) -> Result<Query, QueryParseError> {
    Ok(Query::FullText {
        text: require(condition, "fulltext", "text")?.to_string(),
    })
}

fn parse_comparison(condition: &Condition) -> Result<Query, QueryParseError> {
    let operator: ComparisonOperator = require(condition, "comparison", "operator")?
        .parse()
        .map_err(|message| QueryParseError::InvalidField {
            query: "comparison".to_string(),
            field: "operator",
            message,
        })?;
    Ok(Query::Comparison {
        operator,
        key: require(condition, "comparison", "key")?.to_string(),
        value: json_value(require(condition, "comparison", "value")?),
    })
}

fn parse_structure_family(condition: &Condition) -> Result<Query, QueryParseError> {
    let value = require(condition, "structure_family", "value")?
        .parse()
        .map_err(|message| QueryParseError::InvalidField {
            query: "structure_family".to_string(),
            field: "value",
            message,
        })?;
    Ok(Query::StructureFamily { value })
}

fn parse_keys_filter(condition: &Condition) -> Result<Query, QueryParseError> {
    let keys = json_list(
        require(condition, "keys_filter", "keys")?,
        "keys_filter",
        "keys",
    )?
    .into_iter()
    .map(|value| match value {
        serde_json::Value::String(s) => Ok(s),
        other => Err(QueryParseError::InvalidField {
            query: "keys_filter".to_string(),
            field: "keys",
            message: format!("expected strings, got {other}"),
        }),
    })
    .collect::<Result<Vec<_>, _>>()?;
    Ok(Query::KeysFilter { keys })
}

fn parse_specs(condition: &Condition) -> Result<Query, QueryParseError> {
    let string_list = |field: &'static str| -> Result<Vec<String>, QueryParseError> {
        match condition.get(field) {
            None => Ok(Vec::new()),
            Some(text) => json_list(text, "specs", field)?
                .into_iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(QueryParseError::InvalidField {
                        query: "specs".to_string(),
                        field,
                        message: format!("expected strings, got {other}"),
                    }),
                })
                .collect(),
        }
    };
    Ok(Query::SpecsQuery {
        include: string_list("include")?,
        exclude: string_list("exclude")?,
    })
}

/// Group raw query-string pairs of the form
/// `filter[{name}][condition][{field}]={value}` into typed queries.
///
/// Repeating a field for the same query name starts a new instance of
/// that query, so e.g. two `filter[eq][condition][key]`/`...[value]`
/// pairs yield two `Eq` queries.
pub fn parse_filter_params(
    pairs: &[(String, String)],
    registry: &QueryRegistry,
) -> Result<Vec<Query>, QueryParseError> {
    let mut queries = Vec::new();
    // name -> partially accumulated condition
    let mut pending: Vec<(String, Condition)> = Vec::new();

    for (raw_key, value) in pairs {
        if !raw_key.starts_with("filter[") {
            continue;
        }
        let (name, field) = split_filter_key(raw_key)
            .ok_or_else(|| QueryParseError::MalformedParameter(raw_key.clone()))?;
        let slot = match pending.iter_mut().find(|(pending_name, condition)| {
            *pending_name == name && !condition.contains_key(&field)
        }) {
            Some((_, condition)) => condition,
            None => {
                pending.push((name.clone(), Condition::new()));
                &mut pending.last_mut().expect("just pushed").1
            }
        };
        slot.insert(field, value.clone());
    }

    for (name, condition) in pending {
        queries.push(registry.parse(&name, &condition)?);
    }
    Ok(queries)
}

/// `filter[eq][condition][key]` -> `("eq", "key")`.
fn split_filter_key(raw: &str) -> Option<(String, String)> {
    let rest = raw.strip_prefix("filter[")?;
    let (name, rest) = rest.split_once(']')?;
    let rest = rest.strip_prefix("[condition][")?;
    let field = rest.strip_suffix(']')?;
    if name.is_empty() || field.is_empty() || field.contains('[') {
        return None;
    }
    Some((name.to_string(), field.to_string()))
}

/// Parse a `sort=` parameter: comma-separated keys, `-` prefix for
/// descending. `_` denotes insertion order.
pub fn parse_sort(sort: &str) -> Vec<SortingItem> {
    sort.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix('-') {
            Some(key) => SortingItem {
                key: key.to_string(),
                direction: -1,
            },
            None => SortingItem {
                key: part.to_string(),
                direction: 1,
            },
        })
        .collect()
}
