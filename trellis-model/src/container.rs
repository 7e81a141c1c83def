//! Container and composite structures.

use serde::{Deserialize, Serialize};

/// Structure of a container node. Children are enumerated by the catalog;
/// the structure itself carries only a count when one is cheaply known.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStructure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Structure of a composite node: a flat container in which no nested
/// containers are allowed and all table columns plus sibling node keys
/// form a single unique namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeStructure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// The flattened namespace (child keys and table column names), when
    /// computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_keys: Option<Vec<String>>,
}

/// Check the composite uniqueness invariant over child keys and the
/// column names of child tables. Returns the flattened namespace.
pub fn composite_flat_keys<'a>(
    child_keys: impl Iterator<Item = &'a str>,
    table_columns: impl Iterator<Item = &'a str>,
) -> Result<Vec<String>, String> {
    let mut seen = std::collections::HashSet::new();
    let mut flat = Vec::new();
    for key in child_keys.chain(table_columns) {
        if !seen.insert(key.to_string()) {
            return Err(format!(
                "composite namespace collision: '{key}' appears more than once"
            ));
        }
        flat.push(key.to_string());
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_namespace_collision_detected() {
        let keys = ["img", "table1"];
        let columns = ["x", "img"];
        let err = composite_flat_keys(keys.iter().copied(), columns.iter().copied()).unwrap_err();
        assert!(err.contains("img"));
    }

    #[test]
    fn composite_namespace_flattens() {
        let keys = ["a", "b"];
        let columns = ["x", "y"];
        let flat = composite_flat_keys(keys.iter().copied(), columns.iter().copied()).unwrap();
        assert_eq!(flat, vec!["a", "b", "x", "y"]);
    }
}
