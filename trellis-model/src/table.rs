//! Table structure: typed columns and row partitions.

use serde::{Deserialize, Serialize};

use crate::node::SortingItem;

/// Column element type for tabular data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    Utf8,
}

/// One column in a table schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub data_type: ColumnType,
}

/// Structure of a partitioned table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub columns: Vec<TableColumn>,
    pub npartitions: usize,
    /// Row count per partition, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_row_counts: Option<Vec<u64>>,
    /// Total row count, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Columns the table is sorted by, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_columns: Vec<SortingItem>,
}

impl TableStructure {
    pub fn new(columns: Vec<TableColumn>, npartitions: usize) -> Self {
        Self {
            columns,
            npartitions,
            partition_row_counts: None,
            row_count: None,
            sort_columns: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(format!("duplicate column name: {}", column.name));
            }
        }
        if self.npartitions == 0 {
            return Err("table must have at least one partition".into());
        }
        if let Some(counts) = &self.partition_row_counts {
            if counts.len() != self.npartitions {
                return Err(format!(
                    "{} partition row counts given for {} partitions",
                    counts.len(),
                    self.npartitions
                ));
            }
            if let Some(total) = self.row_count {
                let sum: u64 = counts.iter().sum();
                if sum != total {
                    return Err(format!(
                        "partition row counts sum to {sum}, expected {total}"
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<TableColumn> {
        vec![
            TableColumn {
                name: "a".into(),
                data_type: ColumnType::Float64,
            },
            TableColumn {
                name: "b".into(),
                data_type: ColumnType::Utf8,
            },
        ]
    }

    #[test]
    fn duplicate_columns_rejected() {
        let mut columns = schema();
        columns.push(TableColumn {
            name: "a".into(),
            data_type: ColumnType::Int64,
        });
        assert!(TableStructure::new(columns, 1).validate().is_err());
    }

    #[test]
    fn partition_counts_must_sum_to_length() {
        let mut structure = TableStructure::new(schema(), 2);
        structure.partition_row_counts = Some(vec![3, 4]);
        structure.row_count = Some(7);
        assert!(structure.validate().is_ok());
        structure.row_count = Some(8);
        assert!(structure.validate().is_err());
    }
}
