//! Shared data model for the Trellis catalog.
//!
//! This crate holds the types every other crate agrees on:
//!
//! - the tagged [`Structure`] union describing what a node's data looks
//!   like (one variant per structure family),
//! - the node schema ([`NodeAttributes`], [`DataSource`], [`Asset`],
//!   [`AccessBlob`], [`Revision`]),
//! - the slice algebra ([`NdSlice`]) used to address sub-regions of
//!   arrays over the wire.
//!
//! Nothing here performs I/O; adapters and stores build on these types.

pub mod array;
pub mod awkward;
pub mod container;
pub mod node;
pub mod slice;
pub mod sparse;
pub mod table;

pub use array::{ArrayStructure, BlockError, DataType, Field, ScalarKind};
pub use awkward::AwkwardStructure;
pub use container::{CompositeStructure, ContainerStructure};
pub use node::{
    validate_key, AccessBlob, Asset, DataSource, KeyError, Management, Node, NodeAttributes,
    Revision, SortingItem, Spec,
};
pub use slice::{NdSlice, ResolvedAxis, SliceDim, SliceError, Step};
pub use sparse::CooStructure;
pub use table::{ColumnType, TableColumn, TableStructure};

use serde::{Deserialize, Serialize};

/// The kind of data a node holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureFamily {
    Container,
    Array,
    Table,
    Sparse,
    Awkward,
    Composite,
}

impl StructureFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureFamily::Container => "container",
            StructureFamily::Array => "array",
            StructureFamily::Table => "table",
            StructureFamily::Sparse => "sparse",
            StructureFamily::Awkward => "awkward",
            StructureFamily::Composite => "composite",
        }
    }
}

impl std::fmt::Display for StructureFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StructureFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(StructureFamily::Container),
            "array" => Ok(StructureFamily::Array),
            "table" => Ok(StructureFamily::Table),
            "sparse" => Ok(StructureFamily::Sparse),
            "awkward" => Ok(StructureFamily::Awkward),
            "composite" => Ok(StructureFamily::Composite),
            other => Err(format!("unknown structure family: {other}")),
        }
    }
}

/// Typed description of a node's data, tagged by structure family.
///
/// This is deliberately a sum type: each family has its own record and
/// there are no nullable catch-all fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Structure {
    Container(ContainerStructure),
    Array(ArrayStructure),
    Table(TableStructure),
    Sparse(CooStructure),
    Awkward(AwkwardStructure),
    Composite(CompositeStructure),
}

impl Structure {
    pub fn family(&self) -> StructureFamily {
        match self {
            Structure::Container(_) => StructureFamily::Container,
            Structure::Array(_) => StructureFamily::Array,
            Structure::Table(_) => StructureFamily::Table,
            Structure::Sparse(_) => StructureFamily::Sparse,
            Structure::Awkward(_) => StructureFamily::Awkward,
            Structure::Composite(_) => StructureFamily::Composite,
        }
    }

    /// Validate the internal consistency rules for this structure.
    ///
    /// Array and sparse structures must have a chunk grid that sums to
    /// the shape on every axis; tables must have unique column names and
    /// consistent partition row counts.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Structure::Array(s) => s.validate(),
            Structure::Sparse(s) => s.validate(),
            Structure::Table(s) => s.validate(),
            Structure::Container(_) | Structure::Composite(_) | Structure::Awkward(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_family_round_trip() {
        for family in [
            StructureFamily::Container,
            StructureFamily::Array,
            StructureFamily::Table,
            StructureFamily::Sparse,
            StructureFamily::Awkward,
            StructureFamily::Composite,
        ] {
            let parsed: StructureFamily = family.as_str().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert!("xarray".parse::<StructureFamily>().is_err());
    }

    #[test]
    fn structure_serializes_with_family_tag() {
        let structure = Structure::Container(ContainerStructure { count: Some(3) });
        let value = serde_json::to_value(&structure).unwrap();
        assert_eq!(value["family"], "container");
        assert_eq!(value["count"], 3);
    }
}
