//! Sparse (COO) structure.

use serde::{Deserialize, Serialize};

use crate::array::DataType;

/// Structure of a sparse array in coordinate (COO) layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CooStructure {
    pub shape: Vec<u64>,
    pub chunks: Vec<Vec<u64>>,
    pub data_type: DataType,
    /// Element type of the coordinate arrays.
    pub coord_data_type: DataType,
}

impl CooStructure {
    pub fn one_chunk(data_type: DataType, shape: Vec<u64>) -> Self {
        let chunks = shape.iter().map(|dim| vec![*dim]).collect();
        Self {
            data_type,
            coord_data_type: DataType::uint64(),
            shape,
            chunks,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.shape.len() != self.chunks.len() {
            return Err(format!(
                "shape has {} axes but chunks describe {}",
                self.shape.len(),
                self.chunks.len()
            ));
        }
        for (axis, (dim, extents)) in self.shape.iter().zip(&self.chunks).enumerate() {
            let total: u64 = extents.iter().sum();
            if total != *dim {
                return Err(format!(
                    "chunks on axis {axis} sum to {total}, expected {dim}"
                ));
            }
        }
        Ok(())
    }
}
