//! Array structure: shape, chunk grid, and element type.

use serde::{Deserialize, Serialize};

/// Scalar element kind, following the numpy kind taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
    Complex,
    Utf8,
    Bytes,
    Datetime,
}

/// One field of a structured (record) dtype.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

/// Element type of an array: a scalar kind plus item size in bytes, or a
/// structured record of named fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataType {
    pub kind: ScalarKind,
    /// Size of one element in bytes.
    pub item_size: u32,
    /// Present only for structured dtypes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Field>>,
}

impl DataType {
    pub fn new(kind: ScalarKind, item_size: u32) -> Self {
        Self {
            kind,
            item_size,
            fields: None,
        }
    }

    pub fn float64() -> Self {
        Self::new(ScalarKind::Float, 8)
    }

    pub fn float32() -> Self {
        Self::new(ScalarKind::Float, 4)
    }

    pub fn int64() -> Self {
        Self::new(ScalarKind::Int, 8)
    }

    pub fn uint64() -> Self {
        Self::new(ScalarKind::Uint, 8)
    }

    pub fn bool() -> Self {
        Self::new(ScalarKind::Bool, 1)
    }
}

/// Errors addressing a chunk of an array.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockError {
    /// The block index has the wrong number of axes.
    WrongRank { expected: usize, got: usize },
    /// The block index falls outside the chunk grid.
    OutOfRange { axis: usize, index: u64, blocks: u64 },
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::WrongRank { expected, got } => {
                write!(f, "block index has {got} axes; array has {expected}")
            }
            BlockError::OutOfRange {
                axis,
                index,
                blocks,
            } => write!(
                f,
                "block index {index} on axis {axis} is outside the chunk grid ({blocks} blocks)"
            ),
        }
    }
}

impl std::error::Error for BlockError {}

/// Structure of an N-dimensional array.
///
/// `chunks` holds one inner vector per axis enumerating the chunk extents
/// along that axis. The invariant `shape[i] == chunks[i].iter().sum()`
/// must hold on every axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrayStructure {
    pub data_type: DataType,
    pub shape: Vec<u64>,
    pub chunks: Vec<Vec<u64>>,
    /// Optional axis names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<Vec<String>>,
}

impl ArrayStructure {
    /// A single-chunk structure covering the whole shape.
    pub fn one_chunk(data_type: DataType, shape: Vec<u64>) -> Self {
        let chunks = shape.iter().map(|dim| vec![*dim]).collect();
        Self {
            data_type,
            shape,
            chunks,
            dims: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Size in bytes of the full array, used by the response size guard.
    pub fn byte_size(&self) -> u64 {
        self.element_count() * u64::from(self.data_type.item_size)
    }

    /// Number of blocks along each axis.
    pub fn blocks_per_axis(&self) -> Vec<u64> {
        self.chunks.iter().map(|axis| axis.len() as u64).collect()
    }

    /// The shape of the block at `block`, or an error if the index is
    /// outside the chunk grid.
    pub fn block_shape(&self, block: &[u64]) -> Result<Vec<u64>, BlockError> {
        if block.len() != self.chunks.len() {
            return Err(BlockError::WrongRank {
                expected: self.chunks.len(),
                got: block.len(),
            });
        }
        let mut shape = Vec::with_capacity(block.len());
        for (axis, (&index, extents)) in block.iter().zip(&self.chunks).enumerate() {
            match extents.get(index as usize) {
                Some(extent) => shape.push(*extent),
                None => {
                    return Err(BlockError::OutOfRange {
                        axis,
                        index,
                        blocks: extents.len() as u64,
                    })
                }
            }
        }
        Ok(shape)
    }

    /// Element offset of the block's origin along each axis.
    pub fn block_origin(&self, block: &[u64]) -> Result<Vec<u64>, BlockError> {
        // block_shape performs the bounds checks.
        self.block_shape(block)?;
        Ok(block
            .iter()
            .zip(&self.chunks)
            .map(|(&index, extents)| extents[..index as usize].iter().sum())
            .collect())
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
        if let Some(dims) = &self.dims {
            if dims.len() != self.shape.len() {
                return Err(format!(
                    "{} axis names given for a rank-{} array",
                    dims.len(),
                    self.shape.len()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> ArrayStructure {
        ArrayStructure {
            data_type: DataType::float64(),
            shape: vec![50, 30],
            chunks: vec![vec![20, 20, 10], vec![15, 15]],
            dims: None,
        }
    }

    #[test]
    fn chunk_consistency_holds() {
        assert!(structure().validate().is_ok());
        let mut bad = structure();
        bad.chunks[0] = vec![20, 20];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn block_shape_inside_grid() {
        let s = structure();
        assert_eq!(s.block_shape(&[2, 1]).unwrap(), vec![10, 15]);
        assert_eq!(s.block_origin(&[2, 1]).unwrap(), vec![40, 15]);
        assert_eq!(s.blocks_per_axis(), vec![3, 2]);
    }

    #[test]
    fn block_shape_outside_grid() {
        let s = structure();
        assert!(matches!(
            s.block_shape(&[3, 0]),
            Err(BlockError::OutOfRange { axis: 0, .. })
        ));
        assert!(matches!(
            s.block_shape(&[0]),
            Err(BlockError::WrongRank { .. })
        ));
    }

    #[test]
    fn byte_size() {
        assert_eq!(structure().byte_size(), 50 * 30 * 8);
    }
}
