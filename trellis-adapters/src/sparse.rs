//! In-memory sparse (COO) adapter.

use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use trellis_model::{AccessBlob, CooStructure, NdSlice, ResolvedAxis, Spec, Structure};

use crate::payload::SparsePayload;
use crate::{Adapter, AdapterError, AnyAdapter, SparseRead, SparseWrite};

/// A sparse array held in memory as per-block COO payloads.
///
/// Blocks are stored independently; a full read concatenates them with
/// coordinates rebased to the array origin.
pub struct MemorySparseAdapter {
    structure: CooStructure,
    blocks: RwLock<std::collections::BTreeMap<Vec<u64>, SparsePayload>>,
    metadata: serde_json::Value,
    specs: Vec<Spec>,
    access_blob: Option<AccessBlob>,
}

impl MemorySparseAdapter {
    pub fn new(structure: CooStructure) -> Result<Self, AdapterError> {
        structure.validate().map_err(AdapterError::BadRequest)?;
        Ok(Self {
            structure,
            blocks: RwLock::new(std::collections::BTreeMap::new()),
            metadata: serde_json::json!({}),
            specs: Vec::new(),
            access_blob: None,
        })
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_access_blob(mut self, access_blob: AccessBlob) -> Self {
        self.access_blob = Some(access_blob);
        self
    }

    pub fn into_any(self) -> AnyAdapter {
        AnyAdapter::from_writable_sparse(Arc::new(self))
    }

    fn block_origin(&self, block: &[u64]) -> Result<Vec<u64>, AdapterError> {
        if block.len() != self.structure.chunks.len() {
            return Err(AdapterError::BadRequest(format!(
                "block index has {} axes; array has {}",
                block.len(),
                self.structure.chunks.len()
            )));
        }
        let mut origin = Vec::with_capacity(block.len());
        for (axis, (&index, extents)) in block.iter().zip(&self.structure.chunks).enumerate() {
            if index as usize >= extents.len() {
                return Err(AdapterError::BadRequest(format!(
                    "block index {index} on axis {axis} is outside the chunk grid"
                )));
            }
            origin.push(extents[..index as usize].iter().sum());
        }
        Ok(origin)
    }
}

impl Adapter for MemorySparseAdapter {
    fn structure(&self) -> Structure {
        Structure::Sparse(self.structure.clone())
    }

    fn metadata(&self) -> serde_json::Value {
        self.metadata.clone()
    }

    fn specs(&self) -> Vec<Spec> {
        self.specs.clone()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        self.access_blob.clone()
    }
}

#[async_trait]
impl SparseRead for MemorySparseAdapter {
    async fn read(&self, slice: &NdSlice) -> Result<SparsePayload, AdapterError> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        let rank = self.structure.rank();
        let mut coords: Vec<Vec<u64>> = vec![Vec::new(); rank];
        let mut values: Vec<f64> = Vec::new();
        for (block, payload) in blocks.iter() {
            let origin = self.block_origin(block)?;
            let data = payload.data.as_f64()?;
            for entry in 0..payload.nnz() {
                for axis in 0..rank {
                    coords[axis].push(origin[axis] + payload.coords[axis][entry]);
                }
                values.push(data[entry]);
            }
        }
        drop(blocks);

        let payload = SparsePayload {
            coords,
            data: crate::payload::ArrayPayload::from_f64(vec![values.len() as u64], &values),
        };
        if slice.is_all() {
            return Ok(payload);
        }
        filter_sparse(&payload, slice, &self.structure.shape)
    }

    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<SparsePayload, AdapterError> {
        // Validates the index even when the block holds no data.
        self.block_origin(block)?;
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        let payload = blocks.get(block).cloned().unwrap_or_else(|| SparsePayload {
            coords: vec![Vec::new(); self.structure.rank()],
            data: crate::payload::ArrayPayload::from_f64(vec![0], &[]),
        });
        drop(blocks);
        match slice {
            Some(slice) => {
                let block_shape: Vec<u64> = block
                    .iter()
                    .zip(&self.structure.chunks)
                    .map(|(&index, extents)| extents[index as usize])
                    .collect();
                filter_sparse(&payload, slice, &block_shape)
            }
            None => Ok(payload),
        }
    }
}

#[async_trait]
impl SparseWrite for MemorySparseAdapter {
    async fn write_block(
        &self,
        block: &[u64],
        payload: SparsePayload,
    ) -> Result<(), AdapterError> {
        payload.validate()?;
        self.block_origin(block)?;
        if payload.coords.len() != self.structure.rank() {
            return Err(AdapterError::BadRequest(format!(
                "payload has {} coordinate axes; array has rank {}",
                payload.coords.len(),
                self.structure.rank()
            )));
        }
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.insert(block.to_vec(), payload);
        Ok(())
    }
}

/// Keep only the entries a slice selects. Only plain contiguous ranges
/// and integer picks are meaningful for COO data; strides and mean
/// aggregation are rejected.
fn filter_sparse(
    payload: &SparsePayload,
    slice: &NdSlice,
    shape: &[u64],
) -> Result<SparsePayload, AdapterError> {
    let resolved = slice
        .resolve(shape)
        .map_err(|err| AdapterError::BadRequest(err.to_string()))?;
    let mut ranges = Vec::with_capacity(resolved.len());
    for axis in &resolved {
        match *axis {
            ResolvedAxis::Pick(index) => ranges.push((index, index + 1)),
            ResolvedAxis::Strided { start, step: 1, len } => {
                ranges.push((start as u64, start as u64 + len))
            }
            _ => {
                return Err(AdapterError::BadRequest(
                    "sparse reads support only contiguous slices".to_string(),
                ))
            }
        }
    }

    let data = payload.data.as_f64()?;
    let rank = payload.coords.len();
    let mut coords: Vec<Vec<u64>> = vec![Vec::new(); rank];
    let mut values = Vec::new();
    'entries: for entry in 0..payload.nnz() {
        for axis in 0..rank {
            let coordinate = payload.coords[axis][entry];
            let (lo, hi) = ranges[axis];
            if coordinate < lo || coordinate >= hi {
                continue 'entries;
            }
        }
        for axis in 0..rank {
            coords[axis].push(payload.coords[axis][entry] - ranges[axis].0);
        }
        values.push(data[entry]);
    }
    Ok(SparsePayload {
        coords,
        data: crate::payload::ArrayPayload::from_f64(vec![values.len() as u64], &values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ArrayPayload;
    use trellis_model::DataType;

    fn adapter() -> MemorySparseAdapter {
        MemorySparseAdapter::new(CooStructure {
            data_type: DataType::float64(),
            coord_data_type: DataType::uint64(),
            shape: vec![4, 4],
            chunks: vec![vec![2, 2], vec![4]],
        })
        .unwrap()
    }

    fn block_payload() -> SparsePayload {
        SparsePayload {
            coords: vec![vec![0, 1], vec![1, 3]],
            data: ArrayPayload::from_f64(vec![2], &[5.0, 7.0]),
        }
    }

    #[tokio::test]
    async fn block_round_trip_and_rebased_full_read() {
        let adapter = adapter();
        adapter.write_block(&[1, 0], block_payload()).await.unwrap();

        let block = adapter.read_block(&[1, 0], None).await.unwrap();
        assert_eq!(block.nnz(), 2);

        // Full read rebases coordinates by the block origin (2, 0).
        let full = adapter.read(&NdSlice::all()).await.unwrap();
        assert_eq!(full.coords[0], vec![2, 3]);
        assert_eq!(full.coords[1], vec![1, 3]);
    }

    #[tokio::test]
    async fn sliced_read_filters_entries() {
        let adapter = adapter();
        adapter.write_block(&[1, 0], block_payload()).await.unwrap();
        let sliced = adapter.read(&"2:3,:".parse().unwrap()).await.unwrap();
        assert_eq!(sliced.nnz(), 1);
        assert_eq!(sliced.coords[0], vec![0]);
        assert_eq!(sliced.data.as_f64().unwrap(), vec![5.0]);
    }

    #[tokio::test]
    async fn bad_block_rejected() {
        let adapter = adapter();
        assert!(adapter.read_block(&[9, 0], None).await.is_err());
    }
}
