//! In-memory array adapter.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use trellis_model::{AccessBlob, ArrayStructure, NdSlice, Spec, Structure};

use crate::payload::{c_order_strides, slice_array, write_region, ArrayPayload};
use crate::{Adapter, AdapterError, AnyAdapter, ArrayRead, ArrayWrite};

/// An array held fully in memory as C-order bytes.
///
/// Reads slice out of the shared buffer; writes (full or per-block)
/// replace regions in place under a `RwLock`.
pub struct MemoryArrayAdapter {
    structure: ArrayStructure,
    data: RwLock<Vec<u8>>,
    metadata: serde_json::Value,
    specs: Vec<Spec>,
    access_blob: Option<AccessBlob>,
}

impl MemoryArrayAdapter {
    pub fn new(structure: ArrayStructure, data: Bytes) -> Result<Self, AdapterError> {
        structure
            .validate()
            .map_err(AdapterError::BadRequest)?;
        let expected = structure.byte_size() as usize;
        if data.len() != expected {
            return Err(AdapterError::BadRequest(format!(
                "array data is {} bytes; structure requires {expected}",
                data.len()
            )));
        }
        Ok(Self {
            structure,
            data: RwLock::new(data.to_vec()),
            metadata: serde_json::json!({}),
            specs: Vec::new(),
            access_blob: None,
        })
    }

    /// An all-zeros array of the given structure.
    pub fn zeros(structure: ArrayStructure) -> Result<Self, AdapterError> {
        let len = structure.byte_size() as usize;
        Self::new(structure, Bytes::from(vec![0u8; len]))
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_specs(mut self, specs: Vec<Spec>) -> Self {
        self.specs = specs;
        self
    }

    pub fn with_access_blob(mut self, access_blob: AccessBlob) -> Self {
        self.access_blob = Some(access_blob);
        self
    }

    pub fn into_any(self) -> AnyAdapter {
        AnyAdapter::from_writable_array(Arc::new(self))
    }

    fn check_block(&self, block: &[u64]) -> Result<(Vec<u64>, Vec<u64>), AdapterError> {
        let shape = self
            .structure
            .block_shape(block)
            .map_err(|err| AdapterError::BadRequest(err.to_string()))?;
        let origin = self
            .structure
            .block_origin(block)
            .map_err(|err| AdapterError::BadRequest(err.to_string()))?;
        Ok((shape, origin))
    }
}

impl Adapter for MemoryArrayAdapter {
    fn structure(&self) -> Structure {
        Structure::Array(self.structure.clone())
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
impl ArrayRead for MemoryArrayAdapter {
    async fn read(&self, slice: &NdSlice) -> Result<ArrayPayload, AdapterError> {
        let data = self.data.read().await;
        let full = ArrayPayload::new(
            self.structure.data_type.clone(),
            self.structure.shape.clone(),
            Bytes::from(data.clone()),
        );
        slice_array(&full, slice)
    }

    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<ArrayPayload, AdapterError> {
        let (shape, origin) = self.check_block(block)?;
        let data = self.data.read().await;
        let item = self.structure.data_type.item_size as usize;
        let strides = c_order_strides(&self.structure.shape);

        // Gather the block region out of the full buffer.
        let count: u64 = shape.iter().product();
        let mut out = Vec::with_capacity(count as usize * item);
        let mut counters = vec![0u64; shape.len()];
        for _ in 0..count {
            let mut flat = 0u64;
            for (axis, &counter) in counters.iter().enumerate() {
                flat += (origin[axis] + counter) * strides[axis];
            }
            let offset = flat as usize * item;
            out.extend_from_slice(&data[offset..offset + item]);
            for axis in (0..counters.len()).rev() {
                counters[axis] += 1;
                if counters[axis] < shape[axis] {
                    break;
                }
                counters[axis] = 0;
            }
        }
        drop(data);

        let payload = ArrayPayload::new(self.structure.data_type.clone(), shape, Bytes::from(out));
        match slice {
            Some(slice) => slice_array(&payload, slice),
            None => Ok(payload),
        }
    }
}

#[async_trait]
impl ArrayWrite for MemoryArrayAdapter {
    async fn write(&self, payload: ArrayPayload) -> Result<(), AdapterError> {
        if payload.shape != self.structure.shape {
            return Err(AdapterError::BadRequest(format!(
                "payload shape {:?} does not match array shape {:?}",
                payload.shape, self.structure.shape
            )));
        }
        if payload.bytes.len() as u64 != payload.expected_len() {
            return Err(AdapterError::BadRequest(format!(
                "payload is {} bytes; shape and dtype require {}",
                payload.bytes.len(),
                payload.expected_len()
            )));
        }
        let mut data = self.data.write().await;
        data.copy_from_slice(&payload.bytes);
        Ok(())
    }

    async fn write_block(
        &self,
        block: &[u64],
        payload: ArrayPayload,
    ) -> Result<(), AdapterError> {
        let (shape, origin) = self.check_block(block)?;
        if payload.shape != shape {
            return Err(AdapterError::BadRequest(format!(
                "payload shape {:?} does not match block shape {shape:?}",
                payload.shape
            )));
        }
        if payload.bytes.len() as u64 != payload.expected_len() {
            return Err(AdapterError::BadRequest(format!(
                "payload is {} bytes; block shape and dtype require {}",
                payload.bytes.len(),
                payload.expected_len()
            )));
        }
        let mut data = self.data.write().await;
        write_region(&mut data, &self.structure.shape, &origin, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_model::DataType;

    fn adapter() -> MemoryArrayAdapter {
        MemoryArrayAdapter::zeros(ArrayStructure {
            data_type: DataType::float64(),
            shape: vec![50, 30],
            chunks: vec![vec![20, 20, 10], vec![15, 15]],
            dims: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn block_write_read_round_trip() {
        let adapter = adapter();
        let ones = ArrayPayload::from_f64(vec![10, 15], &vec![1.0; 150]);
        adapter.write_block(&[2, 1], ones.clone()).await.unwrap();

        let back = adapter.read_block(&[2, 1], None).await.unwrap();
        assert_eq!(back.shape, vec![10, 15]);
        assert_eq!(back.bytes, ones.bytes);

        // Neighboring block is untouched.
        let neighbor = adapter.read_block(&[2, 0], None).await.unwrap();
        assert!(neighbor.as_f64().unwrap().iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn block_outside_grid_is_bad_request() {
        let adapter = adapter();
        let err = adapter.read_block(&[3, 0], None).await.unwrap_err();
        assert!(matches!(err, AdapterError::BadRequest(_)));
    }

    #[tokio::test]
    async fn block_sub_slice() {
        let adapter = adapter();
        let values: Vec<f64> = (0..300).map(|i| i as f64).collect();
        adapter
            .write_block(&[0, 0], ArrayPayload::from_f64(vec![20, 15], &values))
            .await
            .unwrap();
        let sliced = adapter
            .read_block(&[0, 0], Some(&"2:3,0:5".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(sliced.shape, vec![1, 5]);
        assert_eq!(
            sliced.as_f64().unwrap(),
            vec![30.0, 31.0, 32.0, 33.0, 34.0]
        );
    }

    #[tokio::test]
    async fn full_write_shape_checked() {
        let adapter = adapter();
        let wrong = ArrayPayload::from_f64(vec![2, 2], &[0.0; 4]);
        assert!(matches!(
            adapter.write(wrong).await,
            Err(AdapterError::BadRequest(_))
        ));
    }
}
