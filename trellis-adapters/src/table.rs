//! In-memory partitioned table adapter.

use std::sync::Arc;

use async_trait::async_trait;
use std::sync::RwLock;
use trellis_model::{AccessBlob, Spec, Structure, TableStructure};

use crate::payload::TablePayload;
use crate::{Adapter, AdapterError, AnyAdapter, TableRead, TableWrite};

/// A partitioned table held in memory as columnar payloads.
pub struct MemoryTableAdapter {
    schema: Vec<trellis_model::TableColumn>,
    partitions: RwLock<Vec<TablePayload>>,
    metadata: serde_json::Value,
    specs: Vec<Spec>,
    access_blob: Option<AccessBlob>,
}

impl MemoryTableAdapter {
    /// Build from existing partitions. All partitions must share the
    /// first partition's schema.
    pub fn new(partitions: Vec<TablePayload>) -> Result<Self, AdapterError> {
        if partitions.is_empty() {
            return Err(AdapterError::BadRequest(
                "table must have at least one partition".to_string(),
            ));
        }
        let schema = partitions[0].column_schema();
        for partition in &partitions {
            partition.validate()?;
            if partition.column_schema() != schema {
                return Err(AdapterError::BadRequest(
                    "partition schemas do not match".to_string(),
                ));
            }
        }
        Ok(Self {
            schema,
            partitions: RwLock::new(partitions),
            metadata: serde_json::json!({}),
            specs: Vec::new(),
            access_blob: None,
        })
    }

    pub fn from_payload(payload: TablePayload) -> Result<Self, AdapterError> {
        Self::new(vec![payload])
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
        AnyAdapter::from_writable_table(Arc::new(self))
    }

    fn check_schema(&self, payload: &TablePayload) -> Result<(), AdapterError> {
        if payload.column_schema() != self.schema {
            return Err(AdapterError::BadRequest(
                "payload schema does not match table schema".to_string(),
            ));
        }
        Ok(())
    }

    fn read_partitions(&self) -> std::sync::RwLockReadGuard<'_, Vec<TablePayload>> {
        self.partitions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_partitions(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TablePayload>> {
        self.partitions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the structure; row counts reflect current partition
    /// contents.
    fn structure_snapshot(&self, partitions: &[TablePayload]) -> TableStructure {
        let counts: Vec<u64> = partitions.iter().map(|p| p.row_count() as u64).collect();
        let total = counts.iter().sum();
        let mut structure = TableStructure::new(self.schema.clone(), partitions.len());
        structure.partition_row_counts = Some(counts);
        structure.row_count = Some(total);
        structure
    }
}

impl Adapter for MemoryTableAdapter {
    fn structure(&self) -> Structure {
        let partitions = self.read_partitions();
        Structure::Table(self.structure_snapshot(&partitions))
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
impl TableRead for MemoryTableAdapter {
    async fn read(&self, columns: Option<&[String]>) -> Result<TablePayload, AdapterError> {
        let partitions = self.read_partitions();
        let mut combined = TablePayload::default();
        for partition in partitions.iter() {
            combined.append(partition)?;
        }
        match columns {
            Some(names) => combined.select(names),
            None => Ok(combined),
        }
    }

    async fn read_partition(
        &self,
        index: usize,
        columns: Option<&[String]>,
    ) -> Result<TablePayload, AdapterError> {
        let partitions = self.read_partitions();
        let partition = partitions.get(index).ok_or_else(|| {
            AdapterError::BadRequest(format!(
                "partition {index} is out of range ({} partitions)",
                partitions.len()
            ))
        })?;
        match columns {
            Some(names) => partition.select(names),
            None => Ok(partition.clone()),
        }
    }
}

#[async_trait]
impl TableWrite for MemoryTableAdapter {
    async fn write(&self, payload: TablePayload) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        let mut partitions = self.write_partitions();
        *partitions = vec![payload];
        Ok(())
    }

    async fn write_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        let mut partitions = self.write_partitions();
        match partitions.get_mut(index) {
            Some(slot) => {
                *slot = payload;
                Ok(())
            }
            None => Err(AdapterError::BadRequest(format!(
                "partition {index} is out of range ({} partitions)",
                partitions.len()
            ))),
        }
    }

    async fn append_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        let mut partitions = self.write_partitions();
        match partitions.get_mut(index) {
            Some(slot) => slot.append(&payload),
            None => Err(AdapterError::BadRequest(format!(
                "partition {index} is out of range ({} partitions)",
                partitions.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Column;

    fn payload(rows: &[(i64, &str)]) -> TablePayload {
        TablePayload {
            columns: vec![
                (
                    "num".into(),
                    Column::Int64(rows.iter().map(|(n, _)| *n).collect()),
                ),
                (
                    "name".into(),
                    Column::Utf8(rows.iter().map(|(_, s)| s.to_string()).collect()),
                ),
            ],
        }
    }

    #[tokio::test]
    async fn read_full_concatenates_partitions() {
        let adapter =
            MemoryTableAdapter::new(vec![payload(&[(1, "a"), (2, "b")]), payload(&[(3, "c")])])
                .unwrap();
        let full = adapter.read(None).await.unwrap();
        assert_eq!(full.row_count(), 3);
        let selected = adapter.read(Some(&["num".to_string()])).await.unwrap();
        assert_eq!(selected.columns.len(), 1);
    }

    #[tokio::test]
    async fn append_partition_grows_rows() {
        let adapter = MemoryTableAdapter::from_payload(payload(&[(1, "a")])).unwrap();
        adapter
            .append_partition(0, payload(&[(2, "b")]))
            .await
            .unwrap();
        let partition = adapter.read_partition(0, None).await.unwrap();
        assert_eq!(partition.row_count(), 2);
    }

    #[tokio::test]
    async fn partition_out_of_range() {
        let adapter = MemoryTableAdapter::from_payload(payload(&[(1, "a")])).unwrap();
        assert!(adapter.read_partition(5, None).await.is_err());
    }

    #[tokio::test]
    async fn schema_mismatch_rejected() {
        let adapter = MemoryTableAdapter::from_payload(payload(&[(1, "a")])).unwrap();
        let other = TablePayload {
            columns: vec![("other".into(), Column::Bool(vec![true]))],
        };
        assert!(adapter.write(other).await.is_err());
    }
}
