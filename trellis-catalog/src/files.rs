//! File-backed adapters for internally-managed node data.
//!
//! Writable nodes own a managed directory (one per data source). Array
//! chunks live as raw C-order files named by block index (`"2.1"`),
//! table partitions as CSV (`"partition-0.csv"`), awkward buffers as
//! one file per buffer, and sparse blocks as JSON (`"block-2.1.json"`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use trellis_adapters::payload::{
    slice_array, write_region, ArrayPayload, Column, SparsePayload, TablePayload,
};
use trellis_adapters::{
    Adapter, AdapterError, AnyAdapter, ArrayRead, ArrayWrite, AwkwardBuffers, AwkwardWrite,
    SparseRead, SparseWrite, TableRead, TableWrite,
};
use trellis_model::{
    AccessBlob, ArrayStructure, AwkwardStructure, ColumnType, CooStructure, NdSlice, Spec,
    Structure, TableStructure,
};

/// Node attributes shared by every file adapter.
#[derive(Clone)]
pub struct NodeContext {
    pub metadata: serde_json::Value,
    pub specs: Vec<Spec>,
    pub access_blob: Option<AccessBlob>,
}

fn io_err(err: std::io::Error) -> AdapterError {
    AdapterError::Internal(format!("storage i/o: {err}"))
}

fn block_file_name(block: &[u64]) -> String {
    block
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

// ── Arrays ───────────────────────────────────────────────────────────────

pub struct FileArrayAdapter {
    structure: ArrayStructure,
    dir: PathBuf,
    context: NodeContext,
}

impl FileArrayAdapter {
    pub fn new(structure: ArrayStructure, dir: impl Into<PathBuf>, context: NodeContext) -> Self {
        Self {
            structure,
            dir: dir.into(),
            context,
        }
    }

    pub fn into_any(self, writable: bool) -> AnyAdapter {
        let adapter = Arc::new(self);
        if writable {
            AnyAdapter::from_writable_array(adapter)
        } else {
            AnyAdapter::from_array(adapter)
        }
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

    async fn read_block_bytes(&self, block: &[u64], shape: &[u64]) -> Result<Vec<u8>, AdapterError> {
        let expected =
            shape.iter().product::<u64>() as usize * self.structure.data_type.item_size as usize;
        let path = self.dir.join(block_file_name(block));
        match tokio::fs::read(&path).await {
            Ok(data) if data.len() == expected => Ok(data),
            Ok(data) => Err(AdapterError::Internal(format!(
                "block file {} is {} bytes; expected {expected}",
                path.display(),
                data.len()
            ))),
            // Unwritten blocks read as zeros.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(vec![0u8; expected]),
            Err(err) => Err(io_err(err)),
        }
    }

    /// Iterate every block index in the chunk grid.
    fn all_blocks(&self) -> Vec<Vec<u64>> {
        let per_axis = self.structure.blocks_per_axis();
        let total: u64 = per_axis.iter().product();
        let mut blocks = Vec::with_capacity(total as usize);
        let mut counters = vec![0u64; per_axis.len()];
        for _ in 0..total {
            blocks.push(counters.clone());
            for axis in (0..counters.len()).rev() {
                counters[axis] += 1;
                if counters[axis] < per_axis[axis] {
                    break;
                }
                counters[axis] = 0;
            }
        }
        blocks
    }
}

impl Adapter for FileArrayAdapter {
    fn structure(&self) -> Structure {
        Structure::Array(self.structure.clone())
    }

    fn metadata(&self) -> serde_json::Value {
        self.context.metadata.clone()
    }

    fn specs(&self) -> Vec<Spec> {
        self.context.specs.clone()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        self.context.access_blob.clone()
    }
}

#[async_trait]
impl ArrayRead for FileArrayAdapter {
    async fn read(&self, slice: &NdSlice) -> Result<ArrayPayload, AdapterError> {
        let mut full = vec![0u8; self.structure.byte_size() as usize];
        for block in self.all_blocks() {
            let (shape, origin) = self.check_block(&block)?;
            let data = self.read_block_bytes(&block, &shape).await?;
            let payload = ArrayPayload::new(
                self.structure.data_type.clone(),
                shape,
                Bytes::from(data),
            );
            write_region(&mut full, &self.structure.shape, &origin, &payload)?;
        }
        let payload = ArrayPayload::new(
            self.structure.data_type.clone(),
            self.structure.shape.clone(),
            Bytes::from(full),
        );
        slice_array(&payload, slice)
    }

    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<ArrayPayload, AdapterError> {
        let (shape, _) = self.check_block(block)?;
        let data = self.read_block_bytes(block, &shape).await?;
        let payload = ArrayPayload::new(self.structure.data_type.clone(), shape, Bytes::from(data));
        match slice {
            Some(slice) => slice_array(&payload, slice),
            None => Ok(payload),
        }
    }
}

#[async_trait]
impl ArrayWrite for FileArrayAdapter {
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
        for block in self.all_blocks() {
            let (shape, origin) = self.check_block(&block)?;
            // Cut the block region out of the full payload.
            let spec: String = origin
                .iter()
                .zip(&shape)
                .map(|(o, s)| format!("{}:{}", o, o + s))
                .collect::<Vec<_>>()
                .join(",");
            let slice: NdSlice = spec
                .parse()
                .map_err(|err: trellis_model::SliceError| AdapterError::Internal(err.to_string()))?;
            let region = slice_array(&payload, &slice)?;
            self.write_block(&block, region).await?;
        }
        Ok(())
    }

    async fn write_block(&self, block: &[u64], payload: ArrayPayload) -> Result<(), AdapterError> {
        let (shape, _) = self.check_block(block)?;
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
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(self.dir.join(block_file_name(block)), &payload.bytes)
            .await
            .map_err(io_err)
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

pub struct FileTableAdapter {
    structure: TableStructure,
    dir: PathBuf,
    context: NodeContext,
}

impl FileTableAdapter {
    pub fn new(structure: TableStructure, dir: impl Into<PathBuf>, context: NodeContext) -> Self {
        Self {
            structure,
            dir: dir.into(),
            context,
        }
    }

    pub fn into_any(self, writable: bool) -> AnyAdapter {
        let adapter = Arc::new(self);
        if writable {
            AnyAdapter::from_writable_table(adapter)
        } else {
            AnyAdapter::from_table(adapter)
        }
    }

    fn partition_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("partition-{index}.csv"))
    }

    fn check_partition(&self, index: usize) -> Result<(), AdapterError> {
        if index >= self.structure.npartitions {
            return Err(AdapterError::BadRequest(format!(
                "partition {index} is out of range ({} partitions)",
                self.structure.npartitions
            )));
        }
        Ok(())
    }

    async fn load_partition(&self, index: usize) -> Result<TablePayload, AdapterError> {
        let path = self.partition_path(index);
        let schema = self.structure.clone();
        match tokio::fs::read(&path).await {
            Ok(data) => {
                // CSV decode is CPU work; keep it off the serving task.
                tokio::task::spawn_blocking(move || decode_csv(&data, &schema))
                    .await
                    .map_err(|err| AdapterError::Internal(err.to_string()))?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(empty_payload(&self.structure))
            }
            Err(err) => Err(io_err(err)),
        }
    }

    async fn store_partition(
        &self,
        index: usize,
        payload: &TablePayload,
    ) -> Result<(), AdapterError> {
        let owned = payload.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_csv(&owned))
            .await
            .map_err(|err| AdapterError::Internal(err.to_string()))??;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(self.partition_path(index), encoded)
            .await
            .map_err(io_err)
    }

    fn check_schema(&self, payload: &TablePayload) -> Result<(), AdapterError> {
        if payload.column_schema() != self.structure.columns {
            return Err(AdapterError::BadRequest(
                "payload schema does not match table schema".to_string(),
            ));
        }
        Ok(())
    }
}

impl Adapter for FileTableAdapter {
    fn structure(&self) -> Structure {
        Structure::Table(self.structure.clone())
    }

    fn metadata(&self) -> serde_json::Value {
        self.context.metadata.clone()
    }

    fn specs(&self) -> Vec<Spec> {
        self.context.specs.clone()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        self.context.access_blob.clone()
    }
}

#[async_trait]
impl TableRead for FileTableAdapter {
    async fn read(&self, columns: Option<&[String]>) -> Result<TablePayload, AdapterError> {
        let mut combined = TablePayload::default();
        for index in 0..self.structure.npartitions {
            let partition = self.load_partition(index).await?;
            combined.append(&partition)?;
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
        self.check_partition(index)?;
        let partition = self.load_partition(index).await?;
        match columns {
            Some(names) => partition.select(names),
            None => Ok(partition),
        }
    }
}

#[async_trait]
impl TableWrite for FileTableAdapter {
    async fn write(&self, payload: TablePayload) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        self.store_partition(0, &payload).await?;
        // Drop any stale higher partitions.
        for index in 1..self.structure.npartitions {
            let path = self.partition_path(index);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(err)),
            }
        }
        Ok(())
    }

    async fn write_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        self.check_partition(index)?;
        self.store_partition(index, &payload).await
    }

    async fn append_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError> {
        payload.validate()?;
        self.check_schema(&payload)?;
        self.check_partition(index)?;
        let mut partition = self.load_partition(index).await?;
        if partition.row_count() == 0 {
            partition = empty_payload(&self.structure);
        }
        partition.append(&payload)?;
        self.store_partition(index, &partition).await
    }
}

fn empty_payload(structure: &TableStructure) -> TablePayload {
    TablePayload {
        columns: structure
            .columns
            .iter()
            .map(|column| {
                let data = match column.data_type {
                    ColumnType::Bool => Column::Bool(Vec::new()),
                    ColumnType::Int64 => Column::Int64(Vec::new()),
                    ColumnType::Float64 => Column::Float64(Vec::new()),
                    ColumnType::Utf8 => Column::Utf8(Vec::new()),
                };
                (column.name.clone(), data)
            })
            .collect(),
    }
}

fn decode_csv(data: &[u8], structure: &TableStructure) -> Result<TablePayload, AdapterError> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader
        .headers()
        .map_err(|err| AdapterError::Internal(err.to_string()))?
        .clone();
    let mut payload = empty_payload(structure);
    for record in reader.records() {
        let record = record.map_err(|err| AdapterError::Internal(err.to_string()))?;
        for (name, column) in payload.columns.iter_mut() {
            let position = headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| AdapterError::Internal(format!("column {name} missing in CSV")))?;
            let raw = record.get(position).unwrap_or_default();
            append_cell(column, raw)?;
        }
    }
    Ok(payload)
}

fn append_cell(column: &mut Column, raw: &str) -> Result<(), AdapterError> {
    let parse_err =
        |err: String| AdapterError::Internal(format!("bad CSV cell {raw:?}: {err}"));
    match column {
        Column::Bool(values) => values.push(
            raw.parse::<bool>()
                .map_err(|err| parse_err(err.to_string()))?,
        ),
        Column::Int64(values) => values.push(
            raw.parse::<i64>()
                .map_err(|err| parse_err(err.to_string()))?,
        ),
        Column::Float64(values) => values.push(
            raw.parse::<f64>()
                .map_err(|err| parse_err(err.to_string()))?,
        ),
        Column::Utf8(values) => values.push(raw.to_string()),
    }
    Ok(())
}

fn encode_csv(payload: &TablePayload) -> Result<Vec<u8>, AdapterError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(payload.columns.iter().map(|(name, _)| name.as_str()))
        .map_err(|err| AdapterError::Internal(err.to_string()))?;
    for row in 0..payload.row_count() {
        let cells: Vec<String> = payload
            .columns
            .iter()
            .map(|(_, column)| match column {
                Column::Bool(values) => values[row].to_string(),
                Column::Int64(values) => values[row].to_string(),
                Column::Float64(values) => values[row].to_string(),
                Column::Utf8(values) => values[row].clone(),
            })
            .collect();
        writer
            .write_record(&cells)
            .map_err(|err| AdapterError::Internal(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| AdapterError::Internal(err.to_string()))
}

// ── Awkward ──────────────────────────────────────────────────────────────

pub struct FileAwkwardAdapter {
    structure: AwkwardStructure,
    dir: PathBuf,
    context: NodeContext,
}

impl FileAwkwardAdapter {
    pub fn new(structure: AwkwardStructure, dir: impl Into<PathBuf>, context: NodeContext) -> Self {
        Self {
            structure,
            dir: dir.into(),
            context,
        }
    }

    pub fn into_any(self, writable: bool) -> AnyAdapter {
        let adapter = Arc::new(self);
        if writable {
            AnyAdapter::from_writable_awkward(adapter)
        } else {
            AnyAdapter::from_awkward(adapter)
        }
    }

    fn buffer_path(&self, name: &str) -> Result<PathBuf, AdapterError> {
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || name.starts_with('.')
        {
            return Err(AdapterError::BadRequest(format!(
                "invalid buffer name: {name:?}"
            )));
        }
        Ok(self.dir.join(name))
    }
}

impl Adapter for FileAwkwardAdapter {
    fn structure(&self) -> Structure {
        Structure::Awkward(self.structure.clone())
    }

    fn metadata(&self) -> serde_json::Value {
        self.context.metadata.clone()
    }

    fn specs(&self) -> Vec<Spec> {
        self.context.specs.clone()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        self.context.access_blob.clone()
    }
}

#[async_trait]
impl AwkwardBuffers for FileAwkwardAdapter {
    async fn read_buffers(
        &self,
        form_keys: &[String],
    ) -> Result<BTreeMap<String, Bytes>, AdapterError> {
        let selected: Vec<String> = if form_keys.is_empty() {
            self.structure.buffer_names().map(String::from).collect()
        } else {
            let mut selected = Vec::new();
            for key in form_keys {
                let matches: Vec<String> = self
                    .structure
                    .buffer_names()
                    .filter(|name| *name == key || name.starts_with(&format!("{key}-")))
                    .map(String::from)
                    .collect();
                if matches.is_empty() {
                    return Err(AdapterError::NotFound(format!("no such buffer: {key}")));
                }
                selected.extend(matches);
            }
            selected
        };
        let mut buffers = BTreeMap::new();
        for name in selected {
            let path = self.buffer_path(&name)?;
            let data = tokio::fs::read(&path).await.map_err(io_err)?;
            buffers.insert(name, Bytes::from(data));
        }
        Ok(buffers)
    }
}

#[async_trait]
impl AwkwardWrite for FileAwkwardAdapter {
    async fn write(
        &self,
        _form: serde_json::Value,
        _length: u64,
        buffers: BTreeMap<String, Bytes>,
    ) -> Result<(), AdapterError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        for (name, bytes) in &buffers {
            let path = self.buffer_path(name)?;
            tokio::fs::write(path, bytes).await.map_err(io_err)?;
        }
        Ok(())
    }
}

// ── Sparse ───────────────────────────────────────────────────────────────

#[derive(serde::Serialize, serde::Deserialize)]
struct SparseBlockFile {
    coords: Vec<Vec<u64>>,
    data: Vec<f64>,
}

pub struct FileSparseAdapter {
    structure: CooStructure,
    dir: PathBuf,
    context: NodeContext,
}

impl FileSparseAdapter {
    pub fn new(structure: CooStructure, dir: impl Into<PathBuf>, context: NodeContext) -> Self {
        Self {
            structure,
            dir: dir.into(),
            context,
        }
    }

    pub fn into_any(self, writable: bool) -> AnyAdapter {
        let adapter = Arc::new(self);
        if writable {
            AnyAdapter::from_writable_sparse(adapter)
        } else {
            AnyAdapter::from_sparse(adapter)
        }
    }

    fn block_path(&self, block: &[u64]) -> PathBuf {
        self.dir.join(format!("block-{}.json", block_file_name(block)))
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

    async fn load_block(&self, block: &[u64]) -> Result<SparsePayload, AdapterError> {
        match tokio::fs::read(self.block_path(block)).await {
            Ok(data) => {
                let file: SparseBlockFile = serde_json::from_slice(&data)
                    .map_err(|err| AdapterError::Internal(err.to_string()))?;
                Ok(SparsePayload {
                    coords: file.coords,
                    data: ArrayPayload::from_f64(vec![file.data.len() as u64], &file.data),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SparsePayload {
                coords: vec![Vec::new(); self.structure.rank()],
                data: ArrayPayload::from_f64(vec![0], &[]),
            }),
            Err(err) => Err(io_err(err)),
        }
    }

    fn all_blocks(&self) -> Vec<Vec<u64>> {
        let per_axis: Vec<u64> = self
            .structure
            .chunks
            .iter()
            .map(|axis| axis.len() as u64)
            .collect();
        let total: u64 = per_axis.iter().product();
        let mut blocks = Vec::with_capacity(total as usize);
        let mut counters = vec![0u64; per_axis.len()];
        for _ in 0..total {
            blocks.push(counters.clone());
            for axis in (0..counters.len()).rev() {
                counters[axis] += 1;
                if counters[axis] < per_axis[axis] {
                    break;
                }
                counters[axis] = 0;
            }
        }
        blocks
    }
}

impl Adapter for FileSparseAdapter {
    fn structure(&self) -> Structure {
        Structure::Sparse(self.structure.clone())
    }

    fn metadata(&self) -> serde_json::Value {
        self.context.metadata.clone()
    }

    fn specs(&self) -> Vec<Spec> {
        self.context.specs.clone()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        self.context.access_blob.clone()
    }
}

#[async_trait]
impl SparseRead for FileSparseAdapter {
    async fn read(&self, slice: &NdSlice) -> Result<SparsePayload, AdapterError> {
        let rank = self.structure.rank();
        let mut coords: Vec<Vec<u64>> = vec![Vec::new(); rank];
        let mut values: Vec<f64> = Vec::new();
        for block in self.all_blocks() {
            let origin = self.block_origin(&block)?;
            let payload = self.load_block(&block).await?;
            let data = payload.data.as_f64()?;
            for entry in 0..payload.nnz() {
                for axis in 0..rank {
                    coords[axis].push(origin[axis] + payload.coords[axis][entry]);
                }
                values.push(data[entry]);
            }
        }
        let payload = SparsePayload {
            coords,
            data: ArrayPayload::from_f64(vec![values.len() as u64], &values),
        };
        if slice.is_all() {
            Ok(payload)
        } else {
            // Sparse slicing shares the in-memory semantics.
            crate::files::filter_sparse_payload(&payload, slice, &self.structure.shape)
        }
    }

    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<SparsePayload, AdapterError> {
        self.block_origin(block)?;
        let payload = self.load_block(block).await?;
        match slice {
            Some(slice) => {
                let block_shape: Vec<u64> = block
                    .iter()
                    .zip(&self.structure.chunks)
                    .map(|(&index, extents)| extents[index as usize])
                    .collect();
                filter_sparse_payload(&payload, slice, &block_shape)
            }
            None => Ok(payload),
        }
    }
}

#[async_trait]
impl SparseWrite for FileSparseAdapter {
    async fn write_block(&self, block: &[u64], payload: SparsePayload) -> Result<(), AdapterError> {
        payload.validate()?;
        self.block_origin(block)?;
        let file = SparseBlockFile {
            coords: payload.coords.clone(),
            data: payload.data.as_f64()?,
        };
        let encoded = serde_json::to_vec(&file)
            .map_err(|err| AdapterError::Internal(err.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(self.block_path(block), encoded)
            .await
            .map_err(io_err)
    }
}

/// Keep only the entries a slice selects; contiguous ranges and integer
/// picks only.
pub(crate) fn filter_sparse_payload(
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
            trellis_model::ResolvedAxis::Pick(index) => ranges.push((index, index + 1)),
            trellis_model::ResolvedAxis::Strided { start, step: 1, len } => {
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
        data: ArrayPayload::from_f64(vec![values.len() as u64], &values),
    })
}
