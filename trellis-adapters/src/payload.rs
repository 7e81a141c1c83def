//! Data payloads exchanged between adapters, serializers, and the wire.
//!
//! Array payloads are raw C-order bytes plus enough structure to
//! interpret them. The slicing routine here implements the strided
//! gather (and the optional mean aggregation) that `read`/`read_block`
//! apply before handing bytes to a serializer.

use std::collections::BTreeMap;

use bytes::Bytes;
use trellis_model::{
    ArrayStructure, DataType, NdSlice, ResolvedAxis, ScalarKind, TableColumn,
};

use crate::AdapterError;

/// An N-dimensional array region: C-order bytes plus shape and dtype.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayPayload {
    pub data_type: DataType,
    pub shape: Vec<u64>,
    pub bytes: Bytes,
}

impl ArrayPayload {
    pub fn new(data_type: DataType, shape: Vec<u64>, bytes: Bytes) -> Self {
        Self {
            data_type,
            shape,
            bytes,
        }
    }

    /// Build a float64 payload from values.
    pub fn from_f64(shape: Vec<u64>, values: &[f64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(DataType::float64(), shape, Bytes::from(bytes))
    }

    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The expected byte length for this shape and dtype.
    pub fn expected_len(&self) -> u64 {
        self.element_count() * u64::from(self.data_type.item_size)
    }

    /// Interpret the bytes as little-endian f64 values.
    pub fn as_f64(&self) -> Result<Vec<f64>, AdapterError> {
        if self.data_type.kind != ScalarKind::Float || self.data_type.item_size != 8 {
            return Err(AdapterError::BadRequest(
                "payload is not float64".to_string(),
            ));
        }
        Ok(self
            .bytes
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().expect("chunks_exact(8)")))
            .collect())
    }
}

/// One typed column of a table payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate in-memory footprint, for the response size guard.
    pub fn byte_size(&self) -> u64 {
        match self {
            Column::Bool(v) => v.len() as u64,
            Column::Int64(v) => v.len() as u64 * 8,
            Column::Float64(v) => v.len() as u64 * 8,
            Column::Utf8(v) => v.iter().map(|s| s.len() as u64 + 8).sum(),
        }
    }

    pub fn data_type(&self) -> trellis_model::ColumnType {
        match self {
            Column::Bool(_) => trellis_model::ColumnType::Bool,
            Column::Int64(_) => trellis_model::ColumnType::Int64,
            Column::Float64(_) => trellis_model::ColumnType::Float64,
            Column::Utf8(_) => trellis_model::ColumnType::Utf8,
        }
    }

    pub fn value_json(&self, row: usize) -> serde_json::Value {
        match self {
            Column::Bool(v) => serde_json::json!(v[row]),
            Column::Int64(v) => serde_json::json!(v[row]),
            Column::Float64(v) => serde_json::json!(v[row]),
            Column::Utf8(v) => serde_json::json!(v[row]),
        }
    }

    pub fn extend_from(&mut self, other: &Column) -> Result<(), AdapterError> {
        match (self, other) {
            (Column::Bool(a), Column::Bool(b)) => a.extend_from_slice(b),
            (Column::Int64(a), Column::Int64(b)) => a.extend_from_slice(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend_from_slice(b),
            (Column::Utf8(a), Column::Utf8(b)) => a.extend_from_slice(b),
            _ => {
                return Err(AdapterError::BadRequest(
                    "appended column type does not match existing column".to_string(),
                ))
            }
        }
        Ok(())
    }
}

/// A columnar table region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TablePayload {
    pub columns: Vec<(String, Column)>,
}

impl TablePayload {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn byte_size(&self) -> u64 {
        self.columns.iter().map(|(_, c)| c.byte_size()).sum()
    }

    pub fn column_schema(&self) -> Vec<TableColumn> {
        self.columns
            .iter()
            .map(|(name, column)| TableColumn {
                name: name.clone(),
                data_type: column.data_type(),
            })
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Restrict to the named columns, preserving the requested order.
    pub fn select(&self, names: &[String]) -> Result<TablePayload, AdapterError> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            match self.column(name) {
                Some(column) => columns.push((name.clone(), column.clone())),
                None => {
                    return Err(AdapterError::BadRequest(format!(
                        "no such column: {name}"
                    )))
                }
            }
        }
        Ok(TablePayload { columns })
    }

    /// Validate rectangularity: every column has the same length.
    pub fn validate(&self) -> Result<(), AdapterError> {
        let expected = self.row_count();
        for (name, column) in &self.columns {
            if column.len() != expected {
                return Err(AdapterError::BadRequest(format!(
                    "column {name} has {} rows; expected {expected}",
                    column.len()
                )));
            }
        }
        Ok(())
    }

    pub fn append(&mut self, other: &TablePayload) -> Result<(), AdapterError> {
        other.validate()?;
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if self.columns.len() != other.columns.len() {
            return Err(AdapterError::BadRequest(
                "appended table has a different set of columns".to_string(),
            ));
        }
        for ((name, column), (other_name, other_column)) in
            self.columns.iter_mut().zip(&other.columns)
        {
            if name != other_name {
                return Err(AdapterError::BadRequest(format!(
                    "appended column {other_name} does not match {name}"
                )));
            }
            column.extend_from(other_column)?;
        }
        Ok(())
    }

    /// Rows as JSON objects, for the JSON encoder.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        (0..self.row_count())
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (name, column) in &self.columns {
                    object.insert(name.clone(), column.value_json(row));
                }
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// A sparse COO region: per-axis coordinate vectors plus a data vector.
#[derive(Clone, Debug, PartialEq)]
pub struct SparsePayload {
    /// One vector per axis, each `nnz` long.
    pub coords: Vec<Vec<u64>>,
    pub data: ArrayPayload,
}

impl SparsePayload {
    pub fn nnz(&self) -> usize {
        self.coords.first().map(Vec::len).unwrap_or(0)
    }

    pub fn byte_size(&self) -> u64 {
        let coord_bytes: u64 = self.coords.iter().map(|c| c.len() as u64 * 8).sum();
        coord_bytes + self.data.byte_size()
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        let nnz = self.nnz();
        for (axis, coords) in self.coords.iter().enumerate() {
            if coords.len() != nnz {
                return Err(AdapterError::BadRequest(format!(
                    "coordinate axis {axis} has {} entries; expected {nnz}",
                    coords.len()
                )));
            }
        }
        if self.data.element_count() != nnz as u64 {
            return Err(AdapterError::BadRequest(format!(
                "data has {} elements; expected {nnz}",
                self.data.element_count()
            )));
        }
        Ok(())
    }
}

/// Named awkward buffers.
pub type AwkwardPayload = BTreeMap<String, Bytes>;

/// Any payload an adapter can produce; containers nest.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Array(ArrayPayload),
    Table(TablePayload),
    Sparse(SparsePayload),
    Awkward(AwkwardPayload),
    Container(Vec<(String, Payload)>),
}

impl Payload {
    pub fn byte_size(&self) -> u64 {
        match self {
            Payload::Array(p) => p.byte_size(),
            Payload::Table(p) => p.byte_size(),
            Payload::Sparse(p) => p.byte_size(),
            Payload::Awkward(p) => p.values().map(|b| b.len() as u64).sum(),
            Payload::Container(entries) => entries.iter().map(|(_, p)| p.byte_size()).sum(),
        }
    }
}

// ── Array slicing ────────────────────────────────────────────────────────

/// Apply a slice expression to a full in-memory array payload.
///
/// Strided selection works for any dtype; mean aggregation is defined
/// for float64 only and rejects other dtypes rather than guessing a
/// widening rule.
pub fn slice_array(payload: &ArrayPayload, slice: &NdSlice) -> Result<ArrayPayload, AdapterError> {
    if slice.is_all() {
        return Ok(payload.clone());
    }
    let resolved = slice
        .resolve(&payload.shape)
        .map_err(|err| AdapterError::BadRequest(err.to_string()))?;

    let wants_mean = resolved
        .iter()
        .any(|axis| matches!(axis, ResolvedAxis::Mean { .. }));
    if wants_mean
        && (payload.data_type.kind != ScalarKind::Float || payload.data_type.item_size != 8)
    {
        return Err(AdapterError::BadRequest(
            "mean aggregation is only supported for float64 arrays".to_string(),
        ));
    }

    // Gather phase: treat mean axes as unit-stride ranges.
    let gather: Vec<(i64, i64, u64, bool)> = resolved
        .iter()
        .map(|axis| match *axis {
            ResolvedAxis::Pick(index) => (index as i64, 1, 1, true),
            ResolvedAxis::Strided { start, step, len } => (start, step, len, false),
            ResolvedAxis::Mean { start, len, .. } => (start as i64, 1, len, false),
        })
        .collect();

    let item = payload.data_type.item_size as usize;
    let source_strides = c_order_strides(&payload.shape);
    let gathered_shape: Vec<u64> = gather
        .iter()
        .filter(|(_, _, _, dropped)| !dropped)
        .map(|(_, _, len, _)| *len)
        .collect();
    let out_elements: u64 = gather.iter().map(|(_, _, len, _)| *len).product();
    let mut out = Vec::with_capacity(out_elements as usize * item);

    // Odometer over the selection index space.
    let mut counters = vec![0u64; gather.len()];
    let total: u64 = gather.iter().map(|(_, _, len, _)| *len).product();
    for _ in 0..total {
        let mut flat: i64 = 0;
        for (axis, &(start, step, _, _)) in gather.iter().enumerate() {
            let index = start + counters[axis] as i64 * step;
            flat += index * source_strides[axis] as i64;
        }
        let offset = flat as usize * item;
        out.extend_from_slice(&payload.bytes[offset..offset + item]);
        for axis in (0..counters.len()).rev() {
            counters[axis] += 1;
            if counters[axis] < gather[axis].2 {
                break;
            }
            counters[axis] = 0;
        }
    }

    let mut result = ArrayPayload::new(payload.data_type.clone(), gathered_shape, Bytes::from(out));

    if wants_mean {
        // Aggregate each mean axis in turn. Axes dropped by Pick do not
        // appear in the gathered shape, so track the surviving offset.
        let mut survived_axis = 0usize;
        for axis in &resolved {
            match axis {
                ResolvedAxis::Pick(_) => {}
                ResolvedAxis::Strided { .. } => survived_axis += 1,
                ResolvedAxis::Mean { bin, .. } => {
                    result = mean_axis(&result, survived_axis, *bin)?;
                    survived_axis += 1;
                }
            }
        }
    }
    Ok(result)
}

/// Scatter a payload into a region of a destination buffer (the inverse
/// of the gather above, for block writes).
pub fn write_region(
    destination: &mut [u8],
    destination_shape: &[u64],
    origin: &[u64],
    payload: &ArrayPayload,
) -> Result<(), AdapterError> {
    let item = payload.data_type.item_size as usize;
    let dest_strides = c_order_strides(destination_shape);
    let total = payload.element_count();
    let mut counters = vec![0u64; payload.shape.len()];
    for i in 0..total {
        let mut flat = 0u64;
        for (axis, &counter) in counters.iter().enumerate() {
            flat += (origin[axis] + counter) * dest_strides[axis];
        }
        let dest_offset = flat as usize * item;
        let src_offset = i as usize * item;
        destination[dest_offset..dest_offset + item]
            .copy_from_slice(&payload.bytes[src_offset..src_offset + item]);
        for axis in (0..counters.len()).rev() {
            counters[axis] += 1;
            if counters[axis] < payload.shape[axis] {
                break;
            }
            counters[axis] = 0;
        }
    }
    Ok(())
}

/// Row-major element strides for a shape.
pub fn c_order_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Average a float64 payload along one axis in bins of `bin` elements.
/// A trailing partial bin is averaged over the elements it holds.
fn mean_axis(payload: &ArrayPayload, axis: usize, bin: u64) -> Result<ArrayPayload, AdapterError> {
    let values = payload.as_f64()?;
    let axis_len = payload.shape[axis];
    let out_axis_len = if axis_len == 0 {
        0
    } else {
        axis_len.div_ceil(bin)
    };
    let mut out_shape = payload.shape.clone();
    out_shape[axis] = out_axis_len;

    let outer: u64 = payload.shape[..axis].iter().product();
    let inner: u64 = payload.shape[axis + 1..].iter().product();
    let mut out = Vec::with_capacity((outer * out_axis_len * inner) as usize);
    for o in 0..outer {
        for b in 0..out_axis_len {
            let lo = b * bin;
            let hi = ((b + 1) * bin).min(axis_len);
            for i in 0..inner {
                let mut sum = 0.0;
                for k in lo..hi {
                    let flat = (o * axis_len + k) * inner + i;
                    sum += values[flat as usize];
                }
                out.push(sum / (hi - lo) as f64);
            }
        }
    }
    Ok(ArrayPayload::from_f64(out_shape, &out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(shape: Vec<u64>) -> ArrayPayload {
        let count: u64 = shape.iter().product();
        let values: Vec<f64> = (0..count).map(|i| i as f64).collect();
        ArrayPayload::from_f64(shape, &values)
    }

    #[test]
    fn slice_plain_range() {
        let payload = arange(vec![4, 3]);
        let sliced = slice_array(&payload, &"1:3,0:2".parse().unwrap()).unwrap();
        assert_eq!(sliced.shape, vec![2, 2]);
        assert_eq!(sliced.as_f64().unwrap(), vec![3.0, 4.0, 6.0, 7.0]);
    }

    #[test]
    fn slice_index_drops_axis() {
        let payload = arange(vec![4, 3]);
        let sliced = slice_array(&payload, &"2".parse().unwrap()).unwrap();
        assert_eq!(sliced.shape, vec![3]);
        assert_eq!(sliced.as_f64().unwrap(), vec![6.0, 7.0, 8.0]);
    }

    #[test]
    fn slice_negative_stride() {
        let payload = arange(vec![4]);
        let sliced = slice_array(&payload, &"::-1".parse().unwrap()).unwrap();
        assert_eq!(sliced.as_f64().unwrap(), vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn mean_whole_axis() {
        let payload = arange(vec![4]);
        let sliced = slice_array(&payload, &"::mean".parse().unwrap()).unwrap();
        assert_eq!(sliced.shape, vec![1]);
        assert_eq!(sliced.as_f64().unwrap(), vec![1.5]);
    }

    #[test]
    fn mean_binned_with_partial_tail() {
        let payload = arange(vec![5]);
        let sliced = slice_array(&payload, &"::mean(2)".parse().unwrap()).unwrap();
        assert_eq!(sliced.shape, vec![3]);
        assert_eq!(sliced.as_f64().unwrap(), vec![0.5, 2.5, 4.0]);
    }

    #[test]
    fn mean_rejected_for_non_float() {
        let payload = ArrayPayload::new(
            DataType::int64(),
            vec![4],
            Bytes::from(vec![0u8; 32]),
        );
        assert!(slice_array(&payload, &"::mean".parse().unwrap()).is_err());
    }

    #[test]
    fn write_region_round_trip() {
        let mut buffer = vec![0u8; 4 * 3 * 8];
        let patch = ArrayPayload::from_f64(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        write_region(&mut buffer, &[4, 3], &[1, 1], &patch).unwrap();
        let full = ArrayPayload::new(DataType::float64(), vec![4, 3], Bytes::from(buffer));
        let read_back = slice_array(&full, &"1:3,1:3".parse().unwrap()).unwrap();
        assert_eq!(read_back.as_f64().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn table_select_and_append() {
        let mut table = TablePayload {
            columns: vec![
                ("a".into(), Column::Int64(vec![1, 2])),
                ("b".into(), Column::Utf8(vec!["x".into(), "y".into()])),
            ],
        };
        let selected = table.select(&["b".to_string()]).unwrap();
        assert_eq!(selected.columns.len(), 1);
        assert!(table.select(&["missing".to_string()]).is_err());

        let more = TablePayload {
            columns: vec![
                ("a".into(), Column::Int64(vec![3])),
                ("b".into(), Column::Utf8(vec!["z".into()])),
            ],
        };
        table.append(&more).unwrap();
        assert_eq!(table.row_count(), 3);
    }
}
