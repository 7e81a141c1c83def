//! In-memory awkward (ragged) adapter.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use trellis_model::{AccessBlob, AwkwardStructure, Spec, Structure};

use crate::{Adapter, AdapterError, AnyAdapter, AwkwardBuffers, AwkwardWrite};

struct AwkwardState {
    form: serde_json::Value,
    length: u64,
    buffers: BTreeMap<String, Bytes>,
}

/// Awkward data held in memory as named buffers plus the form IR.
pub struct MemoryAwkwardAdapter {
    state: RwLock<AwkwardState>,
    metadata: serde_json::Value,
    specs: Vec<Spec>,
    access_blob: Option<AccessBlob>,
}

impl MemoryAwkwardAdapter {
    pub fn new(form: serde_json::Value, length: u64, buffers: BTreeMap<String, Bytes>) -> Self {
        Self {
            state: RwLock::new(AwkwardState {
                form,
                length,
                buffers,
            }),
            metadata: serde_json::json!({}),
            specs: Vec::new(),
            access_blob: None,
        }
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
        AnyAdapter::from_writable_awkward(Arc::new(self))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, AwkwardState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Adapter for MemoryAwkwardAdapter {
    fn structure(&self) -> Structure {
        let state = self.read_state();
        Structure::Awkward(AwkwardStructure {
            form: state.form.clone(),
            length: state.length,
            buffer_sizes: state
                .buffers
                .iter()
                .map(|(name, bytes)| (name.clone(), bytes.len() as u64))
                .collect(),
        })
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
impl AwkwardBuffers for MemoryAwkwardAdapter {
    async fn read_buffers(
        &self,
        form_keys: &[String],
    ) -> Result<BTreeMap<String, Bytes>, AdapterError> {
        let state = self.read_state();
        if form_keys.is_empty() {
            return Ok(state.buffers.clone());
        }
        let mut selected = BTreeMap::new();
        for key in form_keys {
            // A form key selects every buffer belonging to that node,
            // e.g. "node0" matches "node0-offsets" and "node0-data".
            let matches: Vec<_> = state
                .buffers
                .iter()
                .filter(|(name, _)| *name == key || name.starts_with(&format!("{key}-")))
                .collect();
            if matches.is_empty() {
                return Err(AdapterError::NotFound(format!("no such buffer: {key}")));
            }
            for (name, bytes) in matches {
                selected.insert(name.clone(), bytes.clone());
            }
        }
        Ok(selected)
    }
}

#[async_trait]
impl AwkwardWrite for MemoryAwkwardAdapter {
    async fn write(
        &self,
        form: serde_json::Value,
        length: u64,
        buffers: BTreeMap<String, Bytes>,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.form = form;
        state.length = length;
        state.buffers = buffers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MemoryAwkwardAdapter {
        let buffers: BTreeMap<String, Bytes> = [
            ("node0-offsets".to_string(), Bytes::from_static(b"\x00\x02")),
            ("node1-data".to_string(), Bytes::from_static(b"\x01\x02\x03")),
        ]
        .into();
        MemoryAwkwardAdapter::new(serde_json::json!({"class": "ListOffsetArray"}), 2, buffers)
    }

    #[tokio::test]
    async fn selects_buffers_by_form_key() {
        let adapter = adapter();
        let selected = adapter
            .read_buffers(&["node0".to_string()])
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("node0-offsets"));

        let all = adapter.read_buffers(&[]).await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(adapter.read_buffers(&["node9".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn structure_reports_buffer_sizes() {
        let adapter = adapter();
        match adapter.structure() {
            Structure::Awkward(s) => {
                assert_eq!(s.length, 2);
                assert_eq!(s.buffer_sizes["node1-data"], 3);
            }
            other => panic!("expected awkward structure, got {other:?}"),
        }
    }
}
