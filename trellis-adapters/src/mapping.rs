//! In-memory container adapter backed by an ordered map.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_model::{AccessBlob, ContainerStructure, SortingItem, Spec, Structure};
use trellis_query::Query;

use crate::filter::{matches_all, ChildView};
use crate::{Adapter, AdapterError, AnyAdapter, ContainerListing};

/// A container whose children live in memory, in insertion order.
///
/// `search` and `sort` return new adapters sharing the child handles,
/// so filtered views are cheap.
pub struct MapAdapter {
    entries: Vec<(String, AnyAdapter)>,
    metadata: serde_json::Value,
    specs: Vec<Spec>,
    access_blob: Option<AccessBlob>,
    sorting: Vec<SortingItem>,
}

impl MapAdapter {
    pub fn new(entries: Vec<(String, AnyAdapter)>) -> Self {
        Self {
            entries,
            metadata: serde_json::json!({}),
            specs: Vec::new(),
            access_blob: None,
            sorting: vec![SortingItem::insertion_order()],
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
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

    pub fn insert(&mut self, key: impl Into<String>, child: AnyAdapter) {
        self.entries.push((key.into(), child));
    }

    pub fn into_any(self) -> AnyAdapter {
        AnyAdapter::from_container(Arc::new(self))
    }

    fn view(mut self, entries: Vec<(String, AnyAdapter)>) -> Self {
        self.entries = entries;
        self
    }

    fn clone_shallow(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            metadata: self.metadata.clone(),
            specs: self.specs.clone(),
            access_blob: self.access_blob.clone(),
            sorting: self.sorting.clone(),
        }
    }
}

impl Adapter for MapAdapter {
    fn structure(&self) -> Structure {
        Structure::Container(ContainerStructure {
            count: Some(self.entries.len() as u64),
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
impl ContainerListing for MapAdapter {
    async fn lookup(&self, key: &str) -> Result<Option<AnyAdapter>, AdapterError> {
        Ok(self
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, child)| child.clone()))
    }

    async fn keys_range(&self, offset: usize, limit: usize) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn items_range(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, AnyAdapter)>, AdapterError> {
        Ok(self
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<u64, AdapterError> {
        Ok(self.entries.len() as u64)
    }

    fn search(&self, queries: &[Query]) -> Result<AnyAdapter, AdapterError> {
        let entries: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, child)| {
                let metadata = child.metadata();
                let specs = child.specs();
                let access_blob = child.access_blob();
                let view = ChildView {
                    key,
                    metadata: &metadata,
                    structure_family: child.structure_family(),
                    specs: &specs,
                    access_blob: access_blob.as_ref(),
                };
                matches_all(queries, &view)
            })
            .cloned()
            .collect();
        Ok(self.clone_shallow().view(entries).into_any())
    }

    fn sort(&self, sorting: &[SortingItem]) -> Result<AnyAdapter, AdapterError> {
        let mut entries = self.entries.clone();
        // Apply sort keys last-to-first so the first key dominates;
        // stable sort preserves the later keys' order within ties.
        for item in sorting.iter().rev() {
            if item.key == "_" {
                if item.direction < 0 {
                    entries.reverse();
                }
                continue;
            }
            entries.sort_by(|(_, a), (_, b)| {
                let left = lookup_path(&a.metadata(), &item.key);
                let right = lookup_path(&b.metadata(), &item.key);
                let ordering = cmp_json(left.as_ref(), right.as_ref());
                if item.direction < 0 {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        let mut sorted = self.clone_shallow().view(entries);
        sorted.sorting = sorting.to_vec();
        Ok(sorted.into_any())
    }
}

fn lookup_path(metadata: &serde_json::Value, key: &str) -> Option<serde_json::Value> {
    let mut current = metadata;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

/// Total order over JSON values: missing < null < bool < number < string.
fn cmp_json(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryArrayAdapter;
    use trellis_model::{ArrayStructure, DataType};

    fn leaf(num: i64) -> AnyAdapter {
        let adapter = MemoryArrayAdapter::zeros(ArrayStructure::one_chunk(
            DataType::float64(),
            vec![2],
        ))
        .unwrap()
        .with_metadata(serde_json::json!({"num": num}));
        adapter.into_any()
    }

    fn container() -> MapAdapter {
        let mut map = MapAdapter::empty();
        for (key, num) in [("c", 2), ("a", 0), ("b", 1)] {
            map.insert(key, leaf(num));
        }
        map
    }

    #[tokio::test]
    async fn keys_range_in_insertion_order() {
        let any = container().into_any();
        let listing = any.as_container().unwrap();
        assert_eq!(listing.keys_range(0, 2).await.unwrap(), vec!["c", "a"]);
        assert_eq!(listing.keys_range(2, 10).await.unwrap(), vec!["b"]);
        assert_eq!(listing.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn search_filters_children() {
        let any = container().into_any();
        let filtered = any
            .as_container()
            .unwrap()
            .search(&[Query::Comparison {
                operator: trellis_query::ComparisonOperator::Ge,
                key: "num".into(),
                value: serde_json::json!(1),
            }])
            .unwrap();
        let keys = filtered
            .as_container()
            .unwrap()
            .keys_range(0, 10)
            .await
            .unwrap();
        assert_eq!(keys, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn sort_by_metadata_key() {
        let any = container().into_any();
        let sorted = any
            .as_container()
            .unwrap()
            .sort(&[SortingItem {
                key: "num".into(),
                direction: -1,
            }])
            .unwrap();
        let keys = sorted
            .as_container()
            .unwrap()
            .keys_range(0, 10)
            .await
            .unwrap();
        assert_eq!(keys, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn lookup_path_walks_segments() {
        let any = container().into_any();
        let found = any.lookup_path(&["a"]).await.unwrap();
        assert!(found.is_some());
        let missing = any.lookup_path(&["nope"]).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn recursive_read_respects_field_selection() {
        let mut outer = MapAdapter::empty();
        outer.insert("inner", container().into_any());
        outer.insert("x", leaf(7));
        let any = outer.into_any();

        let payload = any.read_container(None, 2).await.unwrap();
        let crate::Payload::Container(entries) = payload else {
            panic!("expected a container payload");
        };
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].1, crate::Payload::Container(_)));

        let selected = any
            .read_container(Some(&["x".to_string()]), 2)
            .await
            .unwrap();
        let crate::Payload::Container(entries) = selected else {
            panic!("expected a container payload");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "x");

        // Depth cap: the nested container cannot be expanded at depth 0.
        assert!(any.read_container(None, 0).await.is_err());
    }
}
