//! Construct a data adapter for a catalog node from its data sources
//! and assets.

use trellis_adapters::AnyAdapter;
use trellis_model::{Management, Structure, StructureFamily};

use crate::assets::file_path;
use crate::files::{
    FileArrayAdapter, FileAwkwardAdapter, FileSparseAdapter, FileTableAdapter, NodeContext,
};
use crate::nodes::NodeRecord;
use crate::{CatalogError, CatalogStore};

impl CatalogStore {
    /// Replace a data source's structure row, re-interning it by
    /// content address. Used after writes that change row counts or
    /// awkward forms.
    pub async fn update_data_source_structure(
        &self,
        data_source_id: i64,
        structure: &Structure,
    ) -> Result<(), CatalogError> {
        let structure_id = self.intern_structure(structure).await?;
        sqlx::query("UPDATE data_sources SET structure_id = ? WHERE id = ?")
            .bind(structure_id)
            .bind(data_source_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

/// Build the adapter backing a node's data.
///
/// Containers have no data adapter (listing goes through the store);
/// externally-managed sources are served only for formats with a
/// built-in reader. Writability follows the data source's management.
pub fn adapter_for_node(record: &NodeRecord) -> Result<AnyAdapter, CatalogError> {
    let attributes = &record.node.attributes;
    if matches!(
        attributes.structure_family,
        StructureFamily::Container | StructureFamily::Composite
    ) {
        return Err(CatalogError::Unsupported(
            "containers are listed, not read as data".to_string(),
        ));
    }
    let data_source = attributes
        .data_sources
        .as_ref()
        .and_then(|sources| sources.first())
        .ok_or_else(|| {
            CatalogError::Unsupported("node has no data sources".to_string())
        })?;
    let asset = data_source.assets.first().ok_or_else(|| {
        CatalogError::Unsupported("data source has no assets".to_string())
    })?;
    let dir = file_path(&asset.data_uri).ok_or_else(|| {
        CatalogError::Unsupported(format!(
            "only file:// assets are served by the built-in adapters, got {}",
            asset.data_uri
        ))
    })?;
    let structure = data_source.structure.clone().ok_or_else(|| {
        CatalogError::Unsupported("data source has no structure".to_string())
    })?;
    let context = NodeContext {
        metadata: attributes.metadata.clone(),
        specs: attributes.specs.clone(),
        access_blob: attributes.access_blob.clone(),
    };
    let writable = data_source.management == Management::Writable;

    let adapter = match structure {
        Structure::Array(structure) => {
            FileArrayAdapter::new(structure, dir, context).into_any(writable)
        }
        Structure::Table(structure) => {
            // External CSV registrations point the asset at the file
            // itself; managed tables at a partition directory.
            if data_source.management == Management::External
                && data_source.mimetype != "text/csv"
            {
                return Err(CatalogError::Unsupported(format!(
                    "no built-in reader for mimetype {:?}",
                    data_source.mimetype
                )));
            }
            let dir = if data_source.management == Management::External && !asset.is_directory {
                dir.parent().map(|p| p.to_path_buf()).unwrap_or(dir)
            } else {
                dir
            };
            FileTableAdapter::new(structure, dir, context).into_any(writable)
        }
        Structure::Sparse(structure) => {
            FileSparseAdapter::new(structure, dir, context).into_any(writable)
        }
        Structure::Awkward(structure) => {
            FileAwkwardAdapter::new(structure, dir, context).into_any(writable)
        }
        Structure::Container(_) | Structure::Composite(_) => {
            return Err(CatalogError::Unsupported(
                "containers are listed, not read as data".to_string(),
            ))
        }
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_model::{ArrayStructure, DataSource, DataType, NodeAttributes};

    #[tokio::test]
    async fn writable_array_node_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::in_memory(dir.path()).await.unwrap();
        let structure = ArrayStructure::one_chunk(DataType::float64(), vec![4]);
        let attributes = NodeAttributes {
            structure_family: StructureFamily::Array,
            structure: Some(Structure::Array(structure.clone())),
            data_sources: Some(vec![DataSource::new(
                "application/x-trellis-array",
                Structure::Array(structure),
                Management::Writable,
            )]),
            ..NodeAttributes::container()
        };
        let record = store.create_node(&[], "x", attributes, None).await.unwrap();

        let adapter = adapter_for_node(&record).unwrap();
        let payload = trellis_adapters::ArrayPayload::from_f64(vec![4], &[1.0, 2.0, 3.0, 4.0]);
        adapter
            .as_array_write()
            .unwrap()
            .write(payload.clone())
            .await
            .unwrap();
        let back = adapter
            .as_array_read()
            .unwrap()
            .read(&trellis_model::NdSlice::all())
            .await
            .unwrap();
        assert_eq!(back.bytes, payload.bytes);
    }

    #[tokio::test]
    async fn container_has_no_data_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::in_memory(dir.path()).await.unwrap();
        let record = store
            .create_node(&[], "c", NodeAttributes::container(), None)
            .await
            .unwrap();
        assert!(matches!(
            adapter_for_node(&record),
            Err(CatalogError::Unsupported(_))
        ));
    }
}
