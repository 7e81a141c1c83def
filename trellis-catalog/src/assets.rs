//! Asset byte access and lifecycle.
//!
//! Assets are addressed by `file://` URIs. Deletion is restricted to
//! paths under the catalog's managed data directory; externally-managed
//! assets are never touched.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use trellis_model::Asset;

use crate::CatalogError;

/// Resolve a `file://` URI to a filesystem path. `None` for other
/// schemes.
pub fn file_path(data_uri: &str) -> Option<PathBuf> {
    let url = url::Url::parse(data_uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    url.to_file_path().ok()
}

/// A byte range request, inclusive start, exclusive end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Outcome of a ranged asset read.
#[derive(Debug)]
pub struct AssetBytes {
    pub bytes: Bytes,
    pub total_size: u64,
    /// Set when this is a partial (206) response.
    pub range: Option<ByteRange>,
}

/// Read an asset's bytes, optionally restricted to an HTTP range.
/// Ranges outside the asset size are a range-not-satisfiable error,
/// reported as `BadRequest` with a distinguishing message.
pub async fn read_asset_bytes(
    asset: &Asset,
    range: Option<ByteRange>,
) -> Result<AssetBytes, CatalogError> {
    if asset.is_directory {
        return Err(CatalogError::BadRequest(
            "asset is a directory; request its manifest and fetch files individually"
                .to_string(),
        ));
    }
    let path = file_path(&asset.data_uri).ok_or_else(|| {
        CatalogError::Unsupported(format!(
            "only file:// assets can be served, got {}",
            asset.data_uri
        ))
    })?;
    let data = tokio::fs::read(&path).await.map_err(|err| {
        CatalogError::NotFound(format!("asset bytes unavailable: {err}"))
    })?;
    let total_size = data.len() as u64;
    match range {
        None => Ok(AssetBytes {
            bytes: Bytes::from(data),
            total_size,
            range: None,
        }),
        Some(range) => {
            if range.start >= total_size || range.end > total_size || range.start >= range.end {
                return Err(CatalogError::BadRequest(format!(
                    "range {}-{} not satisfiable for asset of {total_size} bytes",
                    range.start, range.end
                )));
            }
            Ok(AssetBytes {
                bytes: Bytes::from(data[range.start as usize..range.end as usize].to_vec()),
                total_size,
                range: Some(range),
            })
        }
    }
}

/// File listing of a directory asset, paths relative to the asset root.
pub async fn asset_manifest(asset: &Asset) -> Result<Vec<String>, CatalogError> {
    if !asset.is_directory {
        return Err(CatalogError::BadRequest(
            "asset is a file; fetch its bytes directly".to_string(),
        ));
    }
    let root = file_path(&asset.data_uri).ok_or_else(|| {
        CatalogError::Unsupported(format!(
            "only file:// assets can be listed, got {}",
            asset.data_uri
        ))
    })?;
    let mut manifest = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(&root) {
                manifest.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    manifest.sort();
    Ok(manifest)
}

/// Delete an asset's backing bytes. Only paths under the managed data
/// directory are eligible; anything else is refused.
pub async fn delete_asset_bytes(data_dir: &Path, asset: &Asset) -> Result<(), CatalogError> {
    let Some(path) = file_path(&asset.data_uri) else {
        return Err(CatalogError::Unsupported(format!(
            "cannot delete asset with scheme of {}",
            asset.data_uri
        )));
    };
    if !path.starts_with(data_dir) {
        return Err(CatalogError::Unsupported(format!(
            "refusing to delete asset outside the managed data directory: {}",
            path.display()
        )));
    }
    let outcome = if asset.is_directory {
        tokio::fs::remove_dir_all(&path).await
    } else {
        tokio::fs::remove_file(&path).await
    };
    match outcome {
        Ok(()) => Ok(()),
        // Already gone is fine; deletion is idempotent.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_asset(path: &Path) -> Asset {
        Asset {
            id: None,
            data_uri: format!("file://{}", path.display()),
            is_directory: false,
            parameter: None,
            num: None,
        }
    }

    #[tokio::test]
    async fn ranged_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();
        let asset = file_asset(&path);

        let whole = read_asset_bytes(&asset, None).await.unwrap();
        assert_eq!(whole.total_size, 10);
        assert_eq!(&whole.bytes[..], b"0123456789");

        let part = read_asset_bytes(&asset, Some(ByteRange { start: 2, end: 5 }))
            .await
            .unwrap();
        assert_eq!(&part.bytes[..], b"234");

        let err = read_asset_bytes(&asset, Some(ByteRange { start: 8, end: 20 }))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::BadRequest(_)));
    }

    #[tokio::test]
    async fn manifest_lists_recursively() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("sub/b.txt"), b"y").await.unwrap();
        let asset = Asset {
            id: None,
            data_uri: format!("file://{}", dir.path().display()),
            is_directory: true,
            parameter: None,
            num: None,
        };
        let manifest = asset_manifest(&asset).await.unwrap();
        assert_eq!(manifest, vec!["a.txt", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn delete_outside_data_dir_refused() {
        let data_dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let path = elsewhere.path().join("keep.bin");
        tokio::fs::write(&path, b"x").await.unwrap();
        let err = delete_asset_bytes(data_dir.path(), &file_asset(&path))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Unsupported(_)));
        assert!(path.exists());
    }
}
