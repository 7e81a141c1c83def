//! Adapter contract: a uniform, capability-based handle over a node's
//! data regardless of backing storage.
//!
//! Every backend implements [`Adapter`] plus the capability traits that
//! make sense for its structure family (`ArrayRead`, `TableWrite`,
//! `ContainerListing`, ...). Callers dispatch on capability through
//! [`AnyAdapter`], never on concrete type, so new backends only implement
//! what they support.
//!
//! All I/O-performing methods are async in contract. The in-memory
//! backends in this crate resolve immediately; file- or SQL-backed
//! backends suspend.

pub mod array;
pub mod awkward;
pub mod filter;
pub mod mapping;
pub mod payload;
pub mod registration;
pub mod sparse;
pub mod table;

pub use array::MemoryArrayAdapter;
pub use awkward::MemoryAwkwardAdapter;
pub use mapping::MapAdapter;
pub use payload::{
    slice_array, ArrayPayload, AwkwardPayload, Column, Payload, SparsePayload, TablePayload,
};
pub use registration::{AdapterFactoryRegistry, DataSourceHint};
pub use sparse::MemorySparseAdapter;
pub use table::MemoryTableAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use trellis_model::{AccessBlob, NdSlice, SortingItem, Spec, Structure, StructureFamily};
use trellis_query::Query;

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors surfaced by adapter operations, each carrying its originating
/// kind so the HTTP layer can map it to a stable status.
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// No such child / block / partition / buffer.
    NotFound(String),
    /// The operation is not supported by this adapter.
    MethodNotAllowed(String),
    /// The request is malformed for this structure (bad slice, bad
    /// block index, shape mismatch).
    BadRequest(String),
    /// Write collides with existing state.
    Conflict(String),
    Internal(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::NotFound(msg) => write!(f, "not found: {msg}"),
            AdapterError::MethodNotAllowed(msg) => write!(f, "method not allowed: {msg}"),
            AdapterError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            AdapterError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AdapterError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {}

// ── Base trait ───────────────────────────────────────────────────────────

/// The part of the contract every backend implements. Cheap; no I/O.
pub trait Adapter: Send + Sync {
    fn structure(&self) -> Structure;

    fn structure_family(&self) -> StructureFamily {
        self.structure().family()
    }

    /// Static copy of the node's metadata.
    fn metadata(&self) -> serde_json::Value;

    fn specs(&self) -> Vec<Spec> {
        Vec::new()
    }

    fn access_blob(&self) -> Option<AccessBlob> {
        None
    }
}

// ── Capability traits ────────────────────────────────────────────────────

#[async_trait]
pub trait ArrayRead: Adapter {
    /// Read the full array, optionally restricted by a slice.
    async fn read(&self, slice: &NdSlice) -> Result<ArrayPayload, AdapterError>;

    /// Read one chunk, optionally sub-sliced within the chunk.
    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<ArrayPayload, AdapterError>;
}

#[async_trait]
pub trait ArrayWrite: Send + Sync {
    async fn write(&self, payload: ArrayPayload) -> Result<(), AdapterError>;

    async fn write_block(&self, block: &[u64], payload: ArrayPayload)
        -> Result<(), AdapterError>;
}

#[async_trait]
pub trait TableRead: Adapter {
    /// Materialize the full table, optionally restricted to columns.
    async fn read(&self, columns: Option<&[String]>) -> Result<TablePayload, AdapterError>;

    async fn read_partition(
        &self,
        index: usize,
        columns: Option<&[String]>,
    ) -> Result<TablePayload, AdapterError>;
}

#[async_trait]
pub trait TableWrite: Send + Sync {
    async fn write(&self, payload: TablePayload) -> Result<(), AdapterError>;

    async fn write_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError>;

    async fn append_partition(
        &self,
        index: usize,
        payload: TablePayload,
    ) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait SparseRead: Adapter {
    async fn read(&self, slice: &NdSlice) -> Result<SparsePayload, AdapterError>;

    async fn read_block(
        &self,
        block: &[u64],
        slice: Option<&NdSlice>,
    ) -> Result<SparsePayload, AdapterError>;
}

#[async_trait]
pub trait SparseWrite: Send + Sync {
    async fn write_block(
        &self,
        block: &[u64],
        payload: SparsePayload,
    ) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait AwkwardBuffers: Adapter {
    /// Return the named buffers. An empty `form_keys` selects all.
    async fn read_buffers(
        &self,
        form_keys: &[String],
    ) -> Result<BTreeMap<String, Bytes>, AdapterError>;
}

#[async_trait]
pub trait AwkwardWrite: Send + Sync {
    async fn write(
        &self,
        form: serde_json::Value,
        length: u64,
        buffers: BTreeMap<String, Bytes>,
    ) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait ContainerListing: Adapter {
    /// Look up one child by key. `None` means no such child.
    async fn lookup(&self, key: &str) -> Result<Option<AnyAdapter>, AdapterError>;

    async fn keys_range(&self, offset: usize, limit: usize) -> Result<Vec<String>, AdapterError>;

    async fn items_range(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, AnyAdapter)>, AdapterError>;

    async fn len(&self) -> Result<u64, AdapterError>;

    /// `(count, exact)`: an exact count when it is cheap below the
    /// threshold, otherwise a lower bound.
    async fn lbound_len(&self, _threshold: u64) -> Result<(u64, bool), AdapterError> {
        Ok((self.len().await?, true))
    }

    /// A new adapter representing the filtered view.
    fn search(&self, queries: &[Query]) -> Result<AnyAdapter, AdapterError>;

    /// A new adapter with re-ordered children.
    fn sort(&self, sorting: &[SortingItem]) -> Result<AnyAdapter, AdapterError>;
}

// ── Capability dispatch ──────────────────────────────────────────────────

/// A polymorphic adapter handle: the base contract plus whichever
/// capabilities the backend registered.
///
/// Only the `from_*` constructors can build one, so the base is always
/// present; a handle without it is unrepresentable. Cloning is cheap
/// (shared `Arc`s).
#[derive(Clone)]
pub struct AnyAdapter {
    base: Arc<dyn Adapter>,
    container: Option<Arc<dyn ContainerListing>>,
    array_read: Option<Arc<dyn ArrayRead>>,
    array_write: Option<Arc<dyn ArrayWrite>>,
    table_read: Option<Arc<dyn TableRead>>,
    table_write: Option<Arc<dyn TableWrite>>,
    sparse_read: Option<Arc<dyn SparseRead>>,
    sparse_write: Option<Arc<dyn SparseWrite>>,
    awkward: Option<Arc<dyn AwkwardBuffers>>,
    awkward_write: Option<Arc<dyn AwkwardWrite>>,
}

impl AnyAdapter {
    fn with_base(base: Arc<dyn Adapter>) -> Self {
        Self {
            base,
            container: None,
            array_read: None,
            array_write: None,
            table_read: None,
            table_write: None,
            sparse_read: None,
            sparse_write: None,
            awkward: None,
            awkward_write: None,
        }
    }

    pub fn from_container<T: ContainerListing + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::with_base(adapter.clone());
        any.container = Some(adapter);
        any
    }

    pub fn from_array<T: ArrayRead + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::with_base(adapter.clone());
        any.array_read = Some(adapter);
        any
    }

    pub fn from_writable_array<T: ArrayRead + ArrayWrite + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::from_array(adapter.clone());
        any.array_write = Some(adapter);
        any
    }

    pub fn from_table<T: TableRead + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::with_base(adapter.clone());
        any.table_read = Some(adapter);
        any
    }

    pub fn from_writable_table<T: TableRead + TableWrite + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::from_table(adapter.clone());
        any.table_write = Some(adapter);
        any
    }

    pub fn from_sparse<T: SparseRead + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::with_base(adapter.clone());
        any.sparse_read = Some(adapter);
        any
    }

    pub fn from_writable_sparse<T: SparseRead + SparseWrite + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::from_sparse(adapter.clone());
        any.sparse_write = Some(adapter);
        any
    }

    pub fn from_awkward<T: AwkwardBuffers + 'static>(adapter: Arc<T>) -> Self {
        let mut any = Self::with_base(adapter.clone());
        any.awkward = Some(adapter);
        any
    }

    pub fn from_writable_awkward<T: AwkwardBuffers + AwkwardWrite + 'static>(
        adapter: Arc<T>,
    ) -> Self {
        let mut any = Self::from_awkward(adapter.clone());
        any.awkward_write = Some(adapter);
        any
    }

    pub fn base(&self) -> &Arc<dyn Adapter> {
        &self.base
    }

    pub fn structure(&self) -> Structure {
        self.base().structure()
    }

    pub fn structure_family(&self) -> StructureFamily {
        self.base().structure_family()
    }

    pub fn metadata(&self) -> serde_json::Value {
        self.base().metadata()
    }

    pub fn specs(&self) -> Vec<Spec> {
        self.base().specs()
    }

    pub fn access_blob(&self) -> Option<AccessBlob> {
        self.base().access_blob()
    }

    fn capability<'a, T: ?Sized>(
        slot: &'a Option<Arc<T>>,
        name: &str,
    ) -> Result<&'a Arc<T>, AdapterError> {
        slot.as_ref().ok_or_else(|| {
            AdapterError::MethodNotAllowed(format!("adapter does not support {name}"))
        })
    }

    pub fn as_container(&self) -> Result<&Arc<dyn ContainerListing>, AdapterError> {
        Self::capability(&self.container, "container listing")
    }

    pub fn as_array_read(&self) -> Result<&Arc<dyn ArrayRead>, AdapterError> {
        Self::capability(&self.array_read, "array reads")
    }

    pub fn as_array_write(&self) -> Result<&Arc<dyn ArrayWrite>, AdapterError> {
        Self::capability(&self.array_write, "array writes")
    }

    pub fn as_table_read(&self) -> Result<&Arc<dyn TableRead>, AdapterError> {
        Self::capability(&self.table_read, "table reads")
    }

    pub fn as_table_write(&self) -> Result<&Arc<dyn TableWrite>, AdapterError> {
        Self::capability(&self.table_write, "table writes")
    }

    pub fn as_sparse_read(&self) -> Result<&Arc<dyn SparseRead>, AdapterError> {
        Self::capability(&self.sparse_read, "sparse reads")
    }

    pub fn as_sparse_write(&self) -> Result<&Arc<dyn SparseWrite>, AdapterError> {
        Self::capability(&self.sparse_write, "sparse writes")
    }

    pub fn as_awkward(&self) -> Result<&Arc<dyn AwkwardBuffers>, AdapterError> {
        Self::capability(&self.awkward, "awkward buffers")
    }

    pub fn as_awkward_write(&self) -> Result<&Arc<dyn AwkwardWrite>, AdapterError> {
        Self::capability(&self.awkward_write, "awkward writes")
    }

    /// Walk a path one segment at a time through container lookups.
    pub async fn lookup_path(&self, segments: &[&str]) -> Result<Option<AnyAdapter>, AdapterError> {
        let mut current = self.clone();
        for segment in segments {
            let container = current.as_container()?;
            match container.lookup(segment).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Recursive read of a container's contents, respecting a key
    /// selection at the top level and a depth limit.
    pub async fn read_container(
        &self,
        fields: Option<&[String]>,
        max_depth: usize,
    ) -> Result<Payload, AdapterError> {
        read_container_inner(self.clone(), fields, max_depth).await
    }
}

/// Recursion implemented via explicit boxing, as async recursion needs.
fn read_container_inner(
    adapter: AnyAdapter,
    fields: Option<&[String]>,
    max_depth: usize,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Payload, AdapterError>> + Send + '_>,
> {
    Box::pin(async move {
        let container = adapter.as_container()?;
        let mut entries = Vec::new();
        let items = container.items_range(0, usize::MAX).await?;
        for (key, child) in items {
            if let Some(selection) = fields {
                if !selection.is_empty() && !selection.iter().any(|f| f == &key) {
                    continue;
                }
            }
            let value = match child.structure_family() {
                StructureFamily::Container | StructureFamily::Composite => {
                    if max_depth == 0 {
                        return Err(AdapterError::BadRequest(
                            "container recursion exceeds the depth limit; \
                             read sub-containers individually"
                                .into(),
                        ));
                    }
                    read_container_inner(child, None, max_depth - 1).await?
                }
                StructureFamily::Array => {
                    Payload::Array(child.as_array_read()?.read(&NdSlice::all()).await?)
                }
                StructureFamily::Sparse => {
                    Payload::Sparse(child.as_sparse_read()?.read(&NdSlice::all()).await?)
                }
                StructureFamily::Table => Payload::Table(child.as_table_read()?.read(None).await?),
                StructureFamily::Awkward => {
                    Payload::Awkward(child.as_awkward()?.read_buffers(&[]).await?)
                }
            };
            entries.push((key, value));
        }
        Ok(Payload::Container(entries))
    })
}
