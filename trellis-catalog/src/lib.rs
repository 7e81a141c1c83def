//! Persistent catalog: a tree of nodes with metadata, specs, data
//! sources, assets, and revisions, stored over sqlx.
//!
//! All dynamic SQL goes through `sqlx::QueryBuilder`, so every value is
//! a bound parameter; queries from the search algebra are translated
//! into predicate trees in [`queries`], never interpolated.

pub mod adapter;
pub mod assets;
pub mod files;
pub mod nodes;
pub mod queries;
pub mod revisions;
pub mod store;

pub use adapter::adapter_for_node;
pub use store::CatalogStore;

/// Errors from catalog operations.
#[derive(Debug)]
pub enum CatalogError {
    /// No such node, revision, or asset.
    NotFound(String),
    /// Unique-constraint collision (duplicate key on create).
    Conflict(String),
    /// The request is malformed for this node.
    BadRequest(String),
    /// The node's data sources cannot back the requested operation.
    Unsupported(String),
    Database(String),
    Io(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::NotFound(msg) => write!(f, "not found: {msg}"),
            CatalogError::Conflict(msg) => write!(f, "conflict: {msg}"),
            CatalogError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            CatalogError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            CatalogError::Database(msg) => write!(f, "database error: {msg}"),
            CatalogError::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CatalogError::Conflict("key already exists".to_string())
            }
            _ => CatalogError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err.to_string())
    }
}

impl From<trellis_adapters::AdapterError> for CatalogError {
    fn from(err: trellis_adapters::AdapterError) -> Self {
        use trellis_adapters::AdapterError;
        match err {
            AdapterError::NotFound(msg) => CatalogError::NotFound(msg),
            AdapterError::MethodNotAllowed(msg) => CatalogError::Unsupported(msg),
            AdapterError::BadRequest(msg) => CatalogError::BadRequest(msg),
            AdapterError::Conflict(msg) => CatalogError::Conflict(msg),
            AdapterError::Internal(msg) => CatalogError::Database(msg),
        }
    }
}
