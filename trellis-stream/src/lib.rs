//! Streaming update service: a sequence-numbered append log per node
//! with pub/sub fan-out.
//!
//! Writers call [`StreamingDatastore::incr_seq`] then
//! [`StreamingDatastore::set`], which stores the record under the node's
//! log, applies a TTL, and publishes the sequence number to live
//! subscribers. Closing a stream appends a distinguished end-of-stream
//! record.
//!
//! Backends register in a [`DatastoreRegistry`] under a case-insensitive
//! name; unknown names fail fast. The in-process [`MemoryStreamingDatastore`]
//! backs tests and single-process deployments; the Redis backend lives
//! in its own crate.

pub mod memory;
pub mod record;

pub use memory::MemoryStreamingDatastore;
pub use record::{
    child_created, child_metadata_updated, end_of_stream, stream_closed, StreamRecord,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StreamError {
    /// No datastore registered under the requested name.
    UnknownDatastore { name: String, available: Vec<String> },
    /// The datastore name was not specified at all.
    DatastoreNotSpecified,
    /// A per-subscriber queue overflowed; the subscriber must be closed.
    Overflow,
    /// Backend-specific failure.
    Backend(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::UnknownDatastore { name, available } => write!(
                f,
                "unknown datastore {name:?}; available datastores: {available:?}"
            ),
            StreamError::DatastoreNotSpecified => {
                write!(f, "datastore not specified in streaming configuration")
            }
            StreamError::Overflow => write!(f, "subscriber queue overflowed"),
            StreamError::Backend(msg) => write!(f, "streaming backend error: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {}

// ── Datastore contract ───────────────────────────────────────────────────

/// Storage and pub/sub backing for node streams.
#[async_trait]
pub trait StreamingDatastore: Send + Sync {
    /// Atomically increment and return the node's sequence counter.
    async fn incr_seq(&self, node_id: &str) -> Result<u64, StreamError>;

    /// Store a record, set its TTL, publish the sequence number on the
    /// node's topic, and refresh the counter's TTL.
    async fn set(
        &self,
        node_id: &str,
        sequence: u64,
        metadata: serde_json::Value,
        payload: Option<Bytes>,
    ) -> Result<(), StreamError>;

    /// Fetch a stored record. `None` when never written or expired.
    async fn get(&self, node_id: &str, sequence: u64) -> Result<Option<StreamRecord>, StreamError>;

    /// The node's current sequence counter (0 when no writes yet).
    async fn current_seq(&self, node_id: &str) -> Result<u64, StreamError>;

    /// Append an end-of-stream record and publish it. Returns its
    /// sequence number.
    async fn close(&self, node_id: &str) -> Result<u64, StreamError>;

    /// Open a live subscription to the node's topic.
    async fn subscribe(&self, node_id: &str) -> Result<Subscription, StreamError>;
}

/// Increment-then-set in one call; what writers use.
pub async fn publish(
    store: &dyn StreamingDatastore,
    node_id: &str,
    metadata: serde_json::Value,
    payload: Option<Bytes>,
) -> Result<u64, StreamError> {
    let sequence = store.incr_seq(node_id).await?;
    store.set(node_id, sequence, metadata, payload).await?;
    Ok(sequence)
}

// ── Subscriptions ────────────────────────────────────────────────────────

/// A live subscription to one node's topic.
///
/// Sequence numbers arrive through a bounded queue so a slow subscriber
/// never blocks the producer's publish; overflow surfaces as
/// [`StreamError::Overflow`] and the subscriber is expected to close.
pub struct Subscription {
    rx: mpsc::Receiver<u64>,
    overflowed: Arc<AtomicBool>,
    // Aborted on drop so abandoned connections do not leak a task.
    forward_task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    /// Assemble a subscription from its parts. Backends call this.
    pub fn new(
        rx: mpsc::Receiver<u64>,
        overflowed: Arc<AtomicBool>,
        forward_task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            overflowed,
            forward_task,
        }
    }

    /// Next published sequence number. `Ok(None)` when the topic is
    /// gone; `Err(Overflow)` when this subscriber fell behind.
    pub async fn next(&mut self) -> Result<Option<u64>, StreamError> {
        match self.rx.recv().await {
            Some(sequence) => Ok(Some(sequence)),
            None => {
                if self.overflowed.load(Ordering::Acquire) {
                    Err(StreamError::Overflow)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forward_task.abort();
    }
}

/// Default capacity of each subscriber's queue.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 1024;

// ── Registry ─────────────────────────────────────────────────────────────

type DatastoreFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StreamingDatastore>, StreamError> + Send + Sync>;

/// Registry of datastore backends by case-insensitive name.
///
/// Populated at startup; read-only afterwards.
pub struct DatastoreRegistry {
    factories: HashMap<String, DatastoreFactory>,
}

impl DatastoreRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&serde_json::Value) -> Result<Arc<dyn StreamingDatastore>, StreamError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories
            .insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the datastore named in `settings["datastore"]`.
    pub fn build(
        &self,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn StreamingDatastore>, StreamError> {
        let name = settings
            .get("datastore")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if name.is_empty() {
            return Err(StreamError::DatastoreNotSpecified);
        }
        match self.factories.get(&name.to_lowercase()) {
            Some(factory) => factory(settings),
            None => Err(StreamError::UnknownDatastore {
                name: name.to_string(),
                available: self.names(),
            }),
        }
    }
}

impl Default for DatastoreRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", |settings| {
            Ok(Arc::new(MemoryStreamingDatastore::from_settings(settings))
                as Arc<dyn StreamingDatastore>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_case_insensitive() {
        let registry = DatastoreRegistry::default();
        let settings = serde_json::json!({"datastore": "MEMORY"});
        assert!(registry.build(&settings).is_ok());
    }

    #[test]
    fn unknown_datastore_fails_fast() {
        let registry = DatastoreRegistry::default();
        let settings = serde_json::json!({"datastore": "etcd"});
        match registry.build(&settings) {
            Err(StreamError::UnknownDatastore { name, available }) => {
                assert_eq!(name, "etcd");
                assert_eq!(available, vec!["memory".to_string()]);
            }
            Err(other) => panic!("expected UnknownDatastore, got {other}"),
            Ok(_) => panic!("expected UnknownDatastore, got a datastore"),
        }
    }

    #[test]
    fn missing_datastore_name_fails_fast() {
        let registry = DatastoreRegistry::default();
        assert!(matches!(
            registry.build(&serde_json::json!({})),
            Err(StreamError::DatastoreNotSpecified)
        ));
    }
}
