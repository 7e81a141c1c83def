//! In-process streaming datastore: a TTL cache plus tokio broadcast
//! pub/sub. Backs tests and single-process deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::record::{end_of_stream, StreamRecord};
use crate::{StreamError, StreamingDatastore, Subscription, DEFAULT_SUBSCRIBER_QUEUE};

struct StoredRecord {
    metadata: serde_json::Value,
    payload: Option<Bytes>,
    expires_at: Instant,
}

struct NodeStream {
    sequence: u64,
    records: BTreeMap<u64, StoredRecord>,
    notify: broadcast::Sender<u64>,
}

impl NodeStream {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(DEFAULT_SUBSCRIBER_QUEUE);
        Self {
            sequence: 0,
            records: BTreeMap::new(),
            notify,
        }
    }
}

/// In-memory [`StreamingDatastore`].
pub struct MemoryStreamingDatastore {
    nodes: DashMap<String, NodeStream>,
    data_ttl: Duration,
    queue_capacity: usize,
}

impl MemoryStreamingDatastore {
    pub fn new(data_ttl: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            data_ttl,
            queue_capacity: DEFAULT_SUBSCRIBER_QUEUE,
        }
    }

    /// Build from registry settings: `data_ttl` in seconds (default one
    /// hour), `queue_capacity` per subscriber.
    pub fn from_settings(settings: &serde_json::Value) -> Self {
        let data_ttl = settings
            .get("data_ttl")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);
        let queue_capacity = settings
            .get("queue_capacity")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_SUBSCRIBER_QUEUE as u64) as usize;
        Self {
            nodes: DashMap::new(),
            data_ttl: Duration::from_secs(data_ttl),
            queue_capacity,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    fn store(
        &self,
        node_id: &str,
        sequence: u64,
        metadata: serde_json::Value,
        payload: Option<Bytes>,
        ttl: Duration,
    ) {
        let mut node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(NodeStream::new);
        node.records.insert(
            sequence,
            StoredRecord {
                metadata,
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        // No receivers is fine; replay covers late subscribers.
        let _ = node.notify.send(sequence);
    }
}

impl Default for MemoryStreamingDatastore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl StreamingDatastore for MemoryStreamingDatastore {
    async fn incr_seq(&self, node_id: &str) -> Result<u64, StreamError> {
        let mut node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(NodeStream::new);
        node.sequence += 1;
        Ok(node.sequence)
    }

    async fn set(
        &self,
        node_id: &str,
        sequence: u64,
        metadata: serde_json::Value,
        payload: Option<Bytes>,
    ) -> Result<(), StreamError> {
        self.store(node_id, sequence, metadata, payload, self.data_ttl);
        Ok(())
    }

    async fn get(&self, node_id: &str, sequence: u64) -> Result<Option<StreamRecord>, StreamError> {
        let Some(node) = self.nodes.get(node_id) else {
            return Ok(None);
        };
        match node.records.get(&sequence) {
            Some(record) if record.expires_at > Instant::now() => Ok(Some(StreamRecord {
                sequence,
                metadata: record.metadata.clone(),
                payload: record.payload.clone(),
            })),
            // Expired records read as missing, exactly like a TTL'd key.
            _ => Ok(None),
        }
    }

    async fn current_seq(&self, node_id: &str) -> Result<u64, StreamError> {
        Ok(self.nodes.get(node_id).map(|n| n.sequence).unwrap_or(0))
    }

    async fn close(&self, node_id: &str) -> Result<u64, StreamError> {
        let sequence = self.incr_seq(node_id).await?;
        // The end-of-stream record must outlive the last data record.
        let ttl = self.data_ttl + Duration::from_secs(1);
        self.store(node_id, sequence, end_of_stream(), None, ttl);
        Ok(sequence)
    }

    async fn subscribe(&self, node_id: &str) -> Result<Subscription, StreamError> {
        let mut broadcast_rx = {
            let node = self
                .nodes
                .entry(node_id.to_string())
                .or_insert_with(NodeStream::new);
            node.notify.subscribe()
        };
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let overflow_flag = overflowed.clone();
        let topic = node_id.to_string();
        let forward_task = tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(sequence) => match tx.try_send(sequence) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(node = %topic, "subscriber queue overflow; dropping subscription");
                            overflow_flag.store(true, Ordering::Release);
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(node = %topic, skipped, "subscriber lagged the broadcast channel");
                        overflow_flag.store(true, Ordering::Release);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, overflowed, forward_task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish;

    #[tokio::test]
    async fn sequences_are_monotonic_per_node() {
        let store = MemoryStreamingDatastore::default();
        assert_eq!(store.incr_seq("a").await.unwrap(), 1);
        assert_eq!(store.incr_seq("a").await.unwrap(), 2);
        assert_eq!(store.incr_seq("b").await.unwrap(), 1);
        assert_eq!(store.current_seq("a").await.unwrap(), 2);
        assert_eq!(store.current_seq("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStreamingDatastore::default();
        let sequence = publish(
            &store,
            "node",
            serde_json::json!({"kind": "data"}),
            Some(Bytes::from_static(b"payload")),
        )
        .await
        .unwrap();
        let record = store.get("node", sequence).await.unwrap().unwrap();
        assert_eq!(record.metadata["kind"], "data");
        assert_eq!(record.payload.unwrap(), Bytes::from_static(b"payload"));
        assert!(store.get("node", sequence + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_records_read_as_missing() {
        let store = MemoryStreamingDatastore::new(Duration::from_millis(5));
        let sequence = publish(&store, "node", serde_json::json!({}), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("node", sequence).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_appends_end_of_stream() {
        let store = MemoryStreamingDatastore::default();
        publish(&store, "node", serde_json::json!({}), None)
            .await
            .unwrap();
        let eos = store.close("node").await.unwrap();
        assert_eq!(eos, 2);
        let record = store.get("node", eos).await.unwrap().unwrap();
        assert!(record.is_end_of_stream());
    }

    #[tokio::test]
    async fn live_subscription_receives_in_order() {
        let store = MemoryStreamingDatastore::default();
        let mut subscription = store.subscribe("node").await.unwrap();
        for _ in 0..3 {
            publish(&store, "node", serde_json::json!({}), None)
                .await
                .unwrap();
        }
        for expected in 1..=3u64 {
            assert_eq!(subscription.next().await.unwrap(), Some(expected));
        }
    }

    #[tokio::test]
    async fn overflow_closes_subscription() {
        let store = MemoryStreamingDatastore::default().with_queue_capacity(2);
        let mut subscription = store.subscribe("node").await.unwrap();
        for _ in 0..20 {
            publish(&store, "node", serde_json::json!({}), None)
                .await
                .unwrap();
        }
        // Give the forwarding task a chance to observe the overflow.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut outcome = subscription.next().await;
        while let Ok(Some(_)) = outcome {
            outcome = subscription.next().await;
        }
        assert!(matches!(outcome, Err(StreamError::Overflow)));
    }
}
