//! Redis-backed streaming datastore.
//!
//! Key layout per node:
//!
//! | Key | Contents |
//! |---|---|
//! | `sequence:{node}` | monotonically increasing counter |
//! | `data:{node}:{seq}` | hash: `sequence`, `metadata` (JSON), `payload` (bytes) |
//! | `notify:{node}` | pub/sub topic carrying sequence numbers |
//!
//! Records carry a TTL; the end-of-stream record outlives the data so a
//! late subscriber still observes the close. Publish uses `PUBLISH`,
//! subscribe uses `SUBSCRIBE` with one pub/sub connection per subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::warn;
use trellis_stream::{
    end_of_stream, StreamError, StreamRecord, StreamingDatastore, Subscription,
    DatastoreRegistry, DEFAULT_SUBSCRIBER_QUEUE,
};

fn backend_err(err: redis::RedisError) -> StreamError {
    StreamError::Backend(err.to_string())
}

/// Redis-backed [`StreamingDatastore`].
pub struct RedisStreamingDatastore {
    client: Client,
    connection: ConnectionManager,
    data_ttl: i64,
    seq_ttl: i64,
    queue_capacity: usize,
}

impl RedisStreamingDatastore {
    pub async fn connect(uri: &str, data_ttl: i64, seq_ttl: i64) -> Result<Self, StreamError> {
        let client = Client::open(uri).map_err(backend_err)?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(backend_err)?;
        Ok(Self {
            client,
            connection,
            data_ttl,
            seq_ttl,
            queue_capacity: DEFAULT_SUBSCRIBER_QUEUE,
        })
    }

    /// Build from registry settings: `uri` (required), `data_ttl` and
    /// `seq_ttl` in seconds.
    pub async fn from_settings(settings: &serde_json::Value) -> Result<Self, StreamError> {
        let uri = settings
            .get("uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StreamError::Backend("redis settings require a 'uri'".into()))?;
        let data_ttl = settings
            .get("data_ttl")
            .and_then(|v| v.as_i64())
            .unwrap_or(3600);
        let seq_ttl = settings
            .get("seq_ttl")
            .and_then(|v| v.as_i64())
            .unwrap_or(7200);
        Self::connect(uri, data_ttl, seq_ttl).await
    }

    fn data_key(node_id: &str, sequence: u64) -> String {
        format!("data:{node_id}:{sequence}")
    }

    fn sequence_key(node_id: &str) -> String {
        format!("sequence:{node_id}")
    }

    fn topic(node_id: &str) -> String {
        format!("notify:{node_id}")
    }

    async fn store(
        &self,
        node_id: &str,
        sequence: u64,
        metadata: serde_json::Value,
        payload: Option<Bytes>,
        seq_ttl: i64,
    ) -> Result<(), StreamError> {
        let mut connection = self.connection.clone();
        let data_key = Self::data_key(node_id, sequence);
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|err| StreamError::Backend(err.to_string()))?;

        let mut pipeline = redis::pipe();
        pipeline
            .hset(&data_key, "sequence", sequence)
            .ignore()
            .hset(&data_key, "metadata", metadata_json)
            .ignore();
        if let Some(payload) = payload {
            pipeline
                .hset(&data_key, "payload", payload.as_ref())
                .ignore();
        }
        pipeline
            .expire(&data_key, self.data_ttl)
            .ignore()
            .publish(Self::topic(node_id), sequence)
            .ignore()
            // Keep the counter alive as long as writes keep coming.
            .expire(Self::sequence_key(node_id), seq_ttl)
            .ignore();
        pipeline
            .query_async::<()>(&mut connection)
            .await
            .map_err(backend_err)
    }
}

#[async_trait]
impl StreamingDatastore for RedisStreamingDatastore {
    async fn incr_seq(&self, node_id: &str) -> Result<u64, StreamError> {
        let mut connection = self.connection.clone();
        connection
            .incr(Self::sequence_key(node_id), 1u64)
            .await
            .map_err(backend_err)
    }

    async fn set(
        &self,
        node_id: &str,
        sequence: u64,
        metadata: serde_json::Value,
        payload: Option<Bytes>,
    ) -> Result<(), StreamError> {
        self.store(node_id, sequence, metadata, payload, self.seq_ttl)
            .await
    }

    async fn get(&self, node_id: &str, sequence: u64) -> Result<Option<StreamRecord>, StreamError> {
        let mut connection = self.connection.clone();
        let (metadata, payload): (Option<String>, Option<Vec<u8>>) = connection
            .hget(
                Self::data_key(node_id, sequence),
                &["metadata", "payload"][..],
            )
            .await
            .map_err(backend_err)?;
        let Some(metadata) = metadata else {
            // TTL expired or never written.
            return Ok(None);
        };
        let metadata: serde_json::Value =
            serde_json::from_str(&metadata).map_err(|err| StreamError::Backend(err.to_string()))?;
        Ok(Some(StreamRecord {
            sequence,
            metadata,
            payload: payload.map(Bytes::from),
        }))
    }

    async fn current_seq(&self, node_id: &str) -> Result<u64, StreamError> {
        let mut connection = self.connection.clone();
        let current: Option<u64> = connection
            .get(Self::sequence_key(node_id))
            .await
            .map_err(backend_err)?;
        Ok(current.unwrap_or(0))
    }

    async fn close(&self, node_id: &str) -> Result<u64, StreamError> {
        let sequence = self.incr_seq(node_id).await?;
        // Expire the counter just after the last record; future writes
        // restart the sequence from 1.
        self.store(node_id, sequence, end_of_stream(), None, 1 + self.data_ttl)
            .await?;
        Ok(sequence)
    }

    async fn subscribe(&self, node_id: &str) -> Result<Subscription, StreamError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(backend_err)?;
        pubsub
            .subscribe(Self::topic(node_id))
            .await
            .map_err(backend_err)?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let overflow_flag = overflowed.clone();
        let topic = node_id.to_string();
        let forward_task = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let sequence: u64 = match message.get_payload() {
                    Ok(sequence) => sequence,
                    Err(err) => {
                        warn!(node = %topic, error = %err, "unparseable pub/sub payload");
                        continue;
                    }
                };
                match tx.try_send(sequence) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(node = %topic, "subscriber queue overflow; dropping subscription");
                        overflow_flag.store(true, Ordering::Release);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        Ok(Subscription::new(rx, overflowed, forward_task))
    }
}

/// Register the Redis backend under the name `"redis"`.
///
/// The factory connects lazily on first use from an async context, so
/// registration itself performs no I/O.
pub fn register(registry: &mut DatastoreRegistry) {
    registry.register("redis", |settings| {
        let settings = settings.clone();
        // Block on the connection handshake from the startup context.
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| StreamError::Backend(err.to_string()))?;
        let datastore = tokio::task::block_in_place(|| {
            handle.block_on(RedisStreamingDatastore::from_settings(&settings))
        })?;
        Ok(Arc::new(datastore) as Arc<dyn StreamingDatastore>)
    });
}
