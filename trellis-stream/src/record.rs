//! Stream records and the event vocabulary.

use bytes::Bytes;
use chrono::Utc;

/// One stored entry of a node's stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub sequence: u64,
    pub metadata: serde_json::Value,
    pub payload: Option<Bytes>,
}

impl StreamRecord {
    pub fn is_end_of_stream(&self) -> bool {
        self.metadata
            .get("end_of_stream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Metadata for the distinguished end-of-stream record.
pub fn end_of_stream() -> serde_json::Value {
    serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "end_of_stream": true,
    })
}

/// Container event: a child node was created under the subscribed
/// container. `key` is relative to the container.
pub fn child_created(key: &str) -> serde_json::Value {
    container_event("child_created", key)
}

/// Container event: a child's metadata was updated.
pub fn child_metadata_updated(key: &str) -> serde_json::Value {
    container_event("child_metadata_updated", key)
}

/// Container event: a child's stream was closed.
pub fn stream_closed(key: &str) -> serde_json::Value {
    container_event("stream_closed", key)
}

fn container_event(event: &str, key: &str) -> serde_json::Value {
    serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "type": event,
        "key": key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_detected() {
        let record = StreamRecord {
            sequence: 4,
            metadata: end_of_stream(),
            payload: None,
        };
        assert!(record.is_end_of_stream());

        let record = StreamRecord {
            sequence: 1,
            metadata: child_created("x"),
            payload: None,
        };
        assert!(!record.is_end_of_stream());
        assert_eq!(record.metadata["type"], "child_created");
        assert_eq!(record.metadata["key"], "x");
    }
}
