//! `/stream/single` (WebSocket subscriptions) and `/stream/close`.
//!
//! On connection: authenticate during the handshake, resolve the node
//! (absent nodes reject the handshake with 404), emit a schema frame,
//! replay stored sequences from the requested start, then forward live
//! sequences until the stream closes or the subscriber falls behind.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, info, warn};
use trellis_core::metrics::ws_active;
use trellis_core::Error;
use trellis_model::Structure;
use trellis_security::scopes;
use trellis_stream::{publish, stream_closed, StreamError, StreamRecord};

use crate::extract::{Auth, RawQuery};
use crate::resolve::secure_lookup;
use crate::routers::metadata::{path_str, OptionalPath};
use crate::AppState;

/// Close code sent when a subscriber's queue overflows.
const OVERFLOW_CLOSE_CODE: u16 = 1013;

#[derive(Clone, Copy, PartialEq)]
enum EnvelopeFormat {
    Msgpack,
    Json,
}

impl EnvelopeFormat {
    fn parse(query: &RawQuery) -> Result<Self, Error> {
        match query.first("envelope") {
            None => Ok(EnvelopeFormat::Msgpack),
            Some(name) => match name.to_ascii_lowercase().as_str() {
                "msgpack" => Ok(EnvelopeFormat::Msgpack),
                "json" => Ok(EnvelopeFormat::Json),
                other => Err(Error::BadRequest(format!(
                    "unknown envelope format: {other}"
                ))),
            },
        }
    }

    fn frame(&self, record: &StreamRecord) -> Result<Message, Error> {
        match self {
            EnvelopeFormat::Msgpack => {
                #[derive(Serialize)]
                struct Frame<'a> {
                    sequence: u64,
                    metadata: &'a serde_json::Value,
                    #[serde(skip_serializing_if = "Option::is_none")]
                    payload: Option<serde_bytes::ByteBuf>,
                }
                let frame = Frame {
                    sequence: record.sequence,
                    metadata: &record.metadata,
                    payload: record
                        .payload
                        .as_ref()
                        .map(|bytes| serde_bytes::ByteBuf::from(bytes.to_vec())),
                };
                let encoded = rmp_serde::to_vec_named(&frame)
                    .map_err(|err| Error::Internal(err.to_string()))?;
                Ok(Message::Binary(encoded.into()))
            }
            EnvelopeFormat::Json => {
                let engine = base64::engine::general_purpose::STANDARD;
                let frame = serde_json::json!({
                    "sequence": record.sequence,
                    "metadata": record.metadata,
                    "payload": record.payload.as_ref().map(|bytes| engine.encode(bytes)),
                });
                Ok(Message::Text(frame.to_string().into()))
            }
        }
    }
}

pub async fn subscribe(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
    query: RawQuery,
    upgrade: WebSocketUpgrade,
) -> Result<Response, Error> {
    // Deny during the handshake: bad credentials are 401/400 from the
    // extractor, missing scopes 401 here, missing nodes 404.
    auth.require_scopes(&[scopes::READ_DATA])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["read:data"]).await?;
    let topic = resolved.stream_topic();
    let structure: Option<Structure> = resolved
        .record
        .as_ref()
        .and_then(|record| record.node.attributes.structure.clone());
    let key = resolved
        .record
        .as_ref()
        .map(|record| record.node.key.clone())
        .unwrap_or_default();

    let format = EnvelopeFormat::parse(&query)?;
    let start: Option<u64> = query
        .first("start")
        .map(|value| {
            value
                .parse()
                .map_err(|_| Error::BadRequest("malformed start sequence".to_string()))
        })
        .transpose()?;

    Ok(upgrade.on_upgrade(move |socket| async move {
        ws_active().inc();
        run_subscription(state, socket, topic, key, structure, format, start).await;
        ws_active().dec();
    }))
}

async fn run_subscription(
    state: AppState,
    mut socket: WebSocket,
    topic: String,
    key: String,
    structure: Option<Structure>,
    format: EnvelopeFormat,
    start: Option<u64>,
) {
    // Schema frame first, so the client can decode what follows.
    let schema = StreamRecord {
        sequence: 0,
        metadata: serde_json::json!({
            "type": "schema",
            "key": key,
            "structure": structure,
        }),
        payload: None,
    };
    match format.frame(&schema) {
        Ok(message) => {
            if socket.send(message).await.is_err() {
                return;
            }
        }
        Err(err) => {
            warn!(error = %err, "could not encode schema frame");
            return;
        }
    }

    // Subscribe before replaying so nothing published mid-replay is
    // missed; duplicates are suppressed with the sequence cursor.
    let mut subscription = match state.stream.subscribe(&topic).await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(error = %err, "subscription failed");
            let _ = close_with(&mut socket, 1011, "subscription failed").await;
            return;
        }
    };

    let mut last_sent: u64 = 0;
    if let Some(start) = start {
        let current = match state.stream.current_seq(&topic).await {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "could not read sequence counter");
                let _ = close_with(&mut socket, 1011, "replay failed").await;
                return;
            }
        };
        // start=0 means "from the earliest available".
        for sequence in start.max(1)..=current {
            match forward(&state, &mut socket, &topic, sequence, format).await {
                Forwarded::Sent => last_sent = sequence,
                Forwarded::Skipped => {}
                Forwarded::EndOfStream => {
                    let _ = close_with(&mut socket, 1000, "producer ended stream").await;
                    return;
                }
                Forwarded::Gone => return,
            }
        }
    }

    loop {
        tokio::select! {
            next = subscription.next() => match next {
                Ok(Some(sequence)) => {
                    if sequence <= last_sent {
                        // Replay overlap; already delivered.
                        continue;
                    }
                    match forward(&state, &mut socket, &topic, sequence, format).await {
                        Forwarded::Sent => last_sent = sequence,
                        Forwarded::Skipped => {}
                        Forwarded::EndOfStream => {
                            let _ = close_with(&mut socket, 1000, "producer ended stream").await;
                            return;
                        }
                        Forwarded::Gone => return,
                    }
                }
                Ok(None) => {
                    debug!(topic, "subscription topic closed");
                    let _ = close_with(&mut socket, 1001, "topic closed").await;
                    return;
                }
                Err(StreamError::Overflow) => {
                    warn!(topic, "subscriber queue overflowed; closing");
                    let _ = close_with(
                        &mut socket,
                        OVERFLOW_CLOSE_CODE,
                        "subscriber fell behind",
                    )
                    .await;
                    return;
                }
                Err(err) => {
                    warn!(topic, error = %err, "subscription error");
                    let _ = close_with(&mut socket, 1011, "internal error").await;
                    return;
                }
            },
            incoming = socket.recv() => match incoming {
                // Unsubscribe (dropping the Subscription) on client
                // close so abandoned connections do not leak a task.
                None | Some(Ok(Message::Close(_))) => {
                    info!(topic, "client disconnected");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
        }
    }
}

enum Forwarded {
    Sent,
    /// TTL-expired records read as missing and are skipped.
    Skipped,
    EndOfStream,
    /// The socket went away.
    Gone,
}

async fn forward(
    state: &AppState,
    socket: &mut WebSocket,
    topic: &str,
    sequence: u64,
    format: EnvelopeFormat,
) -> Forwarded {
    let record = match state.stream.get(topic, sequence).await {
        Ok(Some(record)) => record,
        Ok(None) => return Forwarded::Skipped,
        Err(err) => {
            warn!(topic, sequence, error = %err, "record read failed");
            return Forwarded::Skipped;
        }
    };
    if record.is_end_of_stream() {
        return Forwarded::EndOfStream;
    }
    match format.frame(&record) {
        Ok(message) => {
            if socket.send(message).await.is_err() {
                return Forwarded::Gone;
            }
            Forwarded::Sent
        }
        Err(err) => {
            warn!(topic, sequence, error = %err, "frame encoding failed");
            Forwarded::Skipped
        }
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) -> Result<(), axum::Error> {
    socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
}

/// Writer signals end-of-stream: append the distinguished record and
/// notify subscribers of the parent container.
pub async fn close_stream(
    State(state): State<AppState>,
    auth: Auth,
    path: OptionalPath,
) -> Result<Json<serde_json::Value>, Error> {
    auth.require_scopes(&[scopes::WRITE_DATA])?;
    let path = path_str(&path);
    let resolved = secure_lookup(&state, &auth, &path, &["write:data"]).await?;
    let topic = resolved.stream_topic();
    let sequence = state
        .stream
        .close(&topic)
        .await
        .map_err(|err| Error::Internal(err.to_string()))?;

    if let Some(record) = &resolved.record {
        let parent_topic = match record.node.ancestors.len() {
            0 => "root".to_string(),
            _ => {
                let segments: Vec<&str> =
                    record.node.ancestors.iter().map(String::as_str).collect();
                state
                    .catalog
                    .lookup_node(&segments)
                    .await
                    .map_err(crate::extract::catalog_err)?
                    .map(|parent| parent.id.to_string())
                    .unwrap_or_else(|| "root".to_string())
            }
        };
        let _ = publish(
            state.stream.as_ref(),
            &parent_topic,
            stream_closed(&record.node.key),
            None,
        )
        .await;
    }
    Ok(Json(serde_json::json!({"closed": sequence})))
}
