//! Response envelopes: the JSON API shape served by metadata and
//! listing endpoints, encodable as JSON or msgpack.

use bytes::Bytes;
use serde::Serialize;

use crate::pagination::PageLinks;
use crate::Error;

/// A JSON API resource: the node key as `id`, attributes, links, meta.
#[derive(Clone, Debug, Serialize)]
pub struct Resource {
    pub id: String,
    pub attributes: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// The top-level response envelope.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Envelope {
    pub fn of(data: impl Serialize) -> Result<Self, Error> {
        Ok(Self {
            data: Some(
                serde_json::to_value(data)
                    .map_err(|err| Error::Internal(err.to_string()))?,
            ),
            ..Default::default()
        })
    }

    pub fn with_links(mut self, links: PageLinks) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Body encoding for envelopes: JSON by default, msgpack when the
/// client asks for `application/x-msgpack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Msgpack,
}

impl WireFormat {
    /// Pick from an `Accept` header value.
    pub fn negotiate(accept: Option<&str>) -> Self {
        match accept {
            Some(accept)
                if accept
                    .split(',')
                    .any(|part| part.trim().starts_with("application/x-msgpack")) =>
            {
                WireFormat::Msgpack
            }
            _ => WireFormat::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Msgpack => "application/x-msgpack",
        }
    }

    /// Serialize a value for the wire. The msgpack encoder writes maps
    /// with string keys (named) so dynamically-typed clients can decode
    /// without a schema.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, Error> {
        match self {
            WireFormat::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|err| Error::Internal(err.to_string())),
            WireFormat::Msgpack => rmp_serde::to_vec_named(value)
                .map(Bytes::from)
                .map_err(|err| Error::Internal(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation() {
        assert_eq!(WireFormat::negotiate(None), WireFormat::Json);
        assert_eq!(
            WireFormat::negotiate(Some("application/json")),
            WireFormat::Json
        );
        assert_eq!(
            WireFormat::negotiate(Some("application/x-msgpack")),
            WireFormat::Msgpack
        );
        assert_eq!(
            WireFormat::negotiate(Some("text/html, application/x-msgpack;q=0.9")),
            WireFormat::Msgpack
        );
    }

    #[test]
    fn envelope_round_trips_as_msgpack() {
        let envelope = Envelope::of(serde_json::json!({"id": "x"}))
            .unwrap()
            .with_meta(serde_json::json!({"count": 3}));
        let encoded = WireFormat::Msgpack.encode(&envelope).unwrap();
        let decoded: serde_json::Value = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded["data"]["id"], "x");
        assert_eq!(decoded["meta"]["count"], 3);
    }
}
