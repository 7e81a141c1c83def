//! The serialization registry: `(spec or structure family, media type)`
//! -> encoder, with alias resolution and `*/*` fallback.
//!
//! The registry is assembled at startup and read-only afterwards;
//! `negotiate` is pure, so concurrent dispatch is safe. Format-specific
//! encoders beyond the built-in JSON/msgpack/CSV/raw set are plugin
//! code registered the same way.

use std::collections::HashMap;

use base64::Engine;
use bytes::Bytes;
use trellis_adapters::payload::{Column, Payload};
use trellis_model::{ScalarKind, Spec, StructureFamily};

use crate::Error;

pub const JSON: &str = "application/json";
pub const MSGPACK: &str = "application/x-msgpack";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const CSV: &str = "text/csv";

/// Errors raised by encoders.
#[derive(Debug, Clone)]
pub enum SerializationError {
    /// The payload's shape or dtype cannot be represented in this
    /// format; the client should slice or pick another format.
    UnsupportedShape(String),
    Encode(String),
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::UnsupportedShape(msg) => {
                write!(f, "unsupported shape: {msg}; consider slicing the data")
            }
            SerializationError::Encode(msg) => write!(f, "serialization failed: {msg}"),
        }
    }
}

impl std::error::Error for SerializationError {}

impl From<SerializationError> for Error {
    fn from(err: SerializationError) -> Self {
        Error::NotAcceptable {
            message: err.to_string(),
            supported: Vec::new(),
        }
    }
}

pub type Encoder = fn(&Payload) -> Result<Bytes, SerializationError>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum DispatchKey {
    Spec(String),
    Family(StructureFamily),
}

pub struct SerializationRegistry {
    encoders: HashMap<(DispatchKey, String), Encoder>,
    aliases: HashMap<String, String>,
    default_by_family: HashMap<StructureFamily, String>,
}

impl SerializationRegistry {
    pub fn empty() -> Self {
        Self {
            encoders: HashMap::new(),
            aliases: HashMap::new(),
            default_by_family: HashMap::new(),
        }
    }

    pub fn register_for_family(
        &mut self,
        family: StructureFamily,
        media_type: &str,
        encoder: Encoder,
    ) {
        self.encoders
            .insert((DispatchKey::Family(family), media_type.to_string()), encoder);
    }

    pub fn register_for_spec(&mut self, spec: &str, media_type: &str, encoder: Encoder) {
        self.encoders.insert(
            (DispatchKey::Spec(spec.to_string()), media_type.to_string()),
            encoder,
        );
    }

    pub fn register_alias(&mut self, alias: &str, media_type: &str) {
        self.aliases
            .insert(alias.to_string(), media_type.to_string());
    }

    pub fn set_default(&mut self, family: StructureFamily, media_type: &str) {
        self.default_by_family
            .insert(family, media_type.to_string());
    }

    pub fn default_for(&self, family: StructureFamily) -> &str {
        self.default_by_family
            .get(&family)
            .map(String::as_str)
            .unwrap_or(JSON)
    }

    fn resolve_alias<'a>(&'a self, requested: &'a str) -> &'a str {
        self.aliases
            .get(requested)
            .map(String::as_str)
            .unwrap_or(requested)
    }

    /// Media types available for a node, specs first.
    pub fn supported(&self, family: StructureFamily, specs: &[Spec]) -> Vec<String> {
        let mut supported = Vec::new();
        for ((key, media_type), _) in &self.encoders {
            let relevant = match key {
                DispatchKey::Spec(name) => specs.iter().any(|spec| spec.name == *name),
                DispatchKey::Family(f) => *f == family,
            };
            if relevant && !supported.contains(media_type) {
                supported.push(media_type.clone());
            }
        }
        supported.sort();
        supported
    }

    /// Content negotiation per the request: an explicit `format=` query
    /// parameter wins over `Accept`; within each requested media type,
    /// node specs are tried in order before the structure family.
    pub fn negotiate(
        &self,
        format_param: Option<&str>,
        accept: Option<&str>,
        family: StructureFamily,
        specs: &[Spec],
    ) -> Result<(String, Encoder), Error> {
        let requested: Vec<String> = if let Some(format) = format_param {
            format
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| self.resolve_alias(part).to_string())
                .collect()
        } else if let Some(accept) = accept {
            accept
                .split(',')
                .map(|part| part.split(';').next().unwrap_or(part).trim())
                .filter(|part| !part.is_empty())
                .map(|part| {
                    if part == "*/*" {
                        self.default_for(family).to_string()
                    } else {
                        self.resolve_alias(part).to_string()
                    }
                })
                .collect()
        } else {
            vec![self.default_for(family).to_string()]
        };

        for media_type in &requested {
            for spec in specs {
                let key = (DispatchKey::Spec(spec.name.clone()), media_type.clone());
                if let Some(encoder) = self.encoders.get(&key) {
                    return Ok((media_type.clone(), *encoder));
                }
            }
            let key = (DispatchKey::Family(family), media_type.clone());
            if let Some(encoder) = self.encoders.get(&key) {
                return Ok((media_type.clone(), *encoder));
            }
        }
        Err(Error::NotAcceptable {
            message: format!(
                "no encoder for any of the requested media types: {}",
                requested.join(", ")
            ),
            supported: self.supported(family, specs),
        })
    }
}

impl Default for SerializationRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register_alias("json", JSON);
        registry.register_alias("msgpack", MSGPACK);
        registry.register_alias("csv", CSV);
        registry.register_alias("raw", OCTET_STREAM);

        registry.register_for_family(StructureFamily::Array, OCTET_STREAM, encode_array_raw);
        registry.register_for_family(StructureFamily::Array, JSON, encode_json);
        registry.register_for_family(StructureFamily::Array, MSGPACK, encode_array_msgpack);
        registry.set_default(StructureFamily::Array, OCTET_STREAM);

        registry.register_for_family(StructureFamily::Table, CSV, encode_table_csv);
        registry.register_for_family(StructureFamily::Table, JSON, encode_json);
        registry.register_for_family(StructureFamily::Table, MSGPACK, encode_msgpack);
        registry.set_default(StructureFamily::Table, JSON);

        registry.register_for_family(StructureFamily::Sparse, JSON, encode_json);
        registry.register_for_family(StructureFamily::Sparse, MSGPACK, encode_msgpack);
        registry.set_default(StructureFamily::Sparse, JSON);

        registry.register_for_family(StructureFamily::Awkward, JSON, encode_json);
        registry.register_for_family(StructureFamily::Awkward, MSGPACK, encode_awkward_msgpack);
        registry.set_default(StructureFamily::Awkward, MSGPACK);

        for family in [StructureFamily::Container, StructureFamily::Composite] {
            registry.register_for_family(family, JSON, encode_json);
            registry.register_for_family(family, MSGPACK, encode_msgpack);
            registry.set_default(family, JSON);
        }
        registry
    }
}

// ── Payload -> JSON value ────────────────────────────────────────────────

/// Convert a payload to a JSON-compatible value (nested lists for
/// arrays, row objects for tables, base64 for awkward buffers).
pub fn payload_to_value(payload: &Payload) -> Result<serde_json::Value, SerializationError> {
    match payload {
        Payload::Array(array) => {
            let values = array_scalars(array)?;
            Ok(nest(&values, &array.shape))
        }
        Payload::Table(table) => Ok(serde_json::Value::Array(table.to_json_rows())),
        Payload::Sparse(sparse) => {
            let data = sparse
                .data
                .as_f64()
                .map_err(|err| SerializationError::UnsupportedShape(err.to_string()))?;
            Ok(serde_json::json!({
                "coords": sparse.coords,
                "data": data,
            }))
        }
        Payload::Awkward(buffers) => {
            let engine = base64::engine::general_purpose::STANDARD;
            let map: serde_json::Map<String, serde_json::Value> = buffers
                .iter()
                .map(|(name, bytes)| {
                    (name.clone(), serde_json::json!(engine.encode(bytes)))
                })
                .collect();
            Ok(map.into())
        }
        Payload::Container(entries) => {
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), payload_to_value(value)?);
            }
            Ok(map.into())
        }
    }
}

fn array_scalars(
    array: &trellis_adapters::ArrayPayload,
) -> Result<Vec<serde_json::Value>, SerializationError> {
    let item = array.data_type.item_size as usize;
    if item == 0 || array.bytes.len() % item != 0 {
        return Err(SerializationError::UnsupportedShape(format!(
            "byte length {} is not a multiple of the item size {item}",
            array.bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(array.bytes.len() / item);
    for chunk in array.bytes.chunks_exact(item) {
        let value = match (array.data_type.kind, item) {
            (ScalarKind::Float, 8) => {
                serde_json::json!(f64::from_le_bytes(chunk.try_into().expect("item size 8")))
            }
            (ScalarKind::Float, 4) => {
                serde_json::json!(f32::from_le_bytes(chunk.try_into().expect("item size 4")))
            }
            (ScalarKind::Int, 8) => {
                serde_json::json!(i64::from_le_bytes(chunk.try_into().expect("item size 8")))
            }
            (ScalarKind::Int, 4) => {
                serde_json::json!(i32::from_le_bytes(chunk.try_into().expect("item size 4")))
            }
            (ScalarKind::Uint, 8) => {
                serde_json::json!(u64::from_le_bytes(chunk.try_into().expect("item size 8")))
            }
            (ScalarKind::Uint, 1) => serde_json::json!(chunk[0]),
            (ScalarKind::Bool, 1) => serde_json::json!(chunk[0] != 0),
            (kind, size) => {
                return Err(SerializationError::UnsupportedShape(format!(
                    "cannot transcode dtype {kind:?}/{size} to JSON; \
                     request application/octet-stream"
                )))
            }
        };
        out.push(value);
    }
    Ok(out)
}

fn nest(values: &[serde_json::Value], shape: &[u64]) -> serde_json::Value {
    match shape {
        [] => values.first().cloned().unwrap_or(serde_json::Value::Null),
        [_] => serde_json::Value::Array(values.to_vec()),
        [outer, rest @ ..] => {
            let inner: usize = rest.iter().product::<u64>() as usize;
            let mut out = Vec::with_capacity(*outer as usize);
            for index in 0..*outer as usize {
                out.push(nest(&values[index * inner..(index + 1) * inner], rest));
            }
            serde_json::Value::Array(out)
        }
    }
}

// ── Built-in encoders ────────────────────────────────────────────────────

fn encode_json(payload: &Payload) -> Result<Bytes, SerializationError> {
    let value = payload_to_value(payload)?;
    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|err| SerializationError::Encode(err.to_string()))
}

fn encode_msgpack(payload: &Payload) -> Result<Bytes, SerializationError> {
    let value = payload_to_value(payload)?;
    rmp_serde::to_vec_named(&value)
        .map(Bytes::from)
        .map_err(|err| SerializationError::Encode(err.to_string()))
}

fn encode_array_raw(payload: &Payload) -> Result<Bytes, SerializationError> {
    match payload {
        Payload::Array(array) => Ok(array.bytes.clone()),
        _ => Err(SerializationError::UnsupportedShape(
            "raw encoding applies to arrays only".to_string(),
        )),
    }
}

/// Msgpack array frame: raw bytes plus shape and dtype as metadata.
fn encode_array_msgpack(payload: &Payload) -> Result<Bytes, SerializationError> {
    let Payload::Array(array) = payload else {
        return Err(SerializationError::UnsupportedShape(
            "msgpack array encoding applies to arrays only".to_string(),
        ));
    };
    #[derive(serde::Serialize)]
    struct Frame<'a> {
        shape: &'a [u64],
        data_type: &'a trellis_model::DataType,
        #[serde(with = "serde_bytes")]
        payload: &'a [u8],
    }
    rmp_serde::to_vec_named(&Frame {
        shape: &array.shape,
        data_type: &array.data_type,
        payload: &array.bytes,
    })
    .map(Bytes::from)
    .map_err(|err| SerializationError::Encode(err.to_string()))
}

fn encode_awkward_msgpack(payload: &Payload) -> Result<Bytes, SerializationError> {
    let Payload::Awkward(buffers) = payload else {
        return Err(SerializationError::UnsupportedShape(
            "buffer encoding applies to awkward data only".to_string(),
        ));
    };
    let map: std::collections::BTreeMap<&str, &serde_bytes::Bytes> = buffers
        .iter()
        .map(|(name, bytes)| (name.as_str(), serde_bytes::Bytes::new(bytes)))
        .collect();
    rmp_serde::to_vec_named(&map)
        .map(Bytes::from)
        .map_err(|err| SerializationError::Encode(err.to_string()))
}

fn encode_table_csv(payload: &Payload) -> Result<Bytes, SerializationError> {
    let Payload::Table(table) = payload else {
        return Err(SerializationError::UnsupportedShape(
            "CSV encoding applies to tables only".to_string(),
        ));
    };
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.columns.iter().map(|(name, _)| name.as_str()))
        .map_err(|err| SerializationError::Encode(err.to_string()))?;
    for row in 0..table.row_count() {
        let cells: Vec<String> = table
            .columns
            .iter()
            .map(|(_, column)| match column {
                Column::Bool(values) => values[row].to_string(),
                Column::Int64(values) => values[row].to_string(),
                Column::Float64(values) => values[row].to_string(),
                Column::Utf8(values) => values[row].clone(),
            })
            .collect();
        writer
            .write_record(&cells)
            .map_err(|err| SerializationError::Encode(err.to_string()))?;
    }
    writer
        .into_inner()
        .map(Bytes::from)
        .map_err(|err| SerializationError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_adapters::ArrayPayload;

    fn array_payload() -> Payload {
        Payload::Array(ArrayPayload::from_f64(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]))
    }

    #[test]
    fn negotiation_prefers_format_param() {
        let registry = SerializationRegistry::default();
        let (media_type, _) = registry
            .negotiate(
                Some("json"),
                Some(OCTET_STREAM),
                StructureFamily::Array,
                &[],
            )
            .unwrap();
        assert_eq!(media_type, JSON);
    }

    #[test]
    fn wildcard_falls_back_to_family_default() {
        let registry = SerializationRegistry::default();
        let (media_type, _) = registry
            .negotiate(None, Some("*/*"), StructureFamily::Array, &[])
            .unwrap();
        assert_eq!(media_type, OCTET_STREAM);
    }

    #[test]
    fn unknown_media_type_is_not_acceptable() {
        let registry = SerializationRegistry::default();
        let err = registry
            .negotiate(Some("application/x-hdf5"), None, StructureFamily::Array, &[])
            .unwrap_err();
        match err {
            Error::NotAcceptable { supported, .. } => {
                assert!(supported.contains(&JSON.to_string()));
            }
            other => panic!("expected NotAcceptable, got {other:?}"),
        }
    }

    #[test]
    fn spec_encoder_wins_over_family() {
        fn spec_encoder(_payload: &Payload) -> Result<Bytes, SerializationError> {
            Ok(Bytes::from_static(b"spec"))
        }
        let mut registry = SerializationRegistry::default();
        registry.register_for_spec("xdi", JSON, spec_encoder);
        let (_, encoder) = registry
            .negotiate(
                Some("json"),
                None,
                StructureFamily::Array,
                &[Spec::named("xdi")],
            )
            .unwrap();
        assert_eq!(encoder(&array_payload()).unwrap(), Bytes::from_static(b"spec"));
    }

    #[test]
    fn json_nests_by_shape() {
        let value = payload_to_value(&array_payload()).unwrap();
        assert_eq!(value, serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn csv_round_trips_header_and_rows() {
        let payload = Payload::Table(trellis_adapters::TablePayload {
            columns: vec![
                ("num".into(), Column::Int64(vec![1, 2])),
                ("name".into(), Column::Utf8(vec!["a".into(), "b".into()])),
            ],
        });
        let bytes = encode_table_csv(&payload).unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, "num,name\n1,a\n2,b\n");
    }
}
