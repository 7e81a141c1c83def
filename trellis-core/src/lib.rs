//! Request core: the error model, pagination envelopes, conditional
//! requests, content negotiation, validation, and metrics shared by the
//! HTTP surface.

pub mod envelope;
pub mod error;
pub mod etag;
pub mod fields;
pub mod media;
pub mod metrics;
pub mod pagination;
pub mod patch;
pub mod request_id;
pub mod validation;

pub use envelope::{Envelope, Resource, WireFormat};
pub use error::Error;
pub use etag::{compute_etag, if_none_match_matches};
pub use fields::{EntryField, FieldSelection};
pub use media::{SerializationError, SerializationRegistry, MSGPACK};
pub use metrics::StageTimer;
pub use pagination::{PageLinks, PageParams, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use request_id::{correlation, RequestId, REQUEST_ID_HEADER};
pub use validation::{ValidationError, ValidationRegistry, Validator};

/// Caps on container inlining (see `spec` handling in the server).
pub const INLINED_CONTENTS_LIMIT: u64 = 500;
pub const DEPTH_LIMIT: usize = 5;

/// Default response size guard, in bytes.
pub const DEFAULT_RESPONSE_BYTESIZE_LIMIT: u64 = 300 * 1024 * 1024;
