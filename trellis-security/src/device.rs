//! Device-code flow primitives.
//!
//! The device endpoint issues a short user code (typed into a browser)
//! and a long device code (held by the polling terminal client). Only
//! the SHA-256 of the device code is stored. Pending sessions expire
//! after fifteen minutes and are garbage-collected lazily.

use chrono::Duration;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// How long a pending device authorization stays valid.
pub fn device_code_max_age() -> Duration {
    Duration::minutes(15)
}

/// Suggested client polling interval, in seconds.
pub const DEVICE_CODE_POLLING_INTERVAL: u64 = 5;

/// What the device endpoint returns to the terminal client.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceCodeGrant {
    pub user_code: String,
    pub device_code: String,
    pub verification_uri: String,
    pub authorization_uri: String,
    pub interval: u64,
}

/// Generate a device code: 32 random bytes. Returns `(hex, sha256)`.
pub fn generate_device_code() -> (String, Vec<u8>) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let digest = Sha256::digest(bytes).to_vec();
    (hex::encode(bytes), digest)
}

/// SHA-256 of a hex-encoded device code presented by a client.
pub fn hash_device_code(device_code_hex: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(device_code_hex).ok()?;
    Some(Sha256::digest(bytes).to_vec())
}

/// Generate an eight-hex-digit user code (unformatted, uppercase).
pub fn generate_user_code() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes).to_uppercase()
}

/// `"ABCD1234"` -> `"ABCD-1234"` for display.
pub fn format_user_code(user_code: &str) -> String {
    if user_code.len() == 8 {
        format!("{}-{}", &user_code[..4], &user_code[4..])
    } else {
        user_code.to_string()
    }
}

/// Undo user formatting: strip the hyphen, trim, uppercase.
pub fn normalize_user_code(input: &str) -> String {
    input.trim().replace('-', "").to_uppercase()
}
