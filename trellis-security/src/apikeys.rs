//! API key generation and hashing.
//!
//! Only the SHA-256 digest of the secret is stored, plus the first eight
//! hex characters for display and revocation. The secret itself is shown
//! exactly once, in the creation response.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parameters for creating an API key.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ApiKeyParams {
    /// Lifetime in seconds; `None` means no expiration.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Scope subset. The metascope `inherit` means all of the
    /// principal's scopes at time of use.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub note: Option<String>,
    /// Restrict the key to acting within these access tags.
    #[serde(default)]
    pub access_tags: Option<Vec<String>>,
}

/// Generate a new API key secret: 32 random bytes, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 digest of the secret, as stored.
pub fn hash_secret(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

/// The display prefix stored alongside the digest.
pub fn first_eight(secret: &str) -> String {
    secret.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_unique_and_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_stable() {
        let secret = "deadbeef";
        assert_eq!(hash_secret(secret), hash_secret(secret));
        assert_ne!(hash_secret(secret), hash_secret("deadbeee"));
        assert_eq!(first_eight("0123456789abcdef"), "01234567");
    }
}
