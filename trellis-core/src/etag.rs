//! Conditional requests: ETags and `If-None-Match`.

use sha2::{Digest, Sha256};

/// Deterministic ETag for a serialized body under a media type.
pub fn compute_etag(body: &[u8], media_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(media_type.as_bytes());
    hasher.update([0]);
    hasher.update(body);
    format!("\"{}\"", &hex::encode(hasher.finalize())[..32])
}

/// Whether an `If-None-Match` header matches the given ETag. Handles
/// comma-separated lists, weak validators, and `*`.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate == etag || candidate.strip_prefix("W/") == Some(etag)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_varies_with_body_and_media_type() {
        let a = compute_etag(b"body", "application/json");
        let b = compute_etag(b"body", "application/json");
        let c = compute_etag(b"body", "application/x-msgpack");
        let d = compute_etag(b"other", "application/json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with('"') && a.ends_with('"'));
    }

    #[test]
    fn if_none_match_forms() {
        let etag = compute_etag(b"x", "application/json");
        assert!(if_none_match_matches(&etag, &etag));
        assert!(if_none_match_matches("*", &etag));
        assert!(if_none_match_matches(
            &format!("\"nope\", {etag}"),
            &etag
        ));
        assert!(if_none_match_matches(&format!("W/{etag}"), &etag));
        assert!(!if_none_match_matches("\"nope\"", &etag));
    }
}
