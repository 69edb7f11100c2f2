//! Idempotency tokens for single-file uploads.
//!
//! The token is derived from file identity (name, size, last-modified),
//! not content, so a user-initiated retry of the same request maps to
//! the same server-side record. Batch requests carry no token; the
//! server dedups batch items itself.

use sha2::{Digest, Sha256};

/// Derive the idempotency token for a file identity.
///
/// The identity triple is hashed so arbitrary filenames stay safe in an
/// HTTP header. Deterministic: equal triples yield equal tokens, and a
/// change to any component changes the token.
pub fn derive_key(name: &str, size: u64, modified_ms: i64) -> String {
    hex::encode(Sha256::digest(format!("{name}:{size}:{modified_ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable() {
        let first = derive_key("site.jpg", 2048, 1_700_000_000_000);
        let second = derive_key("site.jpg", 2048, 1_700_000_000_000);
        assert_eq!(first, second);
    }

    #[test]
    fn test_key_depends_on_every_component() {
        let base = derive_key("site.jpg", 2048, 1_700_000_000_000);
        assert_ne!(base, derive_key("other.jpg", 2048, 1_700_000_000_000));
        assert_ne!(base, derive_key("site.jpg", 2049, 1_700_000_000_000));
        assert_ne!(base, derive_key("site.jpg", 2048, 1_700_000_000_001));
    }

    #[test]
    fn test_key_is_header_safe() {
        // Filenames with separators, spaces or non-ASCII still produce
        // a plain hex token.
        let key = derive_key("wéird name: 2024/01.jpg", 1, 2);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
