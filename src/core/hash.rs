//! Content-addressed key derivation.
//!
//! Both cache instances key (or index) entries by the content being
//! cached rather than by a caller-supplied identifier, so identical
//! text always maps to the same key and duplicate work is skipped.

use sha2::{Digest, Sha256};

/// Derives the cache key for a piece of text content.
///
/// SHA-256 of the UTF-8 bytes, rendered as lowercase hex. Deterministic:
/// the same text always yields the same key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = content_hash("job 42 complete");
        let b = content_hash("job 42 complete");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_texts_hash_differently() {
        assert_ne!(content_hash("job 42 complete"), content_hash("job 43 complete"));
    }

    #[test]
    fn test_known_digest() {
        // SHA-256("hello"), independently computed
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_lowercase_hex_form() {
        let key = content_hash("anything");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
