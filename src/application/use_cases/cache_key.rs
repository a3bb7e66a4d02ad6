//! Content-addressable keys for converted test names.

use crate::domain::spec_view::CacheKey;
use sha2::{Digest, Sha256};

/// Derives the cache key of a single test.
///
/// Each field is length-prefixed so that moving bytes between adjacent fields
/// ("a b" + "c" vs "a" + "b c") always produces a different digest.
pub fn derive_cache_key(
    codebase_id: &str,
    file_path: &str,
    suite_hierarchy: &str,
    test_name: &str,
    language: &str,
) -> CacheKey {
    let mut hasher = Sha256::new();
    for field in [codebase_id, file_path, suite_hierarchy, test_name, language] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    CacheKey(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [&str; 5] = [
        "codebase-1",
        "src/auth.test.ts",
        "Auth > Login",
        "should create session when login successful",
        "Korean",
    ];

    fn key_of(fields: [&str; 5]) -> CacheKey {
        derive_cache_key(fields[0], fields[1], fields[2], fields[3], fields[4])
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(key_of(BASE), key_of(BASE));
    }

    #[test]
    fn test_known_digest_is_stable() {
        // Pinned so that a change in field encoding is caught before it
        // silently invalidates every stored conversion.
        let mut hasher = Sha256::new();
        for field in ["a", "b", "c", "d", "e"] {
            hasher.update(1u64.to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(derive_cache_key("a", "b", "c", "d", "e").0, expected);
    }

    #[test]
    fn test_each_field_changes_key() {
        let base = key_of(BASE);
        for position in 0..5 {
            let mut changed = BASE;
            changed[position] = "something else";
            assert_ne!(key_of(changed), base, "field {} did not affect key", position);
        }
    }

    #[test]
    fn test_field_boundaries_matter() {
        let left = derive_cache_key("ab", "c", "", "", "");
        let right = derive_cache_key("a", "bc", "", "", "");
        assert_ne!(left, right);
    }
}
