use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex length of a SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Compute the canonical (lower-case hex) SHA-256 of rider content.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Trim and lower-case `raw`; `None` unless it is exactly 64 hex characters.
pub fn canonical_hash(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == HASH_HEX_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        None
    }
}

/// Case-insensitive, trimmed comparison. Anything that is not a 64-hex digest
/// never matches.
pub fn matches(a: &str, b: &str) -> bool {
    match (canonical_hash(a), canonical_hash(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Outcome of comparing a locally computed hash with the published one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCheck {
    Match,
    Mismatch,
    NoCanonicalHash,
    MalformedInput,
}

/// Informational check; never authoritative over stored state.
pub fn check(local: &str, canonical: Option<&str>) -> IntegrityCheck {
    let Some(local) = canonical_hash(local) else {
        return IntegrityCheck::MalformedInput;
    };
    match canonical.and_then(canonical_hash) {
        None => IntegrityCheck::NoCanonicalHash,
        Some(published) if published == local => IntegrityCheck::Match,
        Some(_) => IntegrityCheck::Mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_hash_known_vector() {
        assert_eq!(compute_hash(b""), EMPTY_SHA256);
        assert_eq!(compute_hash(b"rider"), compute_hash(b"rider"));
        assert_ne!(compute_hash(b"rider"), compute_hash(b"rider "));
    }

    #[test]
    fn test_matches_ignores_case_and_whitespace() {
        let upper = format!("  {}\n", EMPTY_SHA256.to_uppercase());
        assert!(matches(&upper, EMPTY_SHA256));
    }

    #[test]
    fn test_matches_rejects_non_digest_strings() {
        assert!(!matches("abc", "abc"));
        assert!(!matches("", ""));
        let with_g = format!("{}g", &EMPTY_SHA256[..63]);
        assert!(!matches(&with_g, &with_g));
        let too_long = format!("{EMPTY_SHA256}0");
        assert!(!matches(&too_long, &too_long));
    }

    #[test]
    fn test_check_outcomes() {
        let other = compute_hash(b"other");
        assert_eq!(check(EMPTY_SHA256, Some(EMPTY_SHA256)), IntegrityCheck::Match);
        assert_eq!(check(EMPTY_SHA256, Some(&other)), IntegrityCheck::Mismatch);
        assert_eq!(check(EMPTY_SHA256, None), IntegrityCheck::NoCanonicalHash);
        assert_eq!(check(EMPTY_SHA256, Some("garbage")), IntegrityCheck::NoCanonicalHash);
        assert_eq!(check("not-a-hash", Some(EMPTY_SHA256)), IntegrityCheck::MalformedInput);
        assert_eq!(check("not-a-hash", None), IntegrityCheck::MalformedInput);
    }
}
