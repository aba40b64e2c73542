//! Identity hashing.
//!
//! Local state is namespaced by a short hash of the user's email address.
//! The hash only separates identities sharing one device; it is not a
//! credential, and a collision is a cosmetic problem rather than a security
//! one.
//!
//! ```rust
//! use project_sync_core::identity::identity_hash;
//!
//! assert_eq!(identity_hash("A@B.com"), identity_hash(" a@b.com "));
//! assert_eq!(identity_hash("a@b.com").len(), 16);
//! ```

use sha2::{Digest, Sha256};

use crate::models::UserProfile;

/// Number of hex characters kept from the SHA-256 digest.
pub const IDENTITY_HASH_LEN: usize = 16;

/// Lower-case and trim an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Deterministic namespace hash for an email address.
///
/// Case and surrounding whitespace are ignored.
pub fn identity_hash(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_email(email).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..IDENTITY_HASH_LEN].to_string()
}

/// Build a [`UserProfile`] for an authenticated email address.
pub fn profile_for(email: &str, display_name: Option<String>) -> UserProfile {
    UserProfile {
        identity_hash: identity_hash(email),
        email: normalize_email(email),
        display_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_case_and_whitespace() {
        let a = identity_hash("A@B.com");
        let b = identity_hash("a@b.com ");
        let c = identity_hash("a@b.com");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn hash_is_truncated_lowercase_hex() {
        let h = identity_hash("someone@example.org");
        assert_eq!(h.len(), IDENTITY_HASH_LEN);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_emails_differ() {
        assert_ne!(identity_hash("a@b.com"), identity_hash("a@c.com"));
    }

    #[test]
    fn profile_normalizes_email() {
        let p = profile_for("  Jane@Example.COM", Some("Jane".into()));
        assert_eq!(p.email, "jane@example.com");
        assert_eq!(p.identity_hash, identity_hash("jane@example.com"));
    }
}
