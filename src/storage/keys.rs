//! User-hash key partitioning (spec §4.1, §4.2).

use sha2::{Digest, Sha256};

/// Fixed sentinel identity for callers that don't supply a user email.
pub const ANONYMOUS_EMAIL: &str = "anonymous@scanforge.local";

/// Lowercase SHA-256 of the user email, truncated to 12 hex characters.
pub fn user_hash(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..12].to_string()
}

/// Build a key under `users/{user_hash}/[session_id/]filename`.
pub fn session_key(user_hash: &str, session_id: Option<&str>, filename: &str) -> String {
    match session_id {
        Some(session_id) => format!("users/{user_hash}/{session_id}/{filename}"),
        None => format!("users/{user_hash}/{filename}"),
    }
}

pub fn upload_tracker_key(upload_id: &str) -> String {
    format!("_upload_sessions/upload_sessions/{upload_id}.json")
}

pub fn upload_chunk_key(upload_id: &str, chunk_number: u32) -> String {
    format!("_upload_sessions/upload_chunks/{upload_id}/chunk_{chunk_number:04}.bin")
}

pub fn upload_chunk_prefix(upload_id: &str) -> String {
    format!("_upload_sessions/upload_chunks/{upload_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_hash_is_twelve_hex_chars() {
        let h = user_hash("someone@example.com");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn user_hash_is_deterministic() {
        assert_eq!(user_hash("a@b.com"), user_hash("a@b.com"));
        assert_ne!(user_hash("a@b.com"), user_hash("c@d.com"));
    }

    #[test]
    fn session_key_without_session_omits_segment() {
        assert_eq!(session_key("abc123", None, "metadata.json"), "users/abc123/metadata.json");
    }

    #[test]
    fn session_key_with_session_includes_segment() {
        assert_eq!(
            session_key("abc123", Some("s1"), "status.json"),
            "users/abc123/s1/status.json"
        );
    }
}
