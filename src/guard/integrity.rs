use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Salt mixed into the tag. It ships inside the binary, so anyone who reads
/// the client code can forge a tag; the tag flags accidental edits and naive
/// devtools tampering, nothing more. Authoritative timing must stay
/// server-side.
const TAG_SALT: &str = "round-guard.v1";

/// Digest bytes kept in the hex tag.
const TAG_BYTES: usize = 8;

/// Compute the tamper-evidence tag for a session's start time.
pub fn compute_tag(session_key: &str, start_time: DateTime<Utc>) -> String {
    let canonical = format!("{}|{}|{}", session_key, start_time.to_rfc3339(), TAG_SALT);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..TAG_BYTES])
}

/// Check a stored tag against the current `(session_key, start_time)` pair.
pub fn verify_tag(session_key: &str, start_time: DateTime<Utc>, tag: &str) -> bool {
    compute_tag(session_key, start_time) == tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_tag_is_stable() {
        let a = compute_tag("user1_round42", sample_time());
        let b = compute_tag("user1_round42", sample_time());
        assert_eq!(a, b);
        assert_eq!(a.len(), TAG_BYTES * 2);
    }

    #[test]
    fn test_tag_differs_per_session() {
        let a = compute_tag("user1_round42", sample_time());
        let b = compute_tag("user2_round42", sample_time());
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_shifted_start_time() {
        let tag = compute_tag("user1_round42", sample_time());
        let shifted = sample_time() + chrono::Duration::seconds(60);

        assert!(verify_tag("user1_round42", sample_time(), &tag));
        assert!(!verify_tag("user1_round42", shifted, &tag));
    }
}
