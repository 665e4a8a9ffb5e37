//! Unique-id and timestamp generation.

use chrono::Utc;
use uuid::Uuid;

/// Generate a unique identifier string (hex-encoded UUID v4, no dashes).
pub fn generate_unique_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a unique identifier truncated to at most `max_length` characters.
///
/// A `max_length` of zero yields an empty string; lengths beyond the natural
/// id length return the full id.
pub fn generate_unique_id_with_max_length(max_length: usize) -> String {
    let mut id = generate_unique_id();
    id.truncate(max_length);
    id
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_unique_id();
        let b = generate_unique_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_max_length_truncation() {
        assert_eq!(generate_unique_id_with_max_length(8).len(), 8);
        assert_eq!(generate_unique_id_with_max_length(0).len(), 0);
        assert_eq!(generate_unique_id_with_max_length(400).len(), 32);
    }

    #[test]
    fn test_timestamp_is_recent() {
        // Sanity bound: later than 2020-01-01 in milliseconds.
        assert!(current_timestamp_ms() > 1_577_836_800_000.0);
    }
}
