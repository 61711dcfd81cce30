use chrono::Utc;
use uuid::Uuid;

const SUFFIX_LEN: usize = 9;

/// Opaque identifier: coarse millisecond timestamp plus a random suffix.
/// Uniqueness is probabilistic; nothing checks for collisions.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{millis}-{}", &random[..SUFFIX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_have_timestamp_prefix_and_suffix() {
        let id = generate_id();
        let (millis, suffix) = id.split_once('-').expect("separator");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rapid_successive_ids_differ() {
        let ids: HashSet<String> = (0..1_000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
