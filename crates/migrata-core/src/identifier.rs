use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use migrata_common::{Error, Result};

/// Fixed-width, zero-padded UTC timestamp that prefixes every identifier, so
/// that byte-wise ordering of identifiers is chronological.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Compute `<YYYYMMDDHHMMSS>-<slug>` and reject it if it is already taken.
///
/// Timestamps have one-second resolution, so two units allocated for the same
/// slug within one second collide and the second allocation fails.
pub fn allocate(slug: &str, now: DateTime<Utc>, existing: &BTreeSet<String>) -> Result<String> {
    let identifier = format!("{}-{slug}", now.format(TIMESTAMP_FORMAT));
    if existing.contains(&identifier) {
        return Err(Error::DuplicateIdentifier(identifier));
    }
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn formats_zero_padded_utc_prefix() {
        let id = allocate("create-users", at(7, 5, 3), &BTreeSet::new()).unwrap();
        assert_eq!(id, "20240309070503-create-users");
    }

    #[test]
    fn same_slug_within_one_second_is_a_duplicate() {
        let mut existing = BTreeSet::new();
        let first = allocate("users", at(12, 0, 0), &existing).unwrap();
        existing.insert(first.clone());

        match allocate("users", at(12, 0, 0), &existing) {
            Err(Error::DuplicateIdentifier(id)) => assert_eq!(id, first),
            other => panic!("expected DuplicateIdentifier, got {other:?}"),
        }

        // A different slug or the next second is fine.
        assert!(allocate("posts", at(12, 0, 0), &existing).is_ok());
        assert!(allocate("users", at(12, 0, 1), &existing).is_ok());
    }

    #[test]
    fn lexical_order_follows_time() {
        let earlier = allocate("zzz", at(9, 59, 59), &BTreeSet::new()).unwrap();
        let later = allocate("aaa", at(10, 0, 0), &BTreeSet::new()).unwrap();
        assert!(earlier < later);
    }
}
