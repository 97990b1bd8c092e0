use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One cached value with integrity and freshness metadata.
///
/// The checksum covers the serialized value; reads validate it and treat
/// a mismatch as corruption (the entry is discarded and the read misses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached value as JSON.
    pub value: serde_json::Value,

    /// Hex SHA-256 of the serialized value.
    pub checksum: String,

    /// Monotonically increasing per-key version.
    pub version: u64,

    /// When the key was first written.
    pub created_at: DateTime<Utc>,

    /// When the value was last replaced.
    pub last_modified: DateTime<Utc>,

    /// Time-to-live; None means the entry never expires.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    /// Creates an entry at version 1.
    pub fn new(value: serde_json::Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let checksum = Self::checksum_of(&value);
        Self {
            value,
            checksum,
            version: 1,
            created_at: now,
            last_modified: now,
            ttl,
        }
    }

    /// Produces the successor entry carrying a new value.
    pub fn replaced_with(&self, value: serde_json::Value, ttl: Option<Duration>) -> Self {
        Self {
            checksum: Self::checksum_of(&value),
            value,
            version: self.version + 1,
            created_at: self.created_at,
            last_modified: Utc::now(),
            ttl,
        }
    }

    /// Computes the checksum of a value.
    pub fn checksum_of(value: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Returns true if the stored checksum matches the value.
    pub fn verify(&self) -> bool {
        Self::checksum_of(&self.value) == self.checksum
    }

    /// Time since the value was last modified.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_modified)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns true if the TTL has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| self.age(now) > ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn new_entry_verifies() {
        let entry = CacheEntry::new(serde_json::json!({"n": 1}), None);
        assert!(entry.verify());
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn tampered_value_fails_verification() {
        let mut entry = CacheEntry::new(serde_json::json!({"n": 1}), None);
        entry.value = serde_json::json!({"n": 2});
        assert!(!entry.verify());
    }

    #[test]
    fn replaced_with_bumps_version_and_checksum() {
        let entry = CacheEntry::new(serde_json::json!("a"), None);
        let next = entry.replaced_with(serde_json::json!("b"), None);

        assert_eq!(next.version, 2);
        assert_ne!(next.checksum, entry.checksum);
        assert!(next.verify());
        assert_eq!(next.created_at, entry.created_at);
    }

    #[test]
    fn expiry_follows_ttl() {
        let mut entry = CacheEntry::new(serde_json::json!(1), Some(Duration::from_secs(10)));
        let now = Utc::now();
        assert!(!entry.is_expired(now));

        entry.last_modified = now - ChronoDuration::seconds(11);
        assert!(entry.is_expired(now));
    }

    #[test]
    fn no_ttl_never_expires() {
        let mut entry = CacheEntry::new(serde_json::json!(1), None);
        entry.last_modified = Utc::now() - ChronoDuration::days(365);
        assert!(!entry.is_expired(Utc::now()));
    }
}
