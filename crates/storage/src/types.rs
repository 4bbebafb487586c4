//! Persisted signed URL state.

use std::num::NonZeroU32;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// The persisted state of one signed URL token.
///
/// The identifier and expiry are fixed at construction. Only a storage
/// backend mutates `remaining_usage`, and only downwards.
///
/// # Example
///
/// ```
/// use std::num::NonZeroU32;
/// use chrono::{TimeDelta, Utc};
/// use signurl_storage::SignedUrlRecord;
///
/// let record = SignedUrlRecord::new(
///     "3f9a0c",
///     "/downloads/report.pdf",
///     Utc::now() + TimeDelta::minutes(10),
///     NonZeroU32::new(3).unwrap(),
/// );
/// assert_eq!(record.remaining_usage(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlRecord {
    identifier: String,
    target: String,
    expires_at: DateTime<Utc>,
    remaining_usage: u32,
}

impl SignedUrlRecord {
    /// Creates a record with `max_usage` remaining uses.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        target: impl Into<String>,
        expires_at: DateTime<Utc>,
        max_usage: NonZeroU32,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            target: target.into(),
            expires_at,
            remaining_usage: max_usage.get(),
        }
    }

    /// Creates a record expiring `seconds` after `now`.
    #[must_use]
    pub fn expiring_in(
        identifier: impl Into<String>,
        target: impl Into<String>,
        now: DateTime<Utc>,
        seconds: u32,
        max_usage: NonZeroU32,
    ) -> Self {
        Self::new(identifier, target, now + TimeDelta::seconds(i64::from(seconds)), max_usage)
    }

    /// The opaque lookup key.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The resource the link points to.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Last instant at which the record is still valid.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Remaining successful consumptions.
    #[must_use]
    pub fn remaining_usage(&self) -> u32 {
        self.remaining_usage
    }

    /// Returns `true` once `now` is strictly past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Returns `true` when the record can be consumed at `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.remaining_usage > 0 && !self.is_expired(now)
    }

    /// Spends one use and returns the uses left.
    ///
    /// Callers must check [`is_usable`](Self::is_usable) first; the counter
    /// saturates at zero.
    pub(crate) fn decrement(&mut self) -> u32 {
        self.remaining_usage = self.remaining_usage.saturating_sub(1);
        self.remaining_usage
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
    }

    fn uses(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("non-zero")
    }

    #[rstest]
    #[case::before(-1, false)]
    #[case::exactly_at(0, false)]
    #[case::one_second_after(1, true)]
    #[case::long_after(3600, true)]
    fn expiry_boundary(#[case] offset: i64, #[case] expired: bool) {
        let record = SignedUrlRecord::new("id", "/t", base(), uses(1));
        assert_eq!(record.is_expired(base() + TimeDelta::seconds(offset)), expired);
    }

    #[test]
    fn expiring_in_is_relative_to_now() {
        let record = SignedUrlRecord::expiring_in("id", "/t", base(), 10, uses(2));
        assert_eq!(record.expires_at(), base() + TimeDelta::seconds(10));
        assert_eq!(record.remaining_usage(), 2);
        assert_eq!(record.identifier(), "id");
        assert_eq!(record.target(), "/t");
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let mut record = SignedUrlRecord::new("id", "/t", base(), uses(1));
        assert_eq!(record.decrement(), 0);
        assert_eq!(record.decrement(), 0);
        assert!(!record.is_usable(base()));
    }

    #[test]
    fn serde_round_trip_preserves_fields() {
        let record = SignedUrlRecord::new("sig", "/foo?x=1", base(), uses(7));
        let json = serde_json::to_string(&record).unwrap();
        let back: SignedUrlRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
