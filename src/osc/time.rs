//! NTP-style time tags for bundle scheduling.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const EPOCH_OFFSET_1900: i64 = 2_208_988_800;

/// A 64-bit fixed-point timestamp: 32-bit seconds since 1900 plus a
/// 32-bit fraction of a second.
///
/// Ordering follows the fixed-point interpretation (field order makes the
/// derived `Ord` equivalent). The reserved pair `(0, 1)` means "execute
/// immediately".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeTag {
    /// Whole seconds since 1900-01-01T00:00:00Z
    pub seconds: u32,
    /// Fractional seconds, in units of 1/2^32 s
    pub fraction: u32,
}

impl TimeTag {
    /// Sentinel meaning "execute immediately".
    pub const IMMEDIATE: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    /// Build from the raw second/fraction pair.
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Whether this tag is the immediate sentinel.
    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// The tag as a single 64-bit fixed-point value.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.fraction)
    }

    /// Rebuild a tag from its 64-bit fixed-point form.
    pub fn from_u64(raw: u64) -> Self {
        Self {
            seconds: (raw >> 32) as u32,
            fraction: raw as u32,
        }
    }

    /// Convert a UTC instant into a time tag.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let seconds = (at.timestamp() + EPOCH_OFFSET_1900).max(0) as u32;
        let fraction =
            ((u64::from(at.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    /// Convert back to a UTC instant. Returns `None` for the immediate
    /// sentinel and for tags before the Unix epoch.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.is_immediate() {
            return None;
        }
        let unix_secs = i64::from(self.seconds) - EPOCH_OFFSET_1900;
        if unix_secs < 0 {
            return None;
        }
        let nanos = ((u64::from(self.fraction) * 1_000_000_000) >> 32) as u32;
        Utc.timestamp_opt(unix_secs, nanos).single()
    }

    /// A tag `ahead` in the future relative to now, for schedule-ahead
    /// bundles.
    pub fn after(ahead: Duration) -> Self {
        Self::from_datetime(Utc::now() + chrono::Duration::from_std(ahead).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_is_reserved_pair() {
        assert_eq!(TimeTag::IMMEDIATE, TimeTag::new(0, 1));
        assert!(TimeTag::IMMEDIATE.is_immediate());
        assert!(!TimeTag::new(0, 2).is_immediate());
    }

    #[test]
    fn fixed_point_roundtrip() {
        let tag = TimeTag::new(0xDEAD_BEEF, 0x8000_0000);
        assert_eq!(TimeTag::from_u64(tag.as_u64()), tag);
    }

    #[test]
    fn ordering_matches_fixed_point() {
        let earlier = TimeTag::new(100, u32::MAX);
        let later = TimeTag::new(101, 0);
        assert!(earlier < later);
        assert!(earlier.as_u64() < later.as_u64());
    }

    #[test]
    fn datetime_conversion_roundtrips_to_second_precision() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap();
        let tag = TimeTag::from_datetime(at);
        let back = tag.to_datetime().unwrap();
        assert_eq!(back.timestamp(), at.timestamp());
    }

    #[test]
    fn immediate_has_no_datetime() {
        assert!(TimeTag::IMMEDIATE.to_datetime().is_none());
    }
}
