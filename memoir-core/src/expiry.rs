//! Expiry policy.
//!
//! Validity is a pure function of the artifact's write time, the configured
//! mode and the current time. Expired artifacts are never deleted here; they
//! stop being served and are overwritten (or archived) by the next write.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemoConfig;
use crate::entry::EntryMetadata;
use crate::error::ConfigError;
use crate::identity::Timestamp;

/// Calendar period for [`ExpiryMode::Periodic`]. Boundaries are in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    Daily,
    /// ISO week, starting Monday.
    Weekly,
    Monthly,
}

impl Period {
    /// Start of the period containing `ts`.
    pub fn start_of(&self, ts: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Hourly => ts.with_nanosecond(0)?.with_second(0)?.with_minute(0),
            Self::Daily => Some(ts.date_naive().and_hms_opt(0, 0, 0)?.and_utc()),
            Self::Weekly => {
                let back = i64::from(ts.weekday().num_days_from_monday());
                let monday = ts.date_naive() - chrono::Duration::days(back);
                Some(monday.and_hms_opt(0, 0, 0)?.and_utc())
            }
            Self::Monthly => Some(
                NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc(),
            ),
        }
    }

    /// Start of the period after the one containing `ts`.
    pub fn next_start(&self, ts: Timestamp) -> Option<Timestamp> {
        let start = self.start_of(ts)?;
        match self {
            Self::Hourly => start.checked_add_signed(chrono::Duration::hours(1)),
            Self::Daily => start.checked_add_signed(chrono::Duration::days(1)),
            Self::Weekly => start.checked_add_signed(chrono::Duration::days(7)),
            Self::Monthly => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// When cached results stop being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryMode {
    /// Entries never expire.
    #[default]
    Never,
    /// Entries expire a fixed duration after they were written.
    Ttl(Duration),
    /// Entries expire when the calendar period they were written in ends.
    Periodic(Period),
    /// Entries written before the deadline expire once it passes.
    Until(Timestamp),
}

impl ExpiryMode {
    /// Whether an artifact written at `written_at` may be served at `now`.
    pub fn allows(&self, written_at: Timestamp, now: Timestamp) -> bool {
        match self {
            Self::Never => true,
            Self::Ttl(ttl) => {
                let age = now.signed_duration_since(written_at);
                // Written "in the future" by a skewed clock: still fresh.
                let Ok(age) = age.to_std() else {
                    return true;
                };
                age < *ttl
            }
            Self::Periodic(period) => match (period.start_of(written_at), period.start_of(now)) {
                (Some(written), Some(current)) => written == current,
                _ => false,
            },
            Self::Until(deadline) => now < *deadline || written_at >= *deadline,
        }
    }

    /// The instant an artifact written at `written_at` stops being served.
    pub fn expires_at(&self, written_at: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Never => None,
            Self::Ttl(ttl) => chrono::Duration::from_std(*ttl)
                .ok()
                .and_then(|d| written_at.checked_add_signed(d)),
            Self::Periodic(period) => period.next_start(written_at),
            Self::Until(deadline) => (written_at < *deadline).then_some(*deadline),
        }
    }
}

/// Whether a stored artifact is still valid under the current configuration.
///
/// The mode in force *now* decides, not the one recorded at write time, so
/// tightening the policy takes effect for entries already on disk.
pub fn is_valid(metadata: &EntryMetadata, config: &MemoConfig, now: Timestamp) -> bool {
    config.expiry.allows(metadata.written_at, now)
}

impl fmt::Display for ExpiryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::Ttl(ttl) if ttl.subsec_nanos() == 0 => write!(f, "ttl:{}", ttl.as_secs()),
            Self::Ttl(ttl) if ttl.subsec_nanos() % 1_000_000 == 0 => {
                write!(f, "ttl:{}ms", ttl.as_millis())
            }
            Self::Ttl(ttl) => write!(f, "ttl:{}ns", ttl.as_nanos()),
            Self::Periodic(period) => f.write_str(period.as_str()),
            Self::Until(deadline) => write!(f, "until:{}", deadline.to_rfc3339()),
        }
    }
}

impl FromStr for ExpiryMode {
    type Err = ConfigError;

    /// Parses `never`, `ttl:<secs>`, `hourly`, `daily`, `weekly`, `monthly`
    /// and `until:<rfc3339>`. A TTL may carry an `s`, `ms` or `ns` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "expiry".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "never" | "none" => return Ok(Self::Never),
            "hourly" => return Ok(Self::Periodic(Period::Hourly)),
            "daily" => return Ok(Self::Periodic(Period::Daily)),
            "weekly" => return Ok(Self::Periodic(Period::Weekly)),
            "monthly" => return Ok(Self::Periodic(Period::Monthly)),
            _ => {}
        }
        if let Some(amount) = lower.strip_prefix("ttl:") {
            let amount = amount.trim();
            let (digits, unit): (&str, fn(u64) -> Duration) =
                if let Some(ms) = amount.strip_suffix("ms") {
                    (ms, Duration::from_millis)
                } else if let Some(ns) = amount.strip_suffix("ns") {
                    (ns, Duration::from_nanos)
                } else {
                    (amount.strip_suffix('s').unwrap_or(amount), Duration::from_secs)
                };
            let count: u64 = digits
                .trim()
                .parse()
                .map_err(|_| invalid("ttl must be a whole number of s, ms or ns"))?;
            return Ok(Self::Ttl(unit(count)));
        }
        if lower.starts_with("until:") {
            let deadline = chrono::DateTime::parse_from_rfc3339(trimmed["until:".len()..].trim())
                .map_err(|_| invalid("deadline must be an RFC 3339 timestamp"))?;
            return Ok(Self::Until(deadline.with_timezone(&Utc)));
        }
        Err(invalid(
            "expected never, ttl:<secs>, hourly, daily, weekly, monthly or until:<rfc3339>",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ArtifactRole;
    use crate::identity::CacheKey;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_never_always_valid() {
        let t0 = at(2020, 1, 1, 0, 0, 0);
        assert!(ExpiryMode::Never.allows(t0, at(2099, 1, 1, 0, 0, 0)));
        assert_eq!(ExpiryMode::Never.expires_at(t0), None);
    }

    #[test]
    fn test_ttl_boundary() {
        let ttl = ExpiryMode::Ttl(Duration::from_secs(60));
        let t0 = at(2024, 3, 1, 12, 0, 0);
        let eps = chrono::Duration::seconds(1);
        let d = chrono::Duration::seconds(60);
        assert!(ttl.allows(t0, t0 + d - eps));
        assert!(!ttl.allows(t0, t0 + d));
        assert!(!ttl.allows(t0, t0 + d + eps));
        assert_eq!(ttl.expires_at(t0), Some(t0 + d));
    }

    #[test]
    fn test_ttl_future_write_is_valid() {
        let ttl = ExpiryMode::Ttl(Duration::from_secs(1));
        let now = at(2024, 3, 1, 12, 0, 0);
        assert!(ttl.allows(now + chrono::Duration::minutes(5), now));
    }

    #[test]
    fn test_zero_ttl_never_serves() {
        let ttl = ExpiryMode::Ttl(Duration::ZERO);
        let t0 = at(2024, 3, 1, 12, 0, 0);
        assert!(!ttl.allows(t0, t0));
    }

    #[test]
    fn test_daily_period() {
        let daily = ExpiryMode::Periodic(Period::Daily);
        assert!(daily.allows(at(2024, 5, 2, 0, 0, 1), at(2024, 5, 2, 23, 59, 59)));
        assert!(!daily.allows(at(2024, 5, 2, 23, 59, 0), at(2024, 5, 3, 0, 1, 0)));
        assert_eq!(
            daily.expires_at(at(2024, 5, 2, 13, 0, 0)),
            Some(at(2024, 5, 3, 0, 0, 0))
        );
    }

    #[test]
    fn test_hourly_period() {
        let hourly = ExpiryMode::Periodic(Period::Hourly);
        assert!(hourly.allows(at(2024, 5, 2, 9, 0, 0), at(2024, 5, 2, 9, 59, 59)));
        assert!(!hourly.allows(at(2024, 5, 2, 9, 59, 59), at(2024, 5, 2, 10, 0, 0)));
    }

    #[test]
    fn test_weekly_period_starts_monday() {
        let weekly = ExpiryMode::Periodic(Period::Weekly);
        // 2024-01-01 is a Monday.
        assert!(weekly.allows(at(2024, 1, 1, 0, 0, 0), at(2024, 1, 7, 23, 0, 0)));
        assert!(!weekly.allows(at(2024, 1, 7, 23, 0, 0), at(2024, 1, 8, 0, 0, 0)));
        assert_eq!(
            Period::Weekly.start_of(at(2024, 1, 4, 15, 30, 0)),
            Some(at(2024, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_monthly_period_rolls_year() {
        let monthly = ExpiryMode::Periodic(Period::Monthly);
        assert!(!monthly.allows(at(2024, 1, 31, 23, 0, 0), at(2024, 2, 1, 0, 0, 0)));
        assert!(monthly.allows(at(2024, 2, 1, 0, 0, 0), at(2024, 2, 29, 0, 0, 0)));
        assert_eq!(
            Period::Monthly.next_start(at(2024, 12, 15, 0, 0, 0)),
            Some(at(2025, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_until_deadline() {
        let deadline = at(2024, 6, 1, 0, 0, 0);
        let until = ExpiryMode::Until(deadline);
        let before = at(2024, 5, 1, 0, 0, 0);
        let after = at(2024, 6, 2, 0, 0, 0);
        assert!(until.allows(before, at(2024, 5, 31, 0, 0, 0)));
        assert!(!until.allows(before, after));
        // Recomputed after the deadline: kept.
        assert!(until.allows(after, at(2024, 7, 1, 0, 0, 0)));
        assert_eq!(until.expires_at(before), Some(deadline));
        assert_eq!(until.expires_at(after), None);
    }

    #[test]
    fn test_is_valid_uses_current_config() {
        let t0 = at(2024, 3, 1, 12, 0, 0);
        let metadata = EntryMetadata::new(
            CacheKey::from_canonical_bytes(b"k"),
            "m.f",
            ArtifactRole::Output,
            "json",
            t0,
            ExpiryMode::Never,
            b"1",
        );
        let later = t0 + chrono::Duration::hours(2);
        assert!(is_valid(&metadata, &MemoConfig::default(), later));
        let strict = MemoConfig::default().with_ttl(Duration::from_secs(3600));
        assert!(!is_valid(&metadata, &strict, later));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("never".parse::<ExpiryMode>().unwrap(), ExpiryMode::Never);
        assert_eq!(
            "ttl:90".parse::<ExpiryMode>().unwrap(),
            ExpiryMode::Ttl(Duration::from_secs(90))
        );
        assert_eq!(
            "Weekly".parse::<ExpiryMode>().unwrap(),
            ExpiryMode::Periodic(Period::Weekly)
        );
        assert_eq!(
            "until:2024-06-01T00:00:00Z".parse::<ExpiryMode>().unwrap(),
            ExpiryMode::Until(at(2024, 6, 1, 0, 0, 0))
        );
        assert_eq!(
            "ttl:250ms".parse::<ExpiryMode>().unwrap(),
            ExpiryMode::Ttl(Duration::from_millis(250))
        );
        assert_eq!(
            "ttl:30s".parse::<ExpiryMode>().unwrap(),
            ExpiryMode::Ttl(Duration::from_secs(30))
        );
        assert_eq!(ExpiryMode::Ttl(Duration::from_millis(500)).to_string(), "ttl:500ms");
        assert!("ttl:soon".parse::<ExpiryMode>().is_err());
        assert!("ttl:1.5".parse::<ExpiryMode>().is_err());
        assert!("fortnightly".parse::<ExpiryMode>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for mode in [
            ExpiryMode::Never,
            ExpiryMode::Ttl(Duration::from_secs(5)),
            ExpiryMode::Ttl(Duration::from_millis(500)),
            ExpiryMode::Ttl(Duration::from_millis(1_250)),
            ExpiryMode::Ttl(Duration::new(2, 7)),
            ExpiryMode::Periodic(Period::Monthly),
            ExpiryMode::Until(at(2030, 1, 1, 0, 0, 0)),
        ] {
            assert_eq!(mode.to_string().parse::<ExpiryMode>().unwrap(), mode);
        }
    }
}
