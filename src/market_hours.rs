//! Trading session gate.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Answers whether orders may be sent right now.
pub trait MarketHours: Send + Sync {
    fn is_open(&self, now: DateTime<Utc>) -> bool;
}

/// Regular US equity options session: weekdays 09:30 to 16:00 local time.
///
/// Exchange holidays are not modelled.
#[derive(Debug, Clone, Copy)]
pub struct RegularSessionHours {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl RegularSessionHours {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl Default for RegularSessionHours {
    fn default() -> Self {
        Self::new(chrono_tz::America::New_York)
    }
}

impl MarketHours for RegularSessionHours {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }
}

/// A gate that never changes its answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedHours(pub bool);

impl MarketHours for FixedHours {
    fn is_open(&self, _now: DateTime<Utc>) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_weekday_session() {
        let hours = RegularSessionHours::default();
        // Wednesday 2025-02-19, EST is UTC-5
        assert!(!hours.is_open(at("2025-02-19T14:29:00Z"))); // 09:29
        assert!(hours.is_open(at("2025-02-19T14:30:00Z"))); // 09:30
        assert!(hours.is_open(at("2025-02-19T21:00:00Z"))); // 16:00
        assert!(!hours.is_open(at("2025-02-19T21:01:00Z"))); // 16:01
    }

    #[test]
    fn test_daylight_saving_shift() {
        let hours = RegularSessionHours::default();
        // EDT is UTC-4: 13:30Z is 09:30 local in July
        assert!(hours.is_open(at("2025-07-16T13:30:00Z")));
        assert!(!hours.is_open(at("2025-02-19T13:30:00Z")));
    }

    #[test]
    fn test_weekend_closed() {
        let hours = RegularSessionHours::default();
        assert!(!hours.is_open(at("2025-02-22T16:00:00Z"))); // Saturday
        assert!(!hours.is_open(at("2025-02-23T16:00:00Z"))); // Sunday
    }

    #[test]
    fn test_fixed_hours() {
        assert!(FixedHours(true).is_open(Utc::now()));
        assert!(!FixedHours(false).is_open(Utc::now()));
    }
}
