//! Date detection for string attributes.
//!
//! The export carries two date spellings: legacy wall-clock strings such as
//! `01/15/2021 02:30 PM` (recorded in a fixed local time zone) and canonical UTC
//! timestamps such as `2021-01-15T19:30:00.000Z`. Both become TIMESTAMP columns.

use std::sync::LazyLock;

use chrono::{LocalResult, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, TimeZone};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::ConfigError;

/// Zone the legacy strings were written in unless configured otherwise.
pub const DEFAULT_LEGACY_TIMEZONE: &str = "America/New_York";

static LEGACY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9]+)/([0-9]+)/([0-9]+) ([0-9]+):([0-9]+)(?::([0-9]+))? (AM|PM)$")
        .expect("valid legacy date regex")
});

static ISO_UTC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+-[0-9]+-[0-9]+T[0-9]+:[0-9]+:[0-9]+\.?[0-9]*Z$").expect("valid ISO date regex")
});

/// Returns true if `value` is already a canonical UTC timestamp.
pub fn is_iso_utc_date(value: &str) -> bool {
    ISO_UTC_DATE.is_match(value)
}

/// Converts legacy `M/D/YYYY h:mm[:ss] AM|PM` strings to UTC instants.
#[derive(Debug, Clone, Copy)]
pub struct LegacyDateParser {
    zone: Tz,
}

impl Default for LegacyDateParser {
    fn default() -> Self {
        Self {
            zone: chrono_tz::America::New_York,
        }
    }
}

impl LegacyDateParser {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    /// Build a parser for an IANA zone name.
    pub fn for_zone(name: &str) -> Result<Self, ConfigError> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|_| ConfigError::UnknownTimezone {
                name: name.to_string(),
            })
    }

    /// Parse a legacy date, returning the RFC 3339 UTC string with millisecond
    /// precision, or `None` if `value` is not a valid legacy date.
    ///
    /// Wall-clock times that fall into a DST gap are moved forward by an hour;
    /// ambiguous times resolve to the earlier instant.
    pub fn parse(&self, value: &str) -> Option<String> {
        let caps = LEGACY_DATE.captures(value.trim())?;
        let number = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>().ok());

        let month = number(1)??;
        let day = number(2)??;
        let year = i32::try_from(number(3)??).ok()?;
        let hour = number(4)??;
        let minute = number(5)??;
        let second = match number(6) {
            Some(parsed) => parsed?,
            None => 0,
        };

        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = caps.get(7)?.as_str().eq_ignore_ascii_case("PM");
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };

        let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
        let instant = self.resolve(local)?;

        Some(
            instant
                .with_timezone(&chrono::Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    fn resolve(&self, local: NaiveDateTime) -> Option<chrono::DateTime<Tz>> {
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => self
                .zone
                .from_local_datetime(&(local + TimeDelta::hours(1)))
                .earliest(),
        }
    }
}

/// Default zone name for config defaults.
pub fn default_legacy_timezone() -> String {
    DEFAULT_LEGACY_TIMEZONE.to_string()
}
