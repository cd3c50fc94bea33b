//! Time windows: the relative form operators configure and the absolute
//! bounds a run actually collects.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid timestamp '{0}': expected RFC 3339 or 'YYYY-MM-DD HH:MM:SS'")]
    InvalidTimestamp(String),

    #[error("window start {start} is after window end {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("lookback of {0} is out of range (at most {MAX_LOOKBACK_HOURS} hours)")]
    LookbackOutOfRange(String),
}

/// Longest relative window accepted, roughly a century.
pub const MAX_LOOKBACK_HOURS: u32 = 100 * 366 * 24;

/// Window as written in configuration or passed by a trigger.
///
/// Absolute `since` beats both lookbacks, and `minutes_ago` beats
/// `hours_ago`. Nothing here is resolved until [`WindowSpec::resolve`] is
/// called, so the same spec re-run later covers a later span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default, with = "opt_instant", skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_instant", skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_ago: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_ago: Option<u32>,
}

impl WindowSpec {
    pub fn hours(hours: u32) -> Self {
        Self {
            hours_ago: Some(hours),
            ..Self::default()
        }
    }

    pub fn minutes(minutes: u32) -> Self {
        Self {
            minutes_ago: Some(minutes),
            ..Self::default()
        }
    }

    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_none()
            && self.until.is_none()
            && self.minutes_ago.is_none()
            && self.hours_ago.is_none()
    }

    /// Checks the absolute bounds, if both are present, and that neither
    /// lookback exceeds [`MAX_LOOKBACK_HOURS`].
    pub fn validate(&self) -> Result<(), WindowError> {
        if let (Some(start), Some(end)) = (self.since, self.until) {
            if start > end {
                return Err(WindowError::Inverted { start, end });
            }
        }
        if let Some(minutes) = self.minutes_ago {
            if u64::from(minutes) > u64::from(MAX_LOOKBACK_HOURS) * 60 {
                return Err(WindowError::LookbackOutOfRange(format!("{} minutes", minutes)));
            }
        }
        if let Some(hours) = self.hours_ago {
            if hours > MAX_LOOKBACK_HOURS {
                return Err(WindowError::LookbackOutOfRange(format!("{} hours", hours)));
            }
        }
        Ok(())
    }

    /// Resolves to absolute bounds relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeWindow, WindowError> {
        let lookback = |delta: chrono::Duration, what: String| {
            now.checked_sub_signed(delta)
                .ok_or(WindowError::LookbackOutOfRange(what))
        };

        let start = if let Some(since) = self.since {
            Some(since)
        } else if let Some(minutes) = self.minutes_ago {
            Some(lookback(
                chrono::Duration::minutes(i64::from(minutes)),
                format!("{} minutes", minutes),
            )?)
        } else if let Some(hours) = self.hours_ago {
            Some(lookback(
                chrono::Duration::hours(i64::from(hours)),
                format!("{} hours", hours),
            )?)
        } else {
            None
        };

        let end = match self.until {
            Some(until) => Some(until),
            None if start.is_some() => Some(now),
            None => None,
        };

        Ok(TimeWindow { start, end })
    }
}

/// Absolute window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Inclusive at both ends.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| instant >= start)
            && self.end.map_or(true, |end| instant <= end)
    }

    /// Smallest window covering every timestamp, or unbounded when empty.
    pub fn spanning<I>(instants: I) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;
        for instant in instants {
            start = Some(start.map_or(instant, |s| s.min(instant)));
            end = Some(end.map_or(instant, |e| e.max(instant)));
        }
        Self { start, end }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_bound = |bound: Option<DateTime<Utc>>| {
            bound
                .map(|b| b.to_rfc3339())
                .unwrap_or_else(|| "open".to_string())
        };
        write!(f, "{} .. {}", fmt_bound(self.start), fmt_bound(self.end))
    }
}

/// Parses RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
/// taken as local time.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, WindowError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| WindowError::InvalidTimestamp(value.to_string()));
        }
    }

    Err(WindowError::InvalidTimestamp(value.to_string()))
}

mod opt_instant {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.trim().is_empty() => super::parse_instant(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
