use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("pattern missing 'ts' capture group")]
    MissingTsGroup,

    #[error("failed to parse timestamp '{value}' as {format}: {reason}")]
    Unparseable {
        value: String,
        format: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    /// One of `iso8601`, `epoch`, `epoch_ms`; anything else is a strptime
    /// format string.
    pub fn from_name(name: &str) -> Self {
        match name {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            TimestampFormat::Strptime(fmt) => fmt,
            TimestampFormat::Iso8601 => "iso8601",
            TimestampFormat::Epoch => "epoch",
            TimestampFormat::EpochMs => "epoch_ms",
        }
    }

    /// Parses a captured value. Strptime formats without a zone are read
    /// as UTC.
    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let unparseable = |reason: String| TimestampError::Unparseable {
            value: value.to_string(),
            format: self.name().to_string(),
            reason,
        };

        match self {
            TimestampFormat::Iso8601 => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| unparseable(e.to_string())),
            TimestampFormat::Epoch => {
                let seconds: i64 = value.parse().map_err(|e: std::num::ParseIntError| {
                    unparseable(e.to_string())
                })?;
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| unparseable("timestamp out of range".to_string()))
            }
            TimestampFormat::EpochMs => {
                let millis: i64 = value.parse().map_err(|e: std::num::ParseIntError| {
                    unparseable(e.to_string())
                })?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| unparseable("timestamp out of range".to_string()))
            }
            TimestampFormat::Strptime(fmt) => {
                if fmt.contains("%z") || fmt.contains("%Z") || fmt.contains("%:z") {
                    DateTime::parse_from_str(value, fmt)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| unparseable(e.to_string()))
                } else {
                    NaiveDateTime::parse_from_str(value, fmt)
                        .map(|ndt| Utc.from_utc_datetime(&ndt))
                        .map_err(|e| unparseable(e.to_string()))
                }
            }
        }
    }
}

/// Pulls a timestamp out of a log line with a regex that has a `ts` group.
#[derive(Debug, Clone)]
pub struct TimestampExtractor {
    pattern: Regex,
    format: TimestampFormat,
}

impl TimestampExtractor {
    pub fn new(pattern: &str, format: &str) -> Result<Self, TimestampError> {
        let regex = Regex::new(pattern)?;
        if regex.capture_names().all(|name| name != Some("ts")) {
            return Err(TimestampError::MissingTsGroup);
        }

        Ok(Self {
            pattern: regex,
            format: TimestampFormat::from_name(format),
        })
    }

    /// `Ok(None)` when the line does not match the pattern.
    pub fn extract(&self, line: &str) -> Result<Option<DateTime<Utc>>, TimestampError> {
        let Some(ts) = self.pattern.captures(line).and_then(|c| c.name("ts")) else {
            return Ok(None);
        };
        self.format.parse(ts.as_str()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_with_offset() {
        let extractor = TimestampExtractor::new(
            r"^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}[+-]\d{2}:\d{2})",
            "iso8601",
        )
        .unwrap();

        let result = extractor
            .extract("2025-12-04T02:42:11+05:30 upstream timed out")
            .unwrap()
            .unwrap();

        assert_eq!(result.to_rfc3339(), "2025-12-03T21:12:11+00:00");
    }

    #[test]
    fn test_nginx_format() {
        let extractor = TimestampExtractor::new(
            r"\[(?P<ts>\d{2}/\w{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4})\]",
            "%d/%b/%Y:%H:%M:%S %z",
        )
        .unwrap();

        let result = extractor
            .extract("[04/Dec/2025:02:42:11 +0000] GET /index.html 502")
            .unwrap()
            .unwrap();

        assert_eq!(result.to_rfc3339(), "2025-12-04T02:42:11+00:00");
    }

    #[test]
    fn test_epoch_variants() {
        let seconds = TimestampExtractor::new(r"^(?P<ts>\d{10})", "epoch").unwrap();
        let millis = TimestampExtractor::new(r"^(?P<ts>\d{13})", "epoch_ms").unwrap();

        let s = seconds.extract("1733280131 worker exited").unwrap().unwrap();
        let ms = millis.extract("1733280131011 worker exited").unwrap().unwrap();

        assert_eq!(s.timestamp(), 1733280131);
        assert_eq!(ms.timestamp(), 1733280131);
        assert_eq!(ms.timestamp_subsec_millis(), 11);
    }

    #[test]
    fn test_naive_strptime_is_utc() {
        let extractor = TimestampExtractor::new(
            r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3})",
            "%Y-%m-%d %H:%M:%S,%3f",
        )
        .unwrap();

        let result = extractor
            .extract("2025-12-04 02:42:11,011 ERROR pool exhausted")
            .unwrap()
            .unwrap();

        assert_eq!(result.to_rfc3339(), "2025-12-04T02:42:11.011+00:00");
    }

    #[test]
    fn test_no_match_returns_none() {
        let extractor = TimestampExtractor::new(r"^(?P<ts>\d{4}-\d{2}-\d{2})", "iso8601").unwrap();
        assert!(extractor.extract("    at com.example.Foo").unwrap().is_none());
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            TimestampExtractor::new(r"^\d{4}", "iso8601"),
            Err(TimestampError::MissingTsGroup)
        ));
        assert!(matches!(
            TimestampExtractor::new(r"(?P<ts>[invalid", "iso8601"),
            Err(TimestampError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_unparseable_timestamp() {
        let extractor = TimestampExtractor::new(r"^(?P<ts>\S+)", "epoch").unwrap();
        assert!(matches!(
            extractor.extract("not_a_number log message"),
            Err(TimestampError::Unparseable { .. })
        ));
    }
}
