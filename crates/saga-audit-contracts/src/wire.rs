//! Wire formats shared with the audit backend.
//!
//! Two formats matter:
//!
//! * message timestamps in headers: `yyyy-MM-dd HH:mm:ss:ffffff Z`, always UTC;
//! * durations in record bodies: the TimeSpan text form
//!   `[d.]hh:mm:ss[.fffffff]`, ticks of 100 ns.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%6f";

const SECONDS_PER_DAY: u64 = 86_400;

/// Seconds between `0001-01-01T00:00:00Z` and the Unix epoch.
const MIN_TIMESTAMP_SECS: i64 = -62_135_596_800;

/// The sentinel used when a timestamp is missing: `0001-01-01T00:00:00Z`.
pub fn min_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(MIN_TIMESTAMP_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Format a timestamp the way the `NServiceBus.TimeSent` header carries it.
pub fn to_wire_time(time: DateTime<Utc>) -> String {
    format!("{} Z", time.format(WIRE_TIME_FORMAT))
}

/// Parse a header timestamp.
///
/// Accepts the native wire format and RFC 3339.  Returns `None` for anything
/// else so that callers can fall back to [`min_timestamp`].
pub fn from_wire_time(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let naive = trimmed.strip_suffix(" Z").unwrap_or(trimmed);
    if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, WIRE_TIME_FORMAT) {
        return Some(parsed.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Header timestamp or the minimum sentinel.
pub fn wire_time_or_min(value: Option<&str>) -> DateTime<Utc> {
    value.and_then(from_wire_time).unwrap_or_else(min_timestamp)
}

/// Render a duration in TimeSpan text form.
pub fn format_timespan(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / SECONDS_PER_DAY;
    let hours = (total % SECONDS_PER_DAY) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let ticks = duration.subsec_nanos() / 100;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Parse TimeSpan text form.  Negative spans are not representable and
/// yield `None`.
pub fn parse_timespan(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let (head, minutes, tail) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let (days, hours): (u64, u64) = match head.split_once('.') {
        Some((d, h)) => (d.parse().ok()?, h.parse().ok()?),
        None => (0, head.parse().ok()?),
    };
    let minutes: u64 = minutes.parse().ok()?;
    let (seconds, fraction): (u64, &str) = match tail.split_once('.') {
        Some((s, f)) => (s.parse().ok()?, f),
        None => (tail.parse().ok()?, ""),
    };
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    let nanos = if fraction.is_empty() {
        0
    } else {
        if fraction.len() > 7 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        format!("{fraction:0<9}").parse::<u32>().ok()?
    };

    Some(Duration::new(
        days * SECONDS_PER_DAY + hours * 3_600 + minutes * 60 + seconds,
        nanos,
    ))
}

/// Serde adapter for `Option<Duration>` fields carried as TimeSpan text.
pub mod option_timespan {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_timespan, parse_timespan};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&format_timespan(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            parse_timespan(&s)
                .ok_or_else(|| de::Error::custom(format!("invalid time span '{s}'")))
        })
        .transpose()
    }
}
