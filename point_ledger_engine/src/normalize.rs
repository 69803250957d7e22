//! Canonical forms for the free-form values that human editors and automated clients write into the datastore.
//!
//! Two values that a person would consider the same spawn moment, or the same member, must compare equal once they
//! have been through this module. Nothing here returns an error: malformed input yields `None` (or an empty key), and
//! callers treat that as "matches nothing".
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use regex::Regex;

/// The canonical timestamp layout: zero-padded `MM/DD/YY HH:MM`.
pub const CANONICAL_FORMAT: &str = "%m/%d/%y %H:%M";

/// UTC+08:00, the zone the community schedules spawns in.
pub const DEFAULT_TZ_OFFSET_MINUTES: i32 = 8 * 60;

pub fn default_timezone() -> FixedOffset {
    timezone_from_minutes(DEFAULT_TZ_OFFSET_MINUTES)
}

/// Builds a fixed offset from a signed minute count, falling back to UTC when the offset is out of range.
pub fn timezone_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Lowercases, then strips whitespace and every other non-alphanumeric character.
pub fn normalize_identity(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// Normalizes `raw` in the default UTC+08:00 zone. See [`normalize_timestamp_in`].
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    normalize_timestamp_in(raw, &default_timezone())
}

/// Converts any recognised date-like value into the canonical `MM/DD/YY HH:MM` form in `tz`.
///
/// A value that is already canonical is returned unchanged. Seconds are truncated, so an automated submission at
/// `09:05:41` and a human typing `9:05` land on the same string.
pub fn normalize_timestamp_in(raw: &str, tz: &FixedOffset) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if is_canonical(raw) {
        return Some(raw.to_string());
    }
    parse_timestamp_in(raw, tz).map(|dt| format_canonical(&dt.naive_local()))
}

/// Parses `raw` into a zoned date time in `tz`. Naive inputs are interpreted as wall-clock time in `tz`.
pub fn parse_timestamp_in(raw: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Some(naive) = parse_canonical(raw) {
        return tz.from_local_datetime(&naive).single();
    }
    if let Some(naive) = parse_loose_us(raw) {
        return tz.from_local_datetime(&naive).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(tz));
    }
    if let Some(naive) = parse_naive_iso(raw) {
        return tz.from_local_datetime(&naive).single();
    }
    if let Some(dt) = parse_js_date_string(raw) {
        return Some(dt.with_timezone(tz));
    }
    parse_epoch(raw).map(|dt| dt.with_timezone(tz))
}

pub fn format_canonical(dt: &NaiveDateTime) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Parses a strictly canonical timestamp. Out-of-range fields (a 13th month, minute 61) are rejected.
pub fn parse_canonical(raw: &str) -> Option<NaiveDateTime> {
    let re = canonical_pattern()?;
    if !re.is_match(raw) {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, CANONICAL_FORMAT).ok()
}

pub fn is_canonical(raw: &str) -> bool {
    parse_canonical(raw).is_some()
}

fn canonical_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}/\d{2}/\d{2} \d{2}:\d{2}$").ok()).as_ref()
}

fn loose_us_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<m>\d{1,2})/(?P<d>\d{1,2})/(?P<y>\d{4}|\d{2})[,\s]+(?P<h>\d{1,2}):(?P<min>\d{1,2})(?::(?P<s>\d{1,2}))?\s*(?P<ampm>[AaPp]\.?[Mm]\.?)?$",
        )
        .ok()
    })
    .as_ref()
}

/// `10/5/25 9:05`, `10/05/2025 09:05:12`, `10/5/25, 9:05 PM` and friends.
fn parse_loose_us(raw: &str) -> Option<NaiveDateTime> {
    let caps = loose_us_pattern()?.captures(raw)?;
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());
    let month = num("m")?;
    let day = num("d")?;
    let year_str = caps.name("y")?.as_str();
    let year = match year_str.len() {
        2 => 2000 + year_str.parse::<i32>().ok()?,
        _ => year_str.parse::<i32>().ok()?,
    };
    let mut hour = num("h")?;
    let minute = num("min")?;
    if let Some(ampm) = caps.name("ampm") {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = ampm.as_str().to_ascii_lowercase().starts_with('p');
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(NaiveDateTime::new(date, time))
}

fn parse_naive_iso(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];
    FORMATS.iter().find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
}

/// `Sun Oct 05 2025 09:05:00 GMT+0800 (Philippine Standard Time)`
fn parse_js_date_string(raw: &str) -> Option<DateTime<FixedOffset>> {
    let without_zone_name = match raw.find(" (") {
        Some(i) => &raw[..i],
        None => raw,
    };
    DateTime::parse_from_str(without_zone_name.trim(), "%a %b %d %Y %H:%M:%S GMT%z").ok()
}

/// Unix epoch seconds or milliseconds. Short digit runs are not treated as epochs so that a stray year or count
/// is never mistaken for a date in 1970.
fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    if raw.len() < 9 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let value = raw.parse::<i64>().ok()?;
    if raw.len() >= 12 {
        let nanos = u32::try_from(value % 1000).ok()? * 1_000_000;
        DateTime::from_timestamp(value / 1000, nanos)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
