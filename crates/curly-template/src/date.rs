//! Date parsing and `date()`-style formatting for the `date` filter.
//!
//! Numbers are Unix timestamps shown in the local timezone. Strings are
//! parsed from a fixed set of common layouts; zone-less layouts are read as
//! local time. The local timezone is the IANA zone named by `TZ`, or the
//! system zone; when neither resolves, the system clock's offset is used and
//! zone names print as numeric offsets.

use std::fmt::Write;
use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc,
};
use chrono_tz::{OffsetComponents, OffsetName, Tz};

use crate::context::Value;

const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];

/// Returns the local IANA zone: `TZ` when it names one, otherwise the
/// system zone. Resolved once per process.
pub fn local_zone() -> Option<Tz> {
    static ZONE: OnceLock<Option<Tz>> = OnceLock::new();
    *ZONE.get_or_init(|| {
        let zone = std::env::var("TZ")
            .ok()
            .and_then(|name| name.trim_start_matches(':').parse::<Tz>().ok())
            .or_else(|| iana_time_zone::get_timezone().ok()?.parse::<Tz>().ok());
        tracing::debug!(zone = ?zone.map(|tz| tz.name()), "local timezone resolved");
        zone
    })
}

/// Formats `value` as a date, or returns `None` if it is not a date.
pub fn format_value(value: &Value, format: &str) -> Option<String> {
    format_value_in(value, format, local_zone())
}

/// Like [`format_value`], with `zone` as the local timezone.
pub fn format_value_in(value: &Value, format: &str, zone: Option<Tz>) -> Option<String> {
    let dt = match value {
        Value::String(s) if !value.is_numeric() => parse_date_in(s, zone)?,
        Value::Integer(_) | Value::Float(_) | Value::String(_) => {
            from_timestamp_in(value.as_float()?, zone)?
        }
        _ => return None,
    };
    Some(format_date_in(&dt, format, zone))
}

/// Converts a Unix timestamp (seconds, fractions allowed) to local time.
pub fn from_timestamp(ts: f64) -> Option<DateTime<FixedOffset>> {
    from_timestamp_in(ts, local_zone())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_timestamp_in(ts: f64, zone: Option<Tz>) -> Option<DateTime<FixedOffset>> {
    if !ts.is_finite() {
        return None;
    }
    let secs = ts.floor();
    let nanos = (((ts - secs) * 1e9).round() as u32).min(999_999_999);
    let utc = Utc.timestamp_opt(secs as i64, nanos).single()?;
    Some(match zone {
        Some(tz) => utc.with_timezone(&tz).fixed_offset(),
        None => utc.with_timezone(&Local).fixed_offset(),
    })
}

/// Parses a date string.
///
/// Accepts `now`, `today`, `yesterday`, `tomorrow`, `@<timestamp>` (UTC),
/// RFC 3339, RFC 2822, and the numeric layouts `Y-m-d`, `d.m.Y` and `m/d/Y`
/// with optional `H:i` or `H:i:s` time.
pub fn parse_date(input: &str) -> Option<DateTime<FixedOffset>> {
    parse_date_in(input, local_zone())
}

fn parse_date_in(input: &str, zone: Option<Tz>) -> Option<DateTime<FixedOffset>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    match s.to_ascii_lowercase().as_str() {
        "now" => return Some(now_in(zone)),
        "today" => return local_midnight(0, zone),
        "yesterday" => return local_midnight(-1, zone),
        "tomorrow" => return local_midnight(1, zone),
        _ => {}
    }

    if let Some(ts) = s.strip_prefix('@') {
        let secs: i64 = ts.trim().parse().ok()?;
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(|dt| dt.fixed_offset());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt);
    }

    let naive = DATETIME_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(s, layout).ok())
        .or_else(|| {
            DATE_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDate::parse_from_str(s, layout).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    to_local(&naive, zone)
}

fn now_in(zone: Option<Tz>) -> DateTime<FixedOffset> {
    let now = Utc::now();
    match zone {
        Some(tz) => now.with_timezone(&tz).fixed_offset(),
        None => now.with_timezone(&Local).fixed_offset(),
    }
}

fn local_midnight(day_offset: i64, zone: Option<Tz>) -> Option<DateTime<FixedOffset>> {
    let date = now_in(zone).date_naive() + Duration::days(day_offset);
    to_local(&date.and_hms_opt(0, 0, 0)?, zone)
}

fn to_local(naive: &NaiveDateTime, zone: Option<Tz>) -> Option<DateTime<FixedOffset>> {
    match zone {
        Some(tz) => tz
            .from_local_datetime(naive)
            .earliest()
            .map(|dt| dt.fixed_offset()),
        None => Local
            .from_local_datetime(naive)
            .earliest()
            .map(|dt| dt.fixed_offset()),
    }
}

/// Zone details behind the `e`, `I` and `T` tokens.
struct ZoneInfo {
    name: &'static str,
    abbreviation: String,
    dst: bool,
}

/// Looks up `dt` in `zone`. Returns `None` when the zone is unknown or does
/// not use `dt`'s offset at that instant (an explicit foreign offset).
fn zone_info(dt: &DateTime<FixedOffset>, zone: Option<Tz>) -> Option<ZoneInfo> {
    let tz = zone?;
    let offset = tz.offset_from_utc_datetime(&dt.naive_utc());
    if offset.fix() != *dt.offset() {
        return None;
    }
    Some(ZoneInfo {
        name: tz.name(),
        abbreviation: offset
            .abbreviation()
            .map_or_else(|| dt.format("%:z").to_string(), str::to_string),
        dst: offset.dst_offset() != Duration::zero(),
    })
}

/// Formats a datetime with the `date()` format vocabulary in the local zone.
///
/// Unknown characters are copied verbatim; `\` escapes the next character.
pub fn format_date(dt: &DateTime<FixedOffset>, format: &str) -> String {
    format_date_in(dt, format, local_zone())
}

/// Formats a datetime with the `date()` format vocabulary, naming `zone` in
/// the `e`, `I` and `T` tokens.
///
/// When `dt` is not in `zone` (or no zone is given), `e` and `T` print the
/// numeric offset (`+01:00`) and `I` is `0`.
pub fn format_date_in(dt: &DateTime<FixedOffset>, format: &str, zone: Option<Tz>) -> String {
    let zone = zone_info(dt, zone);
    let mut result = String::new();
    let mut chars = format.chars();

    while let Some(ch) = chars.next() {
        match ch {
            // Day
            'd' => {
                let _ = write!(result, "{:02}", dt.day());
            }
            'D' => result.push_str(&dt.format("%a").to_string()),
            'j' => {
                let _ = write!(result, "{}", dt.day());
            }
            'l' => result.push_str(&dt.format("%A").to_string()),
            'N' => {
                let _ = write!(result, "{}", dt.weekday().number_from_monday());
            }
            'S' => result.push_str(ordinal_suffix(dt.day())),
            'w' => {
                let _ = write!(result, "{}", dt.weekday().num_days_from_sunday());
            }
            'z' => {
                let _ = write!(result, "{}", dt.ordinal0());
            }
            // Week
            'W' => {
                let _ = write!(result, "{:02}", dt.iso_week().week());
            }
            // Month
            'F' => result.push_str(&dt.format("%B").to_string()),
            'm' => {
                let _ = write!(result, "{:02}", dt.month());
            }
            'M' => result.push_str(&dt.format("%b").to_string()),
            'n' => {
                let _ = write!(result, "{}", dt.month());
            }
            't' => {
                let _ = write!(result, "{}", days_in_month(dt.year(), dt.month()));
            }
            // Year
            'L' => result.push(if is_leap_year(dt.year()) { '1' } else { '0' }),
            'o' => {
                let _ = write!(result, "{}", dt.iso_week().year());
            }
            'Y' => {
                let _ = write!(result, "{}", dt.year());
            }
            'y' => {
                let _ = write!(result, "{:02}", dt.year().rem_euclid(100));
            }
            // Time
            'a' => result.push_str(if dt.hour() < 12 { "am" } else { "pm" }),
            'A' => result.push_str(if dt.hour() < 12 { "AM" } else { "PM" }),
            'B' => {
                let _ = write!(result, "{:03}", swatch_beats(dt));
            }
            'g' => {
                let _ = write!(result, "{}", dt.hour12().1);
            }
            'G' => {
                let _ = write!(result, "{}", dt.hour());
            }
            'h' => {
                let _ = write!(result, "{:02}", dt.hour12().1);
            }
            'H' => {
                let _ = write!(result, "{:02}", dt.hour());
            }
            'i' => {
                let _ = write!(result, "{:02}", dt.minute());
            }
            's' => {
                let _ = write!(result, "{:02}", dt.second());
            }
            'u' => {
                let _ = write!(result, "{:06}", dt.nanosecond() % 1_000_000_000 / 1_000);
            }
            'v' => {
                let _ = write!(result, "{:03}", dt.nanosecond() % 1_000_000_000 / 1_000_000);
            }
            // Timezone
            'e' => match &zone {
                Some(info) => result.push_str(info.name),
                None => result.push_str(&dt.format("%:z").to_string()),
            },
            'T' => match &zone {
                Some(info) => result.push_str(&info.abbreviation),
                None => result.push_str(&dt.format("%:z").to_string()),
            },
            'P' => result.push_str(&dt.format("%:z").to_string()),
            'I' => result.push(if zone.as_ref().is_some_and(|info| info.dst) {
                '1'
            } else {
                '0'
            }),
            'O' => result.push_str(&dt.format("%z").to_string()),
            'p' => {
                if dt.offset().local_minus_utc() == 0 {
                    result.push('Z');
                } else {
                    result.push_str(&dt.format("%:z").to_string());
                }
            }
            'Z' => {
                let _ = write!(result, "{}", dt.offset().local_minus_utc());
            }
            // Full date/time
            'c' => result.push_str(&dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()),
            'r' => result.push_str(&dt.format("%a, %d %b %Y %H:%M:%S %z").to_string()),
            'U' => {
                let _ = write!(result, "{}", dt.timestamp());
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    result.push(next);
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

const fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days(),
        _ => 30,
    }
}

/// Swatch Internet time: thousandths of a day in UTC+1.
fn swatch_beats(dt: &DateTime<FixedOffset>) -> i64 {
    let seconds = (dt.timestamp() + 3600).rem_euclid(86_400);
    seconds * 10 / 864
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_day_and_month_tokens() {
        let dt = fixed("2024-03-05T14:07:09+01:00");
        assert_eq!(format_date(&dt, "Y-m-d H:i:s"), "2024-03-05 14:07:09");
        assert_eq!(format_date(&dt, "D, d M Y"), "Tue, 05 Mar 2024");
        assert_eq!(format_date(&dt, "l jS F"), "Tuesday 5th March");
        assert_eq!(format_date(&dt, "N w z"), "2 2 64");
        assert_eq!(format_date(&dt, "n/j/y"), "3/5/24");
        assert_eq!(format_date(&dt, "t L"), "31 1");
        assert_eq!(format_date(&dt, "W o"), "10 2024");
    }

    #[test]
    fn test_time_tokens() {
        let dt = fixed("2024-03-05T14:07:09.123456+01:00");
        assert_eq!(format_date(&dt, "g:i a"), "2:07 pm");
        assert_eq!(format_date(&dt, "h A G"), "02 PM 14");
        assert_eq!(format_date(&dt, "u v"), "123456 123");
        assert_eq!(format_date(&dt, "B"), "588");
    }

    #[test]
    fn test_timezone_tokens() {
        let dt = fixed("2024-03-05T14:07:09+01:00");
        assert_eq!(format_date(&dt, "O P p Z"), "+0100 +01:00 +01:00 3600");
        assert_eq!(format_date_in(&dt, "e T I", None), "+01:00 +01:00 0");
        assert_eq!(format_date(&fixed("2024-03-05T14:07:09Z"), "p"), "Z");
    }

    #[test]
    fn test_named_zone_tokens() {
        let berlin = Some(chrono_tz::Europe::Berlin);
        let summer = fixed("2024-07-01T14:00:00+02:00");
        assert_eq!(
            format_date_in(&summer, "I|T|e|O", berlin),
            "1|CEST|Europe/Berlin|+0200"
        );
        let winter = fixed("2024-01-15T10:00:00+01:00");
        assert_eq!(format_date_in(&winter, "I|T|e", berlin), "0|CET|Europe/Berlin");
    }

    #[test]
    fn test_foreign_offset_keeps_numeric_zone() {
        let dt = fixed("2024-07-01T14:00:00+05:30");
        assert_eq!(
            format_date_in(&dt, "I|T|e", Some(chrono_tz::Europe::Berlin)),
            "0|+05:30|+05:30"
        );
    }

    #[test]
    fn test_timestamp_in_pinned_zone() {
        let berlin = Some(chrono_tz::Europe::Berlin);
        assert_eq!(
            format_value_in(&Value::from(1_719_835_200), "I|T|e|O H:i", berlin).as_deref(),
            Some("1|CEST|Europe/Berlin|+0200 14:00")
        );
        assert_eq!(
            format_value_in(&Value::from("2024-01-15 10:00"), "T O", berlin).as_deref(),
            Some("CET +0100")
        );
        let new_york = Some(chrono_tz::America::New_York);
        assert_eq!(
            format_value_in(&Value::from("1719835200"), "I T H:i", new_york).as_deref(),
            Some("1 EDT 08:00")
        );
        assert_eq!(
            format_value_in(&Value::from("@0"), "e T", berlin).as_deref(),
            Some("+00:00 +00:00")
        );
    }

    #[test]
    fn test_full_tokens() {
        let dt = fixed("2024-03-05T14:07:09+01:00");
        assert_eq!(format_date(&dt, "c"), "2024-03-05T14:07:09+01:00");
        assert_eq!(format_date(&dt, "r"), "Tue, 05 Mar 2024 14:07:09 +0100");
        assert_eq!(format_date(&dt, "U"), "1709644029");
    }

    #[test]
    fn test_escape_and_literals() {
        let dt = fixed("2024-03-05T14:07:09+01:00");
        assert_eq!(format_date(&dt, "\\Y Y"), "Y 2024");
        assert_eq!(format_date(&dt, "d.m. #"), "05.03. #");
    }

    #[test]
    fn test_ordinal_suffix() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(22), "nd");
        assert_eq!(ordinal_suffix(31), "st");
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 4), 30);
    }

    #[test]
    fn test_parse_layouts() {
        for input in [
            "2024-03-05",
            "2024-03-05 14:07",
            "2024-03-05 14:07:09",
            "2024-03-05T14:07:09",
            "05.03.2024",
            "05.03.2024 14:07:09",
            "03/05/2024",
            "03/05/2024 14:07",
        ] {
            let dt = parse_date(input).unwrap_or_else(|| panic!("failed to parse {input}"));
            assert_eq!(format_date(&dt, "Y-m-d"), "2024-03-05", "{input}");
        }
    }

    #[test]
    fn test_parse_with_zone() {
        let dt = parse_date("Tue, 05 Mar 2024 14:07:09 +0100").unwrap();
        assert_eq!(format_date(&dt, "H:i O"), "14:07 +0100");
        let dt = parse_date("@86400").unwrap();
        assert_eq!(format_date(&dt, "Y-m-d H:i P"), "1970-01-02 00:00 +00:00");
    }

    #[test]
    fn test_parse_relative_words() {
        let today = parse_date("today").unwrap();
        assert_eq!(format_date(&today, "H:i:s"), "00:00:00");
        let tomorrow = parse_date("Tomorrow").unwrap();
        assert_eq!((tomorrow - today).num_hours().abs() / 23, 1);
        assert!(parse_date("now").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("2024-13-45").is_none());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::from(0), "U").as_deref(), Some("0"));
        assert_eq!(format_value(&Value::from("86400"), "U").as_deref(), Some("86400"));
        assert_eq!(
            format_value(&Value::from("2024-03-05 10:00"), "d.m.Y").as_deref(),
            Some("05.03.2024")
        );
        assert_eq!(format_value(&Value::from(" 1.5e2 "), "U").as_deref(), Some("150"));
        assert!(format_value(&Value::from("soon"), "Y").is_none());
        assert!(format_value(&Value::Null, "Y").is_none());
        assert!(format_value(&Value::List(vec![]), "Y").is_none());
    }
}
