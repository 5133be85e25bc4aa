use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

static COMPACT_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([+-])(\d{2})(\d{2})$").expect("valid offset regex"));

/// A `created_at` value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unparseable timestamp: '{input}'")]
pub struct TimestampError {
    pub input: String,
}

/// Parses a loosely ISO-8601 timestamp.
///
/// Accepts a trailing `Z` and `+HHMM` offsets without a colon. Values without
/// an offset are taken as UTC wall-clock time; a bare date means midnight.
///
/// # Examples
///
/// ```
/// use zsxq_sync::processor::parse_timestamp;
///
/// let dt = parse_timestamp("2024-01-15T10:30:00.000+0800").unwrap();
/// assert_eq!(dt.hour(), 10);
/// assert!(parse_timestamp("yesterday").is_err());
/// ```
pub fn parse_timestamp(input: &str) -> Result<OffsetDateTime, TimestampError> {
    let err = || TimestampError {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err());
    }

    let mut normalized = match trimmed.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };
    normalized = COMPACT_OFFSET
        .replace(&normalized, "$1$2:$3")
        .into_owned();
    // Accept a space between date and time.
    if normalized.as_bytes().get(10) == Some(&b' ') {
        normalized.replace_range(10..11, "T");
    }

    if let Ok(dt) = OffsetDateTime::parse(&normalized, &Rfc3339) {
        return Ok(dt);
    }

    let naive_formats = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    for format in naive_formats {
        if let Ok(dt) = PrimitiveDateTime::parse(&normalized, format) {
            return Ok(dt.assume_utc());
        }
    }

    Date::parse(&normalized, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| err())
}

/// `2024年01月15日分享`, used as an article title for empty bodies.
pub fn format_share_date(dt: &OffsetDateTime) -> String {
    format!(
        "{}年{:02}月{:02}日分享",
        dt.year(),
        u8::from(dt.month()),
        dt.day()
    )
}

/// `01-15 10:30`, used as a short-form title for empty bodies.
pub fn format_short_stamp(dt: &OffsetDateTime) -> String {
    format!(
        "{:02}-{:02} {:02}:{:02}",
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute()
    )
}

/// `2024-01-15 10:30:00`, used in the attribution footer.
pub fn format_footer_time(dt: &OffsetDateTime) -> String {
    format!(
        "{}-{:02}-{:02} {:02}:{:02}:{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_offset() {
        let dt = parse_timestamp("2024-01-15T10:30:00.000+0800").unwrap();
        assert_eq!(format_footer_time(&dt), "2024-01-15 10:30:00");
        assert_eq!(dt.offset().whole_hours(), 8);
    }

    #[test]
    fn parses_zulu_suffix() {
        let dt = parse_timestamp("2024-03-01T08:05:09Z").unwrap();
        assert_eq!(format_footer_time(&dt), "2024-03-01 08:05:09");
        assert!(dt.offset().is_utc());
    }

    #[test]
    fn parses_naive_and_space_separated_forms() {
        let naive = parse_timestamp("2024-01-15T10:30:00").unwrap();
        let spaced = parse_timestamp("2024-01-15 10:30:00").unwrap();
        let fractional = parse_timestamp("2024-01-15 10:30:00.123").unwrap();

        assert_eq!(naive, spaced);
        assert_eq!(format_footer_time(&fractional), "2024-01-15 10:30:00");
    }

    #[test]
    fn parses_bare_date_as_midnight() {
        let dt = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(format_footer_time(&dt), "2024-01-15 00:00:00");
    }

    #[test]
    fn rejects_garbage_and_empty_input() {
        assert_eq!(
            parse_timestamp("not a date").unwrap_err(),
            TimestampError {
                input: "not a date".to_string()
            }
        );
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("2024-13-45T99:00:00").is_err());
    }

    #[test]
    fn formats_title_stamps() {
        let dt = parse_timestamp("2024-01-05T09:03:00+08:00").unwrap();
        assert_eq!(format_share_date(&dt), "2024年01月05日分享");
        assert_eq!(format_short_stamp(&dt), "01-05 09:03");
    }
}
