//! Timestamp parsing and rendering.
//!
//! Snapshot tables store naive `YYYY-MM-DD HH:MM:SS` values; they are read as UTC.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Parses the timestamp shapes found in snapshot tables and config files.
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(ts);
    }

    let naive_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    ];
    for format in naive_formats {
        if let Ok(ts) = PrimitiveDateTime::parse(text, format) {
            return Some(ts.assume_utc());
        }
    }

    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// ISO-8601 rendering used in trace output (`2015-10-09T00:00:00`).
pub fn format_iso(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| utc.to_string())
}

/// SQL rendering, comparable lexically with stored timestamps.
pub fn format_sql(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| utc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_shapes() {
        let expected = datetime!(2015-09-06 23:31:16 UTC);
        assert_eq!(parse_timestamp("2015-09-06 23:31:16"), Some(expected));
        assert_eq!(parse_timestamp("2015-09-06T23:31:16"), Some(expected));
        assert_eq!(parse_timestamp("2015-09-06T23:31:16Z"), Some(expected));
        assert_eq!(parse_timestamp(" 2015-09-06 23:31:16 "), Some(expected));
        assert_eq!(
            parse_timestamp("2015-09-06 23:31:16.500000"),
            Some(datetime!(2015-09-06 23:31:16.5 UTC))
        );
        assert_eq!(
            parse_timestamp("2015-09-06"),
            Some(datetime!(2015-09-06 00:00 UTC))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2015-13-45 99:00:00"), None);
    }

    #[test]
    fn test_format() {
        let ts = datetime!(2015-10-09 07:05:03 UTC);
        assert_eq!(format_iso(ts), "2015-10-09T07:05:03");
        assert_eq!(format_sql(ts), "2015-10-09 07:05:03");
        assert_eq!(format_iso(datetime!(2015-10-09 09:05:03 +02:00)), "2015-10-09T07:05:03");
    }
}
