//! The authoritative board timestamp.
//!
//! Every board carries a `<time datetime="...">` element. Its value orders
//! successive boards published under the same key; the server never trusts
//! it for expiry, which runs off the storage time instead.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::bytes::Regex;

/// Opening of the element the admission check looks for.
const TIME_TAG: &[u8] = b"<time";

/// First `<time ...>` element with a double-quoted `datetime` attribute.
static TIME_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?-u)<time[\t\n\x0B\x0C\r ](?:[^>]*?[\t\n\x0B\x0C\r ])?datetime="([^"]*)""#)
        .expect("time element pattern compiles")
});

/// Cheap admission check: does the board contain a `<time` tag at all?
pub fn has_time_element(board: &[u8]) -> bool {
    board.windows(TIME_TAG.len()).any(|w| w == TIME_TAG)
}

/// Extract and parse the first `<time datetime="...">` value.
///
/// `None` means "timestamp unknown": no such element, or a value that is
/// not ISO-8601. It never means "the epoch".
pub fn extract(board: &[u8]) -> Option<DateTime<Utc>> {
    let captures = TIME_ELEMENT.captures(board)?;
    let value = std::str::from_utf8(captures.get(1)?.as_bytes()).ok()?;
    parse(value)
}

/// Parse an ISO-8601 timestamp, normalizing to UTC.
///
/// Values without an offset are read as UTC. A bare date means midnight.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if !value.is_ascii() || value.len() < 10 {
        return None;
    }

    let mut text = value.to_string();
    if text.len() > 10 && text.as_bytes()[10] == b' ' {
        text.replace_range(10..11, "T");
    }
    if text.ends_with(['Z', 'z']) {
        text.truncate(text.len() - 1);
        text.push_str("+00:00");
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical rendering used when generating boards: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A complete `<time>` element for `ts`.
pub fn time_element(ts: DateTime<Utc>) -> String {
    let value = format(ts);
    format!("<time datetime=\"{value}\">{value}</time>")
}

/// Format as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`), used for
/// `Last-Modified` and `If-Modified-Since`.
pub fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date. Unreadable values are `None`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn extracts_utc_timestamp() {
        let board = br#"<p>hi</p><time datetime="2024-05-01T12:30:00Z">May</time>"#;
        assert_eq!(extract(board), Some(at(2024, 5, 1, 12, 30, 0)));
    }

    #[test]
    fn normalizes_offsets_to_utc() {
        let board = br#"<time datetime="2024-05-01T14:30:00+02:00"></time>"#;
        assert_eq!(extract(board), Some(at(2024, 5, 1, 12, 30, 0)));
    }

    #[test]
    fn accepts_python_isoformat_output() {
        let board = br#"<time datetime="2024-05-01T12:30:00.123456+00:00">x</time>"#;
        let ts = extract(board).unwrap();
        assert_eq!(ts.timestamp(), at(2024, 5, 1, 12, 30, 0).timestamp());
        assert_eq!(ts.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn naive_and_date_only_values_are_utc() {
        assert_eq!(parse("2024-05-01T12:30:00"), Some(at(2024, 5, 1, 12, 30, 0)));
        assert_eq!(parse("2024-05-01 12:30:00"), Some(at(2024, 5, 1, 12, 30, 0)));
        assert_eq!(parse("2024-05-01T12:30"), Some(at(2024, 5, 1, 12, 30, 0)));
        assert_eq!(parse("2024-05-01"), Some(at(2024, 5, 1, 0, 0, 0)));
    }

    #[test]
    fn missing_element_is_none() {
        assert_eq!(extract(b"<p>No timestamp here</p>"), None);
        assert_eq!(extract(b"<time>2024-05-01</time>"), None);
        assert_eq!(extract(b""), None);
    }

    #[test]
    fn unparseable_value_is_none() {
        assert_eq!(extract(br#"<time datetime="invalid">Test</time>"#), None);
        assert_eq!(extract(br#"<time datetime="">Test</time>"#), None);
        assert_eq!(extract(br#"<time datetime="2024-13-01T00:00:00Z"></time>"#), None);
        assert_eq!(extract(b"<time datetime=\"\xff\xfe\"></time>"), None);
    }

    #[test]
    fn first_timestamp_bearing_element_wins() {
        let board = br#"<time datetime="2024-01-01T00:00:00Z"></time><time datetime="2030-01-01T00:00:00Z"></time>"#;
        assert_eq!(extract(board), Some(at(2024, 1, 1, 0, 0, 0)));

        // An element without the attribute does not count.
        let board = br#"<time>soon</time><time datetime="2030-01-01T00:00:00Z"></time>"#;
        assert_eq!(extract(board), Some(at(2030, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn other_attributes_may_precede_datetime() {
        let board = b"<time\n  class=\"stamp\" datetime=\"2024-05-01T00:00:00Z\"></time>";
        assert_eq!(extract(board), Some(at(2024, 5, 1, 0, 0, 0)));
    }

    #[test]
    fn admission_check_only_needs_the_tag() {
        assert!(has_time_element(b"<time>"));
        assert!(has_time_element(br#"<time datetime="x">"#));
        assert!(!has_time_element(b"<p>time</p>"));
        assert!(!has_time_element(b""));
    }

    #[test]
    fn http_dates_round_trip_at_second_precision() {
        let ts = at(1994, 11, 6, 8, 49, 37);
        assert_eq!(http_date(ts), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(ts));
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(parse_http_date(""), None);
    }

    #[test]
    fn time_element_is_extractable() {
        let ts = at(2031, 7, 9, 8, 7, 6);
        assert_eq!(format(ts), "2031-07-09T08:07:06Z");
        assert_eq!(extract(time_element(ts).as_bytes()), Some(ts));
    }

    proptest! {
        #[test]
        fn round_trips_and_is_idempotent(secs in 0i64..4_102_444_800) {
            let ts = DateTime::from_timestamp(secs, 0).unwrap();
            let board = format!("<h1>board</h1>{}<p>more</p>", time_element(ts));
            let first = extract(board.as_bytes());
            prop_assert_eq!(first, Some(ts));
            prop_assert_eq!(extract(board.as_bytes()), first);
        }

        #[test]
        fn arbitrary_values_never_panic(value in "\\PC{0,40}") {
            let board = format!("<time datetime=\"{value}\"></time>");
            let _ = extract(board.as_bytes());
        }
    }
}
