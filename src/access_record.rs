use std::fmt::Display;

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::skip::Skip;

const DASH: &str = "-";
const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";
const USER_AGENT: &str = "User-Agent";
const REFERER: &str = "Referer";

/// Zone the CLF timestamp is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampZone {
    Local,
    Utc,
}

/// The fields of a Caddy access log entry that end up in a CLF line.
///
/// Every field is optional; `null` is treated the same as a missing key.
/// A present field of the wrong type fails deserialization, which the
/// caller turns into a skip.
#[derive(Debug, Deserialize)]
pub struct AccessRecord {
    request: Option<Request>,
    ts: Option<f64>,
    status: Option<i64>,
    size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct Request {
    remote_ip: Option<String>,
    method: Option<String>,
    uri: Option<String>,
    proto: Option<String>,
    headers: Option<Map<String, Value>>,
}

impl AccessRecord {
    pub fn from_value(value: &Value) -> Result<AccessRecord, Skip> {
        AccessRecord::deserialize(value).map_err(Skip::Shape)
    }

    pub fn to_clf(&self, zone: TimestampZone) -> Result<String, Skip> {
        let no_request = Request::default();
        let request = self.request.as_ref().unwrap_or(&no_request);

        let remote_ip = match or_dash(&request.remote_ip) {
            "::1" => "127.0.0.1",
            ip => ip,
        };
        let time = format_timestamp(self.ts.unwrap_or(0.0), zone)?;
        let status = self.status.unwrap_or(0);
        let size = self.size.unwrap_or(0);
        let referer = request.first_header(REFERER)?.unwrap_or(DASH);
        let user_agent = request.first_header(USER_AGENT)?.unwrap_or(DASH);

        Ok(format!(
            "{} - - [{}] \"{} {} {}\" {} {} \"{}\" \"{}\"",
            remote_ip,
            time,
            or_dash(&request.method),
            or_dash(&request.uri),
            or_dash(&request.proto),
            status,
            size,
            referer,
            user_agent
        ))
    }
}

impl Request {
    /// First value of a multi-valued header. Absent, null and empty lists
    /// count as "no value"; an empty first string is kept as is.
    fn first_header(&self, name: &'static str) -> Result<Option<&str>, Skip> {
        let headers = match &self.headers {
            Some(headers) => headers,
            None => return Ok(None),
        };

        match headers.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(values)) => match values.first() {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.as_str())),
                Some(_) => Err(Skip::Header(name)),
            },
            Some(_) => Err(Skip::Header(name)),
        }
    }
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(DASH)
}

/// Renders a Unix timestamp (seconds, possibly fractional) as
/// `DD/Mon/YYYY:HH:MM:SS ±ZZZZ`. Sub-second precision is dropped, and the
/// year must stay within 1..=9999 in the rendered zone.
pub fn format_timestamp(ts: f64, zone: TimestampZone) -> Result<String, Skip> {
    let secs = ts.floor();
    if !secs.is_finite() || secs < i64::MIN as f64 || secs >= i64::MAX as f64 {
        return Err(Skip::TimestampOutOfRange(ts));
    }

    let nanos = (((ts - secs) * 1e9) as u32).min(999_999_999);
    let utc = DateTime::<Utc>::from_timestamp(secs as i64, nanos)
        .ok_or(Skip::TimestampOutOfRange(ts))?;

    match zone {
        TimestampZone::Local => render(utc.with_timezone(&Local), ts),
        TimestampZone::Utc => render(utc, ts),
    }
}

fn render<Tz: TimeZone>(dt: DateTime<Tz>, ts: f64) -> Result<String, Skip>
where
    Tz::Offset: Display,
{
    if !(1..=9999).contains(&dt.year()) {
        return Err(Skip::TimestampOutOfRange(ts));
    }

    let offset = dt.format("%z").to_string();
    let offset = if offset.is_empty() { "+0000" } else { offset.as_str() };

    Ok(format!("{} {}", dt.format(CLF_TIME_FORMAT), offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clf(value: Value) -> Result<String, Skip> {
        AccessRecord::from_value(&value)?.to_clf(TimestampZone::Utc)
    }

    #[test]
    fn formats_utc_timestamp() {
        assert_eq!(
            format_timestamp(1700000000.0, TimestampZone::Utc).unwrap(),
            "14/Nov/2023:22:13:20 +0000"
        );
    }

    #[test]
    fn drops_fractional_seconds() {
        assert_eq!(
            format_timestamp(1700000000.999, TimestampZone::Utc).unwrap(),
            "14/Nov/2023:22:13:20 +0000"
        );
        assert_eq!(
            format_timestamp(-0.5, TimestampZone::Utc).unwrap(),
            "31/Dec/1969:23:59:59 +0000"
        );
    }

    #[test]
    fn local_timestamp_has_signed_offset() {
        let rendered = format_timestamp(1700000000.0, TimestampZone::Local).unwrap();
        let (_, offset) = rendered.rsplit_once(' ').unwrap();
        assert_eq!(offset.len(), 5);
        assert!(offset.starts_with('+') || offset.starts_with('-'));
    }

    #[test]
    fn rejects_unrepresentable_timestamps() {
        assert!(matches!(
            format_timestamp(f64::NAN, TimestampZone::Utc),
            Err(Skip::TimestampOutOfRange(_))
        ));
        assert!(matches!(
            format_timestamp(1e300, TimestampZone::Utc),
            Err(Skip::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn years_outside_four_digits_are_skipped() {
        assert_eq!(
            format_timestamp(253402300799.0, TimestampZone::Utc).unwrap(),
            "31/Dec/9999:23:59:59 +0000"
        );
        assert!(matches!(
            format_timestamp(253402300800.0, TimestampZone::Utc),
            Err(Skip::TimestampOutOfRange(_))
        ));
        assert!(matches!(
            format_timestamp(8210266876799.0, TimestampZone::Utc),
            Err(Skip::TimestampOutOfRange(_))
        ));

        assert_eq!(
            format_timestamp(-62135596800.0, TimestampZone::Utc).unwrap(),
            "01/Jan/0001:00:00:00 +0000"
        );
        assert!(matches!(
            format_timestamp(-62135596801.0, TimestampZone::Utc),
            Err(Skip::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn far_future_line_is_skipped() {
        assert!(matches!(
            clf(json!({"ts": 253402300800u64})),
            Err(Skip::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn empty_record_is_all_defaults() {
        assert_eq!(
            clf(json!({})).unwrap(),
            "- - - [01/Jan/1970:00:00:00 +0000] \"- - -\" 0 0 \"-\" \"-\""
        );
    }

    #[test]
    fn nulls_count_as_missing() {
        let line = clf(json!({
            "ts": null,
            "status": null,
            "request": {"remote_ip": null, "headers": {"Referer": null}}
        }))
        .unwrap();
        assert_eq!(
            line,
            "- - - [01/Jan/1970:00:00:00 +0000] \"- - -\" 0 0 \"-\" \"-\""
        );
    }

    #[test]
    fn only_ipv6_loopback_is_rewritten() {
        let v6 = clf(json!({"request": {"remote_ip": "::1"}})).unwrap();
        assert!(v6.starts_with("127.0.0.1 - - ["));

        let other = clf(json!({"request": {"remote_ip": "2001:db8::1"}})).unwrap();
        assert!(other.starts_with("2001:db8::1 - - ["));
    }

    #[test]
    fn takes_first_header_value() {
        let line = clf(json!({
            "request": {"headers": {
                "Referer": ["https://example.com/", "https://ignored/"],
                "User-Agent": ["curl/8.0"]
            }}
        }))
        .unwrap();
        assert!(line.ends_with("\"https://example.com/\" \"curl/8.0\""));
    }

    #[test]
    fn empty_header_list_defaults_to_dash() {
        let line = clf(json!({
            "request": {"headers": {"Referer": [], "User-Agent": ["curl/8.0"]}}
        }))
        .unwrap();
        assert!(line.ends_with("\"-\" \"curl/8.0\""));
    }

    #[test]
    fn empty_first_header_value_is_kept() {
        let line = clf(json!({
            "request": {"headers": {"User-Agent": ["", "real"]}}
        }))
        .unwrap();
        assert!(line.ends_with(" 0 0 \"-\" \"\""));
    }

    #[test]
    fn wrong_types_are_skips() {
        assert!(matches!(clf(json!({"ts": "yesterday"})), Err(Skip::Shape(_))));
        assert!(matches!(clf(json!({"status": 200.5})), Err(Skip::Shape(_))));
        assert!(matches!(clf(json!({"request": "GET /"})), Err(Skip::Shape(_))));
        assert!(matches!(
            clf(json!({"request": {"headers": {"User-Agent": "curl"}}})),
            Err(Skip::Header("User-Agent"))
        ));
        assert!(matches!(
            clf(json!({"request": {"headers": {"Referer": [42]}}})),
            Err(Skip::Header("Referer"))
        ));
    }
}
