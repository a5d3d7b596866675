use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Layout used when none is given
pub const DEFAULT_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Current Unix time in seconds
pub fn timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current Unix time in milliseconds
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_time<Tz>(t: &DateTime<Tz>, layout: Option<&str>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    t.format(layout.unwrap_or(DEFAULT_LAYOUT)).to_string()
}

/// Local wall-clock time, formatted
pub fn now_string(layout: Option<&str>) -> String {
    format_time(&Local::now(), layout)
}

pub fn parse_time(s: &str, layout: Option<&str>) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, layout.unwrap_or(DEFAULT_LAYOUT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let formatted = format_time(&t, None);
        assert_eq!(formatted, "2024-03-09 07:05:01");
        assert_eq!(parse_time(&formatted, None).unwrap(), t.naive_utc());

        assert_eq!(format_time(&t, Some("%d/%m/%Y")), "09/03/2024");
    }

    #[test]
    fn test_parse_rejects_other_layouts() {
        assert!(parse_time("2024/03/09", None).is_err());
    }

    #[test]
    fn test_timestamps_agree() {
        let secs = timestamp();
        let millis = timestamp_millis();
        assert!((millis / 1000 - secs).abs() <= 1);
    }
}
