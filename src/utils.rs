use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};

use crate::errors::AppError;

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time truncated to millisecond precision, the resolution audit timestamps are stored at.
pub fn utc_now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Parses a caller-supplied timestamp. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and
/// bare dates. A bare date resolves to the start of the day, or to its last
/// millisecond when `end_of_day` is set.
pub fn parse_timestamp(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_milli_opt(23, 59, 59, 999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        let naive = time.ok_or_else(|| AppError::validation(format!("date out of range: {raw}")))?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::validation(format!("invalid timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_supported_formats() {
        let rfc = parse_timestamp("2024-03-01T10:00:00Z", false).unwrap();
        assert_eq!(rfc.hour(), 10);

        let sqlite = parse_timestamp("2024-03-01 10:00:00", false).unwrap();
        assert_eq!(sqlite, rfc);

        let start = parse_timestamp("2024-03-01", false).unwrap();
        let end = parse_timestamp("2024-03-01", true).unwrap();
        assert_eq!(start.hour(), 0);
        assert_eq!(end.hour(), 23);
        assert_eq!(end.timestamp_subsec_millis(), 999);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_timestamp("yesterday", false), Err(AppError::Validation(_))));
    }

    #[test]
    fn millis_precision() {
        assert_eq!(utc_now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
