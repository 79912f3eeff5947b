//! Tolerant date/time parsing for the existing-appointments feed.
//!
//! Upstream records mix a plain date field, a full timestamp, and date
//! strings that carry a time suffix. A record matches a candidate date if
//! any one of the three readings agrees.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::AppointmentRecord;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

const CLOCK_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%H:%M:%S%.f"];

pub fn dates_match(candidate: NaiveDate, record: &AppointmentRecord) -> bool {
    explicit_date_eq(candidate, record)
        || timestamp_date_eq(candidate, record)
        || reparsed_date_eq(candidate, record)
}

fn explicit_date_eq(candidate: NaiveDate, record: &AppointmentRecord) -> bool {
    record
        .date
        .as_deref()
        .is_some_and(|raw| raw.trim() == candidate.format("%Y-%m-%d").to_string())
}

fn timestamp_date_eq(candidate: NaiveDate, record: &AppointmentRecord) -> bool {
    record
        .datetime
        .as_deref()
        .and_then(parse_timestamp)
        .is_some_and(|ts| ts.date() == candidate)
}

fn reparsed_date_eq(candidate: NaiveDate, record: &AppointmentRecord) -> bool {
    record
        .date
        .as_deref()
        .and_then(parse_date_loose)
        .is_some_and(|d| d == candidate)
}

/// Parse a feed timestamp. Offsets are dropped: the feed is already in
/// location-local wall time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
}

pub fn parse_date_loose(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(d) = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
    {
        return Some(d);
    }
    if let Some(ts) = parse_timestamp(raw) {
        return Some(ts.date());
    }
    raw.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    CLOCK_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(raw, f).ok())
}

/// Local start time of a record: its explicit time field, falling back to
/// the time part of its timestamp.
pub fn record_clock(record: &AppointmentRecord) -> Option<NaiveTime> {
    record
        .time
        .as_deref()
        .and_then(parse_clock)
        .or_else(|| record.datetime.as_deref().and_then(parse_timestamp).map(|ts| ts.time()))
}

/// Whether the record carries any date reading at all.
pub fn has_resolvable_date(record: &AppointmentRecord) -> bool {
    record.date.as_deref().and_then(parse_date_loose).is_some()
        || record.datetime.as_deref().and_then(parse_timestamp).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AppointmentStatus;

    fn record(date: Option<&str>, time: Option<&str>, datetime: Option<&str>) -> AppointmentRecord {
        AppointmentRecord {
            date: date.map(Into::into),
            time: time.map(Into::into),
            datetime: datetime.map(Into::into),
            duration: None,
            status: AppointmentStatus::Confirmed,
            mode: None,
            location_id: None,
        }
    }

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn explicit_date_field() {
        assert!(dates_match(march(3), &record(Some("2025-03-03"), Some("10:00"), None)));
        assert!(!dates_match(march(4), &record(Some("2025-03-03"), Some("10:00"), None)));
    }

    #[test]
    fn timestamp_only() {
        let r = record(None, None, Some("2025-03-03T10:00:00+01:00"));
        assert!(dates_match(march(3), &r));
        assert_eq!(record_clock(&r), NaiveTime::from_hms_opt(10, 0, 0));
    }

    #[test]
    fn date_field_with_time_suffix() {
        let r = record(Some("2025-03-03 00:00:00"), Some("09:30:00"), None);
        assert!(dates_match(march(3), &r));
        let r = record(Some("2025-03-03T00:00:00.000000Z"), Some("09:30"), None);
        assert!(dates_match(march(3), &r));
    }

    #[test]
    fn any_single_reading_is_enough() {
        // date field disagrees, timestamp agrees
        let r = record(Some("garbage"), Some("10:00"), Some("2025-03-03 10:00:00"));
        assert!(dates_match(march(3), &r));
    }

    #[test]
    fn unresolvable_record() {
        let r = record(Some("soon"), Some("10:00"), None);
        assert!(!has_resolvable_date(&r));
        assert!(!dates_match(march(3), &r));
    }

    #[test]
    fn clock_formats() {
        assert_eq!(parse_clock("07:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert_eq!(parse_clock(" 07:05:30 "), NaiveTime::from_hms_opt(7, 5, 30));
        assert_eq!(parse_clock("7pm"), None);
    }
}
