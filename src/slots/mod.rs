mod calendar;
mod conflict;
mod dates;
mod error;
mod policy;
mod windows;

pub use calendar::{
    CalendarCheck, CalendarEvent, CalendarSession, CalendarSource, Connection, DEFAULT_CALENDAR_TIMEOUT, DayAdvisory,
    DayConflictRequest, DayConflictResponse, HttpCalendarSource, PractitionerCalendar,
    SlotAdvisory, SlotConflictRequest, SlotConflictResponse, merge_day_events,
};
pub use conflict::{ConflictDetector, Occupied, blocked_by_legacy_slots, occupied_on, overlaps_existing};
pub use dates::{dates_match, parse_clock, parse_date_loose, parse_timestamp};
pub use error::{CalendarError, SlotError};
pub use windows::{CandidateSlot, periods_for, resolve_windows, slots_in_period};

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::limits::*;
use crate::model::*;

/// Everything needed to lay out one date's slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequest {
    pub date: NaiveDate,
    pub availability: WeeklyAvailability,
    pub session_minutes: u32,
    #[serde(default)]
    pub policy: BookingPolicy,
    #[serde(default)]
    pub appointments: Vec<AppointmentRecord>,
}

fn validate(req: &SlotRequest) -> Result<(), SlotError> {
    if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&req.session_minutes) {
        return Err(SlotError::InvalidSessionDuration(req.session_minutes));
    }
    if req.appointments.len() > MAX_APPOINTMENTS_PER_QUERY {
        return Err(SlotError::LimitExceeded("too many existing appointments"));
    }
    if req.availability.values().any(|p| p.len() > MAX_PERIODS_PER_DAY) {
        return Err(SlotError::LimitExceeded("too many availability periods"));
    }
    Ok(())
}

/// Lay out the bookable slots for `req.date`.
///
/// Candidates come from the weekday's windows, pass the booking-policy gate,
/// then the conflict detector. Output is deduplicated by start time (a later
/// window wins) and sorted ascending. "No windows" and "everything taken"
/// are both ordinary results, distinguished by [`DayStatus`].
pub fn compute_slots_for_date(req: &SlotRequest, now: NaiveDateTime) -> Result<DaySchedule, SlotError> {
    validate(req)?;
    let date = req.date;

    let candidates = resolve_windows(date.weekday(), &req.availability, req.session_minutes);
    if candidates.is_empty() {
        return Ok(finish(date, DayStatus::NoAvailability, Vec::new()));
    }
    if !req.policy.is_date_enabled(date, now) {
        debug!("{date} is outside the booking window");
        return Ok(finish(date, DayStatus::OutsideBookingWindow, Vec::new()));
    }

    let detector = ConflictDetector::new(date, &req.appointments, req.session_minutes);
    let mut by_start: BTreeMap<NaiveTime, Slot> = BTreeMap::new();
    for candidate in candidates {
        let start = date.and_time(candidate.start);
        let available =
            req.policy.is_slot_allowed(start, now) && detector.is_available(start);
        by_start.insert(
            candidate.start,
            Slot { time: candidate.start, available, period: candidate.period },
        );
    }

    let slots: Vec<Slot> = by_start.into_values().collect();
    let status = if slots.iter().any(|s| s.available) {
        DayStatus::Open
    } else {
        DayStatus::FullyBooked
    };
    debug!(
        "{date}: {} slots, {} available",
        slots.len(),
        slots.iter().filter(|s| s.available).count()
    );
    Ok(finish(date, status, slots))
}

fn finish(date: NaiveDate, status: DayStatus, slots: Vec<Slot>) -> DaySchedule {
    metrics::counter!(
        crate::observability::SLOT_COMPUTATIONS_TOTAL,
        "status" => crate::observability::day_status_label(status)
    )
    .increment(1);
    DaySchedule { date, status, slots }
}

/// Dates in `[from, from + days)` that the policy enables and that have at
/// least one configured window. Feeds the date picker.
pub fn bookable_dates(
    from: NaiveDate,
    days: u32,
    availability: &WeeklyAvailability,
    policy: &BookingPolicy,
    session_minutes: u32,
    now: NaiveDateTime,
) -> Result<Vec<NaiveDate>, SlotError> {
    if days > MAX_BOOKABLE_DATES_SPAN {
        return Err(SlotError::LimitExceeded("date range too wide"));
    }
    if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&session_minutes) {
        return Err(SlotError::InvalidSessionDuration(session_minutes));
    }
    Ok((0..days)
        .map_while(|offset| from.checked_add_signed(Duration::days(i64::from(offset))))
        .filter(|date| policy.is_date_enabled(*date, now))
        .filter(|date| !resolve_windows(date.weekday(), availability, session_minutes).is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // 2025-03-03 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn week_before() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, 24).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn availability(periods: Vec<(NaiveTime, NaiveTime)>) -> WeeklyAvailability {
        let mut map = HashMap::new();
        map.insert(
            "monday".to_string(),
            periods.into_iter().map(|(s, e)| AvailabilityPeriod::new(s, e)).collect(),
        );
        map
    }

    fn request(periods: Vec<(NaiveTime, NaiveTime)>, appointments: Vec<AppointmentRecord>) -> SlotRequest {
        SlotRequest {
            date: monday(),
            availability: availability(periods),
            session_minutes: 30,
            policy: BookingPolicy::default(),
            appointments,
        }
    }

    fn booked(time: &str, minutes: u32) -> AppointmentRecord {
        AppointmentRecord {
            date: Some("2025-03-03".into()),
            time: Some(time.into()),
            datetime: None,
            duration: Some(minutes),
            status: AppointmentStatus::Confirmed,
            mode: None,
            location_id: None,
        }
    }

    fn labels(schedule: &DaySchedule) -> Vec<String> {
        schedule.slots.iter().map(Slot::label).collect()
    }

    #[test]
    fn morning_window_half_hour_sessions() {
        let req = request(vec![(t(9, 0), t(12, 0))], vec![]);
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        assert_eq!(schedule.status, DayStatus::Open);
        assert_eq!(
            labels(&schedule),
            vec!["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"]
        );
        assert!(schedule.slots.iter().all(|s| s.available));
    }

    #[test]
    fn empty_weekday_returns_no_slots() {
        let mut req = request(vec![(t(9, 0), t(12, 0))], vec![]);
        req.date = monday() + Duration::days(1);
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        assert!(schedule.slots.is_empty());
        assert_eq!(schedule.status, DayStatus::NoAvailability);
        assert!(!schedule.status.offers_waitlist());
    }

    #[test]
    fn hour_long_booking_blocks_two_half_hour_slots() {
        let req = request(vec![(t(9, 0), t(12, 0))], vec![booked("10:00", 60)]);
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        let taken: Vec<_> = schedule.slots.iter().filter(|s| !s.available).map(Slot::label).collect();
        assert_eq!(taken, vec!["10:00", "10:30"]);
    }

    #[test]
    fn fully_booked_day_is_distinct_from_no_availability() {
        let req = request(vec![(t(9, 0), t(10, 0))], vec![booked("09:00", 60)]);
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        assert_eq!(schedule.slots.len(), 2);
        assert_eq!(schedule.status, DayStatus::FullyBooked);
        assert!(schedule.status.offers_waitlist());
    }

    #[test]
    fn overlapping_windows_deduplicate_and_sort() {
        let req = request(
            vec![(t(14, 0), t(15, 0)), (t(9, 0), t(10, 0)), (t(9, 30), t(10, 30))],
            vec![],
        );
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        assert_eq!(labels(&schedule), vec!["09:00", "09:30", "10:00", "14:00", "14:30"]);
        let groups = schedule.by_period();
        assert_eq!(groups.morning.len(), 3);
        assert_eq!(groups.afternoon.len(), 2);
        assert!(groups.evening.is_empty());
    }

    #[test]
    fn today_slots_before_advance_notice_unavailable() {
        let mut req = request(vec![(t(9, 0), t(12, 0))], vec![]);
        req.policy = BookingPolicy {
            allow_same_day_booking: true,
            advance_booking_hours: Some(1),
            max_advance_booking_days: None,
        };
        let now = monday().and_hms_opt(9, 10, 0).unwrap();
        let schedule = compute_slots_for_date(&req, now).unwrap();
        let open: Vec<_> = schedule.available().map(Slot::label).collect();
        assert_eq!(open, vec!["10:30", "11:00", "11:30"]);
    }

    #[test]
    fn past_date_is_outside_booking_window() {
        let req = request(vec![(t(9, 0), t(12, 0))], vec![]);
        let now = (monday() + Duration::days(1)).and_hms_opt(8, 0, 0).unwrap();
        let schedule = compute_slots_for_date(&req, now).unwrap();
        assert_eq!(schedule.status, DayStatus::OutsideBookingWindow);
        assert!(schedule.slots.is_empty());
    }

    #[test]
    fn identical_inputs_identical_output() {
        let req = request(
            vec![(t(9, 0), t(12, 0)), (t(13, 0), t(18, 0))],
            vec![booked("09:30", 45), booked("16:00", 20)],
        );
        let a = compute_slots_for_date(&req, week_before()).unwrap();
        let b = compute_slots_for_date(&req, week_before()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_session_duration_rejected() {
        let mut req = request(vec![(t(9, 0), t(12, 0))], vec![]);
        req.session_minutes = 0;
        assert_eq!(
            compute_slots_for_date(&req, week_before()),
            Err(SlotError::InvalidSessionDuration(0))
        );
    }

    #[test]
    fn request_deserializes_from_camel_case_json() {
        let json = r#"{
            "date": "2025-03-03",
            "availability": {"monday": [{"startTime": "09:00:00", "endTime": "10:00:00"}]},
            "sessionMinutes": 30,
            "policy": {"allowSameDayBooking": true, "advanceBookingHours": 2},
            "appointments": [{"date": "2025-03-03", "time": "09:00", "durationMinutes": 30}]
        }"#;
        let req: SlotRequest = serde_json::from_str(json).unwrap();
        let schedule = compute_slots_for_date(&req, week_before()).unwrap();
        let open: Vec<_> = schedule.available().map(Slot::label).collect();
        assert_eq!(open, vec!["09:30"]);
    }

    #[test]
    fn bookable_dates_skip_unconfigured_weekdays() {
        let avail = availability(vec![(t(9, 0), t(12, 0))]);
        let policy = BookingPolicy::default();
        let dates = bookable_dates(monday(), 14, &avail, &policy, 30, week_before()).unwrap();
        assert_eq!(dates, vec![monday(), monday() + Duration::days(7)]);
    }
}
