use chrono::{NaiveTime, Timelike, Weekday};
use tracing::debug;

use crate::model::*;

/// A raw slot start produced from a weekday window, before any gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSlot {
    pub start: NaiveTime,
    pub period: Period,
}

/// Periods configured for `weekday`. Keys are matched case-insensitively so
/// "Monday" and "monday" resolve the same way.
pub fn periods_for(weekday: Weekday, availability: &WeeklyAvailability) -> &[AvailabilityPeriod] {
    let name = weekday_name(weekday);
    if let Some(periods) = availability.get(name) {
        return periods;
    }
    availability
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
        .unwrap_or(&[])
}

/// Walk every window on `weekday` in `session_minutes` steps. A slot must fit
/// entirely inside its window; no partial trailing slot is produced.
pub fn resolve_windows(
    weekday: Weekday,
    availability: &WeeklyAvailability,
    session_minutes: u32,
) -> Vec<CandidateSlot> {
    let mut out = Vec::new();
    for period in periods_for(weekday, availability) {
        out.extend(slots_in_period(period, session_minutes));
    }
    out
}

pub fn slots_in_period(period: &AvailabilityPeriod, session_minutes: u32) -> Vec<CandidateSlot> {
    let start = period.start_time.num_seconds_from_midnight();
    let end = period.end_time.num_seconds_from_midnight();
    let step = session_minutes.saturating_mul(60);
    if step == 0 || end <= start {
        debug!(
            "skipping empty window {}-{}",
            period.start_time, period.end_time
        );
        return Vec::new();
    }

    let mut slots = Vec::with_capacity(((end - start) / step) as usize);
    let mut cursor = start;
    while cursor.saturating_add(step) <= end {
        if let Some(t) = NaiveTime::from_num_seconds_from_midnight_opt(cursor, 0) {
            slots.push(CandidateSlot { start: t, period: Period::of(t) });
        }
        cursor += step;
    }
    slots
}
