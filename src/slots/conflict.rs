use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::model::*;

use super::dates::{dates_match, has_resolvable_date, record_clock};

/// An existing appointment resolved onto the queried date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupied {
    pub start: NaiveDateTime,
    /// The appointment's own recorded duration, or the session duration for
    /// records that predate duration tracking.
    pub minutes: u32,
}

impl Occupied {
    pub fn span(&self) -> Span {
        Span::starting_at(self.start, self.minutes)
    }
}

/// Resolve the feed records that fall on `date`. Records with an
/// unreadable date or time are skipped and counted, never fatal.
pub fn occupied_on(
    date: NaiveDate,
    records: &[AppointmentRecord],
    session_minutes: u32,
) -> Vec<Occupied> {
    let mut occupied = Vec::new();
    for record in records {
        if !record.status.occupies_time() {
            continue;
        }
        if !has_resolvable_date(record) {
            warn!(
                "skipping appointment record with unreadable date: date={:?} datetime={:?}",
                record.date, record.datetime
            );
            metrics::counter!(crate::observability::MALFORMED_RECORDS_TOTAL).increment(1);
            continue;
        }
        if !dates_match(date, record) {
            continue;
        }
        let Some(clock) = record_clock(record) else {
            warn!(
                "skipping appointment record on {date} with unreadable time: {:?}",
                record.time
            );
            metrics::counter!(crate::observability::MALFORMED_RECORDS_TOTAL).increment(1);
            continue;
        };
        let minutes = match record.duration {
            Some(m) if m > 0 => m,
            _ => session_minutes,
        };
        occupied.push(Occupied { start: date.and_time(clock), minutes });
    }
    occupied.sort_by_key(|o| o.start);
    occupied
}

/// Direct overlap: the slot intersects any existing appointment, half-open.
pub fn overlaps_existing(slot: &Span, occupied: &[Occupied]) -> bool {
    occupied.iter().any(|o| slot.overlaps(&o.span()))
}

/// Legacy slot blocking: an appointment blocks `ceil(duration / session)`
/// consecutive session-sized starts beginning at its own start. A candidate
/// is blocked only when its start coincides exactly with one of them.
pub fn blocked_by_legacy_slots(
    slot_start: NaiveDateTime,
    occupied: &[Occupied],
    session_minutes: u32,
) -> bool {
    if session_minutes == 0 {
        return false;
    }
    let step = i64::from(session_minutes) * 60;
    occupied.iter().any(|o| {
        let span = i64::from(o.minutes.div_ceil(session_minutes)) * step;
        let offset = (slot_start - o.start).num_seconds();
        (0..span).contains(&offset) && offset % step == 0
    })
}

/// Per-date availability check composing both rules.
pub struct ConflictDetector {
    occupied: Vec<Occupied>,
    session_minutes: u32,
}

impl ConflictDetector {
    pub fn new(date: NaiveDate, records: &[AppointmentRecord], session_minutes: u32) -> Self {
        let occupied = occupied_on(date, records, session_minutes);
        debug!("{} existing appointments on {date}", occupied.len());
        Self { occupied, session_minutes }
    }

    pub fn occupied(&self) -> &[Occupied] {
        &self.occupied
    }

    pub fn is_available(&self, slot_start: NaiveDateTime) -> bool {
        let slot = Span::starting_at(slot_start, self.session_minutes);
        if overlaps_existing(&slot, &self.occupied) {
            return false;
        }
        if blocked_by_legacy_slots(slot_start, &self.occupied, self.session_minutes) {
            // The legacy rule caught something the overlap rule did not.
            warn!("legacy slot-blocking rule diverged from overlap rule at {slot_start}");
            metrics::counter!(crate::observability::LEGACY_RULE_DIVERGENCE_TOTAL).increment(1);
            return false;
        }
        true
    }
}
