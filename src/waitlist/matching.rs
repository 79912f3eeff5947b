use chrono::{Datelike, NaiveDateTime};

use crate::model::*;

use super::Waitlist;

/// Priority tier of a match. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    /// The freed slot is exactly what the patient originally asked for.
    ExactDate,
    /// Weekday and time-of-day preferences both accept the slot.
    Preference,
}

/// How (if at all) a waiting entry matches the freed local slot.
pub fn match_tier(entry: &WaitlistEntry, slot: NaiveDateTime) -> Option<MatchTier> {
    if entry.status != EntryStatus::Waiting {
        return None;
    }
    if entry.original_requested_date == Some(slot) {
        return Some(MatchTier::ExactDate);
    }
    let day_ok = entry.preferred_day.accepts(slot.weekday());
    let time_ok = entry.preferred_time.accepts(Period::of(slot.time()));
    (day_ok && time_ok).then_some(MatchTier::Preference)
}

/// Exact-date matches first, then strict FIFO by creation time within a tier.
pub fn rank_matches<'a>(
    entries: impl IntoIterator<Item = &'a WaitlistEntry>,
    slot: NaiveDateTime,
) -> Vec<WaitlistEntry> {
    let mut ranked: Vec<(MatchTier, &WaitlistEntry)> = entries
        .into_iter()
        .filter_map(|e| match_tier(e, slot).map(|tier| (tier, e)))
        .collect();
    ranked.sort_by_key(|(tier, e)| (*tier, e.created_at, e.id));
    ranked.into_iter().map(|(_, e)| e.clone()).collect()
}

impl Waitlist {
    /// Waiting entries that would be offered `slot`, in priority order.
    pub fn pending_matches(&self, slot: NaiveDateTime) -> Vec<WaitlistEntry> {
        let snapshot: Vec<WaitlistEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Waiting)
            .map(|e| e.value().clone())
            .collect();
        rank_matches(&snapshot, slot)
    }
}
