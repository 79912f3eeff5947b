use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Half-open interval `[start, end)` in location-local wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Saturates at the end of the representable calendar.
    pub fn starting_at(start: NaiveDateTime, minutes: u32) -> Self {
        let end = start
            .checked_add_signed(Duration::minutes(i64::from(minutes)))
            .unwrap_or(NaiveDateTime::MAX);
        Self::new(start, end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Coarse time-of-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Morning,
    Afternoon,
    Evening,
}

impl Period {
    /// Morning is `[05:00, 12:00)`, afternoon `[12:00, 17:00)`, everything else evening.
    pub fn of(time: NaiveTime) -> Self {
        match time.hour() {
            5..=11 => Period::Morning,
            12..=16 => Period::Afternoon,
            _ => Period::Evening,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
            Period::Evening => "evening",
        }
    }
}

/// Lowercase English weekday name, independent of locale.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// One contiguous open window on a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPeriod {
    #[serde(rename = "startTime", alias = "start_time", with = "flex_clock")]
    pub start_time: NaiveTime,
    #[serde(rename = "endTime", alias = "end_time", with = "flex_clock")]
    pub end_time: NaiveTime,
}

impl AvailabilityPeriod {
    pub fn new(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self { start_time, end_time }
    }
}

/// Weekday name → open windows, as supplied by practitioner configuration.
pub type WeeklyAvailability = HashMap<String, Vec<AvailabilityPeriod>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPolicy {
    #[serde(default)]
    pub allow_same_day_booking: bool,
    #[serde(default)]
    pub advance_booking_hours: Option<u32>,
    #[serde(default)]
    pub max_advance_booking_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    #[serde(other)]
    Other,
}

impl AppointmentStatus {
    /// Cancelled and no-show appointments no longer occupy their time.
    pub fn occupies_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

/// An existing appointment as it arrives from the upstream feed, already in
/// location-local time. Date and time may come in several shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default, alias = "durationMinutes")]
    pub duration: Option<u32>,
    #[serde(default = "default_status")]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

fn default_status() -> AppointmentStatus {
    AppointmentStatus::Confirmed
}

/// A bookable start time for the selected date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub available: bool,
    pub period: Period,
}

impl Slot {
    pub fn label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }
}

/// Why a date produced the slots it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    /// No windows configured for this weekday.
    NoAvailability,
    /// The booking policy disables the whole date.
    OutsideBookingWindow,
    /// Windows exist but every slot is taken or gated.
    FullyBooked,
    Open,
}

impl DayStatus {
    /// Whether the "join waiting list" affordance applies.
    pub fn offers_waitlist(self) -> bool {
        matches!(self, DayStatus::FullyBooked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub status: DayStatus,
    /// Deduplicated by start time, ascending.
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodGroups {
    pub morning: Vec<Slot>,
    pub afternoon: Vec<Slot>,
    pub evening: Vec<Slot>,
}

impl DaySchedule {
    pub fn by_period(&self) -> PeriodGroups {
        let mut groups = PeriodGroups::default();
        for slot in &self.slots {
            match slot.period {
                Period::Morning => groups.morning.push(slot.clone()),
                Period::Afternoon => groups.afternoon.push(slot.clone()),
                Period::Evening => groups.evening.push(slot.clone()),
            }
        }
        groups
    }

    pub fn available(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.available)
    }
}

// ── Waitlist ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPreference {
    Any,
    #[serde(untagged)]
    On(#[serde(with = "weekday_serde")] Weekday),
}

impl DayPreference {
    pub fn accepts(self, day: Weekday) -> bool {
        match self {
            DayPreference::Any => true,
            DayPreference::On(d) => d == day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePreference {
    Any,
    #[serde(untagged)]
    In(Period),
}

impl TimePreference {
    pub fn accepts(self, period: Period) -> bool {
        match self {
            TimePreference::Any => true,
            TimePreference::In(p) => p == period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Offered,
    Confirmed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub preferred_day: DayPreference,
    pub preferred_time: TimePreference,
    /// The exact local slot the patient originally asked for, if any.
    pub original_requested_date: Option<NaiveDateTime>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub offered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub acceptance_token: Option<String>,
    /// Cancelled appointment that triggered the offer, then the new
    /// appointment once confirmed.
    pub appointment_id: Option<Ulid>,
    /// Offer batch this entry was last notified in.
    pub batch_id: Option<Ulid>,
    /// Local start of the freed slot this entry was offered.
    pub offered_slot: Option<NaiveDateTime>,
}

/// Freed slot from a cancelled appointment, in location-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationEvent {
    pub appointment_id: Ulid,
    pub local_date_time: NaiveDateTime,
    #[serde(default)]
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PractitionerAssignment {
    pub practitioner_id: Ulid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedAppointment {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub service_id: Option<Ulid>,
    pub location_id: Option<String>,
    pub mode: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub practitioners: Vec<PractitionerAssignment>,
    pub status: AppointmentStatus,
    pub parent_appointment_id: Option<Ulid>,
    pub root_appointment_id: Option<Ulid>,
}

/// Lifecycle notifications broadcast per freed appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitlistEvent {
    Offered {
        entry_id: Ulid,
        batch_id: Ulid,
        expires_at: DateTime<Utc>,
    },
    Confirmed {
        entry_id: Ulid,
        batch_id: Ulid,
        appointment_id: Ulid,
    },
    Expired {
        entry_id: Ulid,
        batch_id: Ulid,
    },
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

/// Accepts `HH:MM` as well as `HH:MM:SS`.
mod flex_clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        crate::slots::parse_clock(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid clock time: {raw}")))
    }
}

mod weekday_serde {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(super::weekday_name(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<Weekday>().map_err(|_| serde::de::Error::custom(format!("unknown weekday: {raw}")))
    }
}
