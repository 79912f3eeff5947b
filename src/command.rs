use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::notify::{NotifyHub, OfferNotifier};
use crate::observability::{COMMAND_DURATION_SECONDS, COMMANDS_TOTAL, command_label};
use crate::slots::{
    CalendarCheck, CalendarSession, CalendarSource, DayAdvisory, HttpCalendarSource,
    PractitionerCalendar, SlotAdvisory, SlotRequest, bookable_dates, compute_slots_for_date,
};
use crate::waitlist::{InMemoryAppointments, OfferBatchSummary, Waitlist, WaitlistError};

/// One request line. `now` fields default to the local clock.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Slots {
        request: SlotRequest,
        #[serde(default)]
        now: Option<NaiveDateTime>,
    },
    BookableDates {
        from: NaiveDate,
        days: u32,
        availability: WeeklyAvailability,
        session_minutes: u32,
        #[serde(default)]
        policy: BookingPolicy,
        #[serde(default)]
        now: Option<NaiveDateTime>,
    },
    Join {
        patient_id: Ulid,
        #[serde(default = "any_day")]
        preferred_day: DayPreference,
        #[serde(default = "any_time")]
        preferred_time: TimePreference,
        #[serde(default)]
        original_requested_date: Option<NaiveDateTime>,
    },
    Leave {
        entry_id: Ulid,
    },
    /// The application cancelled an appointment; its slot goes to the waitlist.
    Cancelled {
        appointment: BookedAppointment,
    },
    Confirm {
        token: String,
    },
    Entry {
        entry_id: Ulid,
    },
    CalendarSlot {
        at: NaiveDateTime,
        practitioners: Vec<PractitionerCalendar>,
    },
    CalendarDay {
        date: NaiveDate,
        practitioners: Vec<PractitionerCalendar>,
    },
    /// Toggle external-calendar conflict checking for this session.
    CalendarConflicts {
        enabled: bool,
    },
}

fn any_day() -> DayPreference {
    DayPreference::Any
}

fn any_time() -> TimePreference {
    TimePreference::Any
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Schedule {
        schedule: DaySchedule,
        periods: PeriodGroups,
        join_waitlist: bool,
    },
    Dates {
        dates: Vec<NaiveDate>,
    },
    Entry {
        entry: WaitlistEntry,
    },
    Offers {
        summary: OfferBatchSummary,
    },
    Booked {
        appointment: BookedAppointment,
    },
    SlotCheck {
        check: CalendarCheck<SlotAdvisory>,
    },
    DayCheck {
        check: CalendarCheck<DayAdvisory>,
    },
    Ok,
    Error {
        kind: &'static str,
        message: String,
    },
}

impl Reply {
    fn error(kind: &'static str, message: impl ToString) -> Self {
        Reply::Error { kind, message: message.to_string() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }
}

fn waitlist_error(e: WaitlistError) -> Reply {
    let kind = match e {
        WaitlistError::NotFound(_) => "not_found",
        WaitlistError::NotWaiting(_) => "not_waiting",
        WaitlistError::LimitExceeded(_) => "limit_exceeded",
    };
    Reply::error(kind, e)
}

/// Dispatches commands to the slot engine, the waitlist and the calendar session.
pub struct Service {
    waitlist: Arc<Waitlist>,
    appointments: Arc<InMemoryAppointments>,
    calendar: Option<Arc<dyn CalendarSource>>,
    session: Mutex<CalendarSession>,
}

impl Service {
    pub fn new(
        waitlist: Arc<Waitlist>,
        appointments: Arc<InMemoryAppointments>,
        calendar: Option<Arc<dyn CalendarSource>>,
        session: CalendarSession,
    ) -> Self {
        Self {
            waitlist,
            appointments,
            calendar,
            session: Mutex::new(session),
        }
    }

    pub fn from_config(config: &Config, notifier: Arc<dyn OfferNotifier>) -> Self {
        let appointments = Arc::new(InMemoryAppointments::new());
        let waitlist = Arc::new(Waitlist::new(
            appointments.clone(),
            notifier,
            Arc::new(NotifyHub::new()),
            config.waitlist_settings(),
        ));
        let calendar = config.calendar_api_url.as_ref().and_then(|url| {
            match HttpCalendarSource::new(url.clone(), config.calendar_timeout()) {
                Ok(source) => Some(Arc::new(source) as Arc<dyn CalendarSource>),
                Err(e) => {
                    warn!("{e}; calendar checks disabled");
                    None
                }
            }
        });
        let session = CalendarSession::new(config.calendar_conflicts, config.timezone.clone())
            .with_timeout(config.calendar_timeout());
        Self::new(waitlist, appointments, calendar, session)
    }

    pub fn waitlist(&self) -> &Arc<Waitlist> {
        &self.waitlist
    }

    pub fn appointments(&self) -> &Arc<InMemoryAppointments> {
        &self.appointments
    }

    /// Parse and run one JSON request line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Command>(line) {
            Ok(cmd) => self.execute(cmd).await,
            Err(e) => {
                metrics::counter!(COMMANDS_TOTAL, "command" => "unknown", "status" => "error").increment(1);
                Reply::error("bad_request", e)
            }
        }
    }

    pub async fn execute(&self, cmd: Command) -> Reply {
        let label = command_label(&cmd);
        let started = Instant::now();
        let reply = self.dispatch(cmd).await;
        let status = if reply.is_error() { "error" } else { "ok" };
        metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!("{label}: {status}");
        reply
    }

    async fn dispatch(&self, cmd: Command) -> Reply {
        match cmd {
            Command::Slots { request, now } => {
                match compute_slots_for_date(&request, now.unwrap_or_else(local_now)) {
                    Ok(schedule) => Reply::Schedule {
                        periods: schedule.by_period(),
                        join_waitlist: schedule.status.offers_waitlist(),
                        schedule,
                    },
                    Err(e) => Reply::error("invalid_request", e),
                }
            }
            Command::BookableDates { from, days, availability, session_minutes, policy, now } => {
                let now = now.unwrap_or_else(local_now);
                match bookable_dates(from, days, &availability, &policy, session_minutes, now) {
                    Ok(dates) => Reply::Dates { dates },
                    Err(e) => Reply::error("invalid_request", e),
                }
            }
            Command::Join { patient_id, preferred_day, preferred_time, original_requested_date } => {
                match self.waitlist.join(patient_id, preferred_day, preferred_time, original_requested_date) {
                    Ok(entry) => Reply::Entry { entry },
                    Err(e) => waitlist_error(e),
                }
            }
            Command::Leave { entry_id } => match self.waitlist.leave(entry_id) {
                Ok(entry) => Reply::Entry { entry },
                Err(e) => waitlist_error(e),
            },
            Command::Cancelled { mut appointment } => {
                appointment.status = AppointmentStatus::Cancelled;
                let event = CancellationEvent {
                    appointment_id: appointment.id,
                    local_date_time: appointment.start,
                    location_id: appointment.location_id.clone(),
                };
                self.appointments.upsert(appointment);
                let summary = self.waitlist.match_and_offer(&event).await;
                Reply::Offers { summary }
            }
            Command::Confirm { token } => match self.waitlist.confirm_offer(&token).await {
                Ok(appointment) => Reply::Booked { appointment },
                Err(e) => Reply::error(e.label(), e),
            },
            Command::Entry { entry_id } => match self.waitlist.entry(&entry_id) {
                Some(entry) => Reply::Entry { entry },
                None => waitlist_error(WaitlistError::NotFound(entry_id)),
            },
            Command::CalendarSlot { at, practitioners } => {
                let check = match &self.calendar {
                    Some(source) => {
                        let mut session = self.session.lock().await;
                        session.check_slot(source.as_ref(), at, &practitioners).await
                    }
                    None => CalendarCheck::Skipped,
                };
                Reply::SlotCheck { check }
            }
            Command::CalendarDay { date, practitioners } => {
                let check = match &self.calendar {
                    Some(source) => {
                        let mut session = self.session.lock().await;
                        session.check_day(source.as_ref(), date, &practitioners).await
                    }
                    None => CalendarCheck::Skipped,
                };
                Reply::DayCheck { check }
            }
            Command::CalendarConflicts { enabled } => {
                self.session.lock().await.set_conflict_checking(enabled);
                Reply::Ok
            }
        }
    }
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
