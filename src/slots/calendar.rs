use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use super::dates::parse_timestamp;
use super::error::CalendarError;

/// How long one calendar call may take before it counts as a failure.
pub const DEFAULT_CALENDAR_TIMEOUT: Duration = Duration::from_secs(5);

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConflictRequest {
    pub date_time_local: NaiveDateTime,
    pub timezone: String,
    pub practitioner_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConflictResponse {
    pub is_connected: bool,
    #[serde(default)]
    pub has_conflict: bool,
    #[serde(default)]
    pub conflict_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayConflictRequest {
    pub date: NaiveDate,
    pub timezone: String,
    pub practitioner_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayConflictResponse {
    pub is_connected: bool,
    #[serde(default)]
    pub has_conflicts: bool,
    #[serde(default)]
    pub conflicts: Vec<CalendarEvent>,
    #[serde(default)]
    pub conflict_count: usize,
}

/// An event from the practitioner's external calendar. Opaque apart from
/// what the day view needs to merge and order it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn check_slot(&self, req: &SlotConflictRequest) -> Result<SlotConflictResponse, CalendarError>;
    async fn check_day(&self, req: &DayConflictRequest) -> Result<DayConflictResponse, CalendarError>;
}

/// Calendar-conflict API over HTTP.
pub struct HttpCalendarSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCalendarSource {
    /// Both connecting and the whole request are bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req: Serialize + Sync, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, CalendarError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CalendarError::Status(status.as_u16()));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| CalendarError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn check_slot(&self, req: &SlotConflictRequest) -> Result<SlotConflictResponse, CalendarError> {
        self.post("/calendar/conflicts/slot", req).await
    }

    async fn check_day(&self, req: &DayConflictRequest) -> Result<DayConflictResponse, CalendarError> {
        self.post("/calendar/conflicts/day", req).await
    }
}

// ── Session state ─────────────────────────────────────────────────

/// What this session has learned about the calendar integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PractitionerCalendar {
    pub practitioner_id: Ulid,
    pub calendar_connected: bool,
}

/// Outcome of an advisory check. None of these change slot availability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CalendarCheck<T> {
    /// Not asked: flag off, nobody connected, or already known disconnected.
    Skipped,
    /// Asked and failed, or the integration reported itself disconnected.
    Unavailable,
    Checked(T),
}

impl<T> CalendarCheck<T> {
    fn label(&self) -> &'static str {
        match self {
            CalendarCheck::Skipped => "skipped",
            CalendarCheck::Unavailable => "unavailable",
            CalendarCheck::Checked(_) => "checked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotAdvisory {
    pub has_conflict: bool,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAdvisory {
    pub has_conflicts: bool,
    pub events: Vec<CalendarEvent>,
}

/// Session-scoped calendar context. Owns the connection cache so callers
/// pass it explicitly instead of sharing a global flag.
#[derive(Debug, Clone)]
pub struct CalendarSession {
    conflict_checking: bool,
    connection: Connection,
    timezone: String,
    timeout: Duration,
}

impl CalendarSession {
    pub fn new(conflict_checking: bool, timezone: impl Into<String>) -> Self {
        Self {
            conflict_checking,
            connection: Connection::Unknown,
            timezone: timezone.into(),
            timeout: DEFAULT_CALENDAR_TIMEOUT,
        }
    }

    /// Cap on a single call to the source, whatever the source does itself.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn conflict_checking(&self) -> bool {
        self.conflict_checking
    }

    /// Toggling the feature flag forgets what we learned about the connection.
    pub fn set_conflict_checking(&mut self, enabled: bool) {
        if self.conflict_checking != enabled {
            self.conflict_checking = enabled;
            self.connection = Connection::Unknown;
        }
    }

    fn connected_ids(&self, practitioners: &[PractitionerCalendar]) -> Option<Vec<Ulid>> {
        if !self.conflict_checking || self.connection == Connection::Disconnected {
            return None;
        }
        let ids: Vec<Ulid> = practitioners
            .iter()
            .filter(|p| p.calendar_connected)
            .map(|p| p.practitioner_id)
            .collect();
        if ids.is_empty() { None } else { Some(ids) }
    }

    fn record_failure(&mut self, e: &CalendarError) {
        warn!("{e}; treating calendar integration as disconnected for this session");
        self.connection = Connection::Disconnected;
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, CalendarError>>) -> Result<T, CalendarError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(CalendarError::Transport(format!("no answer within {:?}", self.timeout))))
    }

    pub async fn check_slot(
        &mut self,
        source: &dyn CalendarSource,
        at: NaiveDateTime,
        practitioners: &[PractitionerCalendar],
    ) -> CalendarCheck<SlotAdvisory> {
        let Some(practitioner_ids) = self.connected_ids(practitioners) else {
            return record(CalendarCheck::Skipped);
        };
        let req = SlotConflictRequest {
            date_time_local: at,
            timezone: self.timezone.clone(),
            practitioner_ids,
        };
        let outcome = match self.bounded(source.check_slot(&req)).await {
            Ok(resp) if resp.is_connected => {
                self.connection = Connection::Connected;
                if resp.has_conflict {
                    debug!("external calendar conflict at {at}");
                }
                CalendarCheck::Checked(SlotAdvisory {
                    has_conflict: resp.has_conflict,
                    details: resp.conflict_details,
                })
            }
            Ok(_) => {
                self.connection = Connection::Disconnected;
                CalendarCheck::Unavailable
            }
            Err(e) => {
                self.record_failure(&e);
                CalendarCheck::Unavailable
            }
        };
        record(outcome)
    }

    pub async fn check_day(
        &mut self,
        source: &dyn CalendarSource,
        date: NaiveDate,
        practitioners: &[PractitionerCalendar],
    ) -> CalendarCheck<DayAdvisory> {
        let Some(practitioner_ids) = self.connected_ids(practitioners) else {
            return record(CalendarCheck::Skipped);
        };
        let req = DayConflictRequest {
            date,
            timezone: self.timezone.clone(),
            practitioner_ids,
        };
        let outcome = match self.bounded(source.check_day(&req)).await {
            Ok(resp) if resp.is_connected => {
                self.connection = Connection::Connected;
                let events = merge_day_events(resp.conflicts);
                debug!(
                    "{} external calendar events on {date} (reported {})",
                    events.len(),
                    resp.conflict_count
                );
                CalendarCheck::Checked(DayAdvisory {
                    has_conflicts: resp.has_conflicts || !events.is_empty(),
                    events,
                })
            }
            Ok(_) => {
                self.connection = Connection::Disconnected;
                CalendarCheck::Unavailable
            }
            Err(e) => {
                self.record_failure(&e);
                CalendarCheck::Unavailable
            }
        };
        record(outcome)
    }
}

fn record<T>(outcome: CalendarCheck<T>) -> CalendarCheck<T> {
    metrics::counter!(crate::observability::CALENDAR_CHECKS_TOTAL, "outcome" => outcome.label())
        .increment(1);
    outcome
}

/// Deduplicate day-level events (by id, else by start/end/title) and order
/// them by start for display.
pub fn merge_day_events(events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    let mut seen = HashSet::new();
    let mut merged: Vec<CalendarEvent> = events
        .into_iter()
        .filter(|e| {
            let key = match &e.id {
                Some(id) => format!("id:{id}"),
                None => format!("{}|{:?}|{:?}", e.start, e.end, e.title),
            };
            seen.insert(key)
        })
        .collect();
    merged.sort_by(|a, b| {
        let ka = parse_timestamp(&a.start);
        let kb = parse_timestamp(&b.start);
        ka.cmp(&kb).then_with(|| a.start.cmp(&b.start))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        calls: AtomicUsize,
        fail: bool,
        connected: bool,
        conflict: bool,
        events: Vec<CalendarEvent>,
    }

    impl FakeSource {
        fn ok(conflict: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail: false, connected: true, conflict, events: vec![] }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::ok(false) }
        }
    }

    #[async_trait]
    impl CalendarSource for FakeSource {
        async fn check_slot(&self, _req: &SlotConflictRequest) -> Result<SlotConflictResponse, CalendarError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CalendarError::Transport("connection refused".into()));
            }
            Ok(SlotConflictResponse {
                is_connected: self.connected,
                has_conflict: self.conflict,
                conflict_details: None,
            })
        }

        async fn check_day(&self, _req: &DayConflictRequest) -> Result<DayConflictResponse, CalendarError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CalendarError::Decode("expected value".into()));
            }
            Ok(DayConflictResponse {
                is_connected: self.connected,
                has_conflicts: !self.events.is_empty(),
                conflicts: self.events.clone(),
                conflict_count: self.events.len(),
            })
        }
    }

    fn connected() -> Vec<PractitionerCalendar> {
        vec![PractitionerCalendar { practitioner_id: Ulid::new(), calendar_connected: true }]
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn event(id: Option<&str>, start: &str) -> CalendarEvent {
        CalendarEvent { id: id.map(Into::into), title: None, start: start.into(), end: None }
    }

    #[tokio::test]
    async fn skipped_when_flag_off() {
        let source = FakeSource::ok(true);
        let mut session = CalendarSession::new(false, "Europe/London");
        let out = session.check_slot(&source, at(), &connected()).await;
        assert_eq!(out, CalendarCheck::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skipped_when_no_practitioner_connected() {
        let source = FakeSource::ok(true);
        let mut session = CalendarSession::new(true, "UTC");
        let practitioners = vec![PractitionerCalendar { practitioner_id: Ulid::new(), calendar_connected: false }];
        let out = session.check_slot(&source, at(), &practitioners).await;
        assert_eq!(out, CalendarCheck::Skipped);
        assert_eq!(session.connection(), Connection::Unknown);
    }

    #[tokio::test]
    async fn conflict_reported_and_connection_cached() {
        let source = FakeSource::ok(true);
        let mut session = CalendarSession::new(true, "UTC");
        let out = session.check_slot(&source, at(), &connected()).await;
        assert_eq!(out, CalendarCheck::Checked(SlotAdvisory { has_conflict: true, details: None }));
        assert_eq!(session.connection(), Connection::Connected);
    }

    #[tokio::test]
    async fn failure_stops_further_calls_until_flag_toggles() {
        let source = FakeSource::failing();
        let mut session = CalendarSession::new(true, "UTC");
        assert_eq!(session.check_slot(&source, at(), &connected()).await, CalendarCheck::Unavailable);
        assert_eq!(session.connection(), Connection::Disconnected);

        assert_eq!(session.check_slot(&source, at(), &connected()).await, CalendarCheck::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        session.set_conflict_checking(false);
        session.set_conflict_checking(true);
        assert_eq!(session.connection(), Connection::Unknown);
        session.check_day(&source, at().date(), &connected()).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn integration_reporting_disconnected_is_cached() {
        let source = FakeSource { connected: false, ..FakeSource::ok(false) };
        let mut session = CalendarSession::new(true, "UTC");
        assert_eq!(session.check_slot(&source, at(), &connected()).await, CalendarCheck::Unavailable);
        assert_eq!(session.connection(), Connection::Disconnected);
    }

    #[tokio::test]
    async fn day_check_merges_events() {
        let source = FakeSource {
            events: vec![
                event(Some("b"), "2025-03-03T14:00:00"),
                event(Some("a"), "2025-03-03T09:00:00"),
                event(Some("b"), "2025-03-03T14:00:00"),
            ],
            ..FakeSource::ok(false)
        };
        let mut session = CalendarSession::new(true, "UTC");
        let CalendarCheck::Checked(day) = session.check_day(&source, at().date(), &connected()).await else {
            panic!("expected a checked day");
        };
        assert!(day.has_conflicts);
        let ids: Vec<_> = day.events.iter().map(|e| e.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    /// Accepts calls and never answers them.
    struct SilentSource;

    #[async_trait]
    impl CalendarSource for SilentSource {
        async fn check_slot(&self, _req: &SlotConflictRequest) -> Result<SlotConflictResponse, CalendarError> {
            std::future::pending().await
        }

        async fn check_day(&self, _req: &DayConflictRequest) -> Result<DayConflictResponse, CalendarError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn silent_source_times_out_as_unavailable() {
        let mut session = CalendarSession::new(true, "UTC").with_timeout(Duration::from_millis(50));
        let out = tokio::time::timeout(
            Duration::from_secs(2),
            session.check_slot(&SilentSource, at(), &connected()),
        )
        .await
        .expect("session call should be bounded");
        assert_eq!(out, CalendarCheck::Unavailable);
        assert_eq!(session.connection(), Connection::Disconnected);
    }

    #[tokio::test]
    async fn http_source_gives_up_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever replying.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let source = HttpCalendarSource::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let req = SlotConflictRequest {
            date_time_local: at(),
            timezone: "UTC".into(),
            practitioner_ids: vec![Ulid::new()],
        };
        let result = tokio::time::timeout(Duration::from_secs(5), source.check_slot(&req))
            .await
            .expect("http call should be bounded");
        assert!(result.is_err());
        server.abort();
    }

    #[test]
    fn merge_dedupes_anonymous_events_by_content() {
        let merged = merge_day_events(vec![
            event(None, "2025-03-03 11:00:00"),
            event(None, "2025-03-03 11:00:00"),
            event(None, "2025-03-03 08:00:00"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start, "2025-03-03 08:00:00");
    }
}
