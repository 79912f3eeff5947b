mod error;
mod matching;
mod offers;
mod store;

pub use error::{OfferError, StoreError, WaitlistError};
pub use matching::{MatchTier, match_tier, rank_matches};
pub use offers::{OfferBatchSummary, rebook};
pub use store::{AppointmentStore, InMemoryAppointments};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, OfferNotifier};

/// One broadcast of offers for a single freed slot. Every state change to
/// the entries of a batch happens while holding its lock.
#[derive(Debug, Clone)]
pub struct OfferBatch {
    pub id: Ulid,
    /// The cancelled appointment that freed the slot.
    pub appointment_id: Ulid,
    pub slot: NaiveDateTime,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub entries: Vec<Ulid>,
    pub winner: Option<Ulid>,
}

pub type SharedBatch = Arc<Mutex<OfferBatch>>;

#[derive(Debug, Clone)]
pub struct WaitlistSettings {
    pub offer_ttl: Duration,
    /// Base for acceptance links; the token is appended as a path segment.
    pub accept_base_url: String,
    /// Cap on entries still waiting or holding an open offer.
    pub max_live_entries: usize,
}

impl Default for WaitlistSettings {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::hours(24),
            accept_base_url: "http://localhost:8080".into(),
            max_live_entries: MAX_WAITLIST_ENTRIES,
        }
    }
}

pub struct Waitlist {
    entries: DashMap<Ulid, WaitlistEntry>,
    /// Waiting or offered entries. Settled ones stay readable but do not
    /// count against the cap.
    live: AtomicUsize,
    /// Acceptance token → entry id. Tokens stay mapped for a while after
    /// use so a second redemption reports the real reason instead of
    /// "invalid".
    tokens: DashMap<String, Ulid>,
    batches: DashMap<Ulid, SharedBatch>,
    appointments: Arc<dyn AppointmentStore>,
    notifier: Arc<dyn OfferNotifier>,
    pub notify: Arc<NotifyHub>,
    settings: WaitlistSettings,
}

impl Waitlist {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn OfferNotifier>,
        notify: Arc<NotifyHub>,
        settings: WaitlistSettings,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            live: AtomicUsize::new(0),
            tokens: DashMap::new(),
            batches: DashMap::new(),
            appointments,
            notifier,
            notify,
            settings,
        }
    }

    pub fn join(
        &self,
        patient_id: Ulid,
        preferred_day: DayPreference,
        preferred_time: TimePreference,
        original_requested_date: Option<NaiveDateTime>,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.join_at(patient_id, preferred_day, preferred_time, original_requested_date, Utc::now())
    }

    pub fn join_at(
        &self,
        patient_id: Ulid,
        preferred_day: DayPreference,
        preferred_time: TimePreference,
        original_requested_date: Option<NaiveDateTime>,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, WaitlistError> {
        if self.live.fetch_add(1, Ordering::AcqRel) >= self.settings.max_live_entries {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(WaitlistError::LimitExceeded("waitlist full"));
        }
        let entry = WaitlistEntry {
            id: Ulid::new(),
            patient_id,
            preferred_day,
            preferred_time,
            original_requested_date,
            status: EntryStatus::Waiting,
            created_at: now,
            offered_at: None,
            expires_at: None,
            acceptance_token: None,
            appointment_id: None,
            batch_id: None,
            offered_slot: None,
        };
        self.entries.insert(entry.id, entry.clone());
        info!("patient {patient_id} joined waitlist as {}", entry.id);
        metrics::gauge!(crate::observability::WAITLIST_ENTRIES).set(self.live_entries() as f64);
        Ok(entry)
    }

    /// Withdraw an entry that has not been offered anything yet.
    pub fn leave(&self, id: Ulid) -> Result<WaitlistEntry, WaitlistError> {
        let removed = self
            .entries
            .remove_if(&id, |_, e| e.status == EntryStatus::Waiting);
        match removed {
            Some((_, entry)) => {
                self.release_live();
                Ok(entry)
            }
            None if self.entries.contains_key(&id) => Err(WaitlistError::NotWaiting(id)),
            None => Err(WaitlistError::NotFound(id)),
        }
    }

    pub fn live_entries(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Open offer batches, i.e. those without a winner that have not lapsed.
    pub fn open_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// An entry stopped waiting or lost its open offer.
    fn release_live(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        metrics::gauge!(crate::observability::WAITLIST_ENTRIES).set(self.live_entries() as f64);
    }

    pub fn entry(&self, id: &Ulid) -> Option<WaitlistEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn entries_with_status(&self, status: EntryStatus) -> Vec<WaitlistEntry> {
        let mut out: Vec<WaitlistEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|e| (e.created_at, e.id));
        out
    }

    pub fn batch(&self, id: &Ulid) -> Option<SharedBatch> {
        self.batches.get(id).map(|e| e.value().clone())
    }

    pub fn acceptance_link(&self, token: &str) -> String {
        format!(
            "{}/waitlist/accept/{token}",
            self.settings.accept_base_url.trim_end_matches('/')
        )
    }
}
