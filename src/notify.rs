use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::model::WaitlistEvent;

const CHANNEL_CAPACITY: usize = 256;

/// What a patient is told when a slot frees up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferNotice {
    pub entry_id: Ulid,
    pub patient_id: Ulid,
    pub slot: NaiveDateTime,
    pub accept_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offer notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound offer delivery (mail in production).
#[async_trait]
pub trait OfferNotifier: Send + Sync {
    async fn send_offer(&self, notice: &OfferNotice) -> Result<(), NotifyError>;
}

/// Writes offers to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl OfferNotifier for LogNotifier {
    async fn send_offer(&self, notice: &OfferNotice) -> Result<(), NotifyError> {
        info!(
            "offer for patient {} on {}: {} (expires {})",
            notice.patient_id, notice.slot, notice.accept_url, notice.expires_at
        );
        Ok(())
    }
}

/// Broadcast hub of waitlist lifecycle events, one channel per freed appointment.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<WaitlistEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a cancelled appointment. Creates the channel if needed.
    pub fn subscribe(&self, appointment_id: Ulid) -> broadcast::Receiver<WaitlistEvent> {
        let sender = self
            .channels
            .entry(appointment_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, appointment_id: Ulid, event: &WaitlistEvent) {
        if let Some(sender) = self.channels.get(&appointment_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Drop a channel once its batch has settled.
    pub fn remove(&self, appointment_id: &Ulid) {
        self.channels.remove(appointment_id);
    }
}
