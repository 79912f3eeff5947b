use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::ACCEPTANCE_TOKEN_LEN;
use crate::model::*;
use crate::notify::OfferNotice;

use super::{OfferBatch, OfferError, Waitlist};

/// Result of broadcasting one freed slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferBatchSummary {
    pub batch_id: Option<Ulid>,
    pub slot: NaiveDateTime,
    /// Entries offered, in priority order.
    pub offered: Vec<Ulid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notification_failures: usize,
}

fn mint_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCEPTANCE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn shift(t: NaiveDateTime, delta: TimeDelta) -> NaiveDateTime {
    t.checked_add_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
        NaiveDateTime::MIN
    } else {
        NaiveDateTime::MAX
    })
}

/// Clone `original` onto `new_start` for `patient_id`, shifting every
/// practitioner by the same delta. The appointment ends when the last
/// shifted practitioner does.
pub fn rebook(original: &BookedAppointment, patient_id: Ulid, new_start: NaiveDateTime) -> BookedAppointment {
    let delta = new_start - original.start;
    let practitioners: Vec<PractitionerAssignment> = original
        .practitioners
        .iter()
        .map(|p| PractitionerAssignment {
            practitioner_id: p.practitioner_id,
            start: shift(p.start, delta),
            end: shift(p.end, delta),
        })
        .collect();
    let end = practitioners
        .iter()
        .map(|p| p.end)
        .max()
        .unwrap_or_else(|| shift(original.end, delta));
    BookedAppointment {
        id: Ulid::new(),
        patient_id,
        service_id: original.service_id,
        location_id: original.location_id.clone(),
        mode: original.mode.clone(),
        start: new_start,
        end,
        practitioners,
        status: AppointmentStatus::Confirmed,
        parent_appointment_id: Some(original.id),
        root_appointment_id: Some(original.root_appointment_id.unwrap_or(original.id)),
    }
}

impl Waitlist {
    pub async fn match_and_offer(&self, event: &CancellationEvent) -> OfferBatchSummary {
        self.match_and_offer_at(event, Utc::now()).await
    }

    /// Offer the freed slot to every matching waiting entry at once. The
    /// first patient to redeem wins; the rest expire.
    pub async fn match_and_offer_at(&self, event: &CancellationEvent, now: DateTime<Utc>) -> OfferBatchSummary {
        let slot = event.local_date_time;
        let ranked = self.pending_matches(slot);
        if ranked.is_empty() {
            debug!("no waitlist matches for {slot} (appointment {})", event.appointment_id);
            return OfferBatchSummary {
                batch_id: None,
                slot,
                offered: Vec::new(),
                expires_at: None,
                notification_failures: 0,
            };
        }

        let batch_id = Ulid::new();
        let expires_at = now
            .checked_add_signed(self.settings.offer_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let batch = Arc::new(Mutex::new(OfferBatch {
            id: batch_id,
            appointment_id: event.appointment_id,
            slot,
            offered_at: now,
            expires_at,
            entries: Vec::with_capacity(ranked.len()),
            winner: None,
        }));
        // Held until every entry is flipped, so a redemption can never see a
        // half-built batch.
        let mut guard = batch.lock().await;
        self.batches.insert(batch_id, batch.clone());

        let mut notices = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            let token = mint_token();
            {
                let Some(mut entry) = self.entries.get_mut(&candidate.id) else {
                    continue;
                };
                // Another batch or a withdrawal may have claimed it meanwhile.
                if entry.status != EntryStatus::Waiting {
                    continue;
                }
                entry.status = EntryStatus::Offered;
                entry.offered_at = Some(now);
                entry.expires_at = Some(expires_at);
                entry.acceptance_token = Some(token.clone());
                entry.appointment_id = Some(event.appointment_id);
                entry.batch_id = Some(batch_id);
                entry.offered_slot = Some(slot);
            }
            self.tokens.insert(token.clone(), candidate.id);
            guard.entries.push(candidate.id);
            notices.push(OfferNotice {
                entry_id: candidate.id,
                patient_id: candidate.patient_id,
                slot,
                accept_url: self.acceptance_link(&token),
                expires_at,
            });
        }
        let offered = guard.entries.clone();
        drop(guard);

        info!(
            "offered {slot} (appointment {}) to {} waitlist entries in batch {batch_id}",
            event.appointment_id,
            offered.len()
        );
        metrics::counter!(crate::observability::OFFERS_ISSUED_TOTAL).increment(offered.len() as u64);

        let mut notification_failures = 0;
        for notice in &notices {
            self.notify.send(
                event.appointment_id,
                &WaitlistEvent::Offered { entry_id: notice.entry_id, batch_id, expires_at },
            );
            if let Err(e) = self.notifier.send_offer(notice).await {
                // The offer stands; the patient can still redeem via other channels.
                warn!("{e} (entry {})", notice.entry_id);
                metrics::counter!(crate::observability::OFFER_NOTIFICATIONS_FAILED_TOTAL).increment(1);
                notification_failures += 1;
            }
        }

        OfferBatchSummary {
            batch_id: Some(batch_id),
            slot,
            offered,
            expires_at: Some(expires_at),
            notification_failures,
        }
    }

    pub async fn confirm_offer(&self, token: &str) -> Result<BookedAppointment, OfferError> {
        self.confirm_offer_at(token, Utc::now()).await
    }

    /// Redeem an acceptance token. Exactly one redemption per batch can
    /// succeed; it books the slot and expires every sibling offer.
    pub async fn confirm_offer_at(&self, token: &str, now: DateTime<Utc>) -> Result<BookedAppointment, OfferError> {
        let result = self.try_confirm(token, now).await;
        match &result {
            Ok(appointment) => {
                metrics::counter!(crate::observability::OFFERS_CONFIRMED_TOTAL).increment(1);
                info!("waitlist offer confirmed as appointment {}", appointment.id);
            }
            Err(e) => {
                metrics::counter!(crate::observability::OFFER_REJECTIONS_TOTAL, "reason" => e.label())
                    .increment(1);
                debug!("offer redemption rejected: {e:?}");
            }
        }
        result
    }

    async fn try_confirm(&self, token: &str, now: DateTime<Utc>) -> Result<BookedAppointment, OfferError> {
        let entry_id = self
            .tokens
            .get(token)
            .map(|e| *e.value())
            .ok_or(OfferError::InvalidToken)?;
        let entry = self.entry(&entry_id).ok_or(OfferError::InvalidToken)?;
        // Settled batches are dropped; the entry alone says why.
        let Some(batch) = entry.batch_id.and_then(|id| self.batch(&id)) else {
            return Err(settled_reason(&entry, now));
        };
        let mut guard = batch.lock().await;
        let batch_id = guard.id;

        let entry = self.entry(&entry_id).ok_or(OfferError::InvalidToken)?;
        if guard.winner.is_some() || entry.status != EntryStatus::Offered {
            return Err(settled_reason(&entry, now));
        }
        if entry.expires_at.is_some_and(|at| now > at) {
            self.expire_entry(entry_id, batch_id, guard.appointment_id);
            return Err(OfferError::Expired);
        }

        let original = self
            .appointments
            .get(guard.appointment_id)
            .await?
            .ok_or(OfferError::OriginalMissing(guard.appointment_id))?;
        let appointment = rebook(&original, entry.patient_id, guard.slot);
        self.appointments.insert(appointment.clone()).await?;

        if let Some(mut e) = self.entries.get_mut(&entry_id) {
            e.status = EntryStatus::Confirmed;
            e.appointment_id = Some(appointment.id);
        }
        self.release_live();
        guard.winner = Some(entry_id);
        for sibling in guard.entries.iter().filter(|id| **id != entry_id) {
            self.expire_entry(*sibling, batch_id, guard.appointment_id);
        }
        self.notify.send(
            guard.appointment_id,
            &WaitlistEvent::Confirmed { entry_id, batch_id, appointment_id: appointment.id },
        );
        self.settle(&guard);
        Ok(appointment)
    }

    /// Drop a batch that can no longer change, with its event channel.
    /// Caller holds the batch lock.
    fn settle(&self, batch: &OfferBatch) {
        self.batches.remove(&batch.id);
        self.notify.remove(&batch.appointment_id);
        debug!("batch {} settled", batch.id);
    }

    /// Flip an offered entry to expired. Caller holds the batch lock.
    fn expire_entry(&self, entry_id: Ulid, batch_id: Ulid, appointment_id: Ulid) -> bool {
        let flipped = match self.entries.get_mut(&entry_id) {
            Some(mut e) if e.status == EntryStatus::Offered => {
                e.status = EntryStatus::Expired;
                true
            }
            _ => false,
        };
        if flipped {
            self.release_live();
            metrics::counter!(crate::observability::OFFERS_EXPIRED_TOTAL).increment(1);
            self.notify
                .send(appointment_id, &WaitlistEvent::Expired { entry_id, batch_id });
        }
        flipped
    }

    /// Expire every offer whose deadline has passed and drop the settled
    /// batches. Tokens are kept for one more TTL after their entry settles.
    /// Returns how many entries flipped.
    pub async fn expire_stale_offers(&self, now: DateTime<Utc>) -> usize {
        let batches: Vec<_> = self.batches.iter().map(|e| e.value().clone()).collect();
        let mut expired = 0;
        for batch in batches {
            let guard = batch.lock().await;
            if guard.winner.is_some() || guard.expires_at > now {
                continue;
            }
            for entry_id in &guard.entries {
                if self.expire_entry(*entry_id, guard.id, guard.appointment_id) {
                    expired += 1;
                }
            }
            self.settle(&guard);
        }

        let grace = self.settings.offer_ttl;
        let before = self.tokens.len();
        self.tokens.retain(|_, entry_id| match self.entries.get(&*entry_id) {
            Some(e) if e.status == EntryStatus::Offered => true,
            Some(e) => e
                .expires_at
                .and_then(|at| at.checked_add_signed(grace))
                .is_none_or(|until| now < until),
            None => false,
        });
        let pruned = before.saturating_sub(self.tokens.len());
        if pruned > 0 {
            debug!("pruned {pruned} settled acceptance tokens");
        }
        expired
    }
}

/// Rejection for an entry whose offer is no longer open.
fn settled_reason(entry: &WaitlistEntry, now: DateTime<Utc>) -> OfferError {
    match entry.status {
        EntryStatus::Expired if entry.expires_at.is_some_and(|at| now >= at) => OfferError::Expired,
        _ => OfferError::NoLongerAvailable,
    }
}
