use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::StoreError;

/// Appointment persistence owned by the surrounding application. The
/// waitlist only reads the cancelled original and writes the rebooking.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<BookedAppointment>, StoreError>;
    async fn insert(&self, appointment: BookedAppointment) -> Result<(), StoreError>;
}

pub struct InMemoryAppointments {
    appointments: DashMap<Ulid, BookedAppointment>,
}

impl Default for InMemoryAppointments {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAppointments {
    pub fn new() -> Self {
        Self {
            appointments: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Insert or replace, e.g. when the application reports a cancellation.
    pub fn upsert(&self, appointment: BookedAppointment) {
        self.appointments.insert(appointment.id, appointment);
    }

    pub fn snapshot(&self, id: &Ulid) -> Option<BookedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    /// All rebookings that descend from `parent_id`.
    pub fn children_of(&self, parent_id: Ulid) -> Vec<BookedAppointment> {
        self.appointments
            .iter()
            .filter(|e| e.parent_appointment_id == Some(parent_id))
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointments {
    async fn get(&self, id: Ulid) -> Result<Option<BookedAppointment>, StoreError> {
        Ok(self.snapshot(&id))
    }

    async fn insert(&self, appointment: BookedAppointment) -> Result<(), StoreError> {
        match self.appointments.entry(appointment.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(appointment.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(appointment);
                Ok(())
            }
        }
    }
}
