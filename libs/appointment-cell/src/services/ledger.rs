// libs/appointment-cell/src/services/ledger.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseError;

use crate::models::{Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, EntityKind, NewAppointment};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("An active appointment already holds this slot")]
    SlotTaken,

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment status is now {current}")]
    StatusChanged { current: AppointmentStatus },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<SupabaseError> for LedgerError {
    fn from(error: SupabaseError) -> Self {
        match error {
            SupabaseError::Conflict(_) => LedgerError::SlotTaken,
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

impl From<LedgerError> for AppointmentError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::SlotTaken => AppointmentError::SlotAlreadyBooked,
            LedgerError::NotFound => AppointmentError::NotFound(EntityKind::Appointment),
            LedgerError::StatusChanged { .. } => AppointmentError::ConcurrentModification,
            LedgerError::Storage(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}

/// Persistent store of appointments.
///
/// `insert` must refuse a second active appointment for the same
/// (doctor, date, time) atomically; callers rely on it rather than on their
/// own read-then-write check. Implementations never cache.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Time labels held by active appointments of `doctor_id` on `date`.
    async fn find_active_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<String>, LedgerError>;

    async fn find_conflict(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: &str,
    ) -> Result<Option<Appointment>, LedgerError>;

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, LedgerError>;

    /// Moves `appointment_id` from `expected` to `status`. Fails with
    /// `StatusChanged` if the stored status is no longer `expected`.
    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, LedgerError>;

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, LedgerError>;

    /// Matching appointments ordered by date, then time, ascending.
    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, LedgerError>;
}

/// Ledger held in process memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryBookingLedger {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryBookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }
}

#[async_trait]
impl BookingLedger for InMemoryBookingLedger {
    async fn find_active_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<String>, LedgerError> {
        let store = self.appointments.read().await;
        Ok(store
            .values()
            .filter(|apt| apt.is_active() && apt.doctor_id == doctor_id && apt.appointment_date == date)
            .map(|apt| apt.appointment_time.clone())
            .collect())
    }

    async fn find_conflict(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: &str,
    ) -> Result<Option<Appointment>, LedgerError> {
        let store = self.appointments.read().await;
        Ok(store.values().find(|apt| apt.occupies(doctor_id, date, time)).cloned())
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, LedgerError> {
        let mut store = self.appointments.write().await;

        let taken = store.values().any(|apt| {
            apt.occupies(appointment.doctor_id, appointment.appointment_date, &appointment.appointment_time)
        });
        if taken {
            return Err(LedgerError::SlotTaken);
        }

        let now = Utc::now();
        let record = Appointment {
            id: Uuid::new_v4(),
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            hospital_id: appointment.hospital_id,
            appointment_date: appointment.appointment_date,
            appointment_time: appointment.appointment_time,
            status: AppointmentStatus::Scheduled,
            reason_for_visit: appointment.reason_for_visit,
            symptoms: appointment.symptoms,
            priority: appointment.priority,
            appointment_type: appointment.appointment_type,
            notes: appointment.notes,
            created_at: now,
            updated_at: now,
        };

        debug!("Stored appointment {} in memory", record.id);
        store.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, LedgerError> {
        let mut store = self.appointments.write().await;
        let record = store.get_mut(&appointment_id).ok_or(LedgerError::NotFound)?;

        if record.status != expected {
            return Err(LedgerError::StatusChanged { current: record.status });
        }

        record.status = status;
        if let Some(notes) = notes {
            record.notes = notes;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, LedgerError> {
        Ok(self.appointments.read().await.get(&appointment_id).cloned())
    }

    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, LedgerError> {
        let store = self.appointments.read().await;
        let mut found: Vec<Appointment> = store.values().filter(|apt| filter.matches(apt)).cloned().collect();
        found.sort_by(|a, b| {
            (a.appointment_date, &a.appointment_time, a.created_at)
                .cmp(&(b.appointment_date, &b.appointment_time, b.created_at))
        });
        Ok(found)
    }
}
