// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One Booking Ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub hospital_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: AppointmentStatus,
    pub reason_for_visit: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether this appointment holds the given (doctor, date, time) key.
    pub fn occupies(&self, doctor_id: Uuid, date: NaiveDate, time: &str) -> bool {
        self.is_active()
            && self.doctor_id == doctor_id
            && self.appointment_date == date
            && self.appointment_time == time
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
    #[serde(alias = "no_show")]
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    /// Active appointments hold their slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Emergency,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentType {
    #[default]
    Consultation,
    #[serde(alias = "follow_up", alias = "followup")]
    FollowUp,
    Emergency,
    #[serde(alias = "routine_checkup")]
    RoutineCheckup,
}

/// Fields of an appointment the ledger does not assign itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub hospital_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub reason_for_visit: String,
    pub symptoms: Vec<String>,
    pub priority: Priority,
    pub appointment_type: AppointmentType,
    pub notes: String,
}

/// Filter for ledger searches. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn for_doctor(doctor_id: Uuid) -> Self {
        Self { doctor_id: Some(doctor_id), ..Self::default() }
    }

    pub fn for_patient(patient_id: Uuid) -> Self {
        Self { patient_id: Some(patient_id), ..Self::default() }
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.from_date.map_or(true, |from| appointment.appointment_date >= from)
            && self.to_date.map_or(true, |to| appointment.appointment_date <= to)
    }
}

// ==============================================================================
// REFERENCED ENTITY SUMMARIES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    #[serde(alias = "contact_number")]
    pub contact_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorSummary {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    pub experience: Option<i32>,
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalSummary {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
}

/// An appointment together with whatever its references resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<PatientSummary>,
    pub doctor: Option<DoctorSummary>,
    pub hospital: Option<HospitalSummary>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// Booking payload. Everything is optional so missing fields surface as a
/// validation error instead of a body rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub hospital_id: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub reason_for_visit: Option<String>,
    pub symptoms: Option<Vec<String>>,
    pub priority: Option<Priority>,
    pub appointment_type: Option<AppointmentType>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
}

impl DateRangeQuery {
    pub fn to_filter(&self) -> Result<AppointmentFilter, AppointmentError> {
        let filter = AppointmentFilter {
            doctor_id: non_blank(&self.doctor_id).map(|raw| parse_id(raw, "doctorId")).transpose()?,
            patient_id: non_blank(&self.patient_id).map(|raw| parse_id(raw, "patientId")).transpose()?,
            from_date: non_blank(&self.start_date).map(parse_appointment_date).transpose()?,
            to_date: non_blank(&self.end_date).map(parse_appointment_date).transpose()?,
        };

        if let (Some(from), Some(to)) = (filter.from_date, filter.to_date) {
            if from > to {
                return Err(AppointmentError::ValidationError(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        Ok(filter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAvailability {
    pub available_slots: Vec<String>,
    pub booked_slots: Vec<String>,
    pub total_slots: usize,
    pub available_count: usize,
}

// ==============================================================================
// INPUT PARSING
// ==============================================================================

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_id(raw: &str, field: &str) -> Result<Uuid, AppointmentError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppointmentError::ValidationError(format!("Invalid {} format", field)))
}

/// Accepts `YYYY-MM-DD` or a timestamp; a timestamp is truncated to the
/// calendar day in its own offset.
pub fn parse_appointment_date(raw: &str) -> Result<NaiveDate, AppointmentError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.date_naive());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.date());
    }
    Err(AppointmentError::ValidationError(format!("Invalid date: {}", raw)))
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Doctor,
    Hospital,
    Appointment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Patient => write!(f, "Patient"),
            EntityKind::Doctor => write!(f, "Doctor"),
            EntityKind::Hospital => write!(f, "Hospital"),
            EntityKind::Appointment => write!(f, "Appointment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("This time slot is already booked")]
    SlotAlreadyBooked,

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment was modified by another request, please retry")]
    ConcurrentModification,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        let message = error.to_string();
        match error {
            AppointmentError::ValidationError(_) => AppError::ValidationError(message),
            AppointmentError::NotFound(_) => AppError::NotFound(message),
            AppointmentError::SlotAlreadyBooked
            | AppointmentError::ConcurrentModification => AppError::Conflict(message),
            AppointmentError::InvalidStatusTransition { .. } => AppError::BadRequest(message),
            AppointmentError::DatabaseError(_) => AppError::Database(message),
        }
    }
}
