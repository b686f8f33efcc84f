// libs/appointment-cell/src/services/supabase_ledger.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::return_representation;
use shared_database::SupabaseClient;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentType, NewAppointment, Priority,
};
use crate::services::ledger::{BookingLedger, LedgerError};

const TABLE: &str = "/rest/v1/appointments";

/// `appointments` row as PostgREST returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub hospital_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: AppointmentStatus,
    pub reason_for_visit: String,
    #[serde(default)]
    pub symptoms: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub appointment_type: Option<AppointmentType>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        Self {
            id: row.id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            hospital_id: row.hospital_id,
            appointment_date: row.appointment_date,
            appointment_time: row.appointment_time,
            status: row.status,
            reason_for_visit: row.reason_for_visit,
            symptoms: row.symptoms.unwrap_or_default(),
            priority: row.priority.unwrap_or_default(),
            appointment_type: row.appointment_type.unwrap_or_default(),
            notes: row.notes.unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimeRow {
    appointment_time: String,
}

/// Ledger backed by the `appointments` table.
///
/// The partial unique index `appointments_active_slot_key` on
/// `(doctor_id, appointment_date, appointment_time) WHERE status <> 'cancelled'`
/// turns a duplicate insert into a 409, reported here as `SlotTaken`.
pub struct SupabaseBookingLedger {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseBookingLedger {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Appointment>, LedgerError> {
        let rows: Vec<AppointmentRow> = self.supabase.request(Method::GET, path, None, None).await?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }
}

fn key_query(doctor_id: Uuid, date: NaiveDate) -> String {
    format!(
        "doctor_id=eq.{}&appointment_date=eq.{}&status=neq.{}",
        doctor_id,
        date.format("%Y-%m-%d"),
        AppointmentStatus::Cancelled
    )
}

fn search_query(filter: &AppointmentFilter) -> String {
    let mut query_parts = Vec::new();

    if let Some(doctor_id) = filter.doctor_id {
        query_parts.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(patient_id) = filter.patient_id {
        query_parts.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(from) = filter.from_date {
        query_parts.push(format!("appointment_date=gte.{}", from.format("%Y-%m-%d")));
    }
    if let Some(to) = filter.to_date {
        query_parts.push(format!("appointment_date=lte.{}", to.format("%Y-%m-%d")));
    }
    query_parts.push("order=appointment_date.asc,appointment_time.asc,created_at.asc".to_string());

    query_parts.join("&")
}

#[async_trait]
impl BookingLedger for SupabaseBookingLedger {
    async fn find_active_by_doctor_and_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<String>, LedgerError> {
        debug!("Fetching occupied slots for doctor {} on {}", doctor_id, date);

        let path = format!("{}?select=appointment_time&{}", TABLE, key_query(doctor_id, date));
        let rows: Vec<TimeRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(rows.into_iter().map(|row| row.appointment_time).collect())
    }

    async fn find_conflict(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: &str,
    ) -> Result<Option<Appointment>, LedgerError> {
        let path = format!(
            "{}?{}&appointment_time=eq.{}&limit=1",
            TABLE,
            key_query(doctor_id, date),
            urlencoding::encode(time)
        );
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, LedgerError> {
        let now = Utc::now().to_rfc3339();
        let appointment_data = json!({
            "id": Uuid::new_v4(),
            "patient_id": appointment.patient_id,
            "doctor_id": appointment.doctor_id,
            "hospital_id": appointment.hospital_id,
            "appointment_date": appointment.appointment_date.format("%Y-%m-%d").to_string(),
            "appointment_time": appointment.appointment_time,
            "status": AppointmentStatus::Scheduled,
            "reason_for_visit": appointment.reason_for_visit,
            "symptoms": appointment.symptoms,
            "priority": appointment.priority,
            "appointment_type": appointment.appointment_type,
            "notes": appointment.notes,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<AppointmentRow> = self
            .supabase
            .request_with_headers(
                Method::POST,
                TABLE,
                None,
                Some(appointment_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| {
                let e = LedgerError::from(e);
                if matches!(e, LedgerError::SlotTaken) {
                    warn!("Storage rejected duplicate active booking for doctor {}", appointment.doctor_id);
                }
                e
            })?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Storage("Insert returned no rows".to_string()))?;

        info!("Appointment {} stored", row.id);
        Ok(row.into())
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, LedgerError> {
        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(status));
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        if let Some(notes) = notes {
            update_data.insert("notes".to_string(), json!(notes));
        }

        let path = format!("{}?id=eq.{}&status=eq.{}", TABLE, appointment_id, expected);
        let result: Vec<AppointmentRow> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(serde_json::Value::Object(update_data)),
                Some(return_representation()),
            )
            .await?;

        if let Some(row) = result.into_iter().next() {
            return Ok(row.into());
        }

        // Nothing matched: either the id is unknown or the status moved on.
        match self.get(appointment_id).await? {
            None => Err(LedgerError::NotFound),
            Some(current) => Err(LedgerError::StatusChanged { current: current.status }),
        }
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, LedgerError> {
        let path = format!("{}?id=eq.{}", TABLE, appointment_id);
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, LedgerError> {
        debug!("Searching appointments with filter: {:?}", filter);
        let path = format!("{}?{}", TABLE, search_query(filter));
        self.fetch(&path).await
    }
}
