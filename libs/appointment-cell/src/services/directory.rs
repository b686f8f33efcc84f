// libs/appointment-cell/src/services/directory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{AppointmentError, DoctorSummary, HospitalSummary, PatientSummary};

/// Existence lookups against the patient, doctor and hospital registries.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, AppointmentError>;
    async fn find_doctor(&self, id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError>;
    async fn find_hospital(&self, id: Uuid) -> Result<Option<HospitalSummary>, AppointmentError>;
}

pub struct SupabaseDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn find_one<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        id: Uuid,
    ) -> Result<Option<T>, AppointmentError> {
        debug!("Looking up {} {}", table, id);

        let path = format!("/rest/v1/{}?id=eq.{}&select={}&limit=1", table, id, columns);
        let rows: Vec<T> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Directory for SupabaseDirectory {
    async fn find_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, AppointmentError> {
        self.find_one("patients", "id,name,email,contact_number", id).await
    }

    async fn find_doctor(&self, id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError> {
        self.find_one("doctors", "id,name,specialization,experience,rating", id).await
    }

    async fn find_hospital(&self, id: Uuid) -> Result<Option<HospitalSummary>, AppointmentError> {
        self.find_one("hospitals", "id,name,location", id).await
    }
}

/// Registry stand-in for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    patients: RwLock<HashMap<Uuid, PatientSummary>>,
    doctors: RwLock<HashMap<Uuid, DoctorSummary>>,
    hospitals: RwLock<HashMap<Uuid, HospitalSummary>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_patient(&self, patient: PatientSummary) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub async fn add_doctor(&self, doctor: DoctorSummary) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }

    pub async fn add_hospital(&self, hospital: HospitalSummary) {
        self.hospitals.write().await.insert(hospital.id, hospital);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_patient(&self, id: Uuid) -> Result<Option<PatientSummary>, AppointmentError> {
        Ok(self.patients.read().await.get(&id).cloned())
    }

    async fn find_doctor(&self, id: Uuid) -> Result<Option<DoctorSummary>, AppointmentError> {
        Ok(self.doctors.read().await.get(&id).cloned())
    }

    async fn find_hospital(&self, id: Uuid) -> Result<Option<HospitalSummary>, AppointmentError> {
        Ok(self.hospitals.read().await.get(&id).cloned())
    }
}
