// libs/appointment-cell/src/services/allocator.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    non_blank, parse_appointment_date, parse_id, Appointment, AppointmentDetails, AppointmentError,
    AppointmentFilter, AppointmentStatus, BookAppointmentRequest, DoctorSummary, EntityKind,
    HospitalSummary, NewAppointment, PatientSummary, SlotAvailability,
};
use crate::services::catalog::SlotCatalog;
use crate::services::directory::Directory;
use crate::services::ledger::{BookingLedger, LedgerError};
use crate::services::lifecycle::{AppointmentLifecycleService, Transition};

/// Computes availability and enacts bookings so that no two active
/// appointments share a (doctor, date, time) key.
pub struct AppointmentAllocator {
    catalog: SlotCatalog,
    ledger: Arc<dyn BookingLedger>,
    directory: Arc<dyn Directory>,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentAllocator {
    pub fn new(catalog: SlotCatalog, ledger: Arc<dyn BookingLedger>, directory: Arc<dyn Directory>) -> Self {
        Self {
            catalog,
            ledger,
            directory,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotAvailability, AppointmentError> {
        debug!("Computing availability for doctor {} on {}", doctor_id, date);

        let occupied: HashSet<String> = self
            .ledger
            .find_active_by_doctor_and_date(doctor_id, date)
            .await?
            .into_iter()
            .collect();

        let (booked_slots, available_slots): (Vec<String>, Vec<String>) = self
            .catalog
            .all_slots()
            .iter()
            .cloned()
            .partition(|slot| occupied.contains(slot));

        // Labels stored before the catalog changed still count as booked.
        let mut stray: Vec<String> = occupied
            .into_iter()
            .filter(|label| !self.catalog.contains(label))
            .collect();
        stray.sort();

        let mut booked_slots = booked_slots;
        booked_slots.extend(stray);

        Ok(SlotAvailability {
            available_count: available_slots.len(),
            total_slots: self.catalog.len(),
            available_slots,
            booked_slots,
        })
    }

    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<AppointmentDetails, AppointmentError> {
        // **Step 1: Required fields**
        let (patient_raw, doctor_raw, hospital_raw, date_raw, time_raw, reason) = match (
            non_blank(&request.patient_id),
            non_blank(&request.doctor_id),
            non_blank(&request.hospital_id),
            non_blank(&request.appointment_date),
            non_blank(&request.appointment_time),
            non_blank(&request.reason_for_visit),
        ) {
            (Some(p), Some(d), Some(h), Some(date), Some(time), Some(reason)) => (p, d, h, date, time, reason),
            _ => {
                return Err(AppointmentError::ValidationError(
                    "All required fields must be provided".to_string(),
                ))
            }
        };

        let patient_id = parse_id(patient_raw, "patientId")?;
        let doctor_id = parse_id(doctor_raw, "doctorId")?;
        let hospital_id = parse_id(hospital_raw, "hospitalId")?;
        let appointment_date = parse_appointment_date(date_raw)?;
        let appointment_time = self.catalog.canonical_label(time_raw).ok_or_else(|| {
            AppointmentError::ValidationError(format!(
                "appointmentTime {} is not a bookable slot",
                time_raw
            ))
        })?;

        info!(
            "Booking appointment for patient {} with doctor {} on {} at {}",
            patient_id, doctor_id, appointment_date, appointment_time
        );

        // **Step 2: Referenced entities exist**
        let patient = self
            .directory
            .find_patient(patient_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Patient))?;
        let doctor = self
            .directory
            .find_doctor(doctor_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Doctor))?;
        let hospital = self
            .directory
            .find_hospital(hospital_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Hospital))?;

        // **Step 3: Conflict check**
        if let Some(existing) = self
            .ledger
            .find_conflict(doctor_id, appointment_date, &appointment_time)
            .await?
        {
            warn!(
                "Slot {} {} for doctor {} already held by appointment {}",
                appointment_date, appointment_time, doctor_id, existing.id
            );
            return Err(AppointmentError::SlotAlreadyBooked);
        }

        // **Step 4: Insert; the ledger refuses a racing duplicate**
        let new_appointment = NewAppointment {
            patient_id,
            doctor_id,
            hospital_id,
            appointment_date,
            appointment_time,
            reason_for_visit: reason.to_string(),
            symptoms: request.symptoms.unwrap_or_default(),
            priority: request.priority.unwrap_or_default(),
            appointment_type: request.appointment_type.unwrap_or_default(),
            notes: request.notes.unwrap_or_default(),
        };

        let appointment = self.ledger.insert(new_appointment).await.map_err(|e| {
            if matches!(e, LedgerError::SlotTaken) {
                warn!("Lost booking race for doctor {} on {}", doctor_id, appointment_date);
            }
            AppointmentError::from(e)
        })?;

        info!("Appointment {} booked successfully", appointment.id);

        Ok(AppointmentDetails {
            appointment,
            patient: Some(patient),
            doctor: Some(doctor),
            hospital: Some(hospital),
        })
    }

    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<AppointmentDetails, AppointmentError> {
        self.transition(appointment_id, AppointmentStatus::Cancelled, None).await
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<AppointmentDetails, AppointmentError> {
        self.transition(appointment_id, status, notes).await
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<AppointmentDetails, AppointmentError> {
        let current = self.fetch(appointment_id).await?;

        let updated = match self.lifecycle.validate_status_transition(current.status, status)? {
            Transition::AlreadyApplied => match notes {
                None => {
                    debug!("Appointment {} already {}", appointment_id, status);
                    current
                }
                // Nothing to transition, but fresh notes are still recorded.
                Some(notes) => {
                    self.ledger
                        .update_status(appointment_id, current.status, status, Some(notes))
                        .await?
                }
            },
            Transition::Apply => {
                match self
                    .ledger
                    .update_status(appointment_id, current.status, status, notes)
                    .await
                {
                    Ok(updated) => {
                        info!("Appointment {} moved from {} to {}", appointment_id, current.status, status);
                        updated
                    }
                    // A concurrent cancel reached the same end state.
                    Err(LedgerError::StatusChanged { current: now })
                        if now == AppointmentStatus::Cancelled && status == AppointmentStatus::Cancelled =>
                    {
                        self.fetch(appointment_id).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.enrich(updated).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<AppointmentDetails, AppointmentError> {
        let appointment = self.fetch(appointment_id).await?;
        self.enrich(appointment).await
    }

    /// A patient's appointments, most recent date first.
    pub async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let mut found = self.ledger.search(&AppointmentFilter::for_patient(patient_id)).await?;
        found.reverse();
        self.enrich_all(found).await
    }

    /// A doctor's appointments, most recent date first.
    pub async fn list_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let mut found = self.ledger.search(&AppointmentFilter::for_doctor(doctor_id)).await?;
        found.reverse();
        self.enrich_all(found).await
    }

    pub async fn get_by_date_range(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let found = self.ledger.search(filter).await?;
        debug!("Date range search matched {} appointments", found.len());
        self.enrich_all(found).await
    }

    async fn fetch(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.ledger
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Appointment))
    }

    async fn enrich(&self, appointment: Appointment) -> Result<AppointmentDetails, AppointmentError> {
        let (patient, doctor, hospital) = futures::try_join!(
            self.directory.find_patient(appointment.patient_id),
            self.directory.find_doctor(appointment.doctor_id),
            self.directory.find_hospital(appointment.hospital_id),
        )?;

        Ok(AppointmentDetails { appointment, patient, doctor, hospital })
    }

    /// Resolves each distinct reference once for the whole list.
    async fn enrich_all(&self, appointments: Vec<Appointment>) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let patient_ids = distinct(&appointments, |apt| apt.patient_id);
        let doctor_ids = distinct(&appointments, |apt| apt.doctor_id);
        let hospital_ids = distinct(&appointments, |apt| apt.hospital_id);

        let (patients, doctors, hospitals) = futures::try_join!(
            try_join_all(patient_ids.iter().map(|id| self.directory.find_patient(*id))),
            try_join_all(doctor_ids.iter().map(|id| self.directory.find_doctor(*id))),
            try_join_all(hospital_ids.iter().map(|id| self.directory.find_hospital(*id))),
        )?;

        let patients: HashMap<Uuid, PatientSummary> =
            patients.into_iter().flatten().map(|p| (p.id, p)).collect();
        let doctors: HashMap<Uuid, DoctorSummary> =
            doctors.into_iter().flatten().map(|d| (d.id, d)).collect();
        let hospitals: HashMap<Uuid, HospitalSummary> =
            hospitals.into_iter().flatten().map(|h| (h.id, h)).collect();

        Ok(appointments
            .into_iter()
            .map(|appointment| AppointmentDetails {
                patient: patients.get(&appointment.patient_id).cloned(),
                doctor: doctors.get(&appointment.doctor_id).cloned(),
                hospital: hospitals.get(&appointment.hospital_id).cloned(),
                appointment,
            })
            .collect())
    }
}

fn distinct(appointments: &[Appointment], pick: impl Fn(&Appointment) -> Uuid) -> Vec<Uuid> {
    let unique: HashSet<Uuid> = appointments.iter().map(pick).collect();
    unique.into_iter().collect()
}
