use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::allocator::AppointmentAllocator;
use appointment_cell::services::catalog::SlotCatalog;
use appointment_cell::services::directory::InMemoryDirectory;
use appointment_cell::services::ledger::InMemoryBookingLedger;
use shared_config::SlotSettings;

struct Fixture {
    allocator: Arc<AppointmentAllocator>,
    ledger: Arc<InMemoryBookingLedger>,
    patient_id: Uuid,
    doctor_id: Uuid,
    other_doctor_id: Uuid,
    hospital_id: Uuid,
}

async fn setup() -> Fixture {
    let ledger = Arc::new(InMemoryBookingLedger::new());
    let directory = Arc::new(InMemoryDirectory::new());

    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let other_doctor_id = Uuid::new_v4();
    let hospital_id = Uuid::new_v4();

    directory
        .add_patient(PatientSummary {
            id: patient_id,
            name: "Asha Verma".to_string(),
            email: Some("asha@example.com".to_string()),
            contact_number: Some("+91-98000-00000".to_string()),
        })
        .await;
    for (id, name) in [(doctor_id, "Dr. Rao"), (other_doctor_id, "Dr. Mehta")] {
        directory
            .add_doctor(DoctorSummary {
                id,
                name: name.to_string(),
                specialization: "Cardiology".to_string(),
                experience: Some(10),
                rating: Some(4.5),
            })
            .await;
    }
    directory
        .add_hospital(HospitalSummary {
            id: hospital_id,
            name: "City General".to_string(),
            location: Some("Pune".to_string()),
        })
        .await;

    let allocator = AppointmentAllocator::new(standard_catalog(), ledger.clone(), directory);

    Fixture {
        allocator: Arc::new(allocator),
        ledger,
        patient_id,
        doctor_id,
        other_doctor_id,
        hospital_id,
    }
}

fn standard_catalog() -> SlotCatalog {
    SlotCatalog::from_settings(&SlotSettings::default()).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
}

fn booking(fx: &Fixture, doctor_id: Uuid, date: &str, time: &str) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Some(fx.patient_id.to_string()),
        doctor_id: Some(doctor_id.to_string()),
        hospital_id: Some(fx.hospital_id.to_string()),
        appointment_date: Some(date.to_string()),
        appointment_time: Some(time.to_string()),
        reason_for_visit: Some("Chest pain".to_string()),
        ..BookAppointmentRequest::default()
    }
}

#[tokio::test]
async fn fresh_doctor_has_every_slot_free() {
    let fx = setup().await;

    let availability = fx.allocator.get_available_slots(fx.doctor_id, day(20)).await.unwrap();

    assert_eq!(availability.total_slots, 17);
    assert_eq!(availability.available_count, 17);
    assert_eq!(availability.available_slots, standard_catalog().all_slots().to_vec());
    assert!(availability.booked_slots.is_empty());
}

#[tokio::test]
async fn second_booking_for_same_slot_conflicts() {
    let fx = setup().await;

    let first = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:00"))
        .await
        .unwrap();
    assert_eq!(first.appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(first.appointment.priority, Priority::Medium);
    assert_eq!(first.appointment.appointment_type, AppointmentType::Consultation);
    assert_eq!(first.doctor.as_ref().map(|d| d.name.as_str()), Some("Dr. Rao"));

    let second = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:00"))
        .await;
    assert_matches!(second, Err(AppointmentError::SlotAlreadyBooked));

    let stored = fx.allocator.get_appointment(first.appointment.id).await.unwrap();
    assert_eq!(stored.appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(fx.ledger.len().await, 1);
}

#[tokio::test]
async fn booking_then_availability_round_trip() {
    let fx = setup().await;
    let catalog = standard_catalog();

    fx.allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "9:30"))
        .await
        .unwrap();
    fx.allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "14:00"))
        .await
        .unwrap();

    let availability = fx.allocator.get_available_slots(fx.doctor_id, day(20)).await.unwrap();
    assert_eq!(availability.booked_slots, vec!["09:30", "14:00"]);
    assert_eq!(availability.available_count, 15);

    let available: HashSet<&String> = availability.available_slots.iter().collect();
    let booked: HashSet<&String> = availability.booked_slots.iter().collect();
    assert!(available.is_disjoint(&booked));
    assert_eq!(available.len() + booked.len(), catalog.len());

    // Other days and other doctors are untouched.
    let next_day = fx.allocator.get_available_slots(fx.doctor_id, day(21)).await.unwrap();
    assert_eq!(next_day.available_count, 17);
    let colleague = fx.allocator.get_available_slots(fx.other_doctor_id, day(20)).await.unwrap();
    assert_eq!(colleague.available_count, 17);
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let fx = setup().await;
    let booked = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "10:00"))
        .await
        .unwrap();

    let cancelled = fx.allocator.cancel_appointment(booked.appointment.id).await.unwrap();
    assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);

    let availability = fx.allocator.get_available_slots(fx.doctor_id, day(20)).await.unwrap();
    assert!(availability.available_slots.contains(&"10:00".to_string()));
    assert_eq!(availability.available_count, 17);

    let rebooked = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "10:00"))
        .await
        .unwrap();
    assert_ne!(rebooked.appointment.id, booked.appointment.id);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let fx = setup().await;
    let booked = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "11:00"))
        .await
        .unwrap();

    let once = fx.allocator.cancel_appointment(booked.appointment.id).await.unwrap();
    let twice = fx.allocator.cancel_appointment(booked.appointment.id).await.unwrap();

    assert_eq!(once.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(twice.appointment, once.appointment);
}

#[tokio::test]
async fn recancelling_with_notes_records_them() {
    let fx = setup().await;
    let booked = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "11:30"))
        .await
        .unwrap();
    let id = booked.appointment.id;
    fx.allocator.cancel_appointment(id).await.unwrap();

    let again = fx
        .allocator
        .update_status(id, AppointmentStatus::Cancelled, Some("Patient travelling".to_string()))
        .await
        .unwrap();

    assert_eq!(again.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(again.appointment.notes, "Patient travelling");
    let stored = fx.allocator.get_appointment(id).await.unwrap();
    assert_eq!(stored.appointment.notes, "Patient travelling");
}

#[tokio::test]
async fn doctor_range_keeps_cancelled_booking_next_to_its_rebooking() {
    let fx = setup().await;
    let first = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:00"))
        .await
        .unwrap();
    assert_matches!(
        fx.allocator
            .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:00"))
            .await,
        Err(AppointmentError::SlotAlreadyBooked)
    );
    fx.allocator.cancel_appointment(first.appointment.id).await.unwrap();
    let second = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:00"))
        .await
        .unwrap();
    fx.allocator
        .book_appointment(booking(&fx, fx.other_doctor_id, "2025-10-20", "09:00"))
        .await
        .unwrap();

    let found = fx
        .allocator
        .get_by_date_range(&AppointmentFilter::for_doctor(fx.doctor_id))
        .await
        .unwrap();

    let ids: Vec<Uuid> = found.iter().map(|d| d.appointment.id).collect();
    assert_eq!(ids, vec![first.appointment.id, second.appointment.id]);
    let statuses: Vec<AppointmentStatus> = found.iter().map(|d| d.appointment.status).collect();
    assert_eq!(statuses, vec![AppointmentStatus::Cancelled, AppointmentStatus::Scheduled]);
}

#[tokio::test]
async fn status_updates_follow_the_transition_table() {
    let fx = setup().await;
    let booked = fx
        .allocator
        .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "12:00"))
        .await
        .unwrap();
    let id = booked.appointment.id;

    let confirmed = fx
        .allocator
        .update_status(id, AppointmentStatus::Confirmed, Some("Bring reports".to_string()))
        .await
        .unwrap();
    assert_eq!(confirmed.appointment.notes, "Bring reports");

    assert_matches!(
        fx.allocator.update_status(id, AppointmentStatus::NoShow, None).await,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Confirmed,
            to: AppointmentStatus::NoShow
        })
    );

    let completed = fx.allocator.update_status(id, AppointmentStatus::Completed, None).await.unwrap();
    assert_eq!(completed.appointment.notes, "Bring reports");

    // A completed appointment still holds its slot and can no longer be cancelled.
    assert_matches!(
        fx.allocator.cancel_appointment(id).await,
        Err(AppointmentError::InvalidStatusTransition { .. })
    );
    let availability = fx.allocator.get_available_slots(fx.doctor_id, day(20)).await.unwrap();
    assert_eq!(availability.booked_slots, vec!["12:00"]);
}

#[tokio::test]
async fn date_range_returns_one_doctors_bookings_in_order() {
    let fx = setup().await;
    for (date, time) in [("2025-10-22", "09:00"), ("2025-10-20", "15:00"), ("2025-10-20", "09:30")] {
        fx.allocator
            .book_appointment(booking(&fx, fx.doctor_id, date, time))
            .await
            .unwrap();
    }
    fx.allocator
        .book_appointment(booking(&fx, fx.other_doctor_id, "2025-10-21", "09:00"))
        .await
        .unwrap();

    let filter = AppointmentFilter {
        doctor_id: Some(fx.doctor_id),
        from_date: Some(day(20)),
        to_date: Some(day(22)),
        ..AppointmentFilter::default()
    };
    let found = fx.allocator.get_by_date_range(&filter).await.unwrap();

    let keys: Vec<(NaiveDate, &str)> = found
        .iter()
        .map(|d| (d.appointment.appointment_date, d.appointment.appointment_time.as_str()))
        .collect();
    assert_eq!(keys, vec![(day(20), "09:30"), (day(20), "15:00"), (day(22), "09:00")]);
    assert!(found.iter().all(|d| d.hospital.is_some() && d.patient.is_some()));

    let only_start = AppointmentFilter { from_date: Some(day(21)), ..AppointmentFilter::default() };
    assert_eq!(fx.allocator.get_by_date_range(&only_start).await.unwrap().len(), 2);
}

#[tokio::test]
async fn patient_history_is_newest_first() {
    let fx = setup().await;
    for date in ["2025-10-20", "2025-10-24", "2025-10-22"] {
        fx.allocator
            .book_appointment(booking(&fx, fx.doctor_id, date, "16:30"))
            .await
            .unwrap();
    }

    let dates: Vec<NaiveDate> = fx
        .allocator
        .list_for_patient(fx.patient_id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.appointment.appointment_date)
        .collect();
    assert_eq!(dates, vec![day(24), day(22), day(20)]);

    assert_eq!(fx.allocator.list_for_doctor(fx.doctor_id).await.unwrap().len(), 3);
    assert!(fx.allocator.list_for_doctor(fx.other_doctor_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_doctor_is_rejected_without_writing() {
    let fx = setup().await;

    let result = fx
        .allocator
        .book_appointment(booking(&fx, Uuid::new_v4(), "2025-10-20", "09:00"))
        .await;

    assert_matches!(result, Err(AppointmentError::NotFound(EntityKind::Doctor)));
    assert_eq!(fx.ledger.len().await, 0);
}

#[tokio::test]
async fn booking_input_is_validated() {
    let fx = setup().await;

    let mut missing_reason = booking(&fx, fx.doctor_id, "2025-10-20", "09:00");
    missing_reason.reason_for_visit = Some("   ".to_string());
    assert_matches!(
        fx.allocator.book_appointment(missing_reason).await,
        Err(AppointmentError::ValidationError(msg)) if msg == "All required fields must be provided"
    );

    assert_matches!(
        fx.allocator
            .book_appointment(booking(&fx, fx.doctor_id, "2025-10-20", "09:15"))
            .await,
        Err(AppointmentError::ValidationError(_))
    );
    assert_matches!(
        fx.allocator
            .book_appointment(booking(&fx, fx.doctor_id, "next tuesday", "09:00"))
            .await,
        Err(AppointmentError::ValidationError(_))
    );

    let mut bad_id = booking(&fx, fx.doctor_id, "2025-10-20", "09:00");
    bad_id.hospital_id = Some("hospital-1".to_string());
    assert_matches!(
        fx.allocator.book_appointment(bad_id).await,
        Err(AppointmentError::ValidationError(_))
    );

    assert_eq!(fx.ledger.len().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_leave_one_active_appointment() {
    let fx = setup().await;

    let attempts = (0..16).map(|_| {
        let allocator = fx.allocator.clone();
        let request = booking(&fx, fx.doctor_id, "2025-10-20", "13:00");
        tokio::spawn(async move { allocator.book_appointment(request).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppointmentError::SlotAlreadyBooked)))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(refused, 15);

    let availability = fx.allocator.get_available_slots(fx.doctor_id, day(20)).await.unwrap();
    assert_eq!(availability.booked_slots, vec!["13:00"]);
    assert_eq!(fx.ledger.len().await, 1);
}
