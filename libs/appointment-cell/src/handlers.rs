// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_role;

use crate::models::{
    parse_appointment_date, parse_id, BookAppointmentRequest, DateRangeQuery, UpdateStatusRequest,
};
use crate::state::AppointmentState;

/// Roles allowed to move an appointment through its lifecycle.
const STATUS_ROLES: &[&str] = &["doctor", "hospital"];

fn body_error(rejection: JsonRejection) -> AppError {
    AppError::ValidationError(rejection.body_text())
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    payload: Result<Json<BookAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(request) = payload.map_err(body_error)?;
    debug!("User {} booking an appointment", user.id);

    let appointment = state.allocator.book_appointment(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Appointment created successfully",
            "data": appointment
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<AppointmentState>,
    Path((doctor_id, date)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let doctor_id = parse_id(&doctor_id, "doctorId")?;
    let date = parse_appointment_date(&date)?;

    let availability = state.allocator.get_available_slots(doctor_id, date).await?;

    Ok(Json(json!({
        "success": true,
        "data": availability
    })))
}

// ==============================================================================
// LOOKUPS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = parse_id(&appointment_id, "appointment id")?;
    let appointment = state.allocator.get_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<AppointmentState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let patient_id = parse_id(&patient_id, "patientId")?;
    let appointments = state.allocator.list_for_patient(patient_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<AppointmentState>,
    Path(doctor_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let doctor_id = parse_id(&doctor_id, "doctorId")?;
    let appointments = state.allocator.list_for_doctor(doctor_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": appointments
    })))
}

#[axum::debug_handler]
pub async fn search_by_date_range(
    State(state): State<AppointmentState>,
    query: Result<Query<DateRangeQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let filter = query.to_filter()?;

    let appointments = state.allocator.get_by_date_range(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": appointments
    })))
}

// ==============================================================================
// LIFECYCLE
// ==============================================================================

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<String>,
    Extension(user): Extension<User>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STATUS_ROLES)?;

    let appointment_id = parse_id(&appointment_id, "appointment id")?;
    let Json(request) = payload.map_err(body_error)?;

    let appointment = state
        .allocator
        .update_status(appointment_id, request.status, request.notes)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Appointment status updated to {}", request.status),
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = parse_id(&appointment_id, "appointment id")?;
    debug!("User {} cancelling appointment {}", user.id, appointment_id);

    let appointment = state.allocator.cancel_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled successfully",
        "data": appointment
    })))
}
