// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::AppointmentState;

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/date-range/search", get(handlers::search_by_date_range))
        .route("/patient/{patient_id}", get(handlers::get_patient_appointments))
        .route("/doctor/{doctor_id}", get(handlers::get_doctor_appointments))
        .route("/{id}", get(handlers::get_appointment))
        .route("/{id}/status", put(handlers::update_appointment_status))
        .route("/{id}/cancel", put(handlers::cancel_appointment))
        // `{id}` is the doctor here
        .route("/{id}/slots/{date}", get(handlers::get_available_slots))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
