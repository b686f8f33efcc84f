use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use appointment_cell::state::AppointmentState;

pub fn create_router(appointments: AppointmentState) -> Router {
    Router::new()
        .route("/", get(|| async { "Appointment slot allocator is running!" }))
        .nest("/appointments", appointment_routes(appointments))
}
