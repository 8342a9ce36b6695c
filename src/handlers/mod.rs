// src/handlers/mod.rs
pub mod driver_handler;
pub mod notify_handler;
pub mod trip_handler;
pub mod ws_handler;

use axum::{
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/fare-estimate", post(trip_handler::estimate_fare))
        // Trips
        .route("/trips", post(trip_handler::create_trip))
        .route("/trips/by-address", post(trip_handler::create_trip_from_addresses))
        .route("/trips/available", get(trip_handler::available_trips))
        .route("/trips/near", get(trip_handler::trips_near))
        .route("/trips/passenger/:passenger_id", get(trip_handler::trips_for_passenger))
        .route("/trips/driver/:driver_id", get(trip_handler::trips_for_driver))
        .route(
            "/trips/:trip_id",
            get(trip_handler::get_trip).delete(trip_handler::delete_trip),
        )
        .route("/trips/:trip_id/assign-driver", post(trip_handler::assign_driver))
        .route("/trips/:trip_id/deny", post(trip_handler::deny_assignment))
        .route("/trips/:trip_id/reject", post(trip_handler::reject_offer))
        .route("/trips/:trip_id/redispatch", post(trip_handler::redispatch))
        .route("/trips/:trip_id/start", post(trip_handler::start_trip))
        .route("/trips/:trip_id/complete", post(trip_handler::complete_trip))
        .route("/trips/:trip_id/cancel", post(trip_handler::cancel_trip))
        .route(
            "/trips/:trip_id/rating",
            post(trip_handler::rate_trip).get(trip_handler::get_rating),
        )
        .route("/trips/:trip_id/payment-status", put(trip_handler::update_payment_status))
        .route("/statistics/passenger/:passenger_id", get(trip_handler::passenger_statistics))
        .route("/statistics/driver/:driver_id", get(trip_handler::driver_statistics))
        // Drivers
        .route("/drivers/location", post(driver_handler::update_location))
        .route("/drivers/:driver_id/location", delete(driver_handler::go_offline))
        .route("/drivers/nearby", get(driver_handler::nearby_drivers))
        .route("/drivers/online", get(driver_handler::online_drivers))
        // Realtime
        .route("/notify/drivers", post(notify_handler::notify_drivers))
        .route("/notify/trip/:trip_id/:role", post(notify_handler::notify_trip_participant))
        .route("/ws/drivers/:driver_id", get(ws_handler::driver_socket))
        .route("/ws/trips/:trip_id/:role", get(ws_handler::trip_socket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::channel_registry::ChannelRegistry;
    use crate::state::Backends;

    pub fn in_memory_state() -> SharedState {
        let registry = Arc::new(ChannelRegistry::new());
        let backends = Backends::in_process(registry.clone());
        Arc::new(AppState::assemble(AppConfig::default(), registry, backends))
    }
}
