// src/handlers/driver_handler.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::errors::DispatchError as AppError;
use crate::handlers::SharedState;
use crate::models::driver::{DriverLocationUpdate, NearbyDriver, NearbyDriversQuery};

pub async fn update_location(
    State(state): State<SharedState>,
    Json(update): Json<DriverLocationUpdate>,
) -> Result<StatusCode, AppError> {
    state.driver_service.update_driver_location(update).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn go_offline(
    State(state): State<SharedState>,
    Path(driver_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.driver_service.set_driver_offline(&driver_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn nearby_drivers(
    State(state): State<SharedState>,
    Query(query): Query<NearbyDriversQuery>,
) -> Result<Json<Vec<NearbyDriver>>, AppError> {
    Ok(Json(state.driver_service.find_nearby_drivers(query).await?))
}

pub async fn online_drivers(State(state): State<SharedState>) -> Json<Vec<String>> {
    Json(state.driver_service.online_drivers().await)
}
