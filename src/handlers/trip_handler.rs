// src/handlers/trip_handler.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing;

use crate::errors::DispatchError as AppError;
use crate::handlers::SharedState;
use crate::models::trip::{
    AddressTripRequest, CancelTripRequest, CompleteTripRequest, DispatchSummary, DriverAction,
    FareEstimateRequest, FareEstimateResponse, NearbyTripsQuery, Page, PaymentStatusUpdate,
    RateTripRequest, RatingInfo, StartTripRequest, Trip, TripCompletion, TripCreation, TripRequest,
    TripStatistics,
};
use crate::services::offer_arbiter::AcceptDecision;

pub async fn estimate_fare(
    State(state): State<SharedState>,
    Json(request): Json<FareEstimateRequest>,
) -> Result<Json<FareEstimateResponse>, AppError> {
    Ok(Json(state.trip_service.estimate_fares(request).await?))
}

pub async fn create_trip(
    State(state): State<SharedState>,
    Json(request): Json<TripRequest>,
) -> Result<(StatusCode, Json<TripCreation>), AppError> {
    let created = state.trip_service.create_trip(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn create_trip_from_addresses(
    State(state): State<SharedState>,
    Json(request): Json<AddressTripRequest>,
) -> Result<(StatusCode, Json<TripCreation>), AppError> {
    let created = state.trip_service.create_trip_from_addresses(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    state
        .trip_service
        .get_trip(&trip_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::trip_not_found(trip_id))
}

pub async fn delete_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.trip_service.delete_trip(&trip_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn trips_for_passenger(
    State(state): State<SharedState>,
    Path(passenger_id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trip_service.trips_for_passenger(&passenger_id, page).await?))
}

pub async fn trips_for_driver(
    State(state): State<SharedState>,
    Path(driver_id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trip_service.trips_for_driver(&driver_id, page).await?))
}

pub async fn available_trips(
    State(state): State<SharedState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trip_service.available_trips(page).await?))
}

pub async fn trips_near(
    State(state): State<SharedState>,
    Query(query): Query<NearbyTripsQuery>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trip_service.trips_near(query).await?))
}

/// Losing an accept is a 409 with the same body whatever the reason.
pub async fn assign_driver(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(action): Json<DriverAction>,
) -> Result<Json<Trip>, AppError> {
    match state.trip_service.assign_driver(&trip_id, &action.driver_id).await? {
        AcceptDecision::Assigned(trip) => Ok(Json(trip)),
        AcceptDecision::Unavailable(reason) => {
            tracing::debug!("Assign {} to {} refused: {:?}", action.driver_id, trip_id, reason);
            Err(AppError::OfferUnavailable)
        }
    }
}

pub async fn deny_assignment(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(action): Json<DriverAction>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trip_service.deny_assignment(&trip_id, &action.driver_id).await?))
}

pub async fn reject_offer(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(action): Json<DriverAction>,
) -> Result<StatusCode, AppError> {
    state.trip_service.reject_offer(&trip_id, &action.driver_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn redispatch(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
) -> Result<Json<DispatchSummary>, AppError> {
    Ok(Json(state.trip_service.redispatch(&trip_id).await?))
}

pub async fn start_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(request): Json<StartTripRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(
        state
            .trip_service
            .start_trip(&trip_id, request.driver_id.as_deref())
            .await?,
    ))
}

pub async fn complete_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(request): Json<CompleteTripRequest>,
) -> Result<Json<TripCompletion>, AppError> {
    Ok(Json(state.trip_service.complete_trip(&trip_id, request).await?))
}

pub async fn cancel_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(request): Json<CancelTripRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trip_service.cancel_trip(&trip_id, request).await?))
}

pub async fn rate_trip(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(request): Json<RateTripRequest>,
) -> Result<(StatusCode, Json<RatingInfo>), AppError> {
    let rating = state.trip_service.rate_trip(&trip_id, request).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

pub async fn get_rating(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
) -> Result<Json<RatingInfo>, AppError> {
    state
        .trip_service
        .get_rating(&trip_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("rating for trip {}", trip_id)))
}

pub async fn update_payment_status(
    State(state): State<SharedState>,
    Path(trip_id): Path<String>,
    Json(update): Json<PaymentStatusUpdate>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(
        state
            .trip_service
            .update_payment_status(&trip_id, update.status)
            .await?,
    ))
}

pub async fn passenger_statistics(
    State(state): State<SharedState>,
    Path(passenger_id): Path<String>,
) -> Result<Json<TripStatistics>, AppError> {
    Ok(Json(state.trip_service.passenger_statistics(&passenger_id).await?))
}

pub async fn driver_statistics(
    State(state): State<SharedState>,
    Path(driver_id): Path<String>,
) -> Result<Json<TripStatistics>, AppError> {
    Ok(Json(state.trip_service.driver_statistics(&driver_id).await?))
}
