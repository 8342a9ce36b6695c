// src/handlers/notify_handler.rs
//
// Push endpoints for dispatch instances that do not hold the sockets
// themselves. They deliver through this instance's channel registry.
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing;

use crate::errors::DispatchError as AppError;
use crate::handlers::SharedState;
use crate::models::messages::ChannelMessage;
use crate::services::channel_registry::ParticipantRole;
use crate::services::messaging_service::NotificationService;

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyDriversRequest {
    pub driver_ids: Vec<String>,
    pub payload: ChannelMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyDriversResponse {
    pub sent_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyParticipantRequest {
    pub payload: ChannelMessage,
}

pub async fn notify_drivers(
    State(state): State<SharedState>,
    Json(request): Json<NotifyDriversRequest>,
) -> Json<NotifyDriversResponse> {
    let mut sent_count = 0;
    for driver_id in &request.driver_ids {
        if state.registry.send_to_driver(driver_id, &request.payload).await {
            sent_count += 1;
        }
    }
    tracing::debug!(
        "Relayed {} to {}/{} drivers",
        request.payload.kind(),
        sent_count,
        request.driver_ids.len()
    );
    Json(NotifyDriversResponse { sent_count })
}

pub async fn notify_trip_participant(
    State(state): State<SharedState>,
    Path((trip_id, role)): Path<(String, ParticipantRole)>,
    Json(request): Json<NotifyParticipantRequest>,
) -> Result<StatusCode, AppError> {
    if state.registry.send_in_room(&trip_id, role, &request.payload).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("{} of trip {} is not connected", role, trip_id)))
    }
}
