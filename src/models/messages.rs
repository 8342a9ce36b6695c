// src/models/messages.rs
use serde::{Deserialize, Serialize};

use crate::models::driver::DriverDisplaySummary;
use crate::models::trip::{GeoPoint, Trip, TripStatus, VehicleClass};

pub const REASON_ACCEPTED_BY_ANOTHER: &str = "accepted by another driver";

/// Stable outcome a driver client sees for an accept attempt.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOutcome {
    Assigned,
    NotAvailable,
    Error,
}

/// Messages pushed down a driver or passenger channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
    TripOffer {
        trip_id: String,
        pickup_address: String,
        dropoff_address: String,
        pickup: GeoPoint,
        vehicle_class: VehicleClass,
        estimated_fare: f64,
        distance_meters: f64,
        expires_in_seconds: i64,
    },
    TripCancelled {
        trip_id: String,
        reason: String,
    },
    DriverAssigned {
        trip_id: String,
        driver_id: String,
        driver_info: DriverDisplaySummary,
    },
    DriverUnassigned {
        trip_id: String,
    },
    TripStatusChanged {
        trip_id: String,
        status: TripStatus,
    },
    AcceptResult {
        trip_id: String,
        outcome: AcceptOutcome,
    },
    LocationUpdate {
        trip_id: String,
        latitude: f64,
        longitude: f64,
    },
    Error {
        message: String,
    },
}

impl ChannelMessage {
    pub fn offer(trip: &Trip, expires_in_seconds: i64) -> Self {
        ChannelMessage::TripOffer {
            trip_id: trip.id.clone(),
            pickup_address: trip.pickup.address.clone(),
            dropoff_address: trip.dropoff.address.clone(),
            pickup: trip.pickup.location,
            vehicle_class: trip.vehicle_class,
            estimated_fare: trip.fare.estimated,
            distance_meters: trip.route.distance_meters,
            expires_in_seconds,
        }
    }

    pub fn cancelled(trip_id: &str, reason: impl Into<String>) -> Self {
        ChannelMessage::TripCancelled {
            trip_id: trip_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn status_changed(trip: &Trip) -> Self {
        ChannelMessage::TripStatusChanged {
            trip_id: trip.id.clone(),
            status: trip.status,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::TripOffer { .. } => "TRIP_OFFER",
            ChannelMessage::TripCancelled { .. } => "TRIP_CANCELLED",
            ChannelMessage::DriverAssigned { .. } => "DRIVER_ASSIGNED",
            ChannelMessage::DriverUnassigned { .. } => "DRIVER_UNASSIGNED",
            ChannelMessage::TripStatusChanged { .. } => "TRIP_STATUS_CHANGED",
            ChannelMessage::AcceptResult { .. } => "ACCEPT_RESULT",
            ChannelMessage::LocationUpdate { .. } => "LOCATION_UPDATE",
            ChannelMessage::Error { .. } => "ERROR",
        }
    }
}

/// Commands a connected driver client can send.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverCommand {
    Location { latitude: f64, longitude: f64 },
    Accept { trip_id: String },
    Deny { trip_id: String },
    Reject { trip_id: String },
    Ping,
}
