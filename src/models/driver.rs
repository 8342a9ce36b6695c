// src/models/driver.rs
use serde::{Deserialize, Serialize};

use crate::models::trip::GeoPoint;

/// A candidate returned by a proximity query.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub distance_km: f64,
    pub location: GeoPoint,
}

/// Minimal driver info shown to the passenger once a driver is assigned.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverDisplaySummary {
    pub name: String,
    pub vehicle_plate: String,
}

impl DriverDisplaySummary {
    pub const PLACEHOLDER_NAME: &'static str = "Driver";
    pub const PLACEHOLDER_PLATE: &'static str = "N/A";

    /// Shown when the profile lookup fails; assignment is never held up by it.
    pub fn placeholder() -> Self {
        Self {
            name: Self::PLACEHOLDER_NAME.to_string(),
            vehicle_plate: Self::PLACEHOLDER_PLATE.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverLocationUpdate {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NearbyDriversQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}
