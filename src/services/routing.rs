// src/services/routing.rs
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::trip::{GeoPoint, RouteSummary, VehicleClass};
use crate::utils::geo::{encode_polyline, haversine_km};

const MAPBOX_DIRECTIONS_URL: &str = "https://api.mapbox.com/directions/v5/mapbox/driving";
const MAPBOX_GEOCODING_URL: &str = "https://api.mapbox.com/search/geocode/v6/forward";
const AVERAGE_SPEED_KMH: f64 = 30.0;

#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        vehicle_class: VehicleClass,
    ) -> Result<RouteSummary, AppError>;
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    distance: f64,
    duration: f64,
    geometry: String,
}

pub struct MapboxRoutePlanner {
    access_token: String,
    client: reqwest::Client,
}

impl MapboxRoutePlanner {
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            access_token: access_token.into(),
            client,
        })
    }
}

#[async_trait]
impl RoutePlanner for MapboxRoutePlanner {
    async fn plan(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        vehicle_class: VehicleClass,
    ) -> Result<RouteSummary, AppError> {
        let coordinates = format!(
            "{},{};{},{}",
            pickup.longitude, pickup.latitude, dropoff.longitude, dropoff.latitude
        );
        let mut query = vec![
            ("access_token", self.access_token.as_str()),
            ("geometries", "polyline"),
            ("overview", "full"),
        ];
        // Two-seaters are motorbikes and stay off motorways
        if vehicle_class == VehicleClass::TwoSeater {
            query.push(("exclude", "motorway"));
        }

        tracing::info!("Requesting directions from {:?} to {:?}", pickup, dropoff);
        let response = self
            .client
            .get(format!("{}/{}", MAPBOX_DIRECTIONS_URL, coordinates))
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                service: "directions".to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: DirectionsResponse = response.json().await?;
        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoRouteFound("no drivable route between the points".to_string()))?;

        Ok(RouteSummary {
            distance_meters: route.distance,
            duration_seconds: route.duration,
            geometry: route.geometry,
        })
    }
}

/// Turns a free-text address into coordinates. `None` means nothing matched.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn locate(&self, address: &str) -> Result<Option<GeoPoint>, AppError>;
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    features: Vec<GeocodingFeature>,
}

#[derive(Debug, Deserialize)]
struct GeocodingFeature {
    geometry: FeatureGeometry,
}

#[derive(Debug, Deserialize)]
struct FeatureGeometry {
    // GeoJSON order: longitude, latitude
    coordinates: [f64; 2],
}

impl GeocodingResponse {
    fn best_match(self) -> Option<GeoPoint> {
        self.features
            .into_iter()
            .next()
            .map(|feature| GeoPoint::new(feature.geometry.coordinates[1], feature.geometry.coordinates[0]))
    }
}

pub struct MapboxGeocoder {
    access_token: String,
    client: reqwest::Client,
}

impl MapboxGeocoder {
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            access_token: access_token.into(),
            client,
        })
    }
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn locate(&self, address: &str) -> Result<Option<GeoPoint>, AppError> {
        tracing::info!("Requesting geocoding for: {}", address);
        let response = self
            .client
            .get(MAPBOX_GEOCODING_URL)
            .query(&[("q", address), ("access_token", self.access_token.as_str()), ("limit", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                service: "geocoding".to_string(),
                status: response.status().as_u16(),
            });
        }

        let point = response.json::<GeocodingResponse>().await?.best_match();
        if point.is_none() {
            tracing::warn!("No geocoding match for: {}", address);
        }
        Ok(point)
    }
}

/// Fixed address book. Without a geocoding provider it is empty and every lookup misses.
#[derive(Debug, Default)]
pub struct StaticGeocoder {
    places: HashMap<String, GeoPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, address: &str, point: GeoPoint) -> Self {
        self.places.insert(Self::normalize(address), point);
        self
    }

    fn normalize(address: &str) -> String {
        address.trim().to_lowercase()
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn locate(&self, address: &str) -> Result<Option<GeoPoint>, AppError> {
        Ok(self.places.get(&Self::normalize(address)).copied())
    }
}

/// Straight-line estimate, used when no directions provider is configured.
#[derive(Debug, Default)]
pub struct StraightLineRoutePlanner;

#[async_trait]
impl RoutePlanner for StraightLineRoutePlanner {
    async fn plan(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        _vehicle_class: VehicleClass,
    ) -> Result<RouteSummary, AppError> {
        let distance_km = haversine_km(pickup, dropoff);
        Ok(RouteSummary {
            distance_meters: distance_km * 1000.0,
            duration_seconds: distance_km / AVERAGE_SPEED_KMH * 3600.0,
            geometry: encode_polyline(&[pickup, dropoff]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_straight_line_route() {
        let route = StraightLineRoutePlanner
            .plan(GeoPoint::new(10.80, 106.70), GeoPoint::new(10.845, 106.70), VehicleClass::FourSeater)
            .await
            .unwrap();

        assert!((route.distance_km() - 5.0).abs() < 0.05);
        // 5 km at 30 km/h is ten minutes
        assert!((route.duration_seconds - 600.0).abs() < 10.0);
        assert!(!route.geometry.is_empty());
    }

    #[test]
    fn test_directions_payload_parses() {
        let body = r#"{"routes":[{"distance":5230.4,"duration":812.1,"geometry":"abc","legs":[]}],"code":"Ok"}"#;
        let parsed: DirectionsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.routes[0].distance, 5230.4);

        let empty: DirectionsResponse = serde_json::from_str(r#"{"code":"NoRoute"}"#).unwrap();
        assert!(empty.routes.is_empty());
    }

    #[test]
    fn test_geocoding_payload_takes_first_feature() {
        let body = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[106.6822,10.7626]},"properties":{}},
            {"type":"Feature","geometry":{"type":"Point","coordinates":[105.0,21.0]},"properties":{}}
        ]}"#;
        let parsed: GeocodingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.best_match(), Some(GeoPoint::new(10.7626, 106.6822)));

        let empty: GeocodingResponse = serde_json::from_str(r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        assert_eq!(empty.best_match(), None);
    }

    #[tokio::test]
    async fn test_static_geocoder_ignores_case_and_padding() {
        let geocoder = StaticGeocoder::new().with_place("Ben Thanh Market", GeoPoint::new(10.7725, 106.698));
        assert_eq!(
            geocoder.locate("  ben thanh market ").await.unwrap(),
            Some(GeoPoint::new(10.7725, 106.698))
        );
        assert_eq!(geocoder.locate("Nowhere").await.unwrap(), None);
    }
}
