// src/services/driver_service.rs
use async_trait::async_trait;
use std::sync::Arc;
use tracing;

use crate::{
    errors::DispatchError as AppError,
    models::driver::{DriverLocationUpdate, NearbyDriver, NearbyDriversQuery},
    models::trip::GeoPoint,
    services::channel_registry::ChannelRegistry,
    services::geo_index::GeoIndex,
};

pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 5.0;
pub const MAX_NEARBY_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_NEARBY_LIMIT: usize = 10;
pub const MAX_NEARBY_LIMIT: usize = 100;

#[async_trait]
pub trait DriverOperations: Send + Sync {
    async fn update_driver_location(&self, update: DriverLocationUpdate) -> Result<(), AppError>;
    async fn set_driver_offline(&self, driver_id: &str) -> Result<(), AppError>;
    async fn find_nearby_drivers(&self, query: NearbyDriversQuery) -> Result<Vec<NearbyDriver>, AppError>;
    async fn online_drivers(&self) -> Vec<String>;
}

/// Keeps the geo index in step with what drivers report.
pub struct DriverService {
    geo_index: Arc<dyn GeoIndex>,
    registry: Arc<ChannelRegistry>,
}

impl DriverService {
    pub fn new(geo_index: Arc<dyn GeoIndex>, registry: Arc<ChannelRegistry>) -> Self {
        Self { geo_index, registry }
    }
}

#[async_trait]
impl DriverOperations for DriverService {
    async fn update_driver_location(&self, update: DriverLocationUpdate) -> Result<(), AppError> {
        if update.driver_id.trim().is_empty() {
            return Err(AppError::validation_error("driver_id", "Driver ID is required"));
        }
        if !GeoPoint::new(update.latitude, update.longitude).is_valid() {
            return Err(AppError::validation_error("location", "Coordinates are out of range"));
        }

        tracing::debug!("Updating driver location: {}", update.driver_id);
        self.geo_index
            .upsert(&update.driver_id, update.latitude, update.longitude)
            .await
    }

    async fn set_driver_offline(&self, driver_id: &str) -> Result<(), AppError> {
        tracing::info!("Driver {} going offline", driver_id);
        self.geo_index.remove(driver_id).await
    }

    async fn find_nearby_drivers(&self, query: NearbyDriversQuery) -> Result<Vec<NearbyDriver>, AppError> {
        if !GeoPoint::new(query.latitude, query.longitude).is_valid() {
            return Err(AppError::validation_error("location", "Coordinates are out of range"));
        }
        let radius_km = query.radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM);
        if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > MAX_NEARBY_RADIUS_KM {
            return Err(AppError::validation_error(
                "radius_km",
                format!("Radius must be within (0, {}] km", MAX_NEARBY_RADIUS_KM),
            ));
        }
        let limit = query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT).clamp(1, MAX_NEARBY_LIMIT);

        self.geo_index
            .nearby_drivers(query.latitude, query.longitude, radius_km, limit)
            .await
    }

    async fn online_drivers(&self) -> Vec<String> {
        self.registry.online_drivers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geo_index::MemoryGeoIndex;

    fn service() -> DriverService {
        DriverService::new(Arc::new(MemoryGeoIndex::new()), Arc::new(ChannelRegistry::new()))
    }

    fn update(driver_id: &str, latitude: f64, longitude: f64) -> DriverLocationUpdate {
        DriverLocationUpdate {
            driver_id: driver_id.to_string(),
            latitude,
            longitude,
        }
    }

    #[tokio::test]
    async fn test_location_then_offline() {
        let drivers = service();
        drivers.update_driver_location(update("drv-a", 10.81, 106.70)).await.unwrap();
        drivers.update_driver_location(update("drv-b", 10.90, 106.70)).await.unwrap();

        let query = NearbyDriversQuery {
            latitude: 10.80,
            longitude: 106.70,
            radius_km: None,
            limit: None,
        };
        let nearby = drivers.find_nearby_drivers(query.clone()).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].driver_id, "drv-a");

        drivers.set_driver_offline("drv-a").await.unwrap();
        assert!(drivers.find_nearby_drivers(query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let drivers = service();
        assert!(matches!(
            drivers.update_driver_location(update("", 10.8, 106.7)).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            drivers.update_driver_location(update("drv-a", 10.8, 200.0)).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            drivers
                .find_nearby_drivers(NearbyDriversQuery {
                    latitude: 10.8,
                    longitude: 106.7,
                    radius_km: Some(500.0),
                    limit: None,
                })
                .await
                .unwrap_err(),
            AppError::ValidationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_online_follows_channels() {
        let registry = Arc::new(ChannelRegistry::new());
        let drivers = DriverService::new(Arc::new(MemoryGeoIndex::new()), registry.clone());
        let _subscription = registry.connect_driver("drv-a").await;

        assert_eq!(drivers.online_drivers().await, vec!["drv-a".to_string()]);
    }
}
