// src/services/geo_index.rs
use async_trait::async_trait;
use redis::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::driver::NearbyDriver;
use crate::models::trip::GeoPoint;
use crate::utils::geo::{haversine_km, round_to};

pub const DRIVER_GEO_KEY: &str = "drivers:geo";

/// Live driver positions with radius queries.
///
/// `nearby_drivers` returns candidates in ascending distance order and an empty
/// list, never an error, when nobody is in range.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn nearby_drivers(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, AppError>;
    async fn upsert(&self, driver_id: &str, latitude: f64, longitude: f64) -> Result<(), AppError>;
    async fn remove(&self, driver_id: &str) -> Result<(), AppError>;
}

pub struct RedisGeoIndex {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisGeoIndex {
    pub async fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::RedisConnection(e.to_string()))?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl GeoIndex for RedisGeoIndex {
    async fn nearby_drivers(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        let mut conn = self.connection.clone();
        // Each hit comes back as [member, distance, [lon, lat]]
        let hits: Vec<(String, f64, (f64, f64))> = redis::cmd("GEORADIUS")
            .arg(DRIVER_GEO_KEY)
            .arg(longitude)
            .arg(latitude)
            .arg(radius_km)
            .arg("km")
            .arg("WITHDIST")
            .arg("WITHCOORD")
            .arg("COUNT")
            .arg(limit)
            .arg("ASC")
            .query_async(&mut conn)
            .await?;

        Ok(hits
            .into_iter()
            .map(|(driver_id, distance_km, (lon, lat))| NearbyDriver {
                driver_id,
                distance_km: round_to(distance_km, 2),
                location: GeoPoint::new(lat, lon),
            })
            .collect())
    }

    async fn upsert(&self, driver_id: &str, latitude: f64, longitude: f64) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        redis::cmd("GEOADD")
            .arg(DRIVER_GEO_KEY)
            .arg(longitude)
            .arg(latitude)
            .arg(driver_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, driver_id: &str) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        redis::cmd("ZREM")
            .arg(DRIVER_GEO_KEY)
            .arg(driver_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        tracing::debug!("Removed driver {} from geo index", driver_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGeoIndex {
    positions: RwLock<HashMap<String, GeoPoint>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GeoIndex for MemoryGeoIndex {
    async fn nearby_drivers(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        let origin = GeoPoint::new(latitude, longitude);
        let positions = self.positions.read().await;

        let mut hits: Vec<NearbyDriver> = positions
            .iter()
            .map(|(driver_id, location)| NearbyDriver {
                driver_id: driver_id.clone(),
                distance_km: haversine_km(origin, *location),
                location: *location,
            })
            .filter(|hit| hit.distance_km <= radius_km)
            .collect();

        hits.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        hits.truncate(limit);
        for hit in &mut hits {
            hit.distance_km = round_to(hit.distance_km, 2);
        }
        Ok(hits)
    }

    async fn upsert(&self, driver_id: &str, latitude: f64, longitude: f64) -> Result<(), AppError> {
        self.positions
            .write()
            .await
            .insert(driver_id.to_string(), GeoPoint::new(latitude, longitude));
        Ok(())
    }

    async fn remove(&self, driver_id: &str) -> Result<(), AppError> {
        self.positions.write().await.remove(driver_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nearby_sorted_and_limited() {
        let index = MemoryGeoIndex::new();
        index.upsert("drv-far", 10.90, 106.70).await.unwrap(); // ~11 km
        index.upsert("drv-near", 10.81, 106.70).await.unwrap(); // ~1.1 km
        index.upsert("drv-mid", 10.82, 106.70).await.unwrap(); // ~2.2 km

        let hits = index.nearby_drivers(10.80, 106.70, 3.0, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["drv-near", "drv-mid"]);
        assert_eq!(hits[0].distance_km, round_to(hits[0].distance_km, 2));

        let limited = index.nearby_drivers(10.80, 106.70, 15.0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].driver_id, "drv-near");
    }

    #[tokio::test]
    async fn test_empty_and_remove() {
        let index = MemoryGeoIndex::new();
        assert!(index.nearby_drivers(10.80, 106.70, 3.0, 10).await.unwrap().is_empty());

        index.upsert("drv-a", 10.80, 106.70).await.unwrap();
        index.remove("drv-a").await.unwrap();
        assert!(index.nearby_drivers(10.80, 106.70, 3.0, 10).await.unwrap().is_empty());
    }
}
