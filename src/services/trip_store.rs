// src/services/trip_store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::transition::{CasOutcome, Precondition, TripMutation};
use crate::models::trip::{Trip, TripStatus};

// Optimistic transactions give up after this many lost WATCH races
const MAX_CAS_ATTEMPTS: usize = 8;

/// Durable trip documents with guarded writes.
///
/// `compare_and_set` is the only way to change a stored trip. It evaluates the
/// precondition against the stored copy and applies the mutation in the same
/// atomic step, so two callers racing on the same guard can never both win.
/// Listings come back newest first.
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn insert(&self, trip: &Trip) -> Result<(), AppError>;
    async fn get(&self, trip_id: &str) -> Result<Option<Trip>, AppError>;
    async fn compare_and_set(
        &self,
        trip_id: &str,
        expected: &Precondition,
        mutation: &TripMutation,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, AppError>;
    async fn delete(&self, trip_id: &str) -> Result<bool, AppError>;
    async fn list_by_passenger(&self, passenger_id: &str) -> Result<Vec<Trip>, AppError>;
    async fn list_by_driver(&self, driver_id: &str) -> Result<Vec<Trip>, AppError>;
    async fn list_pending(&self) -> Result<Vec<Trip>, AppError>;
}

// Key generators for the Redis layout
pub struct StoreKeys;

impl StoreKeys {
    pub fn trip_by_id(trip_id: &str) -> String {
        ["trip", "id", trip_id].join(":")
    }

    pub fn trips_by_passenger(passenger_id: &str) -> String {
        ["trips", "passenger", passenger_id].join(":")
    }

    pub fn trips_by_driver(driver_id: &str) -> String {
        ["trips", "driver", driver_id].join(":")
    }

    pub fn pending_trips() -> String {
        "trips:pending".to_string()
    }
}

fn newest_first(mut trips: Vec<Trip>) -> Vec<Trip> {
    trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    trips
}

// ------------------------------
// Redis
// ------------------------------

pub struct RedisTripStore {
    client: Client,
    connection: redis::aio::MultiplexedConnection,
}

impl RedisTripStore {
    pub async fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::RedisConnection(e.to_string()))?;
        let connection = client.get_multiplexed_async_connection().await?;

        tracing::info!("Trip store connected to Redis");
        Ok(Self { client, connection })
    }

    // WATCH is per connection, so transactions need one of their own
    async fn dedicated_connection(&self) -> Result<redis::aio::Connection, AppError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| AppError::RedisConnection(e.to_string()))
    }

    async fn load_many(&self, index_key: &str) -> Result<Vec<Trip>, AppError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(index_key)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| StoreKeys::trip_by_id(id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;

        let mut trips = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            trips.push(serde_json::from_str::<Trip>(&json)?);
        }
        Ok(newest_first(trips))
    }

    async fn unwatch(conn: &mut redis::aio::Connection) -> Result<(), AppError> {
        redis::cmd("UNWATCH").query_async::<_, ()>(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TripStore for RedisTripStore {
    async fn insert(&self, trip: &Trip) -> Result<(), AppError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(trip)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(StoreKeys::trip_by_id(&trip.id))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(AppError::Conflict(format!("Trip {} already exists", trip.id)));
        }

        let mut pipe = redis::pipe();
        pipe.cmd("SADD")
            .arg(StoreKeys::trips_by_passenger(&trip.passenger_id))
            .arg(&trip.id)
            .ignore();
        if trip.status == TripStatus::Pending {
            pipe.cmd("SADD").arg(StoreKeys::pending_trips()).arg(&trip.id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(StoreKeys::trip_by_id(trip_id))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        trip_id: &str,
        expected: &Precondition,
        mutation: &TripMutation,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, AppError> {
        let key = StoreKeys::trip_by_id(trip_id);
        let mut conn = self.dedicated_connection().await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            redis::cmd("WATCH").arg(&key).query_async::<_, ()>(&mut conn).await?;

            let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            let Some(raw) = raw else {
                Self::unwatch(&mut conn).await?;
                return Ok(CasOutcome::Missing);
            };

            let current: Trip = serde_json::from_str(&raw)?;
            if !expected.holds(&current) {
                Self::unwatch(&mut conn).await?;
                return Ok(CasOutcome::Mismatch(current));
            }

            let mut updated = current.clone();
            if updated.apply(mutation, at).is_err() {
                Self::unwatch(&mut conn).await?;
                return Ok(CasOutcome::Mismatch(current));
            }

            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("SET")
                .arg(&key)
                .arg(serde_json::to_string(&updated)?)
                .ignore();

            if current.driver_id != updated.driver_id {
                if let Some(previous) = &current.driver_id {
                    pipe.cmd("SREM").arg(StoreKeys::trips_by_driver(previous)).arg(trip_id).ignore();
                }
                if let Some(next) = &updated.driver_id {
                    pipe.cmd("SADD").arg(StoreKeys::trips_by_driver(next)).arg(trip_id).ignore();
                }
            }
            if current.status != updated.status {
                let verb = if updated.status == TripStatus::Pending { "SADD" } else { "SREM" };
                pipe.cmd(verb).arg(StoreKeys::pending_trips()).arg(trip_id).ignore();
            }

            // EXEC replies nil when the watched key changed underneath us
            let committed: Option<()> = pipe.query_async(&mut conn).await?;
            if committed.is_some() {
                return Ok(CasOutcome::Applied(updated));
            }
            tracing::debug!("Lost write race on trip {} (attempt {}), retrying", trip_id, attempt);
        }

        tracing::warn!("Giving up on trip {} after {} contended writes", trip_id, MAX_CAS_ATTEMPTS);
        Err(AppError::StoreContention(trip_id.to_string()))
    }

    async fn delete(&self, trip_id: &str) -> Result<bool, AppError> {
        let Some(trip) = self.get(trip_id).await? else {
            return Ok(false);
        };

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL").arg(StoreKeys::trip_by_id(trip_id)).ignore()
            .cmd("SREM").arg(StoreKeys::trips_by_passenger(&trip.passenger_id)).arg(trip_id).ignore()
            .cmd("SREM").arg(StoreKeys::pending_trips()).arg(trip_id).ignore();
        if let Some(driver_id) = &trip.driver_id {
            pipe.cmd("SREM").arg(StoreKeys::trips_by_driver(driver_id)).arg(trip_id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(true)
    }

    async fn list_by_passenger(&self, passenger_id: &str) -> Result<Vec<Trip>, AppError> {
        self.load_many(&StoreKeys::trips_by_passenger(passenger_id)).await
    }

    async fn list_by_driver(&self, driver_id: &str) -> Result<Vec<Trip>, AppError> {
        self.load_many(&StoreKeys::trips_by_driver(driver_id)).await
    }

    async fn list_pending(&self) -> Result<Vec<Trip>, AppError> {
        let mut trips = self.load_many(&StoreKeys::pending_trips()).await?;
        trips.retain(|trip| trip.status == TripStatus::Pending);
        Ok(trips)
    }
}

// ------------------------------
// In-memory
// ------------------------------

#[derive(Default)]
pub struct MemoryTripStore {
    trips: RwLock<HashMap<String, Trip>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered(&self, keep: impl Fn(&Trip) -> bool) -> Vec<Trip> {
        let trips = self.trips.read().await;
        newest_first(trips.values().filter(|trip| keep(trip)).cloned().collect())
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn insert(&self, trip: &Trip) -> Result<(), AppError> {
        let mut trips = self.trips.write().await;
        if trips.contains_key(&trip.id) {
            return Err(AppError::Conflict(format!("Trip {} already exists", trip.id)));
        }
        trips.insert(trip.id.clone(), trip.clone());
        Ok(())
    }

    async fn get(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        Ok(self.trips.read().await.get(trip_id).cloned())
    }

    async fn compare_and_set(
        &self,
        trip_id: &str,
        expected: &Precondition,
        mutation: &TripMutation,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, AppError> {
        let mut trips = self.trips.write().await;
        let Some(current) = trips.get_mut(trip_id) else {
            return Ok(CasOutcome::Missing);
        };
        if !expected.holds(current) {
            return Ok(CasOutcome::Mismatch(current.clone()));
        }

        let mut updated = current.clone();
        if updated.apply(mutation, at).is_err() {
            return Ok(CasOutcome::Mismatch(current.clone()));
        }
        *current = updated.clone();
        Ok(CasOutcome::Applied(updated))
    }

    async fn delete(&self, trip_id: &str) -> Result<bool, AppError> {
        Ok(self.trips.write().await.remove(trip_id).is_some())
    }

    async fn list_by_passenger(&self, passenger_id: &str) -> Result<Vec<Trip>, AppError> {
        Ok(self.filtered(|trip| trip.passenger_id == passenger_id).await)
    }

    async fn list_by_driver(&self, driver_id: &str) -> Result<Vec<Trip>, AppError> {
        Ok(self.filtered(|trip| trip.is_assigned_to(driver_id)).await)
    }

    async fn list_pending(&self) -> Result<Vec<Trip>, AppError> {
        Ok(self.filtered(|trip| trip.status == TripStatus::Pending).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trip::fixtures;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_keys() {
        assert_eq!(StoreKeys::trip_by_id("trp-1"), "trip:id:trp-1");
        assert_eq!(StoreKeys::trips_by_driver("drv-1"), "trips:driver:drv-1");
    }

    #[tokio::test]
    async fn test_insert_get_and_duplicate() {
        let store = MemoryTripStore::new();
        let trip = fixtures::trip("trp-250101-abc12", t0());

        store.insert(&trip).await.unwrap();
        assert_eq!(store.get(&trip.id).await.unwrap(), Some(trip.clone()));
        assert!(store.insert(&trip).await.is_err());
        assert_eq!(store.get("trp-250101-zzzzz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cas_applies_only_when_guard_holds() {
        let store = MemoryTripStore::new();
        let trip = fixtures::trip("trp-250101-abc12", t0());
        store.insert(&trip).await.unwrap();

        let guard = Precondition::status(TripStatus::Pending);
        let assign = |driver: &str| TripMutation::AssignDriver { driver_id: driver.to_string() };

        let first = store.compare_and_set(&trip.id, &guard, &assign("drv-a"), t0()).await.unwrap();
        let CasOutcome::Applied(updated) = first else { panic!("expected first write to apply") };
        assert_eq!(updated.status, TripStatus::Accepted);
        assert_eq!(updated.version, 1);

        let second = store.compare_and_set(&trip.id, &guard, &assign("drv-b"), t0()).await.unwrap();
        let CasOutcome::Mismatch(current) = second else { panic!("expected mismatch") };
        assert_eq!(current.driver_id.as_deref(), Some("drv-a"));

        let missing = store.compare_and_set("nope", &guard, &assign("drv-c"), t0()).await.unwrap();
        assert_eq!(missing, CasOutcome::Missing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cas_has_single_winner() {
        let store = Arc::new(MemoryTripStore::new());
        let trip = fixtures::trip("trp-250101-abc12", t0());
        store.insert(&trip).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .compare_and_set(
                            "trp-250101-abc12",
                            &Precondition::status(TripStatus::Pending),
                            &TripMutation::AssignDriver { driver_id: format!("drv-{}", i) },
                            t0(),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasOutcome::Applied(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get("trp-250101-abc12").await.unwrap().unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_listings() {
        let store = MemoryTripStore::new();
        let older = fixtures::trip("trp-250101-aaaa1", t0());
        let newer = fixtures::trip("trp-250101-aaaa2", t0() + Duration::minutes(5));
        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();

        store
            .compare_and_set(
                &older.id,
                &Precondition::status(TripStatus::Pending),
                &TripMutation::AssignDriver { driver_id: "drv-a".into() },
                t0(),
            )
            .await
            .unwrap();

        let by_passenger = store.list_by_passenger(&older.passenger_id).await.unwrap();
        assert_eq!(by_passenger.len(), 2);
        assert_eq!(by_passenger[0].id, newer.id);

        let by_driver = store.list_by_driver("drv-a").await.unwrap();
        assert_eq!(by_driver.len(), 1);

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, newer.id);

        assert!(store.delete(&newer.id).await.unwrap());
        assert!(!store.delete(&newer.id).await.unwrap());
    }
}
