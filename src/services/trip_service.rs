// src/services/trip_service.rs
use async_trait::async_trait;
use std::sync::Arc;
use tracing;

use crate::{
    errors::DispatchError as AppError,
    models::trip::{
        AddressTripRequest, CancelTripRequest, CompleteTripRequest, DispatchSummary, FareEstimateRequest,
        FareEstimateResponse, GeoPoint, NearbyTripsQuery, Page, PaymentStatus, RateTripRequest, RatingInfo, Trip,
        TripCompletion, TripCreation, TripRequest, TripStatistics, VehicleClass, VehicleFareEstimate,
        MAX_PAGE_LIMIT,
    },
    services::{
        dispatcher::Dispatcher,
        offer_arbiter::{AcceptDecision, OfferArbiter},
        pricing::calculate_fare,
        routing::{Geocoder, RoutePlanner},
        trip_lifecycle::TripLifecycle,
        trip_store::TripStore,
    },
    utils::{
        clock::Clock,
        geo::haversine_km,
        id_generator::{generate_trip_id, is_well_formed, IdKind},
    },
    ValidationError,
};

pub const MAX_ADDRESS_LEN: usize = 100;
pub const MAX_NOTES_LEN: usize = 500;

#[async_trait]
pub trait TripOperations: Send + Sync {
    async fn estimate_fares(&self, request: FareEstimateRequest) -> Result<FareEstimateResponse, AppError>;
    async fn create_trip(&self, request: TripRequest) -> Result<TripCreation, AppError>;
    async fn create_trip_from_addresses(&self, request: AddressTripRequest) -> Result<TripCreation, AppError>;
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError>;
    async fn trips_for_passenger(&self, passenger_id: &str, page: Page) -> Result<Vec<Trip>, AppError>;
    async fn trips_for_driver(&self, driver_id: &str, page: Page) -> Result<Vec<Trip>, AppError>;
    async fn available_trips(&self, page: Page) -> Result<Vec<Trip>, AppError>;
    async fn trips_near(&self, query: NearbyTripsQuery) -> Result<Vec<Trip>, AppError>;
    async fn assign_driver(&self, trip_id: &str, driver_id: &str) -> Result<AcceptDecision, AppError>;
    async fn deny_assignment(&self, trip_id: &str, driver_id: &str) -> Result<Trip, AppError>;
    async fn reject_offer(&self, trip_id: &str, driver_id: &str) -> Result<(), AppError>;
    async fn redispatch(&self, trip_id: &str) -> Result<DispatchSummary, AppError>;
    async fn start_trip(&self, trip_id: &str, driver_id: Option<&str>) -> Result<Trip, AppError>;
    async fn complete_trip(&self, trip_id: &str, request: CompleteTripRequest) -> Result<TripCompletion, AppError>;
    async fn cancel_trip(&self, trip_id: &str, request: CancelTripRequest) -> Result<Trip, AppError>;
    async fn rate_trip(&self, trip_id: &str, request: RateTripRequest) -> Result<RatingInfo, AppError>;
    async fn get_rating(&self, trip_id: &str) -> Result<Option<RatingInfo>, AppError>;
    async fn update_payment_status(&self, trip_id: &str, status: PaymentStatus) -> Result<Trip, AppError>;
    async fn delete_trip(&self, trip_id: &str) -> Result<(), AppError>;
    async fn passenger_statistics(&self, passenger_id: &str) -> Result<TripStatistics, AppError>;
    async fn driver_statistics(&self, driver_id: &str) -> Result<TripStatistics, AppError>;
}

pub struct TripService {
    store: Arc<dyn TripStore>,
    routes: Arc<dyn RoutePlanner>,
    geocoder: Arc<dyn Geocoder>,
    dispatcher: Arc<Dispatcher>,
    arbiter: Arc<OfferArbiter>,
    lifecycle: Arc<TripLifecycle>,
    clock: Arc<dyn Clock>,
}

impl TripService {
    pub fn new(
        store: Arc<dyn TripStore>,
        routes: Arc<dyn RoutePlanner>,
        geocoder: Arc<dyn Geocoder>,
        dispatcher: Arc<Dispatcher>,
        arbiter: Arc<OfferArbiter>,
        lifecycle: Arc<TripLifecycle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            routes,
            geocoder,
            dispatcher,
            arbiter,
            lifecycle,
            clock,
        }
    }

    fn validate_request(request: &TripRequest) -> Result<(), AppError> {
        let mut errors = Vec::new();

        if request.passenger_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "passenger_id".to_string(),
                message: "Passenger ID is required".to_string(),
            });
        }
        for (field, place) in [("pickup", &request.pickup), ("dropoff", &request.dropoff)] {
            if !place.location.is_valid() {
                errors.push(ValidationError {
                    field: format!("{}.location", field),
                    message: "Coordinates are out of range".to_string(),
                });
            }
            let address_len = place.address.trim().chars().count();
            if address_len == 0 || address_len > MAX_ADDRESS_LEN {
                errors.push(ValidationError {
                    field: format!("{}.address", field),
                    message: format!("Address must be 1 to {} characters", MAX_ADDRESS_LEN),
                });
            }
        }
        if request.notes.as_ref().is_some_and(|notes| notes.chars().count() > MAX_NOTES_LEN) {
            errors.push(ValidationError {
                field: "notes".to_string(),
                message: format!("Notes must be at most {} characters", MAX_NOTES_LEN),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationFailed(errors))
        }
    }

    fn require_id(field: &str, value: &str) -> Result<(), AppError> {
        if value.trim().is_empty() {
            return Err(AppError::validation_error(field, format!("{} is required", field)));
        }
        Ok(())
    }

    fn require_page(page: &Page) -> Result<(), AppError> {
        if !page.is_valid() {
            return Err(AppError::validation_error(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_LIMIT),
            ));
        }
        Ok(())
    }

    async fn geocode(&self, field: &str, address: &str) -> Result<GeoPoint, AppError> {
        self.geocoder
            .locate(address)
            .await?
            .ok_or_else(|| AppError::validation_error(field, "Could not geocode address"))
    }
}

#[async_trait]
impl TripOperations for TripService {
    async fn estimate_fares(&self, request: FareEstimateRequest) -> Result<FareEstimateResponse, AppError> {
        if !request.pickup.is_valid() || !request.dropoff.is_valid() {
            return Err(AppError::validation_error("location", "Coordinates are out of range"));
        }
        tracing::debug!("Estimating fares from {:?} to {:?}", request.pickup, request.dropoff);

        let route = self
            .routes
            .plan(request.pickup, request.dropoff, VehicleClass::FourSeater)
            .await?;
        let estimates = VehicleClass::ALL
            .iter()
            .map(|&vehicle_class| VehicleFareEstimate {
                vehicle_class,
                estimated_fare: calculate_fare(route.distance_km(), vehicle_class),
            })
            .collect();

        Ok(FareEstimateResponse { route, estimates })
    }

    async fn create_trip(&self, request: TripRequest) -> Result<TripCreation, AppError> {
        Self::validate_request(&request)?;
        tracing::info!("Creating trip for passenger: {}", request.passenger_id);

        let route = self
            .routes
            .plan(request.pickup.location, request.dropoff.location, request.vehicle_class)
            .await?;
        let estimated_fare = calculate_fare(route.distance_km(), request.vehicle_class);

        let now = self.clock.now();
        let trip = Trip::new(generate_trip_id(now), &request, route, estimated_fare, now);
        self.dispatcher.create_and_dispatch(trip).await
    }

    async fn create_trip_from_addresses(&self, request: AddressTripRequest) -> Result<TripCreation, AppError> {
        Self::require_id("passenger_id", &request.passenger_id)?;
        tracing::info!(
            "Geocoding trip for passenger {}: {} -> {}",
            request.passenger_id,
            request.pickup.address,
            request.dropoff.address
        );

        let (pickup, dropoff) = tokio::try_join!(
            self.geocode("pickup.address", &request.pickup.address),
            self.geocode("dropoff.address", &request.dropoff.address),
        )?;
        self.create_trip(request.with_locations(pickup, dropoff)).await
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        if !is_well_formed(trip_id, IdKind::Trip) {
            tracing::warn!("Invalid trip ID format: {}", trip_id);
            return Ok(None);
        }
        tracing::debug!("Getting trip: {}", trip_id);
        self.store.get(trip_id).await
    }

    async fn trips_for_passenger(&self, passenger_id: &str, page: Page) -> Result<Vec<Trip>, AppError> {
        Self::require_id("passenger_id", passenger_id)?;
        Self::require_page(&page)?;
        Ok(page.slice(self.store.list_by_passenger(passenger_id).await?))
    }

    async fn trips_for_driver(&self, driver_id: &str, page: Page) -> Result<Vec<Trip>, AppError> {
        Self::require_id("driver_id", driver_id)?;
        Self::require_page(&page)?;
        Ok(page.slice(self.store.list_by_driver(driver_id).await?))
    }

    async fn available_trips(&self, page: Page) -> Result<Vec<Trip>, AppError> {
        Self::require_page(&page)?;
        Ok(page.slice(self.store.list_pending().await?))
    }

    /// Pending trips by pickup distance, nearest first.
    async fn trips_near(&self, query: NearbyTripsQuery) -> Result<Vec<Trip>, AppError> {
        let center = query.point();
        if !center.is_valid() {
            return Err(AppError::validation_error("location", "Coordinates are out of range"));
        }
        if !NearbyTripsQuery::DISTANCE_RANGE.contains(&query.max_distance) {
            return Err(AppError::validation_error(
                "max_distance",
                "must be between 100 and 50000 meters",
            ));
        }
        Self::require_page(&Page { skip: 0, limit: query.limit })?;

        let max_km = f64::from(query.max_distance) / 1000.0;
        let mut nearby: Vec<(f64, Trip)> = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .map(|trip| (haversine_km(center, trip.pickup.location), trip))
            .filter(|(distance_km, _)| *distance_km <= max_km)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(nearby.into_iter().take(query.limit).map(|(_, trip)| trip).collect())
    }

    async fn assign_driver(&self, trip_id: &str, driver_id: &str) -> Result<AcceptDecision, AppError> {
        Self::require_id("driver_id", driver_id)?;
        self.arbiter.try_accept(trip_id, driver_id).await
    }

    async fn deny_assignment(&self, trip_id: &str, driver_id: &str) -> Result<Trip, AppError> {
        Self::require_id("driver_id", driver_id)?;
        self.arbiter.deny(trip_id, driver_id).await
    }

    async fn reject_offer(&self, trip_id: &str, driver_id: &str) -> Result<(), AppError> {
        Self::require_id("driver_id", driver_id)?;
        self.arbiter.reject(trip_id, driver_id).await
    }

    async fn redispatch(&self, trip_id: &str) -> Result<DispatchSummary, AppError> {
        self.dispatcher.redispatch(trip_id).await
    }

    async fn start_trip(&self, trip_id: &str, driver_id: Option<&str>) -> Result<Trip, AppError> {
        self.lifecycle.start(trip_id, driver_id).await
    }

    async fn complete_trip(&self, trip_id: &str, request: CompleteTripRequest) -> Result<TripCompletion, AppError> {
        self.lifecycle
            .complete(trip_id, request.distance_km, request.user_bank_info)
            .await
    }

    async fn cancel_trip(&self, trip_id: &str, request: CancelTripRequest) -> Result<Trip, AppError> {
        self.lifecycle
            .cancel(trip_id, request.cancelled_by, request.reason)
            .await
    }

    async fn rate_trip(&self, trip_id: &str, request: RateTripRequest) -> Result<RatingInfo, AppError> {
        self.lifecycle.rate(trip_id, request.stars, request.comment).await
    }

    async fn get_rating(&self, trip_id: &str) -> Result<Option<RatingInfo>, AppError> {
        let trip = self
            .store
            .get(trip_id)
            .await?
            .ok_or_else(|| AppError::trip_not_found(trip_id))?;
        Ok(trip.rating)
    }

    async fn update_payment_status(&self, trip_id: &str, status: PaymentStatus) -> Result<Trip, AppError> {
        self.lifecycle.update_payment_status(trip_id, status).await
    }

    async fn delete_trip(&self, trip_id: &str) -> Result<(), AppError> {
        if !self.store.delete(trip_id).await? {
            return Err(AppError::trip_not_found(trip_id));
        }
        tracing::info!("Trip deleted: {}", trip_id);
        Ok(())
    }

    async fn passenger_statistics(&self, passenger_id: &str) -> Result<TripStatistics, AppError> {
        Self::require_id("passenger_id", passenger_id)?;
        let trips = self.store.list_by_passenger(passenger_id).await?;
        Ok(TripStatistics::from_trips(&trips))
    }

    async fn driver_statistics(&self, driver_id: &str) -> Result<TripStatistics, AppError> {
        Self::require_id("driver_id", driver_id)?;
        let trips = self.store.list_by_driver(driver_id).await?;
        Ok(TripStatistics::from_trips(&trips))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::DispatchSettings;
    use crate::services::driver_directory::StaticDriverDirectory;
    use crate::services::geo_index::MemoryGeoIndex;
    use crate::services::messaging_service::RecordingNotificationService;
    use crate::services::routing::{StaticGeocoder, StraightLineRoutePlanner};
    use crate::services::settlement::LedgerSettlementService;
    use crate::services::trip_store::MemoryTripStore;
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    /// A fully in-memory service graph with handles on every fake.
    pub struct World {
        pub service: Arc<TripService>,
        pub store: Arc<MemoryTripStore>,
        pub geo: Arc<MemoryGeoIndex>,
        pub notifier: Arc<RecordingNotificationService>,
        pub ledger: Arc<LedgerSettlementService>,
        pub clock: Arc<ManualClock>,
    }

    pub fn world() -> World {
        let store = Arc::new(MemoryTripStore::new());
        let geo = Arc::new(MemoryGeoIndex::new());
        let notifier = Arc::new(RecordingNotificationService::new());
        let ledger = Arc::new(LedgerSettlementService::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()));
        let settings = DispatchSettings::default();

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            geo.clone(),
            notifier.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let arbiter = Arc::new(OfferArbiter::new(
            store.clone(),
            notifier.clone(),
            Arc::new(StaticDriverDirectory::new()),
            clock.clone(),
            settings.clone(),
        ));
        let lifecycle = Arc::new(TripLifecycle::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            clock.clone(),
            settings,
        ));
        let service = Arc::new(TripService::new(
            store.clone(),
            Arc::new(StraightLineRoutePlanner),
            Arc::new(
                StaticGeocoder::new()
                    .with_place("227 Nguyen Van Cu, District 5", GeoPoint::new(10.80, 106.70))
                    .with_place("Ben Thanh Market, District 1", GeoPoint::new(10.845, 106.70)),
            ),
            dispatcher,
            arbiter,
            lifecycle,
            clock.clone(),
        ));

        World { service, store, geo, notifier, ledger, clock }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::world;
    use super::*;
    use crate::models::messages::{AcceptOutcome, ChannelMessage, REASON_ACCEPTED_BY_ANOTHER};
    use crate::models::trip::{fixtures, AddressOnly, CancelledBy, PaymentMethod, TripStatus};
    use crate::models::transition::TripMutation;
    use crate::services::geo_index::GeoIndex;
    use chrono::Duration;

    #[tokio::test]
    async fn test_estimate_all_classes() {
        let w = world();
        let request = fixtures::request(VehicleClass::FourSeater);
        let estimate = w
            .service
            .estimate_fares(FareEstimateRequest {
                pickup: request.pickup.location,
                dropoff: request.dropoff.location,
            })
            .await
            .unwrap();

        let fares: Vec<f64> = estimate.estimates.iter().map(|e| e.estimated_fare).collect();
        assert_eq!(fares, vec![55000.0, 70000.0, 105000.0]);
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let w = world();
        let mut request = fixtures::request(VehicleClass::FourSeater);
        request.passenger_id = " ".to_string();
        request.pickup.location.latitude = 91.0;
        request.dropoff.address = "x".repeat(MAX_ADDRESS_LEN + 1);

        match w.service.create_trip(request).await.unwrap_err() {
            AppError::ValidationFailed(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["passenger_id", "pickup.location", "dropoff.address"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(w.service.available_trips(Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_drivers_race_for_one_trip() {
        let w = world();
        w.geo.upsert("drv-a", 10.81, 106.70).await.unwrap();
        w.geo.upsert("drv-b", 10.82, 106.70).await.unwrap();

        let created = w
            .service
            .create_trip(fixtures::request(VehicleClass::FourSeater))
            .await
            .unwrap();
        let trip_id = created.trip.id.clone();
        assert_eq!(created.trip.fare.estimated, 70000.0);
        assert_eq!(created.dispatch.drivers_notified, 2);

        w.clock.advance(Duration::seconds(2));
        let first = w.service.assign_driver(&trip_id, "drv-a").await.unwrap();
        let second = w.service.assign_driver(&trip_id, "drv-b").await.unwrap();
        assert_eq!(first.outcome(), AcceptOutcome::Assigned);
        assert_eq!(second.outcome(), AcceptOutcome::NotAvailable);

        let to_loser = w.notifier.sent_to_driver("drv-b");
        assert_eq!(to_loser.len(), 2);
        assert_eq!(to_loser[1], ChannelMessage::cancelled(&trip_id, REASON_ACCEPTED_BY_ANOTHER));
    }

    #[tokio::test]
    async fn test_late_accept_leaves_trip_pending() {
        let w = world();
        w.geo.upsert("drv-a", 10.81, 106.70).await.unwrap();
        let trip_id = w
            .service
            .create_trip(fixtures::request(VehicleClass::FourSeater))
            .await
            .unwrap()
            .trip
            .id;

        w.clock.advance(Duration::seconds(20));
        let decision = w.service.assign_driver(&trip_id, "drv-a").await.unwrap();
        assert_eq!(decision.outcome(), AcceptOutcome::NotAvailable);

        let trip = w.service.get_trip(&trip_id).await.unwrap().unwrap();
        assert_eq!(trip.status, TripStatus::Pending);
        assert!(trip.driver_id.is_none());

        // The lapsed cycle can be replaced
        let summary = w.service.redispatch(&trip_id).await.unwrap();
        assert_eq!(summary.drivers_notified, 1);
    }

    #[tokio::test]
    async fn test_full_ride_and_history() {
        let w = world();
        w.geo.upsert("drv-a", 10.81, 106.70).await.unwrap();
        let trip_id = w
            .service
            .create_trip(fixtures::request(VehicleClass::FourSeater))
            .await
            .unwrap()
            .trip
            .id;

        w.clock.advance(Duration::seconds(5));
        w.service.assign_driver(&trip_id, "drv-a").await.unwrap();
        w.clock.advance(Duration::minutes(3));
        w.service.start_trip(&trip_id, Some("drv-a")).await.unwrap();
        w.clock.advance(Duration::minutes(25));
        let done = w.service.complete_trip(&trip_id, CompleteTripRequest::for_distance(10.0)).await.unwrap();
        assert_eq!(done.payment.total_fare, 120000.0);

        let again = w.service.complete_trip(&trip_id, CompleteTripRequest::for_distance(10.0)).await.unwrap();
        assert_eq!(again.payment.transaction_id, done.payment.transaction_id);
        assert_eq!(w.ledger.settled_count().await, 1);

        w.service
            .rate_trip(&trip_id, RateTripRequest { stars: 5, comment: None })
            .await
            .unwrap();
        assert_eq!(w.service.get_rating(&trip_id).await.unwrap().map(|r| r.stars), Some(5));

        let trip = w.service.get_trip(&trip_id).await.unwrap().unwrap();
        let statuses: Vec<TripStatus> = trip.history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![TripStatus::Accepted, TripStatus::OnTrip, TripStatus::Completed]
        );

        let stats = w.service.driver_statistics("drv-a").await.unwrap();
        assert_eq!(stats.completed_trips, 1);
        assert_eq!(stats.total_revenue, 120000.0);
        assert_eq!(stats.average_rating, Some(5.0));
    }

    #[tokio::test]
    async fn test_cancel_pending_skips_settlement() {
        let w = world();
        let created = w
            .service
            .create_trip(fixtures::request(VehicleClass::TwoSeater))
            .await
            .unwrap();
        assert!(created.dispatch.warning.is_some());

        let trip = w
            .service
            .cancel_trip(
                &created.trip.id,
                CancelTripRequest {
                    cancelled_by: CancelledBy::Passenger,
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(trip.status, TripStatus::Cancelled);
        assert_eq!(w.ledger.settled_count().await, 0);

        let stats = w.service.passenger_statistics("usr-250101-pass1").await.unwrap();
        assert_eq!(stats.total_trips, 1);
        assert_eq!(stats.cancelled_trips, 1);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let w = world();
        assert!(w.service.get_trip("not-a-trip").await.unwrap().is_none());

        let trip_id = w
            .service
            .create_trip(fixtures::request(VehicleClass::SevenSeater))
            .await
            .unwrap()
            .trip
            .id;
        assert_eq!(w.service.available_trips(Page::default()).await.unwrap().len(), 1);

        w.service.delete_trip(&trip_id).await.unwrap();
        assert!(w.store.get(&trip_id).await.unwrap().is_none());
        assert!(matches!(
            w.service.delete_trip(&trip_id).await.unwrap_err(),
            AppError::TripNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_listings_are_paged_newest_first() {
        let w = world();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let created = w
                .service
                .create_trip(fixtures::request(VehicleClass::FourSeater))
                .await
                .unwrap();
            ids.push(created.trip.id);
            w.clock.advance(Duration::minutes(1));
        }

        let page = Page { skip: 1, limit: 2 };
        let available: Vec<String> = w
            .service
            .available_trips(page)
            .await
            .unwrap()
            .into_iter()
            .map(|trip| trip.id)
            .collect();
        assert_eq!(available, vec![ids[3].clone(), ids[2].clone()]);

        let mine = w.service.trips_for_passenger("usr-250101-pass1", page).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, ids[3]);
        assert!(w
            .service
            .trips_for_passenger("usr-250101-pass1", Page { skip: 10, limit: 5 })
            .await
            .unwrap()
            .is_empty());

        assert!(matches!(
            w.service.available_trips(Page { skip: 0, limit: 0 }).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            w.service.trips_for_driver("drv-a", Page { skip: 0, limit: 101 }).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));

        // Statistics always see the whole history
        let stats = w.service.passenger_statistics("usr-250101-pass1").await.unwrap();
        assert_eq!(stats.total_trips, 5);
    }

    #[tokio::test]
    async fn test_trips_near_orders_pending_pickups_by_distance() {
        let w = world();
        let t0 = w.clock.now();
        let place = |id: &str, latitude: f64| {
            let mut trip = fixtures::trip(id, t0);
            trip.pickup.location = GeoPoint::new(latitude, 106.70);
            trip
        };

        let far = place("trp-250101-far01", 10.90);
        let close = place("trp-250101-near1", 10.83);
        let here = place("trp-250101-here1", 10.80);
        let mut taken = place("trp-250101-take1", 10.80);
        taken
            .apply(&TripMutation::AssignDriver { driver_id: "drv-a".into() }, t0)
            .unwrap();
        for trip in [&far, &close, &here, &taken] {
            w.store.insert(trip).await.unwrap();
        }

        let query = NearbyTripsQuery {
            latitude: 10.80,
            longitude: 106.70,
            max_distance: 5000,
            limit: 50,
        };
        let found: Vec<String> = w
            .service
            .trips_near(query)
            .await
            .unwrap()
            .into_iter()
            .map(|trip| trip.id)
            .collect();
        assert_eq!(found, vec![here.id.clone(), close.id.clone()]);

        let nearest = w.service.trips_near(NearbyTripsQuery { limit: 1, ..query }).await.unwrap();
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].id, here.id);

        assert!(matches!(
            w.service.trips_near(NearbyTripsQuery { max_distance: 50, ..query }).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            w.service.trips_near(NearbyTripsQuery { latitude: 120.0, ..query }).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
    }

    fn address_request(pickup: &str, dropoff: &str) -> AddressTripRequest {
        AddressTripRequest {
            passenger_id: "usr-250101-pass1".to_string(),
            pickup: AddressOnly { address: pickup.to_string() },
            dropoff: AddressOnly { address: dropoff.to_string() },
            vehicle_class: VehicleClass::FourSeater,
            payment_method: PaymentMethod::Cash,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_from_addresses_geocodes_both_ends() {
        let w = world();
        w.geo.upsert("drv-a", 10.81, 106.70).await.unwrap();

        let created = w
            .service
            .create_trip_from_addresses(address_request(
                "227 Nguyen Van Cu, District 5",
                "Ben Thanh Market, District 1",
            ))
            .await
            .unwrap();
        assert_eq!(created.trip.pickup.location, GeoPoint::new(10.80, 106.70));
        assert_eq!(created.trip.dropoff.location, GeoPoint::new(10.845, 106.70));
        assert_eq!(created.trip.fare.estimated, 70000.0);
        assert_eq!(created.dispatch.drivers_notified, 1);

        match w
            .service
            .create_trip_from_addresses(address_request("227 Nguyen Van Cu, District 5", "Atlantis"))
            .await
            .unwrap_err()
        {
            AppError::ValidationFailed(errors) => assert_eq!(errors[0].field, "dropoff.address"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(w.service.available_trips(Page::default()).await.unwrap().len(), 1);
    }
}
