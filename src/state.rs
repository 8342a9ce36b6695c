// src/state.rs
use std::sync::Arc;
use tracing;

use crate::config::AppConfig;
use crate::errors::DispatchError as AppError;
use crate::services::{
    channel_registry::ChannelRegistry,
    credentials::{CachedTokenProvider, CredentialProvider, StaticCredentialProvider},
    dispatcher::Dispatcher,
    driver_directory::{DriverDirectory, RemoteDriverDirectory, StaticDriverDirectory},
    driver_service::{DriverOperations, DriverService},
    geo_index::{GeoIndex, MemoryGeoIndex, RedisGeoIndex},
    messaging_service::{NotificationService, RemoteNotificationService},
    offer_arbiter::OfferArbiter,
    routing::{Geocoder, MapboxGeocoder, MapboxRoutePlanner, RoutePlanner, StaticGeocoder, StraightLineRoutePlanner},
    settlement::{LedgerSettlementService, RemoteSettlementService, SettlementService},
    trip_lifecycle::TripLifecycle,
    trip_service::{TripOperations, TripService},
    trip_store::{MemoryTripStore, RedisTripStore, TripStore},
};
use crate::utils::clock::{Clock, SystemClock};

/// The collaborators the protocol runs against.
pub struct Backends {
    pub store: Arc<dyn TripStore>,
    pub geo_index: Arc<dyn GeoIndex>,
    pub notifier: Arc<dyn NotificationService>,
    pub settlement: Arc<dyn SettlementService>,
    pub directory: Arc<dyn DriverDirectory>,
    pub routes: Arc<dyn RoutePlanner>,
    pub geocoder: Arc<dyn Geocoder>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Everything in this process: memory store and index, local channels, ledger settlement.
    pub fn in_process(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            store: Arc::new(MemoryTripStore::new()),
            geo_index: Arc::new(MemoryGeoIndex::new()),
            notifier: registry,
            settlement: Arc::new(LedgerSettlementService::new()),
            directory: Arc::new(StaticDriverDirectory::new()),
            routes: Arc::new(StraightLineRoutePlanner),
            geocoder: Arc::new(StaticGeocoder::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct AppState {
    pub trip_service: Arc<dyn TripOperations>,
    pub driver_service: Arc<dyn DriverOperations>,
    pub registry: Arc<ChannelRegistry>,
    pub config: AppConfig,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        let registry = Arc::new(ChannelRegistry::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timeout = config.upstream_timeout;

        let (store, geo_index): (Arc<dyn TripStore>, Arc<dyn GeoIndex>) = match &config.redis_url {
            Some(url) => (
                Arc::new(RedisTripStore::new(url).await?),
                Arc::new(RedisGeoIndex::new(url).await?),
            ),
            None => {
                tracing::warn!("REDIS_URL not set, trips and driver locations are kept in memory");
                (Arc::new(MemoryTripStore::new()), Arc::new(MemoryGeoIndex::new()))
            }
        };

        let notifier: Arc<dyn NotificationService> = match &config.location_service_url {
            Some(url) => Arc::new(RemoteNotificationService::new(url.as_str(), timeout)?),
            None => {
                tracing::info!("LOCATION_SERVICE_URL not set, serving driver channels from this process");
                registry.clone()
            }
        };

        let settlement: Arc<dyn SettlementService> = match &config.payment_service_url {
            Some(url) => Arc::new(RemoteSettlementService::new(url.as_str(), timeout)?),
            None => {
                tracing::warn!("PAYMENT_SERVICE_URL not set, using the in-process settlement ledger");
                Arc::new(LedgerSettlementService::new())
            }
        };

        let credentials: Arc<dyn CredentialProvider> =
            match (&config.user_service_url, &config.service_client_id) {
                (Some(url), Some(client_id)) => Arc::new(CachedTokenProvider::new(
                    url,
                    client_id.clone(),
                    config.service_client_secret.clone(),
                    timeout,
                    clock.clone(),
                )?),
                _ => Arc::new(StaticCredentialProvider::unconfigured()),
            };

        let directory: Arc<dyn DriverDirectory> = match &config.driver_service_url {
            Some(url) => Arc::new(RemoteDriverDirectory::new(url.as_str(), credentials, timeout)?),
            None => {
                tracing::warn!("DRIVER_SERVICE_URL not set, passengers will see placeholder driver info");
                Arc::new(StaticDriverDirectory::new())
            }
        };

        let routes: Arc<dyn RoutePlanner>;
        let geocoder: Arc<dyn Geocoder>;
        match &config.mapbox_access_token {
            Some(token) => {
                routes = Arc::new(MapboxRoutePlanner::new(token.reveal().clone(), timeout)?);
                geocoder = Arc::new(MapboxGeocoder::new(token.reveal().clone(), timeout)?);
            }
            None => {
                tracing::warn!(
                    "MAPBOX_ACCESS_TOKEN not set, routes are straight-line estimates and addresses cannot be geocoded"
                );
                routes = Arc::new(StraightLineRoutePlanner);
                geocoder = Arc::new(StaticGeocoder::new());
            }
        }

        let backends = Backends {
            store,
            geo_index,
            notifier,
            settlement,
            directory,
            routes,
            geocoder,
            clock,
        };
        Ok(Self::assemble(config, registry, backends))
    }

    pub fn assemble(config: AppConfig, registry: Arc<ChannelRegistry>, backends: Backends) -> Self {
        let settings = config.dispatch.clone();
        let Backends {
            store,
            geo_index,
            notifier,
            settlement,
            directory,
            routes,
            geocoder,
            clock,
        } = backends;

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            geo_index.clone(),
            notifier.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let arbiter = Arc::new(OfferArbiter::new(
            store.clone(),
            notifier.clone(),
            directory,
            clock.clone(),
            settings.clone(),
        ));
        let lifecycle = Arc::new(TripLifecycle::new(
            store.clone(),
            settlement,
            notifier,
            clock.clone(),
            settings,
        ));

        let trip_service = Arc::new(TripService::new(
            store, routes, geocoder, dispatcher, arbiter, lifecycle, clock,
        ));
        let driver_service = Arc::new(DriverService::new(geo_index, registry.clone()));

        Self {
            trip_service,
            driver_service,
            registry,
            config,
        }
    }
}
