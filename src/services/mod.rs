// src/services/mod.rs
pub mod channel_registry;
pub mod credentials;
pub mod dispatcher;
pub mod driver_directory;
pub mod driver_service;
pub mod geo_index;
pub mod messaging_service;
pub mod offer_arbiter;
pub mod pricing;
pub mod routing;
pub mod settlement;
pub mod trip_lifecycle;
pub mod trip_service;
pub mod trip_store;
