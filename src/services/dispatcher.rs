// src/services/dispatcher.rs
use std::sync::Arc;
use tracing;

use crate::config::DispatchSettings;
use crate::errors::DispatchError as AppError;
use crate::models::driver::NearbyDriver;
use crate::models::messages::ChannelMessage;
use crate::models::transition::{CasOutcome, Precondition, TripMutation};
use crate::models::trip::{DispatchSummary, Trip, TripCreation, TripStatus};
use crate::services::geo_index::GeoIndex;
use crate::services::messaging_service::{fan_out_to_drivers, NotificationService};
use crate::services::trip_store::TripStore;
use crate::utils::clock::Clock;

pub const WARNING_NO_DRIVERS: &str = "no drivers found nearby";
pub const WARNING_SEARCH_UNAVAILABLE: &str = "driver search is unavailable, trip left pending";

/// Turns a new trip into a persisted PENDING trip with at most one live offer cycle.
pub struct Dispatcher {
    store: Arc<dyn TripStore>,
    geo_index: Arc<dyn GeoIndex>,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TripStore>,
        geo_index: Arc<dyn GeoIndex>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            geo_index,
            notifier,
            clock,
            settings,
        }
    }

    pub async fn create_and_dispatch(&self, trip: Trip) -> Result<TripCreation, AppError> {
        // Nothing goes out unless the trip is durably stored first
        self.store.insert(&trip).await?;
        tracing::info!(
            "Created trip {} for passenger {} ({}, est. {} VND)",
            trip.id,
            trip.passenger_id,
            trip.vehicle_class,
            trip.fare.estimated
        );

        let dispatch = match self.run_offer_cycle(&trip).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("Dispatch for trip {} failed after creation: {}", trip.id, e);
                DispatchSummary {
                    drivers_notified: 0,
                    offers_delivered: 0,
                    search_radius_km: None,
                    warning: Some(format!("dispatch failed: {}", e)),
                }
            }
        };

        let trip = self.store.get(&trip.id).await?.unwrap_or(trip);
        Ok(TripCreation { trip, dispatch })
    }

    /// Start a fresh offer cycle for a PENDING trip whose previous cycle has lapsed.
    pub async fn redispatch(&self, trip_id: &str) -> Result<DispatchSummary, AppError> {
        let trip = self
            .store
            .get(trip_id)
            .await?
            .ok_or_else(|| AppError::trip_not_found(trip_id))?;

        if trip.status != TripStatus::Pending {
            return Err(AppError::invalid_transition(trip.status, "dispatch"));
        }
        if trip.has_live_offer(self.clock.now(), self.settings.acceptance_window) {
            return Err(AppError::OfferCycleActive(trip.id));
        }

        tracing::info!("Re-dispatching trip {}", trip.id);
        self.run_offer_cycle(&trip).await
    }

    /// Expanding-radius search, skipping drivers who already declined this trip.
    async fn find_candidates(&self, trip: &Trip) -> Result<Option<(f64, Vec<NearbyDriver>)>, AppError> {
        let origin = trip.pickup.location;

        let per_tier = self.settings.candidates_per_tier;
        // Rejecters may occupy the nearest slots, so ask for enough to drop them all
        let fetch = per_tier + trip.rejected_driver_ids.len();

        for &radius_km in &self.settings.search_radii_km {
            let mut hits = self
                .geo_index
                .nearby_drivers(origin.latitude, origin.longitude, radius_km, fetch)
                .await?;
            hits.retain(|hit| !trip.rejected_driver_ids.contains(&hit.driver_id));
            hits.truncate(per_tier);

            tracing::debug!("Trip {}: {} candidates within {} km", trip.id, hits.len(), radius_km);
            if !hits.is_empty() {
                return Ok(Some((radius_km, hits)));
            }
        }
        Ok(None)
    }

    async fn run_offer_cycle(&self, trip: &Trip) -> Result<DispatchSummary, AppError> {
        let (radius_km, candidates) = match self.find_candidates(trip).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::info!("Trip {}: {}", trip.id, WARNING_NO_DRIVERS);
                return Ok(DispatchSummary {
                    drivers_notified: 0,
                    offers_delivered: 0,
                    search_radius_km: None,
                    warning: Some(WARNING_NO_DRIVERS.to_string()),
                });
            }
            Err(e) => {
                tracing::warn!("Trip {}: driver search failed: {}", trip.id, e);
                return Ok(DispatchSummary {
                    drivers_notified: 0,
                    offers_delivered: 0,
                    search_radius_km: None,
                    warning: Some(WARNING_SEARCH_UNAVAILABLE.to_string()),
                });
            }
        };
        let driver_ids: Vec<String> = candidates.into_iter().map(|hit| hit.driver_id).collect();

        // Open the cycle against the offer timestamp we observed, so two
        // concurrent dispatches for the same trip cannot both open one.
        let opened_at = self.clock.now();
        let opened = self
            .store
            .compare_and_set(
                &trip.id,
                &Precondition::status(TripStatus::Pending).with_offer_sent_at(trip.offer_sent_at),
                &TripMutation::OpenOfferCycle {
                    driver_ids: driver_ids.clone(),
                },
                opened_at,
            )
            .await?;
        let trip = match opened {
            CasOutcome::Applied(trip) => trip,
            CasOutcome::Mismatch(current) if current.status == TripStatus::Pending => {
                return Err(AppError::OfferCycleActive(current.id));
            }
            CasOutcome::Mismatch(current) => {
                return Err(AppError::invalid_transition(current.status, "dispatch"));
            }
            CasOutcome::Missing => return Err(AppError::trip_not_found(&trip.id)),
        };

        let offer = ChannelMessage::offer(&trip, self.settings.acceptance_window.num_seconds());
        let report = fan_out_to_drivers(
            self.notifier.clone(),
            &driver_ids,
            &offer,
            self.settings.notification_timeout,
        )
        .await;
        if !report.failed.is_empty() {
            tracing::warn!(
                "Trip {}: offer not delivered to {} of {} drivers: {:?}",
                trip.id,
                report.failed.len(),
                driver_ids.len(),
                report.failed
            );
        }

        // The acceptance window runs from fan-out completion
        let stamped = self
            .store
            .compare_and_set(
                &trip.id,
                &Precondition::status(TripStatus::Pending).with_offer_sent_at(Some(opened_at)),
                &TripMutation::StampOfferSent,
                self.clock.now(),
            )
            .await;
        match stamped {
            Ok(CasOutcome::Applied(_)) => {}
            Ok(_) => tracing::debug!("Trip {} left its offer cycle before the stamp", trip.id),
            Err(e) => tracing::warn!("Trip {}: could not stamp offer time: {}", trip.id, e),
        }

        tracing::info!(
            "Trip {}: offered to {} drivers within {} km ({} delivered)",
            trip.id,
            driver_ids.len(),
            radius_km,
            report.delivered.len()
        );

        Ok(DispatchSummary {
            drivers_notified: driver_ids.len(),
            offers_delivered: report.delivered.len(),
            search_radius_km: Some(radius_km),
            warning: None,
        })
    }
}
