// src/services/offer_arbiter.rs
use std::sync::Arc;
use tracing;

use crate::config::DispatchSettings;
use crate::errors::DispatchError as AppError;
use crate::models::messages::{AcceptOutcome, ChannelMessage, REASON_ACCEPTED_BY_ANOTHER};
use crate::models::transition::{CasOutcome, Precondition, TripMutation};
use crate::models::trip::{Trip, TripStatus};
use crate::services::driver_directory::{display_summary_or_placeholder, DriverDirectory};
use crate::services::messaging_service::{fan_out_to_drivers, NotificationService};
use crate::services::trip_store::TripStore;
use crate::utils::clock::Clock;

/// Why an accept attempt lost. Never shown to the driver, who only sees "not available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    UnknownTrip,
    NotPending,
    NoOpenOffer,
    MissingOfferTimestamp,
    WindowElapsed,
    LostRace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptDecision {
    Assigned(Trip),
    Unavailable(UnavailableReason),
}

impl AcceptDecision {
    pub fn outcome(&self) -> AcceptOutcome {
        match self {
            AcceptDecision::Assigned(_) => AcceptOutcome::Assigned,
            AcceptDecision::Unavailable(_) => AcceptOutcome::NotAvailable,
        }
    }
}

/// Decides who gets a trip when several drivers answer the same offer.
pub struct OfferArbiter {
    store: Arc<dyn TripStore>,
    notifier: Arc<dyn NotificationService>,
    directory: Arc<dyn DriverDirectory>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl OfferArbiter {
    pub fn new(
        store: Arc<dyn TripStore>,
        notifier: Arc<dyn NotificationService>,
        directory: Arc<dyn DriverDirectory>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            directory,
            clock,
            settings,
        }
    }

    /// At most one caller per trip ever gets `Assigned`. Store failures are
    /// returned as errors; every other loss is an `Unavailable` decision.
    pub async fn try_accept(&self, trip_id: &str, driver_id: &str) -> Result<AcceptDecision, AppError> {
        let now = self.clock.now();
        let Some(trip) = self.store.get(trip_id).await? else {
            return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::UnknownTrip));
        };

        if trip.status != TripStatus::Pending {
            return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::NotPending));
        }
        match trip.offer_sent_at {
            None if trip.notified_driver_ids.is_empty() => {
                return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::NoOpenOffer));
            }
            None => {
                tracing::warn!(
                    "Data anomaly: pending trip {} has no offer timestamp, refusing accept from {}",
                    trip_id,
                    driver_id
                );
                return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::MissingOfferTimestamp));
            }
            Some(sent_at) if now.signed_duration_since(sent_at) > self.settings.acceptance_window => {
                return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::WindowElapsed));
            }
            Some(_) => {}
        }

        // Pinned to the cycle we judged the window against: a deny or a new
        // cycle in between makes this read stale.
        let guard = Precondition::status(TripStatus::Pending).with_open_cycle(trip.offer_cycle);
        let outcome = self
            .store
            .compare_and_set(
                trip_id,
                &guard,
                &TripMutation::AssignDriver {
                    driver_id: driver_id.to_string(),
                },
                now,
            )
            .await?;

        let trip = match outcome {
            CasOutcome::Applied(trip) => trip,
            CasOutcome::Mismatch(_) => {
                return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::LostRace));
            }
            CasOutcome::Missing => {
                return Ok(self.unavailable(trip_id, driver_id, UnavailableReason::UnknownTrip));
            }
        };

        tracing::info!("Trip {} assigned to driver {}", trip.id, driver_id);
        self.announce_assignment(&trip, driver_id).await;
        Ok(AcceptDecision::Assigned(trip))
    }

    fn unavailable(&self, trip_id: &str, driver_id: &str, reason: UnavailableReason) -> AcceptDecision {
        tracing::info!("Accept of trip {} by {} refused: {:?}", trip_id, driver_id, reason);
        AcceptDecision::Unavailable(reason)
    }

    async fn announce_assignment(&self, trip: &Trip, winner: &str) {
        let losers: Vec<String> = trip
            .notified_driver_ids
            .iter()
            .filter(|id| id.as_str() != winner)
            .cloned()
            .collect();
        let withdrawal = ChannelMessage::cancelled(&trip.id, REASON_ACCEPTED_BY_ANOTHER);

        let notify_losers = fan_out_to_drivers(
            self.notifier.clone(),
            &losers,
            &withdrawal,
            self.settings.notification_timeout,
        );
        let notify_passenger = async {
            let driver_info = display_summary_or_placeholder(
                self.directory.as_ref(),
                winner,
                self.settings.profile_lookup_timeout,
            )
            .await;
            let message = ChannelMessage::DriverAssigned {
                trip_id: trip.id.clone(),
                driver_id: winner.to_string(),
                driver_info,
            };
            self.notifier.send_to_passenger(&trip.id, &message).await
        };

        let (report, passenger_notified) = tokio::join!(notify_losers, notify_passenger);
        if !report.failed.is_empty() {
            tracing::warn!("Trip {}: withdrawal not delivered to {:?}", trip.id, report.failed);
        }
        if !passenger_notified {
            tracing::warn!("Trip {}: passenger not told about driver {}", trip.id, winner);
        }
    }

    /// The assigned driver backs out before pickup; the trip returns to PENDING with no live offer.
    pub async fn deny(&self, trip_id: &str, driver_id: &str) -> Result<Trip, AppError> {
        let outcome = self
            .store
            .compare_and_set(
                trip_id,
                &Precondition::status(TripStatus::Accepted).with_driver(driver_id),
                &TripMutation::ReleaseDriver,
                self.clock.now(),
            )
            .await?;

        let trip = match outcome {
            CasOutcome::Applied(trip) => trip,
            CasOutcome::Mismatch(_) | CasOutcome::Missing => {
                tracing::info!("Deny of trip {} by {} ignored: not assigned to them", trip_id, driver_id);
                return Err(AppError::trip_not_found(trip_id));
            }
        };

        tracing::info!("Driver {} denied trip {}, back to pending", driver_id, trip_id);
        let message = ChannelMessage::DriverUnassigned {
            trip_id: trip.id.clone(),
        };
        if !self.notifier.send_to_passenger(&trip.id, &message).await {
            tracing::warn!("Trip {}: passenger not told about unassignment", trip.id);
        }
        Ok(trip)
    }

    /// Record that a driver turned the offer down. No status change.
    pub async fn reject(&self, trip_id: &str, driver_id: &str) -> Result<(), AppError> {
        let outcome = self
            .store
            .compare_and_set(
                trip_id,
                &Precondition::any(),
                &TripMutation::AddRejectedDriver {
                    driver_id: driver_id.to_string(),
                },
                self.clock.now(),
            )
            .await?;

        match outcome {
            CasOutcome::Missing => Err(AppError::trip_not_found(trip_id)),
            _ => {
                tracing::info!("Driver {} rejected trip {}", driver_id, trip_id);
                Ok(())
            }
        }
    }
}
