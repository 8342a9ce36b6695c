// src/models/transition.rs
//
// Guarded writes against a trip document. A store applies a `TripMutation`
// only while the `Precondition` still holds on the stored copy.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;
use crate::models::trip::{
    CancellationInfo, CancelledBy, PaymentStatus, RatingInfo, StatusHistoryEntry, Trip, TripStatus,
};

/// Expected previous values of the guarded fields. Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precondition {
    statuses: Vec<TripStatus>,
    driver_id: Option<String>,
    offer_sent_at: Option<Option<DateTime<Utc>>>,
    open_cycle: Option<u32>,
    unrated: bool,
}

impl Precondition {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status(status: TripStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn with_driver(mut self, driver_id: impl Into<String>) -> Self {
        self.driver_id = Some(driver_id.into());
        self
    }

    pub fn with_offer_sent_at(mut self, offer_sent_at: Option<DateTime<Utc>>) -> Self {
        self.offer_sent_at = Some(offer_sent_at);
        self
    }

    /// The offer cycle `cycle` must still be the current one and still be stamped.
    /// Re-stamping within a cycle keeps it open; a release or a new cycle closes it.
    pub fn with_open_cycle(mut self, cycle: u32) -> Self {
        self.open_cycle = Some(cycle);
        self
    }

    pub fn unrated(mut self) -> Self {
        self.unrated = true;
        self
    }

    pub fn holds(&self, trip: &Trip) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&trip.status) {
            return false;
        }
        if let Some(driver_id) = &self.driver_id {
            if !trip.is_assigned_to(driver_id) {
                return false;
            }
        }
        if let Some(expected) = &self.offer_sent_at {
            if trip.offer_sent_at != *expected {
                return false;
            }
        }
        if let Some(cycle) = self.open_cycle {
            if trip.offer_cycle != cycle || trip.offer_sent_at.is_none() {
                return false;
            }
        }
        !(self.unrated && trip.rating.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripMutation {
    OpenOfferCycle { driver_ids: Vec<String> },
    StampOfferSent,
    AssignDriver { driver_id: String },
    ReleaseDriver,
    AddRejectedDriver { driver_id: String },
    Start,
    Complete {
        actual_fare: f64,
        transaction_id: Option<String>,
        driver_earning: f64,
    },
    Cancel {
        cancelled_by: CancelledBy,
        reason: Option<String>,
    },
    Rate { stars: u8, comment: Option<String> },
    SetPaymentStatus { status: PaymentStatus },
}

/// Outcome of a guarded write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Applied(Trip),
    /// The precondition did not hold; carries the stored trip as observed.
    Mismatch(Trip),
    Missing,
}

impl Trip {
    /// Apply a mutation in place. Illegal state-machine moves are refused and leave the trip untouched.
    pub fn apply(&mut self, mutation: &TripMutation, at: DateTime<Utc>) -> Result<(), DispatchError> {
        match mutation {
            TripMutation::OpenOfferCycle { driver_ids } => {
                self.require_status(TripStatus::Pending, "open an offer cycle for")?;
                self.notified_driver_ids = driver_ids.clone();
                self.offer_sent_at = Some(at);
                self.offer_cycle += 1;
            }
            TripMutation::StampOfferSent => {
                self.require_status(TripStatus::Pending, "stamp the offer of")?;
                self.offer_sent_at = Some(at);
            }
            TripMutation::AssignDriver { driver_id } => {
                self.transition(TripStatus::Accepted, "accept", at)?;
                self.driver_id = Some(driver_id.clone());
            }
            TripMutation::ReleaseDriver => {
                self.transition(TripStatus::Pending, "deny", at)?;
                self.driver_id = None;
                self.notified_driver_ids.clear();
                self.offer_sent_at = None;
                self.offer_cycle += 1;
            }
            TripMutation::AddRejectedDriver { driver_id } => {
                if !self.rejected_driver_ids.contains(driver_id) {
                    self.rejected_driver_ids.push(driver_id.clone());
                }
            }
            TripMutation::Start => {
                self.transition(TripStatus::OnTrip, "start", at)?;
                self.started_at = Some(at);
            }
            TripMutation::Complete {
                actual_fare,
                transaction_id,
                driver_earning,
            } => {
                self.transition(TripStatus::Completed, "complete", at)?;
                self.ended_at = Some(at);
                self.fare.actual = Some(*actual_fare);
                self.fare.discount = Some(0.0);
                self.fare.tax = Some(0.0);
                self.payment.status = PaymentStatus::Success;
                self.payment.transaction_id = transaction_id.clone();
                self.payment.driver_earning = Some(*driver_earning);
                self.payment.paid_at = Some(at);
            }
            TripMutation::Cancel { cancelled_by, reason } => {
                self.transition(TripStatus::Cancelled, "cancel", at)?;
                self.driver_id = None;
                self.cancellation = Some(CancellationInfo {
                    cancelled_by: *cancelled_by,
                    reason: reason.clone(),
                    cancelled_at: at,
                });
            }
            TripMutation::Rate { stars, comment } => {
                if self.status != TripStatus::Completed {
                    return Err(DispatchError::TripNotCompleted);
                }
                if self.rating.is_some() {
                    return Err(DispatchError::TripAlreadyRated);
                }
                self.rating = Some(RatingInfo {
                    stars: *stars,
                    comment: comment.clone(),
                    rated_at: at,
                });
            }
            TripMutation::SetPaymentStatus { status } => {
                self.payment.status = *status;
                if *status == PaymentStatus::Success {
                    self.payment.paid_at = Some(at);
                }
            }
        }

        self.updated_at = at;
        self.version += 1;
        Ok(())
    }

    fn require_status(&self, status: TripStatus, action: &str) -> Result<(), DispatchError> {
        if self.status != status {
            return Err(DispatchError::invalid_transition(self.status, action));
        }
        Ok(())
    }

    fn transition(&mut self, next: TripStatus, action: &str, at: DateTime<Utc>) -> Result<(), DispatchError> {
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::invalid_transition(self.status, action));
        }
        // Never let history run backwards, even if instance clocks disagree
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        self.status = next;
        self.history.push(StatusHistoryEntry { status: next, timestamp });
        Ok(())
    }
}
