// src/services/trip_lifecycle.rs
use serde_json::Value;
use std::sync::Arc;
use tracing;

use crate::config::DispatchSettings;
use crate::errors::DispatchError as AppError;
use crate::models::messages::ChannelMessage;
use crate::models::settlement::SettlementRequest;
use crate::models::transition::{CasOutcome, Precondition, TripMutation};
use crate::models::trip::{
    CancelledBy, PaymentResult, PaymentStatus, RatingInfo, Trip, TripCompletion, TripStatus,
};
use crate::services::messaging_service::{fan_out_to_drivers, NotificationService};
use crate::services::pricing::calculate_fare;
use crate::services::settlement::SettlementService;
use crate::services::trip_store::TripStore;
use crate::utils::clock::Clock;

const CANCEL_ATTEMPTS: usize = 3;
const BANK_TRANSFER_CODE: &str = "BANK_TRANSFER";
pub const MAX_RATING_COMMENT_LEN: usize = 500;

/// Post-assignment transitions: start, complete, cancel, rate.
pub struct TripLifecycle {
    store: Arc<dyn TripStore>,
    settlement: Arc<dyn SettlementService>,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl TripLifecycle {
    pub fn new(
        store: Arc<dyn TripStore>,
        settlement: Arc<dyn SettlementService>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            settlement,
            notifier,
            clock,
            settings,
        }
    }

    async fn load(&self, trip_id: &str) -> Result<Trip, AppError> {
        self.store
            .get(trip_id)
            .await?
            .ok_or_else(|| AppError::trip_not_found(trip_id))
    }

    async fn tell_passenger(&self, trip: &Trip, message: &ChannelMessage) {
        if !self.notifier.send_to_passenger(&trip.id, message).await {
            tracing::warn!("Trip {}: {} not delivered to passenger", trip.id, message.kind());
        }
    }

    /// Passenger picked up. When `driver_id` is given it must be the assigned driver.
    pub async fn start(&self, trip_id: &str, driver_id: Option<&str>) -> Result<Trip, AppError> {
        let mut guard = Precondition::status(TripStatus::Accepted);
        if let Some(driver_id) = driver_id {
            guard = guard.with_driver(driver_id);
        }

        let trip = match self
            .store
            .compare_and_set(trip_id, &guard, &TripMutation::Start, self.clock.now())
            .await?
        {
            CasOutcome::Applied(trip) => trip,
            CasOutcome::Missing => return Err(AppError::trip_not_found(trip_id)),
            CasOutcome::Mismatch(current) if current.status == TripStatus::Accepted => {
                // Right state, different driver
                return Err(AppError::trip_not_found(trip_id));
            }
            CasOutcome::Mismatch(current) => {
                return Err(AppError::invalid_transition(current.status, "start"));
            }
        };

        tracing::info!("Trip {} started", trip.id);
        self.tell_passenger(&trip, &ChannelMessage::status_changed(&trip)).await;
        Ok(trip)
    }

    /// Price the ride, settle it, then mark it COMPLETED.
    ///
    /// Idempotent: completing an already COMPLETED trip returns the stored
    /// result without settling again. A failed settlement leaves the trip ON_TRIP.
    /// The fare and earning recorded are the ones the payment service settled.
    pub async fn complete(
        &self,
        trip_id: &str,
        distance_km: f64,
        user_bank_info: Option<Value>,
    ) -> Result<TripCompletion, AppError> {
        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(AppError::validation_error(
                "distance_km",
                "must be a non-negative number",
            ));
        }

        let trip = self.load(trip_id).await?;
        match trip.status {
            TripStatus::Completed => {
                tracing::info!("Trip {} already completed, returning stored result", trip.id);
                return Ok(completion_of(trip));
            }
            TripStatus::OnTrip => {}
            other => return Err(AppError::invalid_transition(other, "complete")),
        }

        let driver_id = trip.driver_id.clone().ok_or_else(|| {
            AppError::DataAnomaly(format!("trip {} is on trip without a driver", trip.id))
        })?;
        let payment_method = trip.payment.method.settlement_code();
        let request = SettlementRequest {
            trip_id: trip.id.clone(),
            driver_id,
            user_id: trip.passenger_id.clone(),
            distance_km,
            payment_method: payment_method.to_string(),
            user_bank_info: user_bank_info.filter(|_| payment_method == BANK_TRANSFER_CODE),
            quoted_fare: calculate_fare(distance_km, trip.vehicle_class),
        };

        let settled = self.settlement.complete(&request).await.map_err(|e| {
            tracing::error!("Settlement of trip {} failed: {}", trip.id, e);
            AppError::SettlementFailed(e.to_string())
        })?;
        let amounts = settled.settled_amounts().map_err(|reason| {
            tracing::error!("Settlement of trip {} not accepted: {}", trip.id, reason);
            AppError::SettlementFailed(reason)
        })?;

        let completed = self
            .store
            .compare_and_set(
                &trip.id,
                &Precondition::status(TripStatus::OnTrip),
                &TripMutation::Complete {
                    actual_fare: amounts.total_fare,
                    transaction_id: settled.transaction_id.clone(),
                    driver_earning: amounts.driver_earning,
                },
                self.clock.now(),
            )
            .await?;

        match completed {
            CasOutcome::Applied(trip) => {
                tracing::info!(
                    "Trip {} completed: {} VND over {} km",
                    trip.id,
                    amounts.total_fare,
                    distance_km
                );
                self.tell_passenger(&trip, &ChannelMessage::status_changed(&trip)).await;
                Ok(TripCompletion {
                    payment: PaymentResult {
                        success: true,
                        transaction_id: settled.transaction_id,
                        total_fare: amounts.total_fare,
                        driver_earning: amounts.driver_earning,
                    },
                    trip,
                })
            }
            // A concurrent completion got there first
            CasOutcome::Mismatch(current) if current.status == TripStatus::Completed => {
                Ok(completion_of(current))
            }
            CasOutcome::Mismatch(current) => Err(AppError::invalid_transition(current.status, "complete")),
            CasOutcome::Missing => Err(AppError::trip_not_found(trip_id)),
        }
    }

    /// Cancel before pickup. Whoever was holding an offer or the assignment is told.
    pub async fn cancel(
        &self,
        trip_id: &str,
        cancelled_by: CancelledBy,
        reason: Option<String>,
    ) -> Result<Trip, AppError> {
        let mutation = TripMutation::Cancel {
            cancelled_by,
            reason: reason.clone(),
        };

        for _ in 0..CANCEL_ATTEMPTS {
            let observed = self.load(trip_id).await?;
            if !matches!(observed.status, TripStatus::Pending | TripStatus::Accepted) {
                return Err(AppError::invalid_transition(observed.status, "cancel"));
            }

            // Pin the state we are replacing so we notify the right drivers
            let mut guard = Precondition::status(observed.status).with_offer_sent_at(observed.offer_sent_at);
            if let Some(driver_id) = &observed.driver_id {
                guard = guard.with_driver(driver_id.clone());
            }

            match self
                .store
                .compare_and_set(trip_id, &guard, &mutation, self.clock.now())
                .await?
            {
                CasOutcome::Applied(trip) => {
                    tracing::info!("Trip {} cancelled by {:?}", trip.id, cancelled_by);
                    self.announce_cancellation(&observed, &trip, reason.as_deref()).await;
                    return Ok(trip);
                }
                CasOutcome::Mismatch(_) => {
                    tracing::debug!("Trip {} changed while cancelling, retrying", trip_id);
                }
                CasOutcome::Missing => return Err(AppError::trip_not_found(trip_id)),
            }
        }

        Err(AppError::StoreContention(trip_id.to_string()))
    }

    async fn announce_cancellation(&self, before: &Trip, after: &Trip, reason: Option<&str>) {
        let cancelled_by = after.cancellation.as_ref().map(|c| c.cancelled_by);
        let message = ChannelMessage::cancelled(&after.id, reason.unwrap_or("trip cancelled"));

        let drivers: Vec<String> = match (&before.driver_id, before.status) {
            (Some(driver_id), TripStatus::Accepted) if cancelled_by != Some(CancelledBy::Driver) => {
                vec![driver_id.clone()]
            }
            (None, TripStatus::Pending)
                if before.has_live_offer(self.clock.now(), self.settings.acceptance_window) =>
            {
                before.notified_driver_ids.clone()
            }
            _ => Vec::new(),
        };
        if !drivers.is_empty() {
            fan_out_to_drivers(
                self.notifier.clone(),
                &drivers,
                &message,
                self.settings.notification_timeout,
            )
            .await;
        }

        if cancelled_by != Some(CancelledBy::Passenger) {
            self.tell_passenger(after, &ChannelMessage::status_changed(after)).await;
        }
    }

    /// One rating per COMPLETED trip.
    pub async fn rate(&self, trip_id: &str, stars: u8, comment: Option<String>) -> Result<RatingInfo, AppError> {
        if !(1..=5).contains(&stars) {
            return Err(AppError::validation_error("stars", "must be between 1 and 5"));
        }
        if comment.as_ref().is_some_and(|c| c.chars().count() > MAX_RATING_COMMENT_LEN) {
            return Err(AppError::validation_error(
                "comment",
                format!("must be at most {} characters", MAX_RATING_COMMENT_LEN),
            ));
        }

        let outcome = self
            .store
            .compare_and_set(
                trip_id,
                &Precondition::status(TripStatus::Completed).unrated(),
                &TripMutation::Rate { stars, comment },
                self.clock.now(),
            )
            .await?;

        match outcome {
            CasOutcome::Applied(trip) => {
                tracing::info!("Trip {} rated {} stars", trip.id, stars);
                trip.rating
                    .ok_or_else(|| AppError::internal_error("rating missing after write"))
            }
            CasOutcome::Mismatch(current) if current.status != TripStatus::Completed => {
                Err(AppError::TripNotCompleted)
            }
            CasOutcome::Mismatch(_) => Err(AppError::TripAlreadyRated),
            CasOutcome::Missing => Err(AppError::trip_not_found(trip_id)),
        }
    }

    pub async fn update_payment_status(&self, trip_id: &str, status: PaymentStatus) -> Result<Trip, AppError> {
        match self
            .store
            .compare_and_set(
                trip_id,
                &Precondition::any(),
                &TripMutation::SetPaymentStatus { status },
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(trip) => {
                tracing::info!("Trip {} payment status set to {:?}", trip.id, status);
                Ok(trip)
            }
            CasOutcome::Mismatch(_) | CasOutcome::Missing => Err(AppError::trip_not_found(trip_id)),
        }
    }
}

fn completion_of(trip: Trip) -> TripCompletion {
    let payment = PaymentResult {
        success: trip.payment.status == PaymentStatus::Success,
        transaction_id: trip.payment.transaction_id.clone(),
        total_fare: trip.fare.actual.unwrap_or(trip.fare.estimated),
        driver_earning: trip.payment.driver_earning.unwrap_or_default(),
    };
    TripCompletion { trip, payment }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settlement::{FareDetails, SettlementResult};
    use crate::models::trip::fixtures;
    use crate::services::messaging_service::RecordingNotificationService;
    use crate::services::settlement::LedgerSettlementService;
    use crate::services::trip_store::MemoryTripStore;
    use crate::utils::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TRIP_ID: &str = "trp-250101-abc12";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    /// Counts calls and answers with a fixed result.
    struct CountingSettlement {
        calls: AtomicUsize,
        success: bool,
    }

    #[async_trait]
    impl SettlementService for CountingSettlement {
        async fn complete(&self, request: &SettlementRequest) -> Result<SettlementResult, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SettlementResult {
                success: self.success,
                transaction_id: self.success.then(|| format!("txn-{}", request.trip_id)),
                message: (!self.success).then(|| "card declined".to_string()),
                fare_details: self.success.then(|| FareDetails {
                    total_fare: request.quoted_fare,
                    driver_earning: Some(request.quoted_fare * 0.8),
                    app_commission: None,
                }),
            })
        }
    }

    struct Harness {
        lifecycle: TripLifecycle,
        store: Arc<MemoryTripStore>,
        notifier: Arc<RecordingNotificationService>,
        clock: Arc<ManualClock>,
    }

    fn harness(settlement: Arc<dyn SettlementService>) -> Harness {
        let store = Arc::new(MemoryTripStore::new());
        let notifier = Arc::new(RecordingNotificationService::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let lifecycle = TripLifecycle::new(
            store.clone(),
            settlement,
            notifier.clone(),
            clock.clone(),
            DispatchSettings::default(),
        );
        Harness { lifecycle, store, notifier, clock }
    }

    async fn seed(store: &MemoryTripStore, status: TripStatus) -> Trip {
        let mut trip = fixtures::trip(TRIP_ID, t0());
        trip.notified_driver_ids = vec!["drv-a".to_string(), "drv-b".to_string()];
        trip.offer_sent_at = Some(t0());
        let assign = TripMutation::AssignDriver { driver_id: "drv-a".into() };
        let path = match status {
            TripStatus::Pending => vec![],
            TripStatus::Accepted => vec![assign],
            TripStatus::OnTrip => vec![assign, TripMutation::Start],
            _ => unreachable!("seed only pre-completion states"),
        };
        for step in &path {
            trip.apply(step, t0()).unwrap();
        }
        store.insert(&trip).await.unwrap();
        trip
    }

    #[tokio::test]
    async fn test_start_requires_assigned_driver() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::Accepted).await;

        assert!(matches!(
            h.lifecycle.start(TRIP_ID, Some("drv-b")).await.unwrap_err(),
            AppError::TripNotFound(_)
        ));
        let trip = h.lifecycle.start(TRIP_ID, Some("drv-a")).await.unwrap();
        assert_eq!(trip.status, TripStatus::OnTrip);
        assert_eq!(trip.started_at, Some(t0()));

        assert!(matches!(
            h.lifecycle.start(TRIP_ID, None).await.unwrap_err(),
            AppError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_complete_settles_once() {
        let settlement = Arc::new(CountingSettlement {
            calls: AtomicUsize::new(0),
            success: true,
        });
        let h = harness(settlement.clone());
        seed(&h.store, TripStatus::OnTrip).await;
        h.clock.advance(Duration::minutes(20));

        let done = h.lifecycle.complete(TRIP_ID, 10.0, None).await.unwrap();
        assert_eq!(done.trip.status, TripStatus::Completed);
        assert_eq!(done.trip.fare.actual, Some(120000.0));
        assert_eq!(done.payment.total_fare, 120000.0);
        assert_eq!(done.payment.driver_earning, 96000.0);
        assert_eq!(done.trip.payment.status, PaymentStatus::Success);
        assert_eq!(done.trip.history.len(), 3);

        let again = h.lifecycle.complete(TRIP_ID, 42.0, None).await.unwrap();
        assert_eq!(again.payment, done.payment);
        assert_eq!(settlement.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.notifier.sent_to_passenger(TRIP_ID),
            vec![ChannelMessage::TripStatusChanged {
                trip_id: TRIP_ID.to_string(),
                status: TripStatus::Completed,
            }]
        );
    }

    #[tokio::test]
    async fn test_declined_settlement_leaves_trip_on_trip() {
        let h = harness(Arc::new(CountingSettlement {
            calls: AtomicUsize::new(0),
            success: false,
        }));
        seed(&h.store, TripStatus::OnTrip).await;

        let err = h.lifecycle.complete(TRIP_ID, 10.0, None).await.unwrap_err();
        assert!(matches!(err, AppError::SettlementFailed(ref msg) if msg == "card declined"));

        let trip = h.store.get(TRIP_ID).await.unwrap().unwrap();
        assert_eq!(trip.status, TripStatus::OnTrip);
        assert!(trip.fare.actual.is_none());
    }

    /// Answers every settlement with the same reply and keeps the requests.
    struct FixedReplySettlement {
        reply: SettlementResult,
        requests: std::sync::Mutex<Vec<SettlementRequest>>,
    }

    #[async_trait]
    impl SettlementService for FixedReplySettlement {
        async fn complete(&self, request: &SettlementRequest) -> Result<SettlementResult, AppError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_settlement_without_earning_fails_completion() {
        let settlement = Arc::new(FixedReplySettlement {
            reply: serde_json::from_value(serde_json::json!({
                "success": true,
                "transaction_id": "txn-250101-q8w2e",
                "fare_details": { "total_fare": 120000.0 }
            }))
            .unwrap(),
            requests: Default::default(),
        });
        let h = harness(settlement.clone());
        seed(&h.store, TripStatus::OnTrip).await;

        let err = h.lifecycle.complete(TRIP_ID, 10.0, None).await.unwrap_err();
        assert!(matches!(err, AppError::SettlementFailed(ref msg) if msg.contains("driver_earning")));

        let trip = h.store.get(TRIP_ID).await.unwrap().unwrap();
        assert_eq!(trip.status, TripStatus::OnTrip);
        assert!(trip.payment.driver_earning.is_none());
    }

    #[tokio::test]
    async fn test_settled_fare_wins_over_quote_and_bank_info_forwarded() {
        let settlement = Arc::new(FixedReplySettlement {
            reply: serde_json::from_value(serde_json::json!({
                "success": true,
                "transaction_id": "txn-250101-q8w2e",
                "fare_details": { "total_fare": 125000.0, "driver_earning": 100000.0 }
            }))
            .unwrap(),
            requests: Default::default(),
        });
        let h = harness(settlement.clone());

        let mut trip = fixtures::trip(TRIP_ID, t0());
        trip.payment.method = crate::models::trip::PaymentMethod::EWallet;
        trip.apply(&TripMutation::AssignDriver { driver_id: "drv-a".into() }, t0()).unwrap();
        trip.apply(&TripMutation::Start, t0()).unwrap();
        h.store.insert(&trip).await.unwrap();

        let bank = serde_json::json!({ "bank_code": "NCB", "account_number": "9704198526191432198" });
        let done = h.lifecycle.complete(TRIP_ID, 10.0, Some(bank.clone())).await.unwrap();
        assert_eq!(done.payment.total_fare, 125000.0);
        assert_eq!(done.trip.fare.actual, Some(125000.0));
        assert_eq!(done.trip.payment.driver_earning, Some(100000.0));

        let requests = settlement.requests.lock().unwrap();
        assert_eq!(requests[0].user_id, trip.passenger_id);
        assert_eq!(requests[0].payment_method, "BANK_TRANSFER");
        assert_eq!(requests[0].user_bank_info, Some(bank));
        assert_eq!(requests[0].quoted_fare, 120000.0);
    }

    #[tokio::test]
    async fn test_complete_rejects_bad_input_and_state() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::Accepted).await;

        assert!(matches!(
            h.lifecycle.complete(TRIP_ID, -1.0, None).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            h.lifecycle.complete(TRIP_ID, f64::NAN, None).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            h.lifecycle.complete(TRIP_ID, 5.0, None).await.unwrap_err(),
            AppError::InvalidTransition { .. }
        ));
        assert!(matches!(
            h.lifecycle.complete("trp-250101-zzzzz", 5.0, None).await.unwrap_err(),
            AppError::TripNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_withdraws_live_offer() {
        let ledger = Arc::new(LedgerSettlementService::new());
        let h = harness(ledger.clone());
        seed(&h.store, TripStatus::Pending).await;
        h.clock.advance(Duration::seconds(4));

        let trip = h
            .lifecycle
            .cancel(TRIP_ID, CancelledBy::Passenger, Some("changed plans".into()))
            .await
            .unwrap();

        assert_eq!(trip.status, TripStatus::Cancelled);
        assert_eq!(trip.history.len(), 1);
        assert_eq!(ledger.settled_count().await, 0);
        for driver in ["drv-a", "drv-b"] {
            assert_eq!(
                h.notifier.sent_to_driver(driver),
                vec![ChannelMessage::cancelled(TRIP_ID, "changed plans")]
            );
        }
        assert!(h.notifier.sent_to_passenger(TRIP_ID).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_accepted_tells_assigned_driver() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::Accepted).await;

        let trip = h.lifecycle.cancel(TRIP_ID, CancelledBy::System, None).await.unwrap();
        assert!(trip.driver_id.is_none());
        assert_eq!(h.notifier.sent_to_driver("drv-a").len(), 1);
        assert!(h.notifier.sent_to_driver("drv-b").is_empty());
        assert_eq!(h.notifier.sent_to_passenger(TRIP_ID).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_pickup_is_refused() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::OnTrip).await;

        assert!(matches!(
            h.lifecycle.cancel(TRIP_ID, CancelledBy::Passenger, None).await.unwrap_err(),
            AppError::InvalidTransition { .. }
        ));
        assert_eq!(h.store.get(TRIP_ID).await.unwrap().unwrap().status, TripStatus::OnTrip);
    }

    #[tokio::test]
    async fn test_rating_rules() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::OnTrip).await;

        assert!(matches!(
            h.lifecycle.rate(TRIP_ID, 5, None).await.unwrap_err(),
            AppError::TripNotCompleted
        ));

        h.lifecycle.complete(TRIP_ID, 3.0, None).await.unwrap();
        assert!(matches!(
            h.lifecycle.rate(TRIP_ID, 0, None).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));
        assert!(matches!(
            h.lifecycle.rate(TRIP_ID, 6, None).await.unwrap_err(),
            AppError::ValidationFailed(_)
        ));

        let rating = h.lifecycle.rate(TRIP_ID, 4, Some("smooth ride".into())).await.unwrap();
        assert_eq!(rating.stars, 4);
        assert!(matches!(
            h.lifecycle.rate(TRIP_ID, 5, None).await.unwrap_err(),
            AppError::TripAlreadyRated
        ));
        assert!(matches!(
            h.lifecycle.rate("trp-250101-zzzzz", 5, None).await.unwrap_err(),
            AppError::TripNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_payment_status_update() {
        let h = harness(Arc::new(LedgerSettlementService::new()));
        seed(&h.store, TripStatus::Accepted).await;

        let trip = h
            .lifecycle
            .update_payment_status(TRIP_ID, PaymentStatus::Failed)
            .await
            .unwrap();
        assert_eq!(trip.payment.status, PaymentStatus::Failed);
        assert_eq!(trip.status, TripStatus::Accepted);
    }
}
