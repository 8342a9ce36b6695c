// src/services/settlement.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::settlement::{FareDetails, SettlementRequest, SettlementResult};
use crate::utils::geo::round_to;
use crate::utils::id_generator::generate_transaction_id;

pub const APP_COMMISSION_RATE: f64 = 0.20;

/// Payment settlement for a completed trip. Retrying with the same trip id must not charge twice.
#[async_trait]
pub trait SettlementService: Send + Sync {
    async fn complete(&self, request: &SettlementRequest) -> Result<SettlementResult, AppError>;
}

pub fn driver_earning(amount: f64) -> f64 {
    round_to(amount * (1.0 - APP_COMMISSION_RATE), 2)
}

pub struct RemoteSettlementService {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteSettlementService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SettlementService for RemoteSettlementService {
    async fn complete(&self, request: &SettlementRequest) -> Result<SettlementResult, AppError> {
        tracing::info!("Settling trip {} over {} km", request.trip_id, request.distance_km);

        let response = self
            .client
            .post(format!("{}/v1/trip-completion/complete", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Payment service rejected trip {}: {} {}", request.trip_id, status, body);
            return Err(AppError::UpstreamStatus {
                service: "payment service".to_string(),
                status,
            });
        }

        Ok(response.json().await?)
    }
}

/// In-process settlement with a per-trip idempotency record.
#[derive(Default)]
pub struct LedgerSettlementService {
    settled: Mutex<HashMap<String, SettlementResult>>,
}

impl LedgerSettlementService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn settled_count(&self) -> usize {
        self.settled.lock().await.len()
    }
}

#[async_trait]
impl SettlementService for LedgerSettlementService {
    async fn complete(&self, request: &SettlementRequest) -> Result<SettlementResult, AppError> {
        let mut settled = self.settled.lock().await;
        if let Some(existing) = settled.get(&request.trip_id) {
            tracing::info!("Trip {} already settled, replaying result", request.trip_id);
            return Ok(existing.clone());
        }

        let earning = driver_earning(request.quoted_fare);
        let result = SettlementResult {
            success: true,
            transaction_id: Some(generate_transaction_id(Utc::now())),
            message: Some(format!("settled via {}", request.payment_method)),
            fare_details: Some(FareDetails {
                total_fare: request.quoted_fare,
                driver_earning: Some(earning),
                app_commission: Some(round_to(request.quoted_fare - earning, 2)),
            }),
        };
        settled.insert(request.trip_id.clone(), result.clone());

        tracing::info!(
            "Settled trip {}: {} VND, driver {} earns {}",
            request.trip_id,
            request.quoted_fare,
            request.driver_id,
            earning
        );
        Ok(result)
    }
}
