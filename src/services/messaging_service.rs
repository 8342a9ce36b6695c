// src/services/messaging_service.rs
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::messages::ChannelMessage;

/// Addressable delivery to online drivers and trip passengers.
///
/// Both sends report whether the message was handed to the recipient's
/// channel. Failures are logged by the implementation and never raised.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_to_driver(&self, driver_id: &str, message: &ChannelMessage) -> bool;
    async fn send_to_passenger(&self, trip_id: &str, message: &ChannelMessage) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanOutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Send one message to many drivers, one task per recipient.
///
/// A slow or unreachable driver only costs its own task; the rest still go out.
pub async fn fan_out_to_drivers(
    notifier: Arc<dyn NotificationService>,
    driver_ids: &[String],
    message: &ChannelMessage,
    per_send_timeout: Duration,
) -> FanOutReport {
    let tasks = driver_ids.iter().cloned().map(|driver_id| {
        let notifier = notifier.clone();
        let message = message.clone();
        let handle = tokio::spawn({
            let driver_id = driver_id.clone();
            async move {
                tokio::time::timeout(per_send_timeout, notifier.send_to_driver(&driver_id, &message))
                    .await
                    .unwrap_or(false)
            }
        });
        async move { (driver_id, handle.await.unwrap_or(false)) }
    });

    let mut report = FanOutReport::default();
    for (driver_id, delivered) in join_all(tasks).await {
        if delivered {
            report.delivered.push(driver_id);
        } else {
            report.failed.push(driver_id);
        }
    }

    tracing::debug!(
        "{} fan-out: {} delivered, {} failed",
        message.kind(),
        report.delivered.len(),
        report.failed.len()
    );
    report
}

// ------------------------------
// Remote location service
// ------------------------------

#[derive(Debug, Serialize)]
struct NotifyDriversRequest<'a> {
    driver_ids: Vec<&'a str>,
    payload: &'a ChannelMessage,
}

#[derive(Debug, Serialize)]
struct NotifyParticipantRequest<'a> {
    payload: &'a ChannelMessage,
}

#[derive(Debug, Deserialize)]
struct NotifyDriversResponse {
    #[serde(default)]
    sent_count: usize,
}

/// Pushes through the location service instance that owns the sockets.
pub struct RemoteNotificationService {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteNotificationService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_drivers(&self, driver_id: &str, message: &ChannelMessage) -> Result<bool, AppError> {
        let response = self
            .client
            .post(format!("{}/notify/drivers", self.base_url))
            .json(&NotifyDriversRequest {
                driver_ids: vec![driver_id],
                payload: message,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                service: "location service".to_string(),
                status: response.status().as_u16(),
            });
        }
        let body: NotifyDriversResponse = response.json().await?;
        Ok(body.sent_count > 0)
    }

    async fn post_passenger(&self, trip_id: &str, message: &ChannelMessage) -> Result<bool, AppError> {
        let response = self
            .client
            .post(format!("{}/notify/trip/{}/passenger", self.base_url, trip_id))
            .json(&NotifyParticipantRequest { payload: message })
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl NotificationService for RemoteNotificationService {
    async fn send_to_driver(&self, driver_id: &str, message: &ChannelMessage) -> bool {
        match self.post_drivers(driver_id, message).await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!("Could not push {} to driver {}: {}", message.kind(), driver_id, e);
                false
            }
        }
    }

    async fn send_to_passenger(&self, trip_id: &str, message: &ChannelMessage) -> bool {
        match self.post_passenger(trip_id, message).await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!("Could not push {} to passenger of trip {}: {}", message.kind(), trip_id, e);
                false
            }
        }
    }
}

// ------------------------------
// Recording service for tests
// ------------------------------

#[cfg(test)]
pub(crate) use recording::{Recipient, RecordingNotificationService};
