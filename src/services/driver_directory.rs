// src/services/driver_directory.rs
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::models::driver::DriverDisplaySummary;
use crate::services::credentials::CredentialProvider;

/// Driver profile lookups, best-effort.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn display_summary(&self, driver_id: &str) -> Result<DriverDisplaySummary, AppError>;
}

/// Lookup that always yields something to show: the profile, or the placeholder.
pub async fn display_summary_or_placeholder(
    directory: &dyn DriverDirectory,
    driver_id: &str,
    timeout: Duration,
) -> DriverDisplaySummary {
    match tokio::time::timeout(timeout, directory.display_summary(driver_id)).await {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            tracing::warn!("Driver profile lookup for {} failed, using placeholder: {}", driver_id, e);
            DriverDisplaySummary::placeholder()
        }
        Err(_) => {
            tracing::warn!("Driver profile lookup for {} timed out, using placeholder", driver_id);
            DriverDisplaySummary::placeholder()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriverProfile {
    name: String,
    vehicle: Option<VehicleProfile>,
}

#[derive(Debug, Deserialize)]
struct VehicleProfile {
    license_plate: String,
}

pub struct RemoteDriverDirectory {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl RemoteDriverDirectory {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }
}

#[async_trait]
impl DriverDirectory for RemoteDriverDirectory {
    async fn display_summary(&self, driver_id: &str) -> Result<DriverDisplaySummary, AppError> {
        let token = self.credentials.bearer_token().await?;
        let response = self
            .client
            .get(format!("{}/drivers/internal/{}", self.base_url, driver_id))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            self.credentials.invalidate().await;
            return Err(AppError::Unauthorized("driver service refused the service token".to_string()));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("driver {}", driver_id)));
        }
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                service: "driver service".to_string(),
                status: status.as_u16(),
            });
        }

        let profile: DriverProfile = response.json().await?;
        Ok(DriverDisplaySummary {
            name: profile.name,
            vehicle_plate: profile
                .vehicle
                .map(|vehicle| vehicle.license_plate)
                .unwrap_or_else(|| DriverDisplaySummary::PLACEHOLDER_PLATE.to_string()),
        })
    }
}

/// Profiles held in memory. Unknown drivers are reported as not found.
#[derive(Default)]
pub struct StaticDriverDirectory {
    profiles: HashMap<String, DriverDisplaySummary>,
}

impl StaticDriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(mut self, driver_id: &str, name: &str, vehicle_plate: &str) -> Self {
        self.profiles.insert(
            driver_id.to_string(),
            DriverDisplaySummary {
                name: name.to_string(),
                vehicle_plate: vehicle_plate.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl DriverDirectory for StaticDriverDirectory {
    async fn display_summary(&self, driver_id: &str) -> Result<DriverDisplaySummary, AppError> {
        self.profiles
            .get(driver_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("driver {}", driver_id)))
    }
}
