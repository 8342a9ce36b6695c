// src/config.rs
use chrono::Duration;
use std::fmt;
use std::str::FromStr;
use tracing::Level;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_ACCEPTANCE_WINDOW_SECS: i64 = 16;
const DEFAULT_SEARCH_RADII_KM: [f64; 3] = [3.0, 7.0, 15.0];
const DEFAULT_CANDIDATES_PER_TIER: usize = 10;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROFILE_TIMEOUT_SECS: u64 = 5;

/// A value that never shows up in logs or Debug output.
#[derive(Clone, Default)]
pub struct Secret<T>
where
    T: Clone + Default,
{
    value: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + Default> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Tuning for the matching protocol.
#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// How long after `offer_sent_at` an accept is still honoured.
    pub acceptance_window: Duration,
    /// Radius tiers searched in order, stopping at the first tier with a candidate.
    pub search_radii_km: Vec<f64>,
    pub candidates_per_tier: usize,
    /// Budget for a single push to one recipient.
    pub notification_timeout: std::time::Duration,
    pub profile_lookup_timeout: std::time::Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            acceptance_window: Duration::seconds(DEFAULT_ACCEPTANCE_WINDOW_SECS),
            search_radii_km: DEFAULT_SEARCH_RADII_KM.to_vec(),
            candidates_per_tier: DEFAULT_CANDIDATES_PER_TIER,
            notification_timeout: std::time::Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            profile_lookup_timeout: std::time::Duration::from_secs(DEFAULT_PROFILE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_level: Level,
    /// Unset means in-memory trip store and geo index.
    pub redis_url: Option<String>,
    /// Unset means driver channels live in this process.
    pub location_service_url: Option<String>,
    /// Unset means the in-process settlement ledger.
    pub payment_service_url: Option<String>,
    pub driver_service_url: Option<String>,
    pub user_service_url: Option<String>,
    pub service_client_id: Option<String>,
    pub service_client_secret: Secret<String>,
    pub mapbox_access_token: Option<Secret<String>>,
    pub upstream_timeout: std::time::Duration,
    pub dispatch: DispatchSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: Level::INFO,
            redis_url: None,
            location_service_url: None,
            payment_service_url: None,
            driver_service_url: None,
            user_service_url: None,
            service_client_id: None,
            service_client_secret: Secret::default(),
            mapbox_access_token: None,
            upstream_timeout: std::time::Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            dispatch: DispatchSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let upstream_timeout = std::time::Duration::from_secs(parse_or(
            &get,
            "UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        ));
        let dispatch = DispatchSettings {
            acceptance_window: Duration::seconds(parse_checked(
                &get,
                "ACCEPTANCE_WINDOW_SECS",
                DEFAULT_ACCEPTANCE_WINDOW_SECS,
                |secs| *secs >= 0,
            )),
            search_radii_km: parse_radii(get("SEARCH_RADII_KM")),
            candidates_per_tier: parse_checked(
                &get,
                "CANDIDATES_PER_TIER",
                DEFAULT_CANDIDATES_PER_TIER,
                |count| *count > 0,
            ),
            notification_timeout: upstream_timeout,
            ..DispatchSettings::default()
        };

        Self {
            host: get("DISPATCH_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "DISPATCH_PORT", DEFAULT_PORT),
            log_level: parse_or(&get, "LOG_LEVEL", Level::INFO),
            redis_url: get("REDIS_URL"),
            location_service_url: get("LOCATION_SERVICE_URL"),
            payment_service_url: get("PAYMENT_SERVICE_URL"),
            driver_service_url: get("DRIVER_SERVICE_URL"),
            user_service_url: get("USER_SERVICE_URL"),
            service_client_id: get("SERVICE_CLIENT_ID"),
            service_client_secret: Secret::new(get("SERVICE_CLIENT_SECRET").unwrap_or_default()),
            mapbox_access_token: get("MAPBOX_ACCESS_TOKEN").map(Secret::new),
            upstream_timeout,
            dispatch,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + fmt::Debug,
{
    parse_checked(get, key, default, |_| true)
}

/// Like `parse_or`, but a value that parses and fails `valid` also falls back to the default.
fn parse_checked<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + fmt::Debug,
{
    let Some(raw) = get(key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!("{} has an invalid value '{}', using {:?}", key, raw, default);
            default
        }
    }
}

fn parse_radii(raw: Option<String>) -> Vec<f64> {
    let Some(raw) = raw else {
        return DEFAULT_SEARCH_RADII_KM.to_vec();
    };

    let parsed: Result<Vec<f64>, _> = raw.split(',').map(|tier| tier.trim().parse::<f64>()).collect();
    match parsed {
        Ok(mut radii) if !radii.is_empty() && radii.iter().all(|r| r.is_finite() && *r > 0.0) => {
            radii.sort_by(|a, b| a.total_cmp(b));
            radii
        }
        _ => {
            tracing::warn!("SEARCH_RADII_KM has an invalid value '{}', using defaults", raw);
            DEFAULT_SEARCH_RADII_KM.to_vec()
        }
    }
}
