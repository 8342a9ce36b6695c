// src/errors.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for the ride-dispatch service
#[derive(Debug)]
pub enum DispatchError {
    // HTTP and API errors
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    InternalServer(String),

    // Store errors
    RedisConnection(String),
    RedisQuery(String),
    StoreContention(String),

    // Network and HTTP client errors
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),
    UpstreamStatus { service: String, status: u16 },

    // Serialization and parsing errors
    JsonParsing(String),
    JsonSerialization(String),

    // Trip lifecycle errors
    TripNotFound(String),
    OfferUnavailable,
    OfferCycleActive(String),
    InvalidTransition { from: String, action: String },
    TripNotCompleted,
    TripAlreadyRated,
    NoRouteFound(String),
    SettlementFailed(String),
    DataAnomaly(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),

    // Security and authentication errors
    CredentialsUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            DispatchError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DispatchError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            DispatchError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),

            DispatchError::RedisConnection(msg) => write!(f, "Redis connection error: {}", msg),
            DispatchError::RedisQuery(msg) => write!(f, "Redis query error: {}", msg),
            DispatchError::StoreContention(id) => {
                write!(f, "Too much write contention on trip {}", id)
            }

            DispatchError::NetworkTimeout => write!(f, "Network request timed out"),
            DispatchError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            DispatchError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),
            DispatchError::UpstreamStatus { service, status } => {
                write!(f, "{} responded with status {}", service, status)
            }

            DispatchError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            DispatchError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),

            DispatchError::TripNotFound(id) => write!(f, "Trip not found: {}", id),
            DispatchError::OfferUnavailable => write!(f, "Offer is no longer available"),
            DispatchError::OfferCycleActive(id) => {
                write!(f, "Trip {} already has a live offer", id)
            }
            DispatchError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} a trip in status {}", action, from)
            }
            DispatchError::TripNotCompleted => write!(f, "Trip is not completed"),
            DispatchError::TripAlreadyRated => write!(f, "Trip has already been rated"),
            DispatchError::NoRouteFound(msg) => write!(f, "Could not calculate route: {}", msg),
            DispatchError::SettlementFailed(msg) => write!(f, "Settlement failed: {}", msg),
            DispatchError::DataAnomaly(msg) => write!(f, "Data anomaly: {}", msg),

            DispatchError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }

            DispatchError::CredentialsUnavailable(msg) => {
                write!(f, "Service credentials unavailable: {}", msg)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match self {
            DispatchError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            DispatchError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            DispatchError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),

            DispatchError::ValidationFailed(errors) => {
                let details = serde_json::to_value(&errors).ok();
                (StatusCode::BAD_REQUEST, "validation_failed", "Validation errors occurred".to_string(), details)
            }
            DispatchError::NoRouteFound(msg) => {
                (StatusCode::BAD_REQUEST, "no_route", format!("Could not calculate route: {}", msg), None)
            }

            DispatchError::TripNotFound(id) => (StatusCode::NOT_FOUND, "trip_not_found", format!("Trip not found: {}", id), None),

            // Every accept failure looks the same from outside
            DispatchError::OfferUnavailable => {
                (StatusCode::CONFLICT, "not_available", "Offer is no longer available".to_string(), None)
            }
            DispatchError::OfferCycleActive(id) => {
                (StatusCode::CONFLICT, "offer_active", format!("Trip {} already has a live offer", id), None)
            }
            DispatchError::InvalidTransition { from, action } => {
                (StatusCode::CONFLICT, "invalid_transition", format!("Cannot {} a trip in status {}", action, from), None)
            }
            DispatchError::TripNotCompleted => {
                (StatusCode::CONFLICT, "not_completed", "Trip is not completed".to_string(), None)
            }
            DispatchError::TripAlreadyRated => {
                (StatusCode::CONFLICT, "already_rated", "Trip has already been rated".to_string(), None)
            }

            DispatchError::SettlementFailed(msg) => {
                (StatusCode::BAD_GATEWAY, "settlement_failed", msg, None)
            }
            DispatchError::UpstreamStatus { service, status } => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                format!("{} responded with status {}", service, status),
                None,
            ),
            DispatchError::NetworkTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", "Upstream request timed out".to_string(), None)
            }
            DispatchError::StoreContention(id) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_contention",
                format!("Trip {} is busy, try again", id),
                None,
            ),
            DispatchError::NetworkConnection(msg) | DispatchError::HttpClient(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", msg, None)
            }
            DispatchError::RedisConnection(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", "Trip store unavailable".to_string(), None)
            }
            DispatchError::CredentialsUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "Service credentials unavailable".to_string(),
                None,
            ),

            // All other errors are treated as internal server errors
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", self.to_string(), None),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type DispatchResult<T> = Result<T, DispatchError>;

// Conversion implementations for common error types
impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => DispatchError::RedisConnection(err.to_string()),
            redis::ErrorKind::ResponseError => DispatchError::RedisQuery(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => DispatchError::RedisConnection("Authentication failed".to_string()),
            _ => DispatchError::RedisQuery(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::NetworkTimeout
        } else if err.is_connect() {
            DispatchError::NetworkConnection(err.to_string())
        } else {
            DispatchError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() {
            DispatchError::JsonParsing(err.to_string())
        } else {
            DispatchError::JsonSerialization(err.to_string())
        }
    }
}

// Helper functions for creating common errors
impl DispatchError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        DispatchError::NotFound(resource.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        DispatchError::InternalServer(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn trip_not_found(trip_id: impl Into<String>) -> Self {
        DispatchError::TripNotFound(trip_id.into())
    }

    pub fn invalid_transition(from: impl fmt::Display, action: impl Into<String>) -> Self {
        DispatchError::InvalidTransition {
            from: from.to_string(),
            action: action.into(),
        }
    }
}
