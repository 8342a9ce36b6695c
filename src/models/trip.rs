// src/models/trip.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Pending,    // Waiting for a driver to accept the offer
    Accepted,   // Driver assigned, heading to pickup
    OnTrip,     // Passenger on board
    Completed,  // Dropped off and settled
    Cancelled,  // Cancelled before pickup
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Statuses in which the trip carries an assigned driver.
    pub fn has_driver(&self) -> bool {
        matches!(self, TripStatus::Accepted | TripStatus::OnTrip | TripStatus::Completed)
    }

    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, Pending)
                | (Pending, Cancelled)
                | (Accepted, Cancelled)
                | (Accepted, OnTrip)
                | (OnTrip, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Pending => "PENDING",
            TripStatus::Accepted => "ACCEPTED",
            TripStatus::OnTrip => "ON_TRIP",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleClass {
    #[serde(rename = "2_SEATER", alias = "TWO_SEATER")]
    TwoSeater,
    #[serde(rename = "4_SEATER", alias = "FOUR_SEATER")]
    FourSeater,
    #[serde(rename = "7_SEATER", alias = "SEVEN_SEATER")]
    SevenSeater,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [
        VehicleClass::TwoSeater,
        VehicleClass::FourSeater,
        VehicleClass::SevenSeater,
    ];
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleClass::TwoSeater => f.write_str("2_SEATER"),
            VehicleClass::FourSeater => f.write_str("4_SEATER"),
            VehicleClass::SevenSeater => f.write_str("7_SEATER"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    #[serde(rename = "Credit Card")]
    CreditCard,
    Cash,
    #[serde(rename = "E-Wallet")]
    EWallet,
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
}

impl PaymentMethod {
    /// Method name the payment service settles under. Wallet top-ups clear as bank transfers.
    pub fn settlement_code(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::Cash => "CASH",
            PaymentMethod::EWallet | PaymentMethod::BankTransfer => "BANK_TRANSFER",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelledBy {
    Passenger,
    Driver,
    System,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocationInfo {
    pub address: String,
    pub location: GeoPoint,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouteSummary {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub geometry: String, // Encoded polyline, precision 5
}

impl RouteSummary {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareInfo {
    pub estimated: f64,
    pub actual: Option<f64>,
    pub discount: Option<f64>,
    pub tax: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub driver_earning: Option<f64>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RatingInfo {
    pub stars: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CancellationInfo {
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusHistoryEntry {
    pub status: TripStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Trip {
    pub id: String,
    pub passenger_id: String,
    pub driver_id: Option<String>,
    pub vehicle_class: VehicleClass,
    pub status: TripStatus,

    // Location information
    pub pickup: LocationInfo,
    pub dropoff: LocationInfo,
    pub route: RouteSummary,

    pub fare: FareInfo,
    pub payment: PaymentInfo,
    pub rating: Option<RatingInfo>,
    pub cancellation: Option<CancellationInfo>,
    pub history: Vec<StatusHistoryEntry>,
    pub notes: Option<String>,

    // Offer cycle
    pub notified_driver_ids: Vec<String>,
    pub rejected_driver_ids: Vec<String>,
    pub offer_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offer_cycle: u32, // Bumped when a cycle opens or an assignment is released

    // Timing information
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub version: u64, // Bumped on every committed write
}

impl Trip {
    pub fn new(
        id: String,
        request: &TripRequest,
        route: RouteSummary,
        estimated_fare: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            passenger_id: request.passenger_id.clone(),
            driver_id: None,
            vehicle_class: request.vehicle_class,
            status: TripStatus::Pending,
            pickup: request.pickup.clone(),
            dropoff: request.dropoff.clone(),
            route,
            fare: FareInfo {
                estimated: estimated_fare,
                actual: None,
                discount: None,
                tax: None,
            },
            payment: PaymentInfo {
                method: request.payment_method,
                status: PaymentStatus::Pending,
                transaction_id: None,
                driver_earning: None,
                paid_at: None,
            },
            rating: None,
            cancellation: None,
            history: Vec::new(),
            notes: request.notes.clone(),
            notified_driver_ids: Vec::new(),
            rejected_driver_ids: Vec::new(),
            offer_sent_at: None,
            offer_cycle: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_assigned_to(&self, driver_id: &str) -> bool {
        self.driver_id.as_deref() == Some(driver_id)
    }

    /// An offer is live while the trip is PENDING and the acceptance window has not elapsed.
    pub fn has_live_offer(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.status == TripStatus::Pending
            && self
                .offer_sent_at
                .is_some_and(|sent_at| now.signed_duration_since(sent_at) <= window)
    }
}

// Request/Response types for API

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripRequest {
    pub passenger_id: String,
    pub pickup: LocationInfo,
    pub dropoff: LocationInfo,
    pub vehicle_class: VehicleClass,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddressOnly {
    pub address: String,
}

/// A trip request that names places instead of coordinates; both ends are geocoded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddressTripRequest {
    pub passenger_id: String,
    pub pickup: AddressOnly,
    pub dropoff: AddressOnly,
    pub vehicle_class: VehicleClass,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl AddressTripRequest {
    pub fn with_locations(self, pickup: GeoPoint, dropoff: GeoPoint) -> TripRequest {
        TripRequest {
            passenger_id: self.passenger_id,
            pickup: LocationInfo {
                address: self.pickup.address,
                location: pickup,
            },
            dropoff: LocationInfo {
                address: self.dropoff.address,
                location: dropoff,
            },
            vehicle_class: self.vehicle_class,
            payment_method: self.payment_method,
            notes: self.notes,
        }
    }
}

pub const MAX_PAGE_LIMIT: usize = 100;

/// `?skip=&limit=` on trip listings.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "Page::default_limit")]
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: MAX_PAGE_LIMIT,
        }
    }
}

impl Page {
    fn default_limit() -> usize {
        MAX_PAGE_LIMIT
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_PAGE_LIMIT).contains(&self.limit)
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

pub const DEFAULT_NEAR_DISTANCE_METERS: u32 = 5000;
pub const DEFAULT_NEAR_LIMIT: usize = 50;

/// Pending trips whose pickup lies within `max_distance` meters of a point.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct NearbyTripsQuery {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "NearbyTripsQuery::default_distance")]
    pub max_distance: u32,
    #[serde(default = "NearbyTripsQuery::default_limit")]
    pub limit: usize,
}

impl NearbyTripsQuery {
    pub const DISTANCE_RANGE: std::ops::RangeInclusive<u32> = 100..=50_000;

    fn default_distance() -> u32 {
        DEFAULT_NEAR_DISTANCE_METERS
    }

    fn default_limit() -> usize {
        DEFAULT_NEAR_LIMIT
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FareEstimateRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VehicleFareEstimate {
    pub vehicle_class: VehicleClass,
    pub estimated_fare: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FareEstimateResponse {
    pub route: RouteSummary,
    pub estimates: Vec<VehicleFareEstimate>,
}

/// What happened to the offer cycle after a dispatch attempt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DispatchSummary {
    pub drivers_notified: usize,
    pub offers_delivered: usize,
    pub search_radius_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripCreation {
    pub trip: Trip,
    pub dispatch: DispatchSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub total_fare: f64,
    pub driver_earning: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripCompletion {
    pub trip: Trip,
    pub payment: PaymentResult,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverAction {
    pub driver_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StartTripRequest {
    pub driver_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompleteTripRequest {
    pub distance_km: f64,
    /// Passed through to the payment service for bank transfers
    #[serde(default)]
    pub user_bank_info: Option<serde_json::Value>,
}

impl CompleteTripRequest {
    pub fn for_distance(distance_km: f64) -> Self {
        Self {
            distance_km,
            user_bank_info: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelTripRequest {
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateTripRequest {
    pub stars: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentStatusUpdate {
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TripStatistics {
    pub total_trips: usize,
    pub completed_trips: usize,
    pub cancelled_trips: usize,
    pub total_revenue: f64,
    pub average_rating: Option<f64>,
}

impl TripStatistics {
    pub fn from_trips(trips: &[Trip]) -> Self {
        let completed: Vec<&Trip> = trips
            .iter()
            .filter(|trip| trip.status == TripStatus::Completed)
            .collect();
        let ratings: Vec<f64> = trips
            .iter()
            .filter_map(|trip| trip.rating.as_ref().map(|rating| rating.stars as f64))
            .collect();

        Self {
            total_trips: trips.len(),
            completed_trips: completed.len(),
            cancelled_trips: trips
                .iter()
                .filter(|trip| trip.status == TripStatus::Cancelled)
                .count(),
            total_revenue: completed.iter().filter_map(|trip| trip.fare.actual).sum(),
            average_rating: if ratings.is_empty() {
                None
            } else {
                Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
            },
        }
    }
}
