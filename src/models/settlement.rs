// src/models/settlement.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /v1/trip-completion/complete` on the payment service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SettlementRequest {
    pub trip_id: String,
    pub driver_id: String,
    /// The paying passenger
    pub user_id: String,
    pub distance_km: f64,
    pub payment_method: String,
    /// Only forwarded for bank transfers
    pub user_bank_info: Option<Value>,
    /// Our own quote; the payment service prices the trip itself
    #[serde(default)]
    pub quoted_fare: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareDetails {
    pub total_fare: f64,
    #[serde(default)]
    pub driver_earning: Option<f64>,
    #[serde(default)]
    pub app_commission: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SettlementResult {
    pub success: bool,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fare_details: Option<FareDetails>,
}

/// What a successful settlement fixed for the trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettledAmounts {
    pub total_fare: f64,
    pub driver_earning: f64,
}

impl SettlementResult {
    /// Amounts of an accepted settlement. A reply that says success without them is refused.
    pub fn settled_amounts(&self) -> Result<SettledAmounts, String> {
        if !self.success {
            return Err(self.message.clone().unwrap_or_else(|| "payment declined".to_string()));
        }
        let fare = self
            .fare_details
            .as_ref()
            .ok_or_else(|| "settlement reply has no fare_details".to_string())?;
        let driver_earning = fare
            .driver_earning
            .ok_or_else(|| "settlement reply has no driver_earning".to_string())?;
        Ok(SettledAmounts {
            total_fare: fare.total_fare,
            driver_earning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_payment_service_reply() {
        let reply = json!({
            "success": true,
            "message": "Trip completed",
            "transaction_id": "txn-250101-q8w2e",
            "fare_details": {
                "distance_km": 10.0,
                "total_fare": 120000.0,
                "app_commission": 24000.0,
                "driver_earning": 96000.0
            }
        });
        let result: SettlementResult = serde_json::from_value(reply).unwrap();
        assert_eq!(
            result.settled_amounts(),
            Ok(SettledAmounts {
                total_fare: 120000.0,
                driver_earning: 96000.0
            })
        );
    }

    #[test]
    fn test_reply_without_earning_is_refused() {
        let no_earning: SettlementResult = serde_json::from_value(json!({
            "success": true,
            "fare_details": { "total_fare": 120000.0 }
        }))
        .unwrap();
        assert!(no_earning.settled_amounts().unwrap_err().contains("driver_earning"));

        let no_details: SettlementResult = serde_json::from_value(json!({ "success": true })).unwrap();
        assert!(no_details.settled_amounts().is_err());

        let declined: SettlementResult =
            serde_json::from_value(json!({ "success": false, "message": "card declined" })).unwrap();
        assert_eq!(declined.settled_amounts(), Err("card declined".to_string()));
    }

    #[test]
    fn test_request_wire_names() {
        let request = SettlementRequest {
            trip_id: "trp-250101-abc12".into(),
            driver_id: "drv-a".into(),
            user_id: "usr-1".into(),
            distance_km: 10.0,
            payment_method: "CASH".into(),
            user_bank_info: None,
            quoted_fare: 120000.0,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["user_id"], "usr-1");
        assert!(body["user_bank_info"].is_null());
        assert!(body.get("payer_id").is_none());
    }
}
