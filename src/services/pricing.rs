// src/services/pricing.rs
//
// Fares are in VND. A fare is the class base plus a per-km rate, rounded to
// the nearest 1000 and never below the base.
use crate::models::trip::VehicleClass;

pub const ROUNDING_BUCKET_VND: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tariff {
    pub base_fare: f64,
    pub per_km_rate: f64,
}

pub fn tariff(vehicle_class: VehicleClass) -> Tariff {
    match vehicle_class {
        VehicleClass::TwoSeater => Tariff { base_fare: 15000.0, per_km_rate: 8000.0 },
        VehicleClass::FourSeater => Tariff { base_fare: 20000.0, per_km_rate: 10000.0 },
        VehicleClass::SevenSeater => Tariff { base_fare: 30000.0, per_km_rate: 15000.0 },
    }
}

pub fn calculate_fare(distance_km: f64, vehicle_class: VehicleClass) -> f64 {
    let Tariff { base_fare, per_km_rate } = tariff(vehicle_class);
    let raw = base_fare + distance_km.max(0.0) * per_km_rate;
    let rounded = (raw / ROUNDING_BUCKET_VND).round() * ROUNDING_BUCKET_VND;
    rounded.max(base_fare)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_seater_fares() {
        assert_eq!(calculate_fare(5.0, VehicleClass::FourSeater), 70000.0);
        assert_eq!(calculate_fare(10.0, VehicleClass::FourSeater), 120000.0);
    }

    #[test]
    fn test_other_classes() {
        assert_eq!(calculate_fare(5.0, VehicleClass::TwoSeater), 55000.0);
        assert_eq!(calculate_fare(5.0, VehicleClass::SevenSeater), 105000.0);
    }

    #[test]
    fn test_rounds_to_nearest_thousand() {
        // 15000 + 1.23 * 8000 = 24840
        assert_eq!(calculate_fare(1.23, VehicleClass::TwoSeater), 25000.0);
        // 20000 + 0.04 * 10000 = 20400
        assert_eq!(calculate_fare(0.04, VehicleClass::FourSeater), 20000.0);
    }

    #[test]
    fn test_never_below_base() {
        assert_eq!(calculate_fare(0.0, VehicleClass::SevenSeater), 30000.0);
        assert_eq!(calculate_fare(-3.0, VehicleClass::FourSeater), 20000.0);
    }
}
