// src/utils/geo.rs
use crate::models::trip::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1_rad = from.latitude.to_radians();
    let lat2_rad = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Encode a path with the Google polyline algorithm (precision 5).
pub fn encode_polyline(points: &[GeoPoint]) -> String {
    let mut encoded = String::new();
    let (mut prev_lat, mut prev_lon) = (0i64, 0i64);

    for point in points {
        let lat = (point.latitude * 1e5).round() as i64;
        let lon = (point.longitude * 1e5).round() as i64;
        encode_value(lat - prev_lat, &mut encoded);
        encode_value(lon - prev_lon, &mut encoded);
        prev_lat = lat;
        prev_lon = lon;
    }

    encoded
}

fn encode_value(delta: i64, out: &mut String) {
    let mut value = if delta < 0 { !(delta << 1) } else { delta << 1 };
    while value >= 0x20 {
        out.push((((0x20 | (value & 0x1f)) + 63) as u8) as char);
        value >>= 5;
    }
    out.push(((value + 63) as u8) as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // 0.045 degrees of latitude is roughly 5 km
        let distance = haversine_km(GeoPoint::new(10.80, 106.70), GeoPoint::new(10.845, 106.70));
        assert!((distance - 5.0).abs() < 0.05, "got {}", distance);
        assert_eq!(haversine_km(GeoPoint::new(10.8, 106.7), GeoPoint::new(10.8, 106.7)), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(2.005, 0), 2.0);
    }

    #[test]
    fn test_polyline_reference_vector() {
        let points = [
            GeoPoint::new(38.5, -120.2),
            GeoPoint::new(40.7, -120.95),
            GeoPoint::new(43.252, -126.453),
        ];
        assert_eq!(encode_polyline(&points), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }
}
