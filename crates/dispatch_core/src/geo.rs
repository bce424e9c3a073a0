//! Geometry for dispatch decisions: great-circle distance and the
//! incremental detour a driver incurs by serving a request on the way to
//! their existing destination.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate. Serialized with the long field names used by the
/// document stores (`latitude`/`longitude`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "latitude")]
    pub lat: f64,
    #[serde(rename = "longitude")]
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// JSON representation as stored in documents.
    pub fn to_value(&self) -> Value {
        json!({ "latitude": self.lat, "longitude": self.lng })
    }
}

/// Haversine great-circle distance in kilometers.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Arithmetic midpoint of two coordinates. Good enough at rendezvous
/// distances; not meridian-safe, which matches the stored data's use.
pub fn midpoint(a: GeoPoint, b: GeoPoint) -> GeoPoint {
    GeoPoint::new((a.lat + b.lat) / 2.0, (a.lng + b.lng) / 2.0)
}

/// Cost breakdown of serving a pickup/dropoff pair en route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetourCost {
    /// Extra kilometers versus driving straight to the existing destination.
    pub incremental_km: f64,
    /// Direct driver start → driver end distance.
    pub base_km: f64,
    /// start → pickup → dropoff → driver end distance.
    pub total_km: f64,
}

/// Incremental detour if the driver serves `pickup`/`dropoff` before
/// continuing to `driver_end`.
pub fn incremental_detour_km(
    driver_start: GeoPoint,
    driver_end: GeoPoint,
    pickup: GeoPoint,
    dropoff: GeoPoint,
) -> DetourCost {
    let base_km = distance_km(driver_start, driver_end);
    let total_km = distance_km(driver_start, pickup)
        + distance_km(pickup, dropoff)
        + distance_km(dropoff, driver_end);
    DetourCost {
        incremental_km: total_km - base_km,
        base_km,
        total_km,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGAPORE: GeoPoint = GeoPoint {
        lat: 1.3521,
        lng: 103.8198,
    };
    const BERLIN: GeoPoint = GeoPoint {
        lat: 52.52,
        lng: 13.405,
    };

    #[test]
    fn distance_is_symmetric() {
        let ab = distance_km(SINGAPORE, BERLIN);
        let ba = distance_km(BERLIN, SINGAPORE);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert!(distance_km(SINGAPORE, SINGAPORE).abs() < 1e-9);
    }

    #[test]
    fn distance_matches_known_pair() {
        // Singapore to Berlin is roughly 9,920 km great-circle.
        let d = distance_km(SINGAPORE, BERLIN);
        assert!((9800.0..10100.0).contains(&d), "got {d}");
    }

    #[test]
    fn detour_is_zero_when_request_lies_on_endpoints() {
        let end = GeoPoint::new(1.31, 103.82);
        let cost = incremental_detour_km(SINGAPORE, end, SINGAPORE, end);
        assert!(cost.incremental_km.abs() < 1e-9);
        assert!((cost.base_km - cost.total_km).abs() < 1e-9);
    }

    #[test]
    fn detour_is_positive_off_route() {
        let end = GeoPoint::new(1.31, 103.82);
        let pickup = GeoPoint::new(1.40, 103.70);
        let dropoff = GeoPoint::new(1.42, 103.72);
        let cost = incremental_detour_km(SINGAPORE, end, pickup, dropoff);
        assert!(cost.incremental_km > 0.0);
        assert!(cost.total_km > cost.base_km);
    }

    #[test]
    fn midpoint_halves_both_axes() {
        let m = midpoint(GeoPoint::new(1.0, 103.0), GeoPoint::new(2.0, 104.0));
        assert!((m.lat - 1.5).abs() < 1e-12);
        assert!((m.lng - 103.5).abs() < 1e-12);
    }

    #[test]
    fn geopoint_round_trips_through_json() {
        let p = GeoPoint::new(1.3, 103.8);
        let v = p.to_value();
        assert_eq!(v["latitude"], 1.3);
        assert_eq!(v["longitude"], 103.8);
        let back: GeoPoint = serde_json::from_value(v).expect("geopoint");
        assert_eq!(back, p);
    }
}
