//! Loosely-typed document field access.
//!
//! The two stores hold documents written by several client app versions, so
//! one logical field can appear under multiple names (`pickupLocation`,
//! `pickup_location`, `pickup`, ...). All business logic reads fields through
//! the alias tables here; nothing else hard-codes a document key for reads.
//!
//! A JSON `null` counts as absent: clearing a field is done by writing null,
//! since the store interface has no field-delete primitive.

use serde_json::{Map, Value};

use crate::geo::GeoPoint;

/// A document's field map as stored.
pub type Fields = Map<String, Value>;

/// Alias tables for every logical field the engine reads.
pub mod aliases {
    pub const STATUS: &[&str] = &["status"];

    // Ride request fields.
    pub const REQUEST_PICKUP: &[&str] = &["pickupLocation", "pickup_location", "pickup"];
    pub const REQUEST_DESTINATION: &[&str] =
        &["destinationLocation", "destination", "destination_location"];
    pub const PASSENGER_UID: &[&str] = &["passengerId", "passengerUid", "riderUid"];
    pub const PASSENGER_NAME: &[&str] = &["passengerName", "name"];
    pub const PASSENGER_PHONE: &[&str] = &["passengerPhone", "phone"];
    pub const PICKUP_ADDRESS: &[&str] = &["pickupAddress", "pickup_address"];
    pub const DESTINATION_ADDRESS: &[&str] = &["destinationAddress", "destination_address"];
    pub const VEHICLE_PREFERENCE: &[&str] = &["vehiclePreference"];

    // Driver document fields. A driver's route start doubles as its current
    // position when no explicit live location is present.
    pub const DRIVER_POSITION: &[&str] = &[
        "currentRouteStart",
        "nextTargetLocation",
        "current_location",
        "currentLocation",
    ];
    pub const DRIVER_ROUTE_END: &[&str] = &["currentRouteEnd", "destination", "currentDestination"];
    pub const DRIVER_UID: &[&str] = &["uid"];
    pub const DRIVER_NAME: &[&str] = &["name", "driverName"];
    pub const DRIVER_PHONE: &[&str] = &["phone"];
    pub const DRIVER_VEHICLE_TYPE: &[&str] = &["vehicleType"];
    pub const DRIVER_LIVE_LOCATION: &[&str] =
        &["currentLocation", "current_location", "riderLocation"];
    pub const DRIVER_CURRENT_RIDE: &[&str] =
        &["current_ride_request", "currentRideRequest", "current_ride"];

    // Proposal fields.
    pub const PROPOSAL_REQUEST_ID: &[&str] = &["request_id", "requestId", "request"];
    pub const PROPOSAL_DRIVER_ID: &[&str] = &["riderUid", "driverId", "riderId"];
    pub const PROPOSAL_DRIVER_NAME: &[&str] =
        &["driverName", "driver_name", "driver", "driverFullName"];
    pub const PROPOSAL_DRIVER_PHONE: &[&str] = &["driverPhone", "driver_phone", "driver_contact"];
    pub const PROPOSAL_DRIVER_LOCATION: &[&str] =
        &["riderLocation", "driverLocation", "rider_location"];
}

/// First non-null value among the aliases, in table order.
pub fn first_value<'a>(data: &'a Fields, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| data.get(*key))
        .find(|value| !value.is_null())
}

/// First alias present as a string.
pub fn str_field<'a>(data: &'a Fields, aliases: &[&str]) -> Option<&'a str> {
    first_value(data, aliases).and_then(Value::as_str)
}

/// First alias present as a number, accepting numeric strings too (some
/// clients write coordinates and fares as strings).
pub fn f64_field(data: &Fields, aliases: &[&str]) -> Option<f64> {
    first_value(data, aliases).and_then(as_f64)
}

/// First alias present as a boolean.
pub fn bool_field(data: &Fields, aliases: &[&str]) -> Option<bool> {
    first_value(data, aliases).and_then(Value::as_bool)
}

/// First alias present, cloned for pass-through into another document.
pub fn value_field(data: &Fields, aliases: &[&str]) -> Option<Value> {
    first_value(data, aliases).cloned()
}

/// First alias that parses as a geographic point.
pub fn geo_field(data: &Fields, aliases: &[&str]) -> Option<GeoPoint> {
    aliases
        .iter()
        .filter_map(|key| data.get(*key))
        .find_map(geo_point)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const LAT_KEYS: &[&str] = &["latitude", "lat", "Latitude"];
const LNG_KEYS: &[&str] = &["longitude", "lng", "lon", "Longitude"];
const NESTED_KEYS: &[&str] = &["coords", "location", "geo", "position"];

/// Parse a point from any of the shapes clients produce: a flat object with
/// latitude/longitude under several spellings, or the same nested one level
/// down under `coords`/`location`/`geo`/`position`.
pub fn geo_point(value: &Value) -> Option<GeoPoint> {
    let obj = value.as_object()?;
    if let Some(point) = flat_geo_point(obj) {
        return Some(point);
    }
    NESTED_KEYS
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(Value::as_object)
        .find_map(flat_geo_point)
}

fn flat_geo_point(obj: &Fields) -> Option<GeoPoint> {
    let lat = LAT_KEYS.iter().filter_map(|k| obj.get(*k)).find_map(as_f64)?;
    let lng = LNG_KEYS.iter().filter_map(|k| obj.get(*k)).find_map(as_f64)?;
    Some(GeoPoint::new(lat, lng))
}
