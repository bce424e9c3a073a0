//! Document builders shared across integration tests. Coordinates follow
//! the reference scenario: a short hop in central Singapore with a driver
//! already heading the same way.

use serde_json::{json, Value};

use dispatch_core::document::Fields;

pub fn fields(value: Value) -> Fields {
    value.as_object().expect("json object").clone()
}

/// A pending ride request from (1.300, 103.800) to (1.310, 103.820).
pub fn pending_request() -> Fields {
    fields(json!({
        "status": "pending",
        "passengerId": "pass-1",
        "passengerName": "Ada",
        "passengerPhone": "+65 1111 1111",
        "pickupLocation": { "latitude": 1.300, "longitude": 103.800 },
        "destinationLocation": { "latitude": 1.310, "longitude": 103.820 },
        "vehiclePreference": "Any",
        "fareAmount": 12.0,
        "paymentMethod": "Cash",
    }))
}

/// An available driver whose planned route runs right along the reference
/// request: start (1.301, 103.799), end (1.312, 103.822).
pub fn available_driver() -> Fields {
    fields(json!({
        "status": "available",
        "uid": "drv-1",
        "name": "Kim",
        "phone": "+65 2222 2222",
        "vehicleType": "Sedan",
        "currentRouteStart": { "latitude": 1.301, "longitude": 103.799 },
        "currentRouteEnd": { "latitude": 1.312, "longitude": 103.822 },
        "currentLocation": { "latitude": 1.301, "longitude": 103.799 },
    }))
}

/// A proposal document as the reservation step writes it, reduced to the
/// fields the synchronizer reads.
pub fn proposal(request_id: &str, driver_id: &str, status: &str) -> Fields {
    fields(json!({
        "status": status,
        "request_id": request_id,
        "riderUid": driver_id,
        "driverName": "Kim",
        "driverPhone": "+65 2222 2222",
        "riderLocation": { "latitude": 1.301, "longitude": 103.799 },
    }))
}
