//! Proposal payload construction.
//!
//! A proposal carries a denormalized snapshot of both the passenger request
//! and the driver at creation time, so the driver app never has to cross-read
//! the passenger store. Progression timestamps start out null and are stamped
//! by the driver app / synchronizer as the ride advances.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::document::{aliases, bool_field, f64_field, str_field, value_field, Fields};
use crate::geo::GeoPoint;
use crate::status::PROPOSAL_PENDING_ACCEPTANCE;

/// Build the proposal document for a matched request/driver pair.
///
/// `final_pickup` is the (possibly snapped) pickup point offered to the
/// driver; `distance_to_pickup_km` is the driver's distance to the requested
/// pickup at match time.
pub fn build_payload(
    request_id: &str,
    request: &Fields,
    driver_id: &str,
    driver: &Fields,
    final_pickup: GeoPoint,
    distance_to_pickup_km: Option<f64>,
    created_at: DateTime<Utc>,
) -> Fields {
    let mut payload = Map::new();
    let now = Value::String(created_at.to_rfc3339());

    payload.insert("request_id".into(), request_id.into());
    payload.insert("status".into(), PROPOSAL_PENDING_ACCEPTANCE.into());
    payload.insert("createdAt".into(), now.clone());

    // Passenger snapshot.
    payload.insert(
        "passengerUid".into(),
        value_field(request, aliases::PASSENGER_UID).unwrap_or(Value::Null),
    );
    payload.insert(
        "passengerName".into(),
        str_field(request, aliases::PASSENGER_NAME)
            .unwrap_or("Unknown Passenger")
            .into(),
    );
    payload.insert(
        "passengerPhone".into(),
        str_field(request, aliases::PASSENGER_PHONE)
            .unwrap_or("Not Provided")
            .into(),
    );
    payload.insert("pickupLocation".into(), final_pickup.to_value());
    payload.insert(
        "destinationLocation".into(),
        crate::document::geo_field(request, aliases::REQUEST_DESTINATION)
            .map(|p| p.to_value())
            .unwrap_or(Value::Null),
    );
    payload.insert(
        "pickup_address".into(),
        value_field(request, aliases::PICKUP_ADDRESS).unwrap_or(Value::Null),
    );
    payload.insert(
        "destination_address".into(),
        value_field(request, aliases::DESTINATION_ADDRESS).unwrap_or(Value::Null),
    );
    payload.insert(
        "fareAmount".into(),
        f64_field(request, &["fareAmount"]).unwrap_or(0.0).into(),
    );
    payload.insert(
        "paymentMethod".into(),
        str_field(request, &["paymentMethod"]).unwrap_or("Cash").into(),
    );
    payload.insert(
        "rideType".into(),
        str_field(request, &["rideType"]).unwrap_or("Standard").into(),
    );
    payload.insert(
        "passengerRating".into(),
        f64_field(request, &["passengerRating"]).unwrap_or(5.0).into(),
    );
    payload.insert(
        "estimatedDistance".into(),
        value_field(request, &["estimatedDistance"]).unwrap_or_else(|| "N/A".into()),
    );
    payload.insert(
        "estimatedDuration".into(),
        value_field(request, &["estimatedDuration"]).unwrap_or_else(|| "N/A".into()),
    );
    payload.insert(
        "specialRequests".into(),
        value_field(request, &["specialRequests"]).unwrap_or_else(|| "None".into()),
    );
    payload.insert(
        "vehiclePreference".into(),
        str_field(request, aliases::VEHICLE_PREFERENCE).unwrap_or("Any").into(),
    );
    payload.insert(
        "luggageCount".into(),
        value_field(request, &["luggageCount"]).unwrap_or_else(|| 0.into()),
    );
    payload.insert(
        "passengerCount".into(),
        value_field(request, &["passengerCount"]).unwrap_or_else(|| 1.into()),
    );
    payload.insert(
        "otp".into(),
        value_field(request, &["otp"]).unwrap_or_else(|| "0000".into()),
    );
    payload.insert(
        "otpVerified".into(),
        bool_field(request, &["otpVerified"]).unwrap_or(false).into(),
    );
    payload.insert(
        "sosActive".into(),
        bool_field(request, &["sosActive"]).unwrap_or(false).into(),
    );
    payload.insert(
        "sosReason".into(),
        value_field(request, &["sosReason"]).unwrap_or(Value::Null),
    );
    payload.insert(
        "sosTimestamp".into(),
        value_field(request, &["sosTimestamp"]).unwrap_or(Value::Null),
    );

    // Driver snapshot.
    let driver_uid = str_field(driver, aliases::DRIVER_UID).unwrap_or(driver_id);
    payload.insert("riderUid".into(), driver_uid.into());
    payload.insert("driverId".into(), driver_uid.into());
    payload.insert(
        "driverName".into(),
        str_field(driver, aliases::DRIVER_NAME).unwrap_or("Unknown Driver").into(),
    );
    payload.insert(
        "driverPhone".into(),
        str_field(driver, aliases::DRIVER_PHONE).unwrap_or("Not Provided").into(),
    );
    payload.insert(
        "driverVehicle".into(),
        str_field(driver, aliases::DRIVER_VEHICLE_TYPE)
            .unwrap_or("Unknown Vehicle")
            .into(),
    );
    payload.insert(
        "riderLocation".into(),
        crate::document::geo_field(driver, aliases::DRIVER_POSITION)
            .map(|p| p.to_value())
            .unwrap_or(Value::Null),
    );
    payload.insert("lastLocationUpdate".into(), now);

    // Route polylines pass through untouched for the driver app's map.
    payload.insert(
        "routeToPickupEncoded".into(),
        value_field(request, &["routeToPickupEncoded"]).unwrap_or(Value::Null),
    );
    payload.insert(
        "routeToDestinationEncoded".into(),
        value_field(request, &["routeToDestinationEncoded"]).unwrap_or(Value::Null),
    );

    // Progression timestamps, stamped later.
    for field in [
        "acceptedTimestamp",
        "arrivalTimestamp",
        "pickupTimestamp",
        "completionTimestamp",
        "cancellationTimestamp",
    ] {
        payload.insert(field.into(), Value::Null);
    }
    payload.insert(
        "distanceToPickup".into(),
        distance_to_pickup_km.map(Value::from).unwrap_or(Value::Null),
    );

    payload
}
