//! Driver reservation: the only cross-request mutual-exclusion point.
//!
//! Step 1 runs inside a driver-store transaction: re-check the driver is
//! still eligible, flip it to `reserved_for_proposal`, and create the
//! proposal as one atomic unit, so no observer can see a reservation
//! without its proposal or vice versa. Step 2 informs the passenger store
//! best-effort; if it fails, the reservation is rolled back and the proposal
//! is left behind as an inert orphan.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use dispatch_core::document::{aliases, str_field, value_field, Fields};
use dispatch_core::status::DriverStatus;

use crate::config::{RetryPolicy, DRIVERS_COLLECTION, PROPOSALS_COLLECTION, REQUESTS_COLLECTION};
use crate::retry::with_backoff;
use crate::store::{Document, DocumentStore, StoreError};

/// How a reservation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Driver reserved, proposal created, passenger informed.
    Reserved { proposal_id: String },
    /// The driver was no longer eligible when the transaction re-read it:
    /// another cycle won the race. Equivalent to no-match for this cycle.
    Contended,
    /// A store failure prevented completion; any reservation was rolled
    /// back.
    Failed,
}

/// Reserve `driver` for `request_id` and create the proposal from `payload`.
///
/// `driver` is the matcher-time snapshot; its status is what compensation
/// restores on a step-2 failure.
pub async fn reserve(
    driver_store: &Arc<dyn DocumentStore>,
    passenger_store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    request_id: &str,
    driver: &Document,
    payload: Fields,
) -> ReservationOutcome {
    let proposal_id = Uuid::new_v4().to_string();

    // Step 1: atomic reserve + create on the driver store.
    let tx_driver_id = driver.id.clone();
    let tx_request_id = request_id.to_string();
    let tx_proposal_id = proposal_id.clone();
    let outcome = driver_store
        .run_transaction(Box::new(move |ctx| {
            let snapshot = ctx
                .get(DRIVERS_COLLECTION, &tx_driver_id)?
                .ok_or_else(|| StoreError::aborted("driver document disappeared"))?;
            let eligible = str_field(&snapshot.data, aliases::STATUS)
                .and_then(DriverStatus::parse)
                .map(|status| status.is_eligible_for_matching())
                .unwrap_or(false);
            if !eligible {
                return Err(StoreError::aborted("driver status no longer eligible"));
            }

            let mut reserve_fields = Map::new();
            reserve_fields.insert(
                "status".into(),
                DriverStatus::ReservedForProposal.as_str().into(),
            );
            reserve_fields.insert("reserved_for_request".into(), tx_request_id.into());
            ctx.update(DRIVERS_COLLECTION, &tx_driver_id, reserve_fields);
            ctx.create(PROPOSALS_COLLECTION, &tx_proposal_id, payload);
            Ok(())
        }))
        .await;

    match outcome {
        Ok(()) => {}
        Err(StoreError::TransactionAborted(reason)) => {
            info!(
                driver = %driver.id,
                request = %request_id,
                %reason,
                "reservation lost the race"
            );
            return ReservationOutcome::Contended;
        }
        Err(err) => {
            warn!(driver = %driver.id, request = %request_id, error = %err, "reservation transaction failed");
            return ReservationOutcome::Failed;
        }
    }

    // Step 2: best-effort passenger update with the matched-driver summary.
    let update = passenger_summary(driver, &proposal_id);
    let step2 = with_backoff(retry, "mark request proposed", || {
        passenger_store.update(REQUESTS_COLLECTION, request_id, update.clone())
    })
    .await;

    match step2 {
        Ok(()) => {
            info!(
                request = %request_id,
                driver = %driver.id,
                proposal = %proposal_id,
                "request marked proposed"
            );
            ReservationOutcome::Reserved { proposal_id }
        }
        Err(err) => {
            warn!(
                request = %request_id,
                driver = %driver.id,
                error = %err,
                "passenger update failed; releasing reservation"
            );
            release_reservation(driver_store, retry, driver).await;
            ReservationOutcome::Failed
        }
    }
}

/// Matched-driver summary written onto the request, so the passenger app can
/// render the assignment without reading the driver store.
fn passenger_summary(driver: &Document, proposal_id: &str) -> Fields {
    let data = &driver.data;
    let driver_uid = str_field(data, aliases::DRIVER_UID).unwrap_or(&driver.id);
    let mut fields = Map::new();
    fields.insert("status".into(), "proposed".into());
    fields.insert("riderUid".into(), driver_uid.into());
    fields.insert(
        "riderName".into(),
        str_field(data, aliases::DRIVER_NAME).unwrap_or("Unknown Driver").into(),
    );
    fields.insert(
        "riderPhone".into(),
        str_field(data, aliases::DRIVER_PHONE).unwrap_or("Not Provided").into(),
    );
    fields.insert(
        "riderLocation".into(),
        value_field(data, aliases::DRIVER_LIVE_LOCATION).unwrap_or(Value::Null),
    );
    fields.insert(
        "matchedDriverName".into(),
        str_field(data, aliases::DRIVER_NAME).unwrap_or("Unknown Driver").into(),
    );
    fields.insert(
        "matchedDriverPhone".into(),
        str_field(data, aliases::DRIVER_PHONE).unwrap_or("Not Provided").into(),
    );
    fields.insert(
        "matchedDriverVehicle".into(),
        str_field(data, aliases::DRIVER_VEHICLE_TYPE)
            .unwrap_or("Unknown Vehicle")
            .into(),
    );
    fields.insert("proposed_at".into(), Utc::now().to_rfc3339().into());
    fields.insert("proposal_id".into(), proposal_id.into());
    fields
}

/// Compensation for a step-2 failure: put the driver back the way the
/// matcher found it. The orphaned proposal stays; downstream consumers
/// ignore proposals whose request never references them.
async fn release_reservation(
    driver_store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    driver: &Document,
) {
    let prior_status = str_field(&driver.data, aliases::STATUS)
        .unwrap_or(DriverStatus::Available.as_str())
        .to_string();
    let mut fields = Map::new();
    fields.insert("status".into(), prior_status.into());
    fields.insert("reserved_for_request".into(), Value::Null);

    let result = with_backoff(retry, "release driver reservation", || {
        driver_store.update(DRIVERS_COLLECTION, &driver.id, fields.clone())
    })
    .await;
    if let Err(err) = result {
        warn!(driver = %driver.id, error = %err, "failed to revert driver reservation");
    }
}
