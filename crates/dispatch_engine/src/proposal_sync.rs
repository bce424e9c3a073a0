//! Proposal state synchronizer.
//!
//! Watches proposal status changes on the driver store and mirrors each one
//! onto the passenger request, keeping driver occupancy in step. Handlers
//! re-read before writing so duplicate or replayed notifications converge on
//! the same end state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use dispatch_core::document::{aliases, bool_field, str_field, value_field, Fields};
use dispatch_core::status::{DriverStatus, ProposalEvent, RequestStatus};

use crate::config::{RetryPolicy, DRIVERS_COLLECTION, REQUESTS_COLLECTION};
use crate::retry::with_backoff;
use crate::store::{ChangeFeed, ChangeKind, Document, DocumentStore, StoreError};
use crate::telemetry::DispatchTelemetry;

pub struct ProposalStateSync {
    passenger: Arc<dyn DocumentStore>,
    driver: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    telemetry: Arc<DispatchTelemetry>,
}

impl ProposalStateSync {
    pub fn new(
        passenger: Arc<dyn DocumentStore>,
        driver: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            passenger,
            driver,
            retry,
            telemetry,
        }
    }

    pub async fn run(self, mut feed: ChangeFeed) {
        while let Some(change) = feed.recv().await {
            if change.kind != ChangeKind::Removed {
                self.handle(&change.doc).await;
            }
        }
        info!("proposal feed closed, state sync stopped");
    }

    async fn handle(&self, proposal: &Document) {
        let data = &proposal.data;
        let Some(raw_status) = str_field(data, aliases::STATUS) else {
            return;
        };
        let Some(event) = ProposalEvent::from_status(raw_status) else {
            debug!(proposal = %proposal.id, status = raw_status, "unrecognized proposal status, ignoring");
            return;
        };
        let Some(request_id) = str_field(data, aliases::PROPOSAL_REQUEST_ID) else {
            debug!(proposal = %proposal.id, "proposal carries no request reference, ignoring");
            return;
        };

        // An orphaned or stale proposal whose request is gone is a
        // recoverable inconsistency, never fatal.
        let request = match self.passenger.get(REQUESTS_COLLECTION, request_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(
                    request = %request_id,
                    proposal = %proposal.id,
                    "request document missing, skipping proposal update"
                );
                return;
            }
            Err(err) => {
                warn!(request = %request_id, proposal = %proposal.id, error = %err, "failed to fetch request");
                return;
            }
        };

        let driver_id = str_field(data, aliases::PROPOSAL_DRIVER_ID).map(str::to_string);

        match event {
            ProposalEvent::OtpVerified => {
                self.set_flag_once(&request, proposal, "otpVerified", "otp_verified_at")
                    .await;
            }
            ProposalEvent::FaceVerified => {
                self.set_flag_once(&request, proposal, "faceVerified", "face_verified_at")
                    .await;
            }
            ProposalEvent::Rejected => {
                self.handle_rejection(&request, proposal, driver_id.as_deref())
                    .await;
            }
            _ => {
                self.apply_transition(event, &request, proposal, driver_id.as_deref())
                    .await;
            }
        }
    }

    /// Verification flags are set exactly once; replays are no-ops.
    async fn set_flag_once(
        &self,
        request: &Document,
        proposal: &Document,
        flag: &str,
        stamp: &str,
    ) {
        if bool_field(&request.data, &[flag]) == Some(true) {
            debug!(request = %request.id, flag, "flag already set, skipping");
            return;
        }
        let mut fields = Map::new();
        fields.insert(flag.into(), true.into());
        fields.insert(stamp.into(), Utc::now().to_rfc3339().into());
        if self
            .update_request(&request.id, fields, "set verification flag")
            .await
        {
            info!(request = %request.id, proposal = %proposal.id, flag, "verification flag set");
        }
    }

    /// A rejected/cancelled proposal puts the request back into the pool,
    /// but only from proposed/accepted; later and terminal states stay as
    /// they are. The driver is freed either way.
    async fn handle_rejection(
        &self,
        request: &Document,
        proposal: &Document,
        driver_id: Option<&str>,
    ) {
        let current = str_field(&request.data, aliases::STATUS).and_then(RequestStatus::parse);
        if current.map(|s| s.is_revertible()).unwrap_or(false) {
            let mut fields = Map::new();
            fields.insert("status".into(), RequestStatus::Pending.as_str().into());
            for cleared in [
                "proposed_driver",
                "riderUid",
                "matchedDriverName",
                "matchedDriverPhone",
                "matchedDriverVehicle",
                "proposed_at",
                "proposal_id",
            ] {
                fields.insert(cleared.into(), Value::Null);
            }
            if self
                .update_request(&request.id, fields, "revert rejected request")
                .await
            {
                DispatchTelemetry::bump(&self.telemetry.status_transitions);
                info!(request = %request.id, proposal = %proposal.id, "proposal rejected, request reverted to pending");
            }
        } else {
            debug!(
                request = %request.id,
                proposal = %proposal.id,
                "proposal rejected but request is not revertible, leaving as is"
            );
        }

        if let Some(driver_id) = driver_id {
            let mut fields = Map::new();
            fields.insert("status".into(), DriverStatus::Available.as_str().into());
            fields.insert("reserved_for_request".into(), Value::Null);
            let result = with_backoff(&self.retry, "free rejected driver", || {
                self.driver.update(DRIVERS_COLLECTION, driver_id, fields.clone())
            })
            .await;
            if let Err(err) = result {
                warn!(driver = %driver_id, error = %err, "failed to free driver after rejection");
            }
        }
    }

    /// Forward lifecycle transition: status + timestamp, plus the ephemeral
    /// driver summary. When the request already carries the target status
    /// only the ephemeral fields are refreshed.
    async fn apply_transition(
        &self,
        event: ProposalEvent,
        request: &Document,
        proposal: &Document,
        driver_id: Option<&str>,
    ) {
        let Some(target) = event.request_status() else {
            return;
        };
        let current = str_field(&request.data, aliases::STATUS).and_then(RequestStatus::parse);
        let ephemeral = ephemeral_fields(&proposal.data, driver_id);

        if current == Some(target) {
            if !ephemeral.is_empty() {
                self.update_request(&request.id, ephemeral, "refresh ephemeral fields")
                    .await;
            }
            debug!(
                request = %request.id,
                status = target.as_str(),
                "request already in target status, refreshed ephemeral fields"
            );
        } else {
            let mut fields = ephemeral;
            fields.insert("status".into(), target.as_str().into());
            let now = Utc::now().to_rfc3339();
            if let Some(stamp) = event.timestamp_field() {
                fields.insert(stamp.into(), now.clone().into());
            }
            if event == ProposalEvent::PickedUp {
                // The driver app reads this one; the *_at stamp is ours.
                fields.insert("pickupTimestamp".into(), now.into());
            }
            if self
                .update_request(&request.id, fields, "apply status transition")
                .await
            {
                DispatchTelemetry::bump(&self.telemetry.status_transitions);
                info!(
                    request = %request.id,
                    proposal = %proposal.id,
                    status = target.as_str(),
                    "request status updated"
                );
            }
        }

        self.mirror_driver(event, &request.id, driver_id).await;
    }

    /// Keep the driver document's occupancy in step with the ride, clearing
    /// its request back-reference exactly at completion.
    async fn mirror_driver(&self, event: ProposalEvent, request_id: &str, driver_id: Option<&str>) {
        let (Some(driver_id), Some(status)) = (driver_id, event.driver_status()) else {
            return;
        };
        let mut fields = Map::new();
        fields.insert("status".into(), status.as_str().into());
        fields.insert(
            "current_ride_request".into(),
            if event == ProposalEvent::Completed {
                Value::Null
            } else {
                request_id.into()
            },
        );
        let result = with_backoff(&self.retry, "mirror driver occupancy", || {
            self.driver.update(DRIVERS_COLLECTION, driver_id, fields.clone())
        })
        .await;
        match result {
            Ok(()) => debug!(driver = %driver_id, status = status.as_str(), "driver occupancy mirrored"),
            Err(err) => warn!(driver = %driver_id, error = %err, "failed to mirror driver occupancy"),
        }
    }

    async fn update_request(&self, request_id: &str, fields: Fields, op: &str) -> bool {
        let result: Result<(), StoreError> = with_backoff(&self.retry, op, || {
            self.passenger
                .update(REQUESTS_COLLECTION, request_id, fields.clone())
        })
        .await;
        if let Err(err) = result {
            warn!(request = %request_id, op, error = %err, "request update failed");
            return false;
        }
        true
    }
}

/// Live driver summary mirrored onto the request on every transition, so the
/// passenger UI stays fresh even when the status write is skipped.
fn ephemeral_fields(proposal: &Fields, driver_id: Option<&str>) -> Fields {
    let mut fields = Map::new();
    if let Some(name) = str_field(proposal, aliases::PROPOSAL_DRIVER_NAME) {
        fields.insert("matchedDriverName".into(), name.into());
    }
    if let Some(phone) = str_field(proposal, aliases::PROPOSAL_DRIVER_PHONE) {
        fields.insert("matchedDriverPhone".into(), phone.into());
    }
    if let Some(driver_id) = driver_id {
        fields.insert("riderUid".into(), driver_id.into());
        fields.insert("riderId".into(), driver_id.into());
    }
    if let Some(location) = value_field(proposal, aliases::PROPOSAL_DRIVER_LOCATION) {
        fields.insert("riderLocation".into(), location);
        fields.insert("lastLocationUpdate".into(), Utc::now().to_rfc3339().into());
    }
    fields
}
