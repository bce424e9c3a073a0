//! Greedy matcher orchestration: normalize one pending request, scan the
//! eligible drivers, pick the cheapest detour, and hand off to the
//! reservation protocol.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use dispatch_core::document::{aliases, geo_field, str_field};
use dispatch_core::matching::{self, DriverCandidate};
use dispatch_core::proposal;
use dispatch_core::status::DriverStatus;

use crate::config::{EngineConfig, DRIVERS_COLLECTION};
use crate::reservation::{self, ReservationOutcome};
use crate::store::{Document, DocumentStore, Filter};
use crate::telemetry::DispatchTelemetry;

pub struct Matcher {
    passenger: Arc<dyn DocumentStore>,
    driver: Arc<dyn DocumentStore>,
    config: EngineConfig,
    telemetry: Arc<DispatchTelemetry>,
}

impl Matcher {
    pub fn new(
        passenger: Arc<dyn DocumentStore>,
        driver: Arc<dyn DocumentStore>,
        config: EngineConfig,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            passenger,
            driver,
            config,
            telemetry,
        }
    }

    pub(crate) fn passenger_store(&self) -> &Arc<dyn DocumentStore> {
        &self.passenger
    }

    /// Match a single request against the current driver set. Every exit
    /// path is terminal for this cycle; a request that stays pending is
    /// reconsidered on its next change event or re-sweep.
    pub async fn match_request(&self, request: &Document) {
        DispatchTelemetry::bump(&self.telemetry.requests_seen);
        let data = &request.data;

        let Some(pickup) = geo_field(data, aliases::REQUEST_PICKUP) else {
            warn!(request = %request.id, "pickup coordinates unparseable, skipping");
            return;
        };
        let Some(destination) = geo_field(data, aliases::REQUEST_DESTINATION) else {
            warn!(request = %request.id, "destination coordinates unparseable, skipping");
            return;
        };
        let vehicle_preference = str_field(data, aliases::VEHICLE_PREFERENCE).unwrap_or("Any");

        info!(
            request = %request.id,
            pickup_lat = pickup.lat,
            pickup_lng = pickup.lng,
            vehicle_preference,
            "matching request"
        );

        let eligible = Filter::field_in(
            "status",
            DriverStatus::ELIGIBLE_FOR_MATCHING.iter().map(|s| s.as_str()),
        );
        let drivers = match self.driver.query(DRIVERS_COLLECTION, eligible).await {
            Ok(drivers) => drivers,
            Err(err) => {
                warn!(request = %request.id, error = %err, "driver query failed");
                return;
            }
        };
        if drivers.is_empty() {
            info!(request = %request.id, "no eligible drivers available");
            DispatchTelemetry::bump(&self.telemetry.matches_without_driver);
            return;
        }

        let mut docs = Vec::with_capacity(drivers.len());
        let mut candidates = Vec::with_capacity(drivers.len());
        for doc in drivers {
            let Some(start) = geo_field(&doc.data, aliases::DRIVER_POSITION) else {
                debug!(driver = %doc.id, "driver has no usable position, skipping");
                continue;
            };
            let Some(end) = geo_field(&doc.data, aliases::DRIVER_ROUTE_END) else {
                debug!(driver = %doc.id, "driver has no route end, skipping");
                continue;
            };
            let vehicle_type = str_field(&doc.data, aliases::DRIVER_VEHICLE_TYPE)
                .unwrap_or("")
                .to_string();
            candidates.push(DriverCandidate {
                id: doc.id.clone(),
                start,
                end,
                vehicle_type,
            });
            docs.push(doc);
        }

        let Some(ranked) = matching::select_best(
            &self.config.match_policy(),
            pickup,
            destination,
            vehicle_preference,
            &candidates,
        ) else {
            info!(request = %request.id, "no suitable driver for request");
            DispatchTelemetry::bump(&self.telemetry.matches_without_driver);
            return;
        };

        let chosen = &docs[ranked.candidate_index];
        info!(
            request = %request.id,
            driver = %chosen.id,
            pickup_distance_km = ranked.pickup_distance_km,
            detour_km = ranked.detour.incremental_km,
            "selected driver"
        );

        let payload = proposal::build_payload(
            &request.id,
            data,
            &chosen.id,
            &chosen.data,
            ranked.effective_pickup,
            Some(ranked.pickup_distance_km),
            Utc::now(),
        );

        match reservation::reserve(
            &self.driver,
            &self.passenger,
            &self.config.retry,
            &request.id,
            chosen,
            payload,
        )
        .await
        {
            ReservationOutcome::Reserved { proposal_id } => {
                DispatchTelemetry::bump(&self.telemetry.proposals_created);
                info!(
                    request = %request.id,
                    driver = %chosen.id,
                    proposal = %proposal_id,
                    "proposal created"
                );
            }
            ReservationOutcome::Contended => {
                DispatchTelemetry::bump(&self.telemetry.reservation_conflicts);
            }
            ReservationOutcome::Failed => {
                info!(request = %request.id, driver = %chosen.id, "failed to finalize proposal");
            }
        }
    }
}
