//! Live driver location mirroring and proximity-based arrival detection.
//!
//! Every driver document change with an engaged ride mirrors the driver's
//! position onto the request for live tracking. As a fallback for driver
//! apps that never signal arrival explicitly, a driver heading to a pickup
//! that comes within the configured threshold marks the request arrived:
//! once, and never past a status that is already further along.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;
use tracing::{debug, info, warn};

use dispatch_core::document::{aliases, geo_field, str_field};
use dispatch_core::geo::{self, GeoPoint};
use dispatch_core::status::{DriverStatus, RequestStatus};

use crate::config::{EngineConfig, REQUESTS_COLLECTION};
use crate::retry::with_backoff;
use crate::store::{ChangeFeed, ChangeKind, Document, DocumentStore};
use crate::telemetry::DispatchTelemetry;

pub struct LocationSync {
    passenger: Arc<dyn DocumentStore>,
    config: EngineConfig,
    telemetry: Arc<DispatchTelemetry>,
}

impl LocationSync {
    pub fn new(
        passenger: Arc<dyn DocumentStore>,
        config: EngineConfig,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            passenger,
            config,
            telemetry,
        }
    }

    pub async fn run(self, mut feed: ChangeFeed) {
        while let Some(change) = feed.recv().await {
            if change.kind != ChangeKind::Removed {
                self.handle(&change.doc).await;
            }
        }
        info!("driver feed closed, location sync stopped");
    }

    async fn handle(&self, driver: &Document) {
        let data = &driver.data;
        let Some(location) = geo_field(data, aliases::DRIVER_LIVE_LOCATION) else {
            return;
        };
        let Some(request_id) = str_field(data, aliases::DRIVER_CURRENT_RIDE) else {
            return;
        };

        let request = match self.passenger.get(REQUESTS_COLLECTION, request_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(
                    request = %request_id,
                    driver = %driver.id,
                    "request missing while mirroring driver location, skipping"
                );
                return;
            }
            Err(err) => {
                warn!(request = %request_id, driver = %driver.id, error = %err, "failed to fetch request");
                return;
            }
        };

        self.mirror_location(&request.id, driver, location).await;
        self.detect_arrival(&request, driver, location).await;
    }

    async fn mirror_location(&self, request_id: &str, driver: &Document, location: GeoPoint) {
        let mut fields = Map::new();
        fields.insert("riderLocation".into(), location.to_value());
        fields.insert("lastLocationUpdate".into(), Utc::now().to_rfc3339().into());
        let result = with_backoff(&self.config.retry, "mirror driver location", || {
            self.passenger
                .update(REQUESTS_COLLECTION, request_id, fields.clone())
        })
        .await;
        match result {
            Ok(()) => {
                DispatchTelemetry::bump(&self.telemetry.locations_mirrored);
                debug!(request = %request_id, driver = %driver.id, "driver location mirrored");
            }
            Err(err) => {
                warn!(request = %request_id, driver = %driver.id, error = %err, "location mirror failed");
            }
        }
    }

    async fn detect_arrival(&self, request: &Document, driver: &Document, location: GeoPoint) {
        let heading_to_pickup = str_field(&driver.data, aliases::STATUS)
            .and_then(DriverStatus::parse)
            .map(|status| status.is_heading_to_pickup())
            .unwrap_or(false);
        if !heading_to_pickup {
            return;
        }

        let Some(pickup) = geo_field(&request.data, aliases::REQUEST_PICKUP) else {
            return;
        };
        let distance_km = geo::distance_km(location, pickup);
        if distance_km > self.config.arrived_distance_threshold_km {
            return;
        }

        // Only ever move the ride forward: a request at or past
        // arrived_at_pickup is left alone.
        let eligible = str_field(&request.data, aliases::STATUS)
            .and_then(RequestStatus::parse)
            .and_then(|status| status.lifecycle_rank())
            .map(|rank| {
                rank < RequestStatus::ArrivedAtPickup
                    .lifecycle_rank()
                    .unwrap_or(u8::MAX)
            })
            .unwrap_or(false);
        if !eligible {
            return;
        }

        let mut fields = Map::new();
        fields.insert("status".into(), RequestStatus::ArrivedAtPickup.as_str().into());
        fields.insert("arrived_at".into(), Utc::now().to_rfc3339().into());
        let result = with_backoff(&self.config.retry, "auto-mark arrival", || {
            self.passenger
                .update(REQUESTS_COLLECTION, &request.id, fields.clone())
        })
        .await;
        match result {
            Ok(()) => {
                DispatchTelemetry::bump(&self.telemetry.arrivals_detected);
                info!(
                    request = %request.id,
                    driver = %driver.id,
                    distance_km,
                    "driver within arrival threshold, request marked arrived_at_pickup"
                );
            }
            Err(err) => {
                warn!(request = %request.id, driver = %driver.id, error = %err, "arrival update failed");
            }
        }
    }
}
