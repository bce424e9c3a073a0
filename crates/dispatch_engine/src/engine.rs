//! Engine wiring: attach the three change-feed subscriptions and drive the
//! listeners until the feeds close.

use std::sync::Arc;

use tracing::info;

use dispatch_core::status::{ProposalEvent, RequestStatus};

use crate::config::{EngineConfig, DRIVERS_COLLECTION, PROPOSALS_COLLECTION, REQUESTS_COLLECTION};
use crate::ingestion::RequestIngestion;
use crate::location_sync::LocationSync;
use crate::matcher::Matcher;
use crate::proposal_sync::ProposalStateSync;
use crate::store::{DocumentStore, Filter, StoreError};
use crate::telemetry::DispatchTelemetry;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failing to attach a subscription at startup is the one fatal path;
    /// the caller is expected to exit.
    #[error("failed to subscribe to {feed}: {source}")]
    Subscribe {
        feed: &'static str,
        #[source]
        source: StoreError,
    },
}

pub struct Engine {
    passenger: Arc<dyn DocumentStore>,
    driver: Arc<dyn DocumentStore>,
    config: EngineConfig,
    telemetry: Arc<DispatchTelemetry>,
}

impl Engine {
    pub fn new(
        passenger: Arc<dyn DocumentStore>,
        driver: Arc<dyn DocumentStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            passenger,
            driver,
            config,
            telemetry: Arc::new(DispatchTelemetry::default()),
        }
    }

    /// Shared KPI counters, readable while the engine runs.
    pub fn telemetry(&self) -> Arc<DispatchTelemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Attach all subscriptions, then serve notifications until every feed
    /// closes. Runs for the life of the process.
    pub async fn run(self) -> Result<(), EngineError> {
        let requests_feed = self
            .passenger
            .subscribe(
                REQUESTS_COLLECTION,
                Filter::field_in(
                    "status",
                    RequestStatus::MATCHABLE.iter().map(|s| s.as_str()),
                ),
            )
            .await
            .map_err(|source| EngineError::Subscribe {
                feed: "ride requests",
                source,
            })?;
        let proposals_feed = self
            .driver
            .subscribe(
                PROPOSALS_COLLECTION,
                Filter::field_in("status", ProposalEvent::watched_statuses().iter().copied()),
            )
            .await
            .map_err(|source| EngineError::Subscribe {
                feed: "proposal progress",
                source,
            })?;
        let drivers_feed = self
            .driver
            .subscribe(DRIVERS_COLLECTION, Filter::all())
            .await
            .map_err(|source| EngineError::Subscribe {
                feed: "driver locations",
                source,
            })?;
        info!("all listeners attached");

        let matcher = Arc::new(Matcher::new(
            Arc::clone(&self.passenger),
            Arc::clone(&self.driver),
            self.config.clone(),
            Arc::clone(&self.telemetry),
        ));
        let ingestion =
            RequestIngestion::new(matcher, self.config.pending_resweep_interval());
        let proposal_sync = ProposalStateSync::new(
            Arc::clone(&self.passenger),
            Arc::clone(&self.driver),
            self.config.retry,
            Arc::clone(&self.telemetry),
        );
        let location_sync = LocationSync::new(
            Arc::clone(&self.passenger),
            self.config.clone(),
            Arc::clone(&self.telemetry),
        );

        tokio::join!(
            ingestion.run(requests_feed),
            proposal_sync.run(proposals_feed),
            location_sync.run(drivers_feed),
        );
        Ok(())
    }
}
