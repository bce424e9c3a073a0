//! Pending-request ingestion.
//!
//! Consumes the pending-request change feed and dispatches each matchable
//! request onto its own task, so one slow match cannot stall notifications
//! for other requests. A periodic re-sweep re-queries for still-pending
//! requests, covering the case where a request lost a reservation race and
//! no further change event would ever wake it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use dispatch_core::document::{aliases, str_field};
use dispatch_core::status::RequestStatus;

use crate::config::REQUESTS_COLLECTION;
use crate::matcher::Matcher;
use crate::store::{ChangeFeed, ChangeKind, DocumentStore, Filter};

pub struct RequestIngestion {
    matcher: Arc<Matcher>,
    resweep: Option<Duration>,
}

impl RequestIngestion {
    pub fn new(matcher: Arc<Matcher>, resweep: Option<Duration>) -> Self {
        Self { matcher, resweep }
    }

    pub async fn run(self, mut feed: ChangeFeed) {
        let resweep_enabled = self.resweep.is_some();
        let mut ticker =
            tokio::time::interval(self.resweep.unwrap_or(Duration::from_secs(3600)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                change = feed.recv() => {
                    match change {
                        Some(change) if change.kind != ChangeKind::Removed => {
                            self.dispatch(&change.doc.id).await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = ticker.tick(), if resweep_enabled => {
                    self.resweep_pending().await;
                }
            }
        }
        info!("request feed closed, ingestion stopped");
    }

    /// Re-read the request and, if it is still matchable, hand it to the
    /// matcher on its own task. The re-read guards against stale and
    /// duplicate notifications.
    async fn dispatch(&self, request_id: &str) {
        let fresh = match self
            .matcher
            .passenger_store()
            .get(REQUESTS_COLLECTION, request_id)
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(request = %request_id, "request disappeared before matching");
                return;
            }
            Err(err) => {
                warn!(request = %request_id, error = %err, "failed to re-read request");
                return;
            }
        };

        let matchable = str_field(&fresh.data, aliases::STATUS)
            .and_then(RequestStatus::parse)
            .map(|status| status.is_matchable())
            .unwrap_or(false);
        if !matchable {
            debug!(request = %request_id, "request no longer pending, skipping");
            return;
        }

        let matcher = Arc::clone(&self.matcher);
        tokio::spawn(async move {
            matcher.match_request(&fresh).await;
        });
    }

    async fn resweep_pending(&self) {
        let filter = Filter::field_in(
            "status",
            RequestStatus::MATCHABLE.iter().map(|s| s.as_str()),
        );
        match self
            .matcher
            .passenger_store()
            .query(REQUESTS_COLLECTION, filter)
            .await
        {
            Ok(pending) => {
                if !pending.is_empty() {
                    debug!(count = pending.len(), "re-sweeping pending requests");
                }
                for doc in pending {
                    self.dispatch(&doc.id).await;
                }
            }
            Err(err) => warn!(error = %err, "pending re-sweep query failed"),
        }
    }
}
