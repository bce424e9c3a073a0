//! Dispatch KPIs: cheap atomic counters incremented on the hot paths and
//! snapshotted for export or assertions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    /// Matchable request notifications handled.
    pub requests_seen: AtomicU64,
    /// Proposals successfully created and confirmed to the passenger.
    pub proposals_created: AtomicU64,
    /// Reservation transactions lost to a concurrent reservation.
    pub reservation_conflicts: AtomicU64,
    /// Match cycles that found no suitable driver.
    pub matches_without_driver: AtomicU64,
    /// Proposal status transitions mirrored onto the passenger store.
    pub status_transitions: AtomicU64,
    /// Live driver locations mirrored onto requests.
    pub locations_mirrored: AtomicU64,
    /// Arrivals detected by the proximity heuristic.
    pub arrivals_detected: AtomicU64,
}

impl DispatchTelemetry {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            requests_seen: self.requests_seen.load(Ordering::Relaxed),
            proposals_created: self.proposals_created.load(Ordering::Relaxed),
            reservation_conflicts: self.reservation_conflicts.load(Ordering::Relaxed),
            matches_without_driver: self.matches_without_driver.load(Ordering::Relaxed),
            status_transitions: self.status_transitions.load(Ordering::Relaxed),
            locations_mirrored: self.locations_mirrored.load(Ordering::Relaxed),
            arrivals_detected: self.arrivals_detected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub requests_seen: u64,
    pub proposals_created: u64,
    pub reservation_conflicts: u64,
    pub matches_without_driver: u64,
    pub status_transitions: u64,
    pub locations_mirrored: u64,
    pub arrivals_detected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let telemetry = DispatchTelemetry::default();
        DispatchTelemetry::bump(&telemetry.requests_seen);
        DispatchTelemetry::bump(&telemetry.requests_seen);
        DispatchTelemetry::bump(&telemetry.proposals_created);

        let snap = telemetry.snapshot();
        assert_eq!(snap.requests_seen, 2);
        assert_eq!(snap.proposals_created, 1);
        assert_eq!(snap.reservation_conflicts, 0);
    }
}
