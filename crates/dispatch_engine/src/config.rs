//! Engine tuning knobs and the environment surface that feeds them.

use std::time::Duration;

use dispatch_core::matching::MatchPolicy;

/// Passenger-side ride request collection.
pub const REQUESTS_COLLECTION: &str = "public_ride_requests";
/// Driver-side driver documents collection.
pub const DRIVERS_COLLECTION: &str = "riders";
/// Driver-side proposal collection.
pub const PROPOSALS_COLLECTION: &str = "driver_proposals";

/// Exponential backoff for store writes that hit transient errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// All engine configuration. Defaults match the production deployment; the
/// environment overrides individual fields.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum driver-to-pickup distance for a match (km).
    pub max_match_distance_km: f64,
    /// Maximum deviation between driver route end and request destination (km).
    pub max_destination_deviation_km: f64,
    /// Driver-to-pickup distance at which the location listener auto-marks
    /// arrival (km).
    pub arrived_distance_threshold_km: f64,
    /// Interval between re-sweeps of still-pending requests. 0 disables the
    /// sweep and leaves retry purely event-driven.
    pub pending_resweep_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_match_distance_km: 5.0,
            max_destination_deviation_km: 5.0,
            arrived_distance_threshold_km: 0.05,
            pending_resweep_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment. Malformed values fall back to
    /// the default for that field and are logged.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        read_f64("MAX_MATCH_DISTANCE_KM", &mut config.max_match_distance_km);
        read_f64(
            "MAX_DESTINATION_DEVIATION_KM",
            &mut config.max_destination_deviation_km,
        );
        read_f64(
            "ARRIVED_DISTANCE_THRESHOLD_KM",
            &mut config.arrived_distance_threshold_km,
        );
        read_u64("PENDING_RESWEEP_SECS", &mut config.pending_resweep_secs);
        config
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            max_pickup_distance_km: self.max_match_distance_km,
            max_destination_deviation_km: self.max_destination_deviation_km,
        }
    }

    pub fn pending_resweep_interval(&self) -> Option<Duration> {
        (self.pending_resweep_secs > 0).then(|| Duration::from_secs(self.pending_resweep_secs))
    }
}

fn read_f64(name: &str, target: &mut f64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "ignoring malformed env override"),
        }
    }
}

fn read_u64(name: &str, target: &mut u64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "ignoring malformed env override"),
        }
    }
}
