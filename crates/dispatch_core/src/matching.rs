//! Greedy driver selection: scan eligible candidates, keep the one with the
//! lowest incremental detour within the distance and deviation thresholds.

use crate::geo::{self, DetourCost, GeoPoint};

/// Below this pickup distance the effective pickup point is snapped to the
/// midpoint between driver and passenger, smoothing GPS noise at short range.
pub const PICKUP_SNAP_DISTANCE_KM: f64 = 2.0;

/// Detour costs within this margin count as equal and tie-break on pickup
/// distance instead.
pub const COST_TIE_EPSILON: f64 = 1e-6;

/// Matching thresholds.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// Maximum driver-to-pickup distance (km).
    pub max_pickup_distance_km: f64,
    /// Maximum distance between the driver's route end and the request's
    /// destination (km).
    pub max_destination_deviation_km: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            max_pickup_distance_km: 5.0,
            max_destination_deviation_km: 5.0,
        }
    }
}

/// A driver that survived normalization: has a start and an end position.
#[derive(Debug, Clone)]
pub struct DriverCandidate {
    pub id: String,
    /// Current position / route start.
    pub start: GeoPoint,
    /// Planned route end, a proxy for where the driver will be soon.
    pub end: GeoPoint,
    pub vehicle_type: String,
}

/// The winning candidate with its scores.
#[derive(Debug, Clone)]
pub struct RankedMatch {
    pub candidate_index: usize,
    pub driver_id: String,
    pub pickup_distance_km: f64,
    pub detour: DetourCost,
    /// Requested pickup, possibly snapped to the driver/passenger midpoint.
    pub effective_pickup: GeoPoint,
}

/// Case-insensitive vehicle preference check. "any" (or empty) accepts every
/// vehicle; otherwise the preference must appear as a substring of the
/// driver's vehicle type.
pub fn vehicle_preference_matches(preference: &str, vehicle_type: &str) -> bool {
    let pref = preference.trim().to_ascii_lowercase();
    if pref.is_empty() || pref == "any" {
        return true;
    }
    vehicle_type.to_ascii_lowercase().contains(&pref)
}

/// Pickup point actually proposed to the driver.
pub fn effective_pickup(driver_start: GeoPoint, pickup: GeoPoint, pickup_distance_km: f64) -> GeoPoint {
    if pickup_distance_km < PICKUP_SNAP_DISTANCE_KM {
        geo::midpoint(driver_start, pickup)
    } else {
        pickup
    }
}

/// Pick the best candidate for a request, or `None` when nobody qualifies.
///
/// Candidates are rejected when the vehicle preference does not match, the
/// pickup distance exceeds the policy maximum, or the destination deviation
/// exceeds the policy maximum. Among survivors the minimum incremental
/// detour wins; near-equal costs tie-break on smaller pickup distance.
pub fn select_best(
    policy: &MatchPolicy,
    pickup: GeoPoint,
    destination: GeoPoint,
    vehicle_preference: &str,
    candidates: &[DriverCandidate],
) -> Option<RankedMatch> {
    let mut best: Option<RankedMatch> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        if !vehicle_preference_matches(vehicle_preference, &candidate.vehicle_type) {
            continue;
        }

        let pickup_distance_km = geo::distance_km(candidate.start, pickup);
        if pickup_distance_km > policy.max_pickup_distance_km {
            continue;
        }

        let destination_deviation_km = geo::distance_km(candidate.end, destination);
        if destination_deviation_km > policy.max_destination_deviation_km {
            continue;
        }

        let detour = geo::incremental_detour_km(candidate.start, candidate.end, pickup, destination);

        let wins = match &best {
            None => true,
            Some(current) => {
                detour.incremental_km < current.detour.incremental_km - COST_TIE_EPSILON
                    || ((detour.incremental_km - current.detour.incremental_km).abs()
                        <= COST_TIE_EPSILON
                        && pickup_distance_km < current.pickup_distance_km)
            }
        };
        if wins {
            best = Some(RankedMatch {
                candidate_index: index,
                driver_id: candidate.id.clone(),
                pickup_distance_km,
                detour,
                effective_pickup: effective_pickup(candidate.start, pickup, pickup_distance_km),
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, start: GeoPoint, end: GeoPoint) -> DriverCandidate {
        DriverCandidate {
            id: id.to_string(),
            start,
            end,
            vehicle_type: "Sedan".to_string(),
        }
    }

    #[test]
    fn selects_the_along_route_driver() {
        // Request and driver from the reference scenario: the driver is
        // already heading almost exactly along the requested trip.
        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        let driver = candidate(
            "d1",
            GeoPoint::new(1.301, 103.799),
            GeoPoint::new(1.312, 103.822),
        );

        let best = select_best(&MatchPolicy::default(), pickup, destination, "any", &[driver])
            .expect("driver selected");
        assert_eq!(best.driver_id, "d1");
        assert!((best.pickup_distance_km - 0.15).abs() < 0.05, "pickup {}", best.pickup_distance_km);
        assert!(best.detour.incremental_km < 0.5, "detour {}", best.detour.incremental_km);
    }

    #[test]
    fn rejects_drivers_beyond_pickup_distance() {
        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        // ~11 km north of the pickup.
        let far = candidate(
            "far",
            GeoPoint::new(1.400, 103.800),
            GeoPoint::new(1.310, 103.820),
        );
        assert!(select_best(&MatchPolicy::default(), pickup, destination, "any", &[far]).is_none());
    }

    #[test]
    fn rejects_drivers_with_deviating_destination() {
        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        // Close by, but finishing ~11 km away from the request's destination.
        let wrong_way = candidate(
            "w",
            GeoPoint::new(1.301, 103.801),
            GeoPoint::new(1.410, 103.820),
        );
        assert!(
            select_best(&MatchPolicy::default(), pickup, destination, "any", &[wrong_way])
                .is_none()
        );
    }

    #[test]
    fn lower_detour_wins() {
        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        let aligned = candidate(
            "aligned",
            GeoPoint::new(1.301, 103.799),
            GeoPoint::new(1.311, 103.821),
        );
        // Same area but heading the opposite direction: larger detour.
        let misaligned = candidate(
            "misaligned",
            GeoPoint::new(1.299, 103.801),
            GeoPoint::new(1.280, 103.790),
        );

        let best = select_best(
            &MatchPolicy::default(),
            pickup,
            destination,
            "any",
            &[misaligned, aligned],
        )
        .expect("match");
        assert_eq!(best.driver_id, "aligned");
    }

    #[test]
    fn equal_cost_ties_break_on_pickup_distance() {
        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        // Two parked drivers (start == end). One sits on the pickup, one on
        // the destination: both detours equal 2 * d(pickup, destination)
        // exactly, so only the tie-break separates them.
        let at_pickup = candidate("at_pickup", pickup, pickup);
        let at_destination = candidate("at_destination", destination, destination);

        let best = select_best(
            &MatchPolicy::default(),
            pickup,
            destination,
            "any",
            &[at_destination, at_pickup],
        )
        .expect("match");
        assert_eq!(best.driver_id, "at_pickup");
        assert!(best.pickup_distance_km.abs() < 1e-9);
    }

    #[test]
    fn vehicle_preference_filters_candidates() {
        assert!(vehicle_preference_matches("any", "Sedan"));
        assert!(vehicle_preference_matches("Any", ""));
        assert!(vehicle_preference_matches("suv", "Compact SUV"));
        assert!(!vehicle_preference_matches("van", "Sedan"));

        let pickup = GeoPoint::new(1.300, 103.800);
        let destination = GeoPoint::new(1.310, 103.820);
        let sedan = candidate(
            "sedan",
            GeoPoint::new(1.301, 103.799),
            GeoPoint::new(1.312, 103.822),
        );
        assert!(select_best(&MatchPolicy::default(), pickup, destination, "Van", &[sedan]).is_none());
    }

    #[test]
    fn nearby_pickup_snaps_to_midpoint() {
        let driver_start = GeoPoint::new(1.302, 103.802);
        let pickup = GeoPoint::new(1.300, 103.800);
        let snapped = effective_pickup(driver_start, pickup, 0.3);
        assert!((snapped.lat - 1.301).abs() < 1e-9);
        assert!((snapped.lng - 103.801).abs() < 1e-9);

        let kept = effective_pickup(driver_start, pickup, 3.0);
        assert_eq!(kept, pickup);
    }
}
