//! Lifecycle state machines for requests, drivers, and proposals.
//!
//! Statuses arrive as free-form strings written by several client versions;
//! parsing is case-insensitive and the proposal table accepts the full alias
//! set. Everything downstream works with these enums.

/// Passenger-side ride request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Proposed,
    Accepted,
    ArrivedAtPickup,
    PickedUp,
    OnWay,
    Completed,
    Rejected,
    /// A request the passenger app re-opened after a failed cycle. Matched
    /// exactly like `Pending`.
    PendingAgain,
}

impl RequestStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "proposed" => Some(Self::Proposed),
            "accepted" => Some(Self::Accepted),
            "arrived_at_pickup" => Some(Self::ArrivedAtPickup),
            "picked_up" => Some(Self::PickedUp),
            "on_way" => Some(Self::OnWay),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "pending_again" => Some(Self::PendingAgain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::ArrivedAtPickup => "arrived_at_pickup",
            Self::PickedUp => "picked_up",
            Self::OnWay => "on_way",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::PendingAgain => "pending_again",
        }
    }

    /// Position along the forward ride lifecycle, used to refuse downgrades.
    /// `Rejected` sits outside the chain.
    pub fn lifecycle_rank(&self) -> Option<u8> {
        match self {
            Self::Pending | Self::PendingAgain => Some(0),
            Self::Proposed => Some(1),
            Self::Accepted => Some(2),
            Self::ArrivedAtPickup => Some(3),
            Self::PickedUp => Some(4),
            Self::OnWay => Some(5),
            Self::Completed => Some(6),
            Self::Rejected => None,
        }
    }

    /// Statuses the matcher picks up.
    pub fn is_matchable(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingAgain)
    }

    /// Statuses a driver rejection may revert to pending. Anything further
    /// along (or terminal) stays untouched.
    pub fn is_revertible(&self) -> bool {
        matches!(self, Self::Proposed | Self::Accepted)
    }

    pub const MATCHABLE: &'static [RequestStatus] = &[Self::Pending, Self::PendingAgain];
}

/// Driver-side occupancy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Available,
    Idle,
    OnRouteToOriginalDestination,
    OnRouteToPickup,
    EnRoute,
    ReservedForProposal,
    OnSitePickup,
}

impl DriverStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "idle" => Some(Self::Idle),
            "on_route_to_original_destination" => Some(Self::OnRouteToOriginalDestination),
            "on_route_to_pickup" => Some(Self::OnRouteToPickup),
            "en_route" => Some(Self::EnRoute),
            "reserved_for_proposal" => Some(Self::ReservedForProposal),
            "on_site_pickup" => Some(Self::OnSitePickup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Idle => "idle",
            Self::OnRouteToOriginalDestination => "on_route_to_original_destination",
            Self::OnRouteToPickup => "on_route_to_pickup",
            Self::EnRoute => "en_route",
            Self::ReservedForProposal => "reserved_for_proposal",
            Self::OnSitePickup => "on_site_pickup",
        }
    }

    /// Drivers in these statuses may be offered a new proposal.
    pub const ELIGIBLE_FOR_MATCHING: &'static [DriverStatus] = &[
        Self::OnRouteToOriginalDestination,
        Self::Available,
        Self::Idle,
        Self::OnRouteToPickup,
        Self::EnRoute,
    ];

    pub fn is_eligible_for_matching(&self) -> bool {
        Self::ELIGIBLE_FOR_MATCHING.contains(self)
    }

    /// Statuses that mean the driver is heading to (or holding) a pickup,
    /// used by the proximity arrival heuristic.
    pub fn is_heading_to_pickup(&self) -> bool {
        matches!(
            self,
            Self::OnRouteToPickup | Self::OnRouteToOriginalDestination | Self::ReservedForProposal
        )
    }
}

/// Status a proposal is created with.
pub const PROPOSAL_PENDING_ACCEPTANCE: &str = "pending_acceptance";

/// A recognized proposal status change, after alias folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalEvent {
    Accepted,
    Arrived,
    OtpVerified,
    FaceVerified,
    PickedUp,
    OnWay,
    Completed,
    Rejected,
}

impl ProposalEvent {
    /// Fold a raw proposal status into an event. Unrecognized statuses
    /// (including `pending_acceptance` itself) return `None` and are ignored
    /// by the synchronizer.
    pub fn from_status(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accepted" | "driver_accepted" => Some(Self::Accepted),
            "driver_arrived" | "arrived" | "arrived_at_pickup" => Some(Self::Arrived),
            "otp_verified" => Some(Self::OtpVerified),
            "face_verified" => Some(Self::FaceVerified),
            "picked_up" | "pickedup" => Some(Self::PickedUp),
            "on_way" | "on_the_way" | "en_route" => Some(Self::OnWay),
            "completed" | "finished" => Some(Self::Completed),
            "rejected" | "cancelled" | "declined" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Passenger request status this event drives, for plain forward
    /// transitions. Verification flags and rejection have their own handling.
    pub fn request_status(&self) -> Option<RequestStatus> {
        match self {
            Self::Accepted => Some(RequestStatus::Accepted),
            Self::Arrived => Some(RequestStatus::ArrivedAtPickup),
            Self::PickedUp => Some(RequestStatus::PickedUp),
            Self::OnWay => Some(RequestStatus::OnWay),
            Self::Completed => Some(RequestStatus::Completed),
            Self::OtpVerified | Self::FaceVerified | Self::Rejected => None,
        }
    }

    /// Driver occupancy status mirrored for this event.
    pub fn driver_status(&self) -> Option<DriverStatus> {
        match self {
            Self::Accepted => Some(DriverStatus::OnRouteToPickup),
            Self::Arrived => Some(DriverStatus::OnSitePickup),
            Self::PickedUp | Self::OnWay => Some(DriverStatus::EnRoute),
            Self::Completed => Some(DriverStatus::Idle),
            Self::OtpVerified | Self::FaceVerified | Self::Rejected => None,
        }
    }

    /// Passenger-side timestamp stamped on the transition.
    pub fn timestamp_field(&self) -> Option<&'static str> {
        match self {
            Self::Accepted => Some("accepted_at"),
            Self::Arrived => Some("arrived_at"),
            Self::PickedUp => Some("picked_up_at"),
            Self::OnWay => Some("on_way_at"),
            Self::Completed => Some("completed_at"),
            Self::OtpVerified | Self::FaceVerified | Self::Rejected => None,
        }
    }

    /// Every raw status string the synchronizer subscribes to.
    pub fn watched_statuses() -> &'static [&'static str] {
        &[
            "accepted",
            "driver_accepted",
            "driver_arrived",
            "arrived",
            "arrived_at_pickup",
            "otp_verified",
            "face_verified",
            "picked_up",
            "pickedup",
            "on_way",
            "on_the_way",
            "en_route",
            "completed",
            "finished",
            "rejected",
            "cancelled",
            "declined",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_status_round_trips() {
        for s in [
            "pending",
            "proposed",
            "accepted",
            "arrived_at_pickup",
            "picked_up",
            "on_way",
            "completed",
            "rejected",
            "pending_again",
        ] {
            let parsed = RequestStatus::parse(s).expect(s);
            assert_eq!(parsed.as_str(), s);
        }
        assert_eq!(RequestStatus::parse("PENDING"), Some(RequestStatus::Pending));
        assert_eq!(RequestStatus::parse("no_such"), None);
    }

    #[test]
    fn lifecycle_rank_is_monotone_along_the_ride() {
        let chain = [
            RequestStatus::Pending,
            RequestStatus::Proposed,
            RequestStatus::Accepted,
            RequestStatus::ArrivedAtPickup,
            RequestStatus::PickedUp,
            RequestStatus::OnWay,
            RequestStatus::Completed,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].lifecycle_rank() < pair[1].lifecycle_rank());
        }
        assert_eq!(RequestStatus::Rejected.lifecycle_rank(), None);
    }

    #[test]
    fn reserved_driver_is_not_eligible() {
        assert!(!DriverStatus::ReservedForProposal.is_eligible_for_matching());
        assert!(!DriverStatus::OnSitePickup.is_eligible_for_matching());
        assert!(DriverStatus::Available.is_eligible_for_matching());
        assert!(DriverStatus::OnRouteToPickup.is_eligible_for_matching());
    }

    #[test]
    fn proposal_aliases_fold_to_one_event() {
        for s in ["accepted", "driver_accepted", "ACCEPTED"] {
            assert_eq!(ProposalEvent::from_status(s), Some(ProposalEvent::Accepted));
        }
        for s in ["driver_arrived", "arrived", "arrived_at_pickup"] {
            assert_eq!(ProposalEvent::from_status(s), Some(ProposalEvent::Arrived));
        }
        for s in ["rejected", "cancelled", "declined"] {
            assert_eq!(ProposalEvent::from_status(s), Some(ProposalEvent::Rejected));
        }
        assert_eq!(ProposalEvent::from_status("pending_acceptance"), None);
        assert_eq!(ProposalEvent::from_status("gibberish"), None);
    }

    #[test]
    fn completed_event_frees_the_driver() {
        assert_eq!(
            ProposalEvent::Completed.driver_status(),
            Some(DriverStatus::Idle)
        );
        assert_eq!(
            ProposalEvent::Accepted.driver_status(),
            Some(DriverStatus::OnRouteToPickup)
        );
        assert_eq!(ProposalEvent::Rejected.driver_status(), None);
    }

    #[test]
    fn watched_statuses_cover_every_event() {
        for s in ProposalEvent::watched_statuses() {
            assert!(ProposalEvent::from_status(s).is_some(), "unmapped: {s}");
        }
    }
}
