//! Actions for the booking cycle.
//!
//! User intents and network results share one enum. Network results carry
//! the [`SearchGeneration`] they were issued for so stale ones can be dropped.

use super::state::{RetryAction, SearchGeneration};
use crate::api::{ApiResult, PaymentLink};
use crate::persistence::SelectionChange;
use crate::seat_map::SeatMap;
use crate::types::{
    Address, AddressId, Leg, Location, NewAddress, ReservationId, ReservationRecord,
    RoundReservationRecord, SeatNo, Trip, TripId, TripKind, TripSearchCriteria,
};
use chrono::NaiveDateTime;

/// Everything the booking reducer reacts to.
#[derive(Clone, Debug)]
pub enum BookingAction {
    // ===== Lifecycle =====
    /// Rehydrate persisted selections and load the address book
    Initialize,

    // ===== Directory =====
    /// Fetch boarding locations
    LoadLocations,

    /// Boarding locations arrived
    LocationsLoaded {
        /// Location list or failure
        result: ApiResult<Vec<Location>>,
    },

    // ===== Search =====
    /// Validate the form and run a new search
    StartSearch {
        /// Form input
        criteria: TripSearchCriteria,
    },

    /// Fetch one leg's trip list again after it failed
    RetrySearch {
        /// Failed leg
        leg: Leg,
    },

    /// One leg's trip list arrived
    TripsLoaded {
        /// Search the request belonged to
        generation: SearchGeneration,
        /// Leg
        leg: Leg,
        /// Trips or failure
        result: ApiResult<Vec<Trip>>,
    },

    /// Every leg of a search has answered
    SearchSettled {
        /// Search that settled
        generation: SearchGeneration,
    },

    /// A newer search replaced this one; its results will be dropped
    SearchSuperseded {
        /// Search that was replaced
        generation: SearchGeneration,
    },

    // ===== Trips and seats =====
    /// Choose a trip from a leg's results
    SelectTrip {
        /// Leg
        leg: Leg,
        /// Trip from the current results
        trip_id: TripId,
    },

    /// Fetch the seat map of a leg's chosen trip again
    RefreshSeatMap {
        /// Leg
        leg: Leg,
    },

    /// A seat map arrived
    SeatMapLoaded {
        /// Search the request belonged to
        generation: SearchGeneration,
        /// Leg
        leg: Leg,
        /// Trip the map belongs to
        trip_id: TripId,
        /// Per-leg request number
        request: u64,
        /// Layout or failure
        result: ApiResult<SeatMap>,
    },

    /// Flip a seat in a leg's selection
    ToggleSeat {
        /// Leg
        leg: Leg,
        /// Seat
        seat_no: SeatNo,
    },

    /// Move on to picking the return trip (round trips)
    AdvanceToReturnTrip,

    // ===== Reservations =====
    /// Create the reservation for a leg
    ConfirmReservation {
        /// Leg to confirm
        leg: Leg,
    },

    /// Ticket creation answered (one-way, or the outbound half of a round trip)
    TicketCreated {
        /// Search the request belonged to
        generation: SearchGeneration,
        /// Leg the user asked to confirm; `Return` means the return half
        /// follows on success
        requested: Leg,
        /// Record or failure
        result: ApiResult<ReservationRecord>,
    },

    /// Return-leg creation answered
    ReturnTicketCreated {
        /// Search the request belonged to
        generation: SearchGeneration,
        /// Outbound reservation that was extended
        outbound_id: ReservationId,
        /// Combined record or failure
        result: ApiResult<RoundReservationRecord>,
    },

    /// Fetch the payment link of the final reservation again
    RetryPaymentLink,

    /// Payment link answered
    PaymentLinkFetched {
        /// Search the request belonged to
        generation: SearchGeneration,
        /// Reservation the link is for
        reservation_id: ReservationId,
        /// Link or failure
        result: ApiResult<PaymentLink>,
    },

    // ===== Address book and pickup =====
    /// Fetch the address book
    LoadAddresses,

    /// Address book arrived
    AddressesLoaded {
        /// Addresses or failure
        result: ApiResult<Vec<Address>>,
    },

    /// Save a new address, optionally selecting it for a leg
    CreateAddress {
        /// Leg to select the new address for
        leg: Option<Leg>,
        /// Address to save
        address: NewAddress,
    },

    /// Address creation answered
    AddressCreated {
        /// Leg to select the new address for
        leg: Option<Leg>,
        /// Saved address or failure
        result: ApiResult<Address>,
    },

    /// Choose or clear a leg's pickup address
    SelectAddress {
        /// Leg
        leg: Leg,
        /// Address book entry
        address_id: Option<AddressId>,
    },

    /// Choose or clear a leg's pickup time
    SelectDateTime {
        /// Leg
        leg: Leg,
        /// Pickup time
        at: Option<NaiveDateTime>,
    },

    /// Remember the preferred trip kind for the search form
    SetSearchKind {
        /// Preferred kind
        kind: TripKind,
    },

    /// Another context changed a persisted selection
    SelectionChangedElsewhere {
        /// Decoded change
        change: SelectionChange,
    },

    // ===== Notices =====
    /// Acknowledge a notice
    DismissNotice {
        /// Notice id
        id: u64,
    },

    /// Run a notice's retry affordance
    RetryNotice {
        /// Notice id
        id: u64,
    },
}

impl BookingAction {
    /// Generation a network result was issued for
    #[must_use]
    pub const fn generation(&self) -> Option<SearchGeneration> {
        match self {
            Self::TripsLoaded { generation, .. }
            | Self::SearchSettled { generation }
            | Self::SearchSuperseded { generation }
            | Self::SeatMapLoaded { generation, .. }
            | Self::TicketCreated { generation, .. }
            | Self::ReturnTicketCreated { generation, .. }
            | Self::PaymentLinkFetched { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::LoadLocations => "load_locations",
            Self::LocationsLoaded { .. } => "locations_loaded",
            Self::StartSearch { .. } => "start_search",
            Self::RetrySearch { .. } => "retry_search",
            Self::TripsLoaded { .. } => "trips_loaded",
            Self::SearchSettled { .. } => "search_settled",
            Self::SearchSuperseded { .. } => "search_superseded",
            Self::SelectTrip { .. } => "select_trip",
            Self::RefreshSeatMap { .. } => "refresh_seat_map",
            Self::SeatMapLoaded { .. } => "seat_map_loaded",
            Self::ToggleSeat { .. } => "toggle_seat",
            Self::AdvanceToReturnTrip => "advance_to_return_trip",
            Self::ConfirmReservation { .. } => "confirm_reservation",
            Self::TicketCreated { .. } => "ticket_created",
            Self::ReturnTicketCreated { .. } => "return_ticket_created",
            Self::RetryPaymentLink => "retry_payment_link",
            Self::PaymentLinkFetched { .. } => "payment_link_fetched",
            Self::LoadAddresses => "load_addresses",
            Self::AddressesLoaded { .. } => "addresses_loaded",
            Self::CreateAddress { .. } => "create_address",
            Self::AddressCreated { .. } => "address_created",
            Self::SelectAddress { .. } => "select_address",
            Self::SelectDateTime { .. } => "select_datetime",
            Self::SetSearchKind { .. } => "set_search_kind",
            Self::SelectionChangedElsewhere { .. } => "selection_changed_elsewhere",
            Self::DismissNotice { .. } => "dismiss_notice",
            Self::RetryNotice { .. } => "retry_notice",
        }
    }
}

impl From<RetryAction> for BookingAction {
    fn from(retry: RetryAction) -> Self {
        match retry {
            RetryAction::Search(leg) => Self::RetrySearch { leg },
            RetryAction::SeatMap(leg) => Self::RefreshSeatMap { leg },
            RetryAction::ConfirmReservation(leg) => Self::ConfirmReservation { leg },
            RetryAction::PaymentLink => Self::RetryPaymentLink,
            RetryAction::LoadAddresses => Self::LoadAddresses,
            RetryAction::LoadLocations => Self::LoadLocations,
        }
    }
}
