//! Booking state, split into slices.

use super::step::{CycleEvent, CycleState, TransitionError};
use crate::error::BookingError;
use crate::persistence::PersistedSelection;
use crate::seat_map::{SeatMap, SeatSelection};
use crate::types::{
    ActiveSearch, Address, AddressId, Leg, Location, ReservationId, ReservationPayload,
    ReservationRecord, RoundReservationRecord, SeatNo, Trip, TripId, TripKind,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;

/// Search counter; every effect remembers the generation it was issued for
/// and its result is dropped if a newer search started meanwhile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchGeneration(u64);

impl SearchGeneration {
    /// The generation after this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SearchGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One value per leg
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegPair<T> {
    /// Outbound
    pub outbound: T,
    /// Return
    pub return_leg: T,
}

impl<T> LegPair<T> {
    /// Value for `leg`
    pub const fn get(&self, leg: Leg) -> &T {
        match leg {
            Leg::Outbound => &self.outbound,
            Leg::Return => &self.return_leg,
        }
    }

    /// Mutable value for `leg`
    pub fn get_mut(&mut self, leg: Leg) -> &mut T {
        match leg {
            Leg::Outbound => &mut self.outbound,
            Leg::Return => &mut self.return_leg,
        }
    }
}

/// Trip list, chosen trip, seat map and seat selection of one leg
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegState {
    /// Search results
    pub trips: Vec<Trip>,
    /// Results arrived (successfully) for the current search
    pub trips_loaded: bool,
    /// Chosen trip
    pub trip: Option<Trip>,
    /// Layout of the chosen trip
    pub seat_map: Option<SeatMap>,
    /// A seat map request is outstanding
    pub seat_map_loading: bool,
    /// Number of the newest seat map request; older answers are dropped
    pub seat_map_request: u64,
    /// Chosen seats
    pub selection: SeatSelection,
    /// Seats dropped by the last seat map refresh
    pub pruned: Vec<SeatNo>,
}

impl LegState {
    /// Result with id `trip_id`
    #[must_use]
    pub fn find_trip(&self, trip_id: TripId) -> Option<&Trip> {
        self.trips.iter().find(|t| t.id == trip_id)
    }

    /// Id of the chosen trip
    #[must_use]
    pub fn trip_id(&self) -> Option<TripId> {
        self.trip.as_ref().map(|t| t.id)
    }
}

/// Server-confirmed reservations for the current search
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationSlice {
    /// One-way record, or the outbound half of a round trip
    pub outbound: Option<ReservationRecord>,
    /// Combined round-trip record
    pub combined: Option<RoundReservationRecord>,
    /// Leg whose confirmation is being processed
    pub in_flight: Option<Leg>,
    /// A payment link request is outstanding
    pub payment_link_in_flight: bool,
}

impl ReservationSlice {
    /// The reservation that gets paid: the one-way record, or the combined
    /// record of a round trip
    #[must_use]
    pub fn final_payload(&self, kind: TripKind) -> Option<ReservationPayload> {
        match kind {
            TripKind::OneWay => self.outbound.clone().map(ReservationPayload::Ticket),
            TripKind::Round => self.combined.clone().map(ReservationPayload::RoundTrip),
        }
    }

    /// Seats `leg` holds on a confirmed record
    #[must_use]
    pub fn held_seats(&self, leg: Leg) -> Vec<SeatNo> {
        let tickets = match leg {
            Leg::Outbound => self.outbound.as_ref().map(|r| r.tickets.as_slice()),
            Leg::Return => self.combined.as_ref().map(|r| r.return_tickets.as_slice()),
        };
        tickets
            .unwrap_or_default()
            .iter()
            .map(|t| t.seat_no.clone())
            .collect()
    }

    /// Whether `leg` already has its record
    #[must_use]
    pub const fn has_record(&self, leg: Leg) -> bool {
        match leg {
            Leg::Outbound => self.outbound.is_some(),
            Leg::Return => self.combined.is_some(),
        }
    }

    /// Drop the records that depend on `leg`'s selection. Returns the ids
    /// dropped.
    pub fn invalidate(&mut self, leg: Leg) -> Vec<ReservationId> {
        let mut dropped = Vec::new();
        if leg == Leg::Outbound {
            dropped.extend(self.outbound.take().map(|r| r.id));
        }
        dropped.extend(self.combined.take().map(|r| r.id));
        dropped
    }
}

/// Outstanding work
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pending {
    /// Legs whose trip list has not arrived yet
    pub search_legs: BTreeSet<Leg>,
    /// Legs whose trip list failed in the current search
    pub failed_legs: Vec<Leg>,
    /// Address book request outstanding
    pub addresses: bool,
    /// Location request outstanding
    pub locations: bool,
}

impl Pending {
    /// `true` while any trip list is outstanding
    #[must_use]
    pub fn searching(&self) -> bool {
        !self.search_legs.is_empty()
    }
}

/// What a notice's retry affordance does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryAction {
    /// Fetch one leg's trip list again
    Search(Leg),
    /// Fetch the seat map of a leg again
    SeatMap(Leg),
    /// Confirm a leg again
    ConfirmReservation(Leg),
    /// Fetch the payment link again
    PaymentLink,
    /// Reload the address book
    LoadAddresses,
    /// Reload boarding locations
    LoadLocations,
}

/// A non-blocking failure notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Monotonic id
    pub id: u64,
    /// What went wrong
    pub error: BookingError,
    /// Retry affordance, where one applies
    pub retry: Option<RetryAction>,
    /// When it was raised
    pub raised_at: DateTime<Utc>,
    /// Action whose reduction raised it
    pub origin: Option<&'static str>,
}

/// Everything the booking cycle knows.
#[derive(Clone, Debug, Default)]
pub struct BookingState {
    cycle: CycleState,
    /// Current search generation
    pub generation: SearchGeneration,
    /// The executed search
    pub search: Option<ActiveSearch>,
    /// Per-leg trip and seat state
    pub legs: LegPair<LegState>,
    /// Confirmed reservations
    pub reservation: ReservationSlice,
    /// In-memory mirror of the persisted selections
    pub selection: PersistedSelection,
    /// Address book
    pub addresses: Vec<Address>,
    /// The address book has been loaded at least once
    pub addresses_loaded: bool,
    /// Boarding locations
    pub locations: Vec<Location>,
    /// Outstanding work
    pub pending: Pending,
    /// Unacknowledged failures
    pub notices: Vec<Notice>,
    next_notice: u64,
    /// Most recent failure
    pub last_error: Option<BookingError>,
}

impl BookingState {
    /// Fresh state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step
    #[must_use]
    pub const fn cycle(&self) -> CycleState {
        self.cycle
    }

    /// Move the cycle. Only the reducer calls this.
    pub(crate) fn transition(&mut self, event: CycleEvent) -> Result<(), TransitionError> {
        self.cycle.apply(event)
    }

    /// Trip kind of the active search, or of the cycle before any search
    #[must_use]
    pub fn kind(&self) -> TripKind {
        self.search.as_ref().map_or(self.cycle.kind(), |s| s.kind)
    }

    /// Trip kind the search form should default to
    #[must_use]
    pub fn preferred_kind(&self) -> TripKind {
        self.selection.search_type.unwrap_or_default()
    }

    /// State of `leg`
    #[must_use]
    pub const fn leg(&self, leg: Leg) -> &LegState {
        self.legs.get(leg)
    }

    /// The reservation to pay, if created
    #[must_use]
    pub fn final_reservation(&self) -> Option<ReservationPayload> {
        self.reservation.final_payload(self.kind())
    }

    /// Pickup address selected for `leg`, if it resolves against the address
    /// book
    #[must_use]
    pub fn resolved_address(&self, leg: Leg) -> Option<&Address> {
        let id = self.selection.address(leg)?;
        self.addresses.iter().find(|a| a.id == id)
    }

    /// `true` if `id` is in the loaded address book
    #[must_use]
    pub fn knows_address(&self, id: AddressId) -> bool {
        self.addresses.iter().any(|a| a.id == id)
    }

    /// Record a failure and return its notice id
    pub fn raise(
        &mut self,
        error: BookingError,
        retry: Option<RetryAction>,
        raised_at: DateTime<Utc>,
    ) -> u64 {
        self.next_notice += 1;
        let id = self.next_notice;
        tracing::warn!(notice = id, %error, "Booking notice raised");
        self.notices.push(Notice {
            id,
            error: error.clone(),
            retry,
            raised_at,
            origin: None,
        });
        self.last_error = Some(error);
        id
    }

    /// Id of the newest notice raised so far (0 before any)
    #[must_use]
    pub const fn notice_mark(&self) -> u64 {
        self.next_notice
    }

    /// Notices raised after `id`
    pub fn notices_after(&self, id: u64) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(move |n| n.id > id)
    }

    /// Newest notice after `mark` raised while reducing `origin`
    #[must_use]
    pub fn raised_by(&self, mark: u64, origin: &str) -> Option<&Notice> {
        self.notices_after(mark)
            .filter(|n| n.origin == Some(origin))
            .last()
    }

    /// Stamp notices raised after `mark` that carry no origin yet
    pub(crate) fn stamp_notices(&mut self, mark: u64, origin: &'static str) {
        for notice in self.notices.iter_mut().filter(|n| n.id > mark && n.origin.is_none()) {
            notice.origin = Some(origin);
        }
    }

    /// Remove a notice, returning it
    pub fn dismiss(&mut self, id: u64) -> Option<Notice> {
        let index = self.notices.iter().position(|n| n.id == id)?;
        Some(self.notices.remove(index))
    }

    /// Reset everything tied to the previous search
    pub(crate) fn reset_for_search(&mut self, search: ActiveSearch) {
        self.generation = self.generation.next();
        self.pending.search_legs = search.kind.legs().iter().copied().collect();
        self.pending.failed_legs.clear();
        self.search = Some(search);
        self.legs = LegPair::default();
        self.reservation = ReservationSlice::default();
    }
}
