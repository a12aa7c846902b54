//! Reducer for the booking cycle.

use super::actions::BookingAction;
use super::environment::BookingEnvironment;
use super::state::{BookingState, RetryAction, SearchGeneration};
use super::step::CycleEvent;
use crate::api::{ApiError, ApiResult, PaymentLink, SeatMapQuery};
use crate::error::BookingError;
use crate::persistence::SelectionChange;
use crate::reservation::{self, ConfirmPlan};
use crate::seat_map::{SeatMap, SeatSelection, prune_stale_selections, toggle_seat};
use crate::types::{
    Address, AddressId, Leg, Location, NewAddress, ReservationId, ReservationPayload,
    ReservationRecord, RoundReservationRecord, SeatNo, Trip, TripId, TripKind, TripQuery,
    TripSearchCriteria,
};
use chrono::NaiveDateTime;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;
use tripdesk_core::{async_effect, effect::Effect, reducer::Reducer};

type Effects = SmallVec<[Effect<BookingAction>; 4]>;

const LEGS: [Leg; 2] = [Leg::Outbound, Leg::Return];

fn none() -> Effects {
    smallvec![Effect::None]
}

/// Booking cycle reducer.
///
/// Owns every rule about what an action may change: cycle transitions,
/// stale-result filtering, reservation invalidation and write-through of
/// persisted selections. Network work is returned as effects whose results
/// come back as actions.
#[derive(Clone, Copy, Debug)]
pub struct BookingReducer;

impl BookingReducer {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for BookingReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer for BookingReducer {
    type State = BookingState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects {
        let origin = action.name();
        let mark = state.notice_mark();
        let effects = self.handle(state, action, env);
        state.stamp_notices(mark, origin);
        effects
    }
}

impl BookingReducer {
    fn handle(
        &self,
        state: &mut BookingState,
        action: BookingAction,
        env: &BookingEnvironment,
    ) -> Effects {
        match action {
            BookingAction::Initialize => Self::initialize(state, env),
            BookingAction::LoadLocations => Self::load_locations(state, env),
            BookingAction::LocationsLoaded { result } => Self::locations_loaded(state, env, result),

            BookingAction::StartSearch { criteria } => Self::start_search(state, env, &criteria),
            BookingAction::RetrySearch { leg } => Self::retry_search(state, env, leg),
            BookingAction::TripsLoaded {
                generation,
                leg,
                result,
            } => Self::trips_loaded(state, env, generation, leg, result),
            BookingAction::SearchSettled { generation } => Self::search_settled(state, generation),
            BookingAction::SearchSuperseded { generation } => {
                tracing::debug!(%generation, current = %state.generation, "Search superseded");
                none()
            },

            BookingAction::SelectTrip { leg, trip_id } => Self::select_trip(state, env, leg, trip_id),
            BookingAction::RefreshSeatMap { leg } => Self::refresh_seat_map(state, env, leg),
            BookingAction::SeatMapLoaded {
                generation,
                leg,
                trip_id,
                request,
                result,
            } => Self::seat_map_loaded(state, env, generation, leg, trip_id, request, result),
            BookingAction::ToggleSeat { leg, seat_no } => {
                Self::toggle_seat(state, env, leg, &seat_no)
            },
            BookingAction::AdvanceToReturnTrip => Self::advance_to_return_trip(state, env),

            BookingAction::ConfirmReservation { leg } => Self::confirm_reservation(state, env, leg),
            BookingAction::TicketCreated {
                generation,
                requested,
                result,
            } => Self::ticket_created(state, env, generation, requested, result),
            BookingAction::ReturnTicketCreated {
                generation,
                outbound_id,
                result,
            } => Self::return_ticket_created(state, env, generation, outbound_id, result),
            BookingAction::RetryPaymentLink => Self::retry_payment_link(state, env),
            BookingAction::PaymentLinkFetched {
                generation,
                reservation_id,
                result,
            } => Self::payment_link_fetched(state, env, generation, reservation_id, result),

            BookingAction::LoadAddresses => Self::load_addresses(state, env),
            BookingAction::AddressesLoaded { result } => Self::addresses_loaded(state, env, result),
            BookingAction::CreateAddress { leg, address } => {
                Self::create_address(state, env, leg, address)
            },
            BookingAction::AddressCreated { leg, result } => {
                Self::address_created(state, env, leg, result)
            },
            BookingAction::SelectAddress { leg, address_id } => {
                Self::select_address(state, env, leg, address_id)
            },
            BookingAction::SelectDateTime { leg, at } => Self::select_datetime(state, env, leg, at),
            BookingAction::SetSearchKind { kind } => {
                Self::persist(state, env, SelectionChange::SearchType(Some(kind)));
                none()
            },
            BookingAction::SelectionChangedElsewhere { change } => {
                Self::selection_changed_elsewhere(state, env, change)
            },

            BookingAction::DismissNotice { id } => {
                if state.dismiss(id).is_none() {
                    tracing::debug!(notice = id, "Dismissed unknown notice");
                }
                none()
            },
            BookingAction::RetryNotice { id } => self.retry_notice(state, env, id),
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

impl BookingReducer {
    fn raise(
        state: &mut BookingState,
        env: &BookingEnvironment,
        error: BookingError,
        retry: Option<RetryAction>,
    ) {
        // Signing in is not something a retry button can do.
        let retry = retry.filter(|_| !matches!(error, BookingError::AuthRequired { .. }));
        state.raise(error, retry, env.now());
    }

    fn refuse(
        state: &mut BookingState,
        env: &BookingEnvironment,
        action: &'static str,
        reason: impl Into<String>,
    ) -> Effects {
        Self::raise(state, env, BookingError::not_available(action, reason), None);
        none()
    }

    /// Write through, then mirror in memory
    fn persist(state: &mut BookingState, env: &BookingEnvironment, change: SelectionChange) {
        env.selections.write(&change);
        state.selection.apply(change);
    }

    /// Drop reservation records that depend on `leg`'s selection
    fn invalidate(state: &mut BookingState, env: &BookingEnvironment, leg: Leg) {
        let dropped = state.reservation.invalidate(leg);
        if dropped.is_empty() {
            return;
        }
        tracing::info!(%leg, ?dropped, "Reservation invalidated by a selection change");
        state.reservation.payment_link_in_flight = false;

        let latest = state
            .selection
            .latest_reservation
            .as_ref()
            .map(ReservationPayload::id);
        if latest.is_some_and(|id| dropped.contains(&id)) {
            Self::persist(state, env, SelectionChange::LatestReservation(None));
        }
    }

    /// Pickup changes only matter for trips that pick the traveller up
    fn invalidate_pickup(state: &mut BookingState, env: &BookingEnvironment, leg: Leg) {
        if state.search.as_ref().is_some_and(|s| s.mode.needs_pickup()) {
            Self::invalidate(state, env, leg);
        }
    }

    fn advance(state: &mut BookingState, event: CycleEvent) {
        if let Err(error) = state.transition(event) {
            tracing::warn!(%error, "Cycle transition skipped");
        }
    }

    fn seat_map_query(state: &BookingState, leg: Leg, trip: &Trip) -> Option<SeatMapQuery> {
        let (from, to, date) = state.search.as_ref()?.endpoints(leg)?;
        Some(SeatMapQuery {
            trip_id: trip.id,
            from_city_id: from,
            to_city_id: to,
            from_location_id: trip.boarding_location(from),
            to_location_id: trip.alighting_location(to),
            date,
        })
    }

    fn fetch_trips(
        env: &BookingEnvironment,
        generation: SearchGeneration,
        leg: Leg,
        query: TripQuery,
    ) -> Effect<BookingAction> {
        let directory = env.directory.clone();
        async_effect! {
            let result = directory.search(query).await;
            Some(BookingAction::TripsLoaded { generation, leg, result })
        }
    }

    /// Issue a new seat map request for `leg`, superseding any outstanding one
    fn fetch_seat_map(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        query: SeatMapQuery,
    ) -> Effect<BookingAction> {
        let generation = state.generation;
        let slice = state.legs.get_mut(leg);
        slice.seat_map_loading = true;
        slice.seat_map_request += 1;
        let request = slice.seat_map_request;

        let api = Arc::clone(&env.api);
        async_effect! {
            let trip_id = query.trip_id;
            let result = api.seat_map(query).await;
            Some(BookingAction::SeatMapLoaded { generation, leg, trip_id, request, result })
        }
    }

    fn retry_notice(&self, state: &mut BookingState, env: &BookingEnvironment, id: u64) -> Effects {
        let Some(notice) = state.dismiss(id) else {
            return Self::refuse(state, env, "retry_notice", format!("notice {id} does not exist"));
        };
        let Some(retry) = notice.retry else {
            return Self::refuse(state, env, "retry_notice", format!("notice {id} has no retry"));
        };

        let action = BookingAction::from(retry);
        tracing::info!(notice = id, action = action.name(), "Retrying");
        self.reduce(state, action, env)
    }
}

// ============================================================================
// Lifecycle and directory
// ============================================================================

impl BookingReducer {
    fn initialize(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        state.selection = env.selections.load();
        tracing::debug!(selection = ?state.selection, "Persisted selections restored");
        if state.addresses_loaded {
            Self::resolve_persisted_addresses(state);
        }
        Self::load_addresses(state, env)
    }

    fn load_locations(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        state.pending.locations = true;
        let directory = env.directory.clone();
        smallvec![async_effect! {
            let result = directory.locations().await;
            Some(BookingAction::LocationsLoaded { result })
        }]
    }

    fn locations_loaded(
        state: &mut BookingState,
        env: &BookingEnvironment,
        result: ApiResult<Vec<Location>>,
    ) -> Effects {
        state.pending.locations = false;
        match result {
            Ok(locations) => {
                tracing::debug!(count = locations.len(), "Locations loaded");
                state.locations = locations;
            },
            Err(error) => Self::raise(
                state,
                env,
                BookingError::DirectoryUnavailable {
                    message: error.to_string(),
                },
                Some(RetryAction::LoadLocations),
            ),
        }
        none()
    }
}

// ============================================================================
// Search
// ============================================================================

impl BookingReducer {
    fn start_search(
        state: &mut BookingState,
        env: &BookingEnvironment,
        criteria: &TripSearchCriteria,
    ) -> Effects {
        let search = match criteria.validate() {
            Ok(search) => search,
            Err(error) => {
                Self::raise(state, env, error, None);
                return none();
            },
        };

        let superseded = state.search.is_some().then_some(state.generation);
        Self::advance(state, CycleEvent::SearchStarted(search.kind));
        state.reset_for_search(search.clone());

        Self::persist(state, env, SelectionChange::LatestReservation(None));
        Self::persist(state, env, SelectionChange::SearchType(Some(search.kind)));
        // Pickup addresses carry over; pickup times only while the leg's date is unchanged.
        for leg in LEGS {
            let Some(at) = state.selection.datetime(leg) else {
                continue;
            };
            if !search.query(leg).is_some_and(|q| q.date == at.date()) {
                Self::persist(state, env, SelectionChange::DateTime { leg, at: None });
            }
        }

        let generation = state.generation;
        tracing::info!(
            %generation,
            from = %search.from,
            to = %search.to,
            kind = %search.kind,
            mode = search.mode.as_str(),
            "Search started"
        );

        let fetches = search
            .kind
            .legs()
            .iter()
            .filter_map(|&leg| {
                search
                    .query(leg)
                    .map(|query| Self::fetch_trips(env, generation, leg, query))
            })
            .collect();
        let mut effects: Effects = smallvec![Effect::Parallel(fetches)];
        if let Some(generation) = superseded {
            effects.push(async_effect! {
                Some(BookingAction::SearchSuperseded { generation })
            });
        }
        effects
    }

    fn retry_search(state: &mut BookingState, env: &BookingEnvironment, leg: Leg) -> Effects {
        let Some(query) = state.search.as_ref().and_then(|s| s.query(leg)) else {
            return Self::refuse(
                state,
                env,
                "retry_search",
                format!("no active search covers the {leg} leg"),
            );
        };
        if !state.pending.failed_legs.contains(&leg) {
            return Self::refuse(
                state,
                env,
                "retry_search",
                format!("the {leg} results did not fail"),
            );
        }

        state.pending.failed_legs.retain(|l| *l != leg);
        state.pending.search_legs.insert(leg);
        smallvec![Self::fetch_trips(env, state.generation, leg, query)]
    }

    fn trips_loaded(
        state: &mut BookingState,
        env: &BookingEnvironment,
        generation: SearchGeneration,
        leg: Leg,
        result: ApiResult<Vec<Trip>>,
    ) -> Effects {
        if generation != state.generation || !state.pending.search_legs.remove(&leg) {
            tracing::debug!(%generation, current = %state.generation, %leg, "Dropping stale trip list");
            return none();
        }

        match result {
            Ok(trips) => {
                tracing::debug!(%leg, count = trips.len(), "Trip list loaded");
                let slice = state.legs.get_mut(leg);
                slice.trips = trips;
                slice.trips_loaded = true;
            },
            Err(error) => {
                state.pending.failed_legs.push(leg);
                Self::raise(
                    state,
                    env,
                    BookingError::SearchFailed {
                        leg,
                        message: error.to_string(),
                    },
                    Some(RetryAction::Search(leg)),
                );
            },
        }

        if state.pending.searching() {
            return none();
        }
        smallvec![async_effect! {
            Some(BookingAction::SearchSettled { generation })
        }]
    }

    fn search_settled(state: &mut BookingState, generation: SearchGeneration) -> Effects {
        if generation != state.generation {
            tracing::debug!(%generation, "Dropping stale search completion");
            return none();
        }
        let any_loaded = state.kind().legs().iter().any(|l| state.leg(*l).trips_loaded);
        if any_loaded && state.cycle().is_searching() {
            Self::advance(state, CycleEvent::ResultsReady);
        }
        none()
    }
}

// ============================================================================
// Trips and seats
// ============================================================================

impl BookingReducer {
    fn select_trip(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        trip_id: TripId,
    ) -> Effects {
        if let Some(in_flight) = state.reservation.in_flight {
            return Self::refuse(
                state,
                env,
                "select_trip",
                format!("the {in_flight} reservation is being confirmed"),
            );
        }
        if let Err(refused) = state.cycle().next(CycleEvent::TripChosen(leg)) {
            return Self::refuse(state, env, "select_trip", refused.to_string());
        }
        let Some(trip) = state.leg(leg).find_trip(trip_id).cloned() else {
            Self::raise(state, env, BookingError::TripNotFound { leg, trip_id }, None);
            return none();
        };
        let Some(query) = Self::seat_map_query(state, leg, &trip) else {
            return Self::refuse(state, env, "select_trip", format!("no search covers the {leg} leg"));
        };

        let slice = state.legs.get_mut(leg);
        if slice.trip_id() != Some(trip_id) {
            slice.seat_map = None;
            slice.selection = SeatSelection::new();
            slice.pruned.clear();
        }
        slice.trip = Some(trip);

        Self::invalidate(state, env, leg);
        Self::advance(state, CycleEvent::TripChosen(leg));
        tracing::debug!(%leg, %trip_id, "Trip selected");

        smallvec![Self::fetch_seat_map(state, env, leg, query)]
    }

    fn refresh_seat_map(state: &mut BookingState, env: &BookingEnvironment, leg: Leg) -> Effects {
        let query = state
            .leg(leg)
            .trip
            .as_ref()
            .and_then(|trip| Self::seat_map_query(state, leg, trip));
        let Some(query) = query else {
            return Self::refuse(state, env, "refresh_seat_map", format!("no {leg} trip is selected"));
        };

        smallvec![Self::fetch_seat_map(state, env, leg, query)]
    }

    fn seat_map_loaded(
        state: &mut BookingState,
        env: &BookingEnvironment,
        generation: SearchGeneration,
        leg: Leg,
        trip_id: TripId,
        request: u64,
        result: ApiResult<SeatMap>,
    ) -> Effects {
        let slice = state.leg(leg);
        if generation != state.generation
            || slice.trip_id() != Some(trip_id)
            || request != slice.seat_map_request
        {
            tracing::debug!(%generation, %leg, %trip_id, request, "Dropping stale seat map");
            return none();
        }

        // Seats on our own confirmed record show up as booked; they stay selected.
        let held = state.reservation.held_seats(leg);
        let slice = state.legs.get_mut(leg);
        slice.seat_map_loading = false;

        match result {
            Ok(map) => {
                let (_, dropped) = prune_stale_selections(&map, &slice.selection);
                let pruned: Vec<SeatNo> = dropped.into_iter().filter(|s| !held.contains(s)).collect();
                if !pruned.is_empty() {
                    tracing::info!(%leg, %trip_id, ?pruned, "Pruned seats that are no longer available");
                    slice.selection = slice.selection.without(&pruned);
                }
                slice.pruned = pruned;
                slice.seat_map = Some(map);
            },
            Err(error) => Self::raise(
                state,
                env,
                BookingError::SeatMapFailed {
                    leg,
                    trip_id,
                    message: error.to_string(),
                },
                Some(RetryAction::SeatMap(leg)),
            ),
        }
        none()
    }

    fn toggle_seat(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        seat_no: &SeatNo,
    ) -> Effects {
        if let Some(in_flight) = state.reservation.in_flight {
            return Self::refuse(
                state,
                env,
                "toggle_seat",
                format!("the {in_flight} reservation is being confirmed"),
            );
        }

        let toggled = {
            let slice = state.leg(leg);
            slice
                .seat_map
                .as_ref()
                .map(|map| toggle_seat(map, &slice.selection, seat_no))
        };
        match toggled {
            None => tracing::debug!(%leg, %seat_no, "No seat map loaded, toggle ignored"),
            Some(Err(error)) => tracing::debug!(%leg, %error, "Seat toggle ignored"),
            Some(Ok(selection)) => {
                tracing::debug!(%leg, %seat_no, seats = selection.len(), "Seat toggled");
                state.legs.get_mut(leg).selection = selection;
                Self::invalidate(state, env, leg);
            },
        }
        none()
    }

    fn advance_to_return_trip(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        const ACTION: &str = "advance_to_return_trip";
        if state.kind() != TripKind::Round {
            return Self::refuse(state, env, ACTION, "only round trips have a return leg");
        }
        if let Err(refused) = state.cycle().next(CycleEvent::ReturnLegRequested) {
            return Self::refuse(state, env, ACTION, refused.to_string());
        }
        if state.leg(Leg::Outbound).selection.is_empty() {
            return Self::refuse(state, env, ACTION, "pick at least one outbound seat first");
        }
        Self::advance(state, CycleEvent::ReturnLegRequested);
        none()
    }
}

// ============================================================================
// Reservations
// ============================================================================

impl BookingReducer {
    fn confirm_reservation(state: &mut BookingState, env: &BookingEnvironment, leg: Leg) -> Effects {
        const ACTION: &str = "confirm_reservation";
        if let Some(in_flight) = state.reservation.in_flight {
            return Self::refuse(
                state,
                env,
                ACTION,
                format!("the {in_flight} reservation is already being confirmed"),
            );
        }
        if state.reservation.has_record(leg) {
            return Self::refuse(state, env, ACTION, format!("the {leg} leg is already reserved"));
        }
        if let Err(refused) = state.cycle().next(CycleEvent::ReservationConfirmed(leg)) {
            return Self::refuse(state, env, ACTION, refused.to_string());
        }

        let plan = match reservation::plan_confirmation(state, leg) {
            Ok(plan) => plan,
            Err(error) => {
                Self::raise(state, env, error, None);
                return none();
            },
        };

        state.reservation.in_flight = Some(leg);
        let generation = state.generation;
        let effect = match plan {
            ConfirmPlan::Ticket { trip_id, request } | ConfirmPlan::OutboundFirst { trip_id, request } => {
                tracing::info!(%leg, %trip_id, seats = request.boarding.seats.len(), "Creating ticket");
                reservation::create_ticket(env, generation, leg, trip_id, request)
            },
            ConfirmPlan::Return {
                outbound_id,
                request,
            } => {
                tracing::info!(reservation_id = %outbound_id, trip_id = %request.trip_id, "Creating return ticket");
                reservation::create_return_ticket(env, generation, outbound_id, request)
            },
        };
        smallvec![effect]
    }

    fn ticket_failed(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        requested: Leg,
        error: ApiError,
    ) {
        state.reservation.in_flight = None;
        let path = reservation::return_path(state.cycle(), Some(requested));
        let failure = BookingError::from_ticket_failure(leg, error, path);
        Self::raise(state, env, failure, Some(RetryAction::ConfirmReservation(requested)));
    }

    fn ticket_created(
        state: &mut BookingState,
        env: &BookingEnvironment,
        generation: SearchGeneration,
        requested: Leg,
        result: ApiResult<ReservationRecord>,
    ) -> Effects {
        if generation != state.generation || state.reservation.in_flight != Some(requested) {
            tracing::debug!(%generation, %requested, "Dropping stale ticket");
            return none();
        }

        let record = match result {
            Ok(record) => record,
            Err(error) => {
                // The selection stays as is so the user can adjust and retry.
                Self::ticket_failed(state, env, Leg::Outbound, requested, error);
                return none();
            },
        };

        tracing::info!(reservation_id = %record.id, trip_id = %record.trip_id, "Ticket created");
        let reservation_id = record.id;
        state.reservation.outbound = Some(record.clone());
        Self::persist(
            state,
            env,
            SelectionChange::LatestReservation(Some(ReservationPayload::Ticket(record))),
        );
        Self::advance(state, CycleEvent::ReservationConfirmed(Leg::Outbound));

        match (state.kind(), requested) {
            (TripKind::OneWay, _) => {
                state.reservation.in_flight = None;
                state.reservation.payment_link_in_flight = true;
                smallvec![reservation::fetch_payment_link(env, generation, reservation_id)]
            },
            (TripKind::Round, Leg::Outbound) => {
                state.reservation.in_flight = None;
                none()
            },
            (TripKind::Round, Leg::Return) => match reservation::return_request(state, reservation_id) {
                Ok(request) => {
                    tracing::info!(%reservation_id, trip_id = %request.trip_id, "Creating return ticket");
                    smallvec![reservation::create_return_ticket(env, generation, reservation_id, request)]
                },
                Err(error) => {
                    state.reservation.in_flight = None;
                    Self::raise(state, env, error, None);
                    none()
                },
            },
        }
    }

    fn return_ticket_created(
        state: &mut BookingState,
        env: &BookingEnvironment,
        generation: SearchGeneration,
        outbound_id: ReservationId,
        result: ApiResult<RoundReservationRecord>,
    ) -> Effects {
        let held = state.reservation.outbound.as_ref().map(|r| r.id);
        if generation != state.generation
            || state.reservation.in_flight != Some(Leg::Return)
            || held != Some(outbound_id)
        {
            tracing::debug!(%generation, %outbound_id, "Dropping stale return ticket");
            return none();
        }

        let record = match result {
            Ok(record) => record,
            Err(error) => {
                // The outbound reservation is kept; only the return leg is retried.
                Self::ticket_failed(state, env, Leg::Return, Leg::Return, error);
                return none();
            },
        };

        tracing::info!(reservation_id = %record.id, %outbound_id, "Round trip reserved");
        let reservation_id = record.id;
        state.reservation.in_flight = None;
        state.reservation.combined = Some(record.clone());
        Self::persist(
            state,
            env,
            SelectionChange::LatestReservation(Some(ReservationPayload::RoundTrip(record))),
        );
        Self::advance(state, CycleEvent::ReservationConfirmed(Leg::Return));

        state.reservation.payment_link_in_flight = true;
        smallvec![reservation::fetch_payment_link(env, generation, reservation_id)]
    }

    fn retry_payment_link(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        const ACTION: &str = "retry_payment_link";
        let Some(reservation) = state.final_reservation() else {
            return Self::refuse(state, env, ACTION, "no reservation has been confirmed");
        };
        if reservation.payment_url().is_some() {
            return Self::refuse(state, env, ACTION, "the payment link is already available");
        }
        if state.reservation.payment_link_in_flight {
            return Self::refuse(state, env, ACTION, "a payment link request is already running");
        }

        state.reservation.payment_link_in_flight = true;
        smallvec![reservation::fetch_payment_link(env, state.generation, reservation.id())]
    }

    fn payment_link_fetched(
        state: &mut BookingState,
        env: &BookingEnvironment,
        generation: SearchGeneration,
        reservation_id: ReservationId,
        result: ApiResult<PaymentLink>,
    ) -> Effects {
        let current = state.final_reservation().map(|r| r.id());
        if generation != state.generation || current != Some(reservation_id) {
            tracing::debug!(%generation, %reservation_id, "Dropping stale payment link");
            return none();
        }
        state.reservation.payment_link_in_flight = false;

        match result {
            Ok(link) => {
                tracing::info!(%reservation_id, "Payment link ready");
                match state.kind() {
                    TripKind::OneWay => {
                        if let Some(record) = state.reservation.outbound.as_mut() {
                            record.payment_url = Some(link.url);
                        }
                    },
                    TripKind::Round => {
                        if let Some(record) = state.reservation.combined.as_mut() {
                            record.payment_url = Some(link.url);
                        }
                    },
                }
                let payload = state.final_reservation();
                Self::persist(state, env, SelectionChange::LatestReservation(payload));
            },
            Err(error) => {
                let path = reservation::return_path(state.cycle(), None);
                let failure = BookingError::from_payment_failure(reservation_id, error, path);
                Self::raise(state, env, failure, Some(RetryAction::PaymentLink));
            },
        }
        none()
    }
}

// ============================================================================
// Address book and pickup selections
// ============================================================================

impl BookingReducer {
    fn load_addresses(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        state.pending.addresses = true;
        let api = Arc::clone(&env.api);
        smallvec![async_effect! {
            let result = api.list_addresses().await;
            Some(BookingAction::AddressesLoaded { result })
        }]
    }

    /// Unknown ids become unset in memory; the durable value is left alone.
    fn resolve_persisted_addresses(state: &mut BookingState) {
        for leg in LEGS {
            let Some(id) = state.selection.address(leg) else {
                continue;
            };
            if !state.knows_address(id) {
                tracing::debug!(%leg, address_id = %id, "Persisted pickup address no longer exists");
                state.selection.apply(SelectionChange::Address { leg, id: None });
            }
        }
    }

    fn addresses_loaded(
        state: &mut BookingState,
        env: &BookingEnvironment,
        result: ApiResult<Vec<Address>>,
    ) -> Effects {
        state.pending.addresses = false;
        match result {
            Ok(addresses) => {
                tracing::debug!(count = addresses.len(), "Address book loaded");
                state.addresses = addresses;
                state.addresses_loaded = true;
                Self::resolve_persisted_addresses(state);
            },
            Err(error) => {
                let path = reservation::return_path(state.cycle(), None);
                let failure = BookingError::from_address_failure(error, path);
                Self::raise(state, env, failure, Some(RetryAction::LoadAddresses));
            },
        }
        none()
    }

    fn create_address(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Option<Leg>,
        address: NewAddress,
    ) -> Effects {
        state.pending.addresses = true;
        let api = Arc::clone(&env.api);
        smallvec![async_effect! {
            let result = api.create_address(address).await;
            Some(BookingAction::AddressCreated { leg, result })
        }]
    }

    fn address_created(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Option<Leg>,
        result: ApiResult<Address>,
    ) -> Effects {
        state.pending.addresses = false;
        let address = match result {
            Ok(address) => address,
            Err(error) => {
                let path = reservation::return_path(state.cycle(), leg);
                Self::raise(state, env, BookingError::from_address_failure(error, path), None);
                return none();
            },
        };

        let id = address.id;
        tracing::debug!(address_id = %id, "Address saved");
        if !state.knows_address(id) {
            state.addresses.push(address);
        }
        if let Some(leg) = leg {
            Self::apply_address(state, env, leg, Some(id));
        }
        none()
    }

    fn select_address(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        address_id: Option<AddressId>,
    ) -> Effects {
        let unknown = address_id.filter(|id| state.addresses_loaded && !state.knows_address(*id));
        if let Some(id) = unknown {
            return Self::refuse(
                state,
                env,
                "select_address",
                format!("address {id} is not in the address book"),
            );
        }
        Self::apply_address(state, env, leg, address_id);
        none()
    }

    fn apply_address(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        id: Option<AddressId>,
    ) {
        if state.selection.address(leg) == id {
            return;
        }
        Self::persist(state, env, SelectionChange::Address { leg, id });
        Self::invalidate_pickup(state, env, leg);
    }

    fn select_datetime(
        state: &mut BookingState,
        env: &BookingEnvironment,
        leg: Leg,
        at: Option<NaiveDateTime>,
    ) -> Effects {
        if state.selection.datetime(leg) != at {
            Self::persist(state, env, SelectionChange::DateTime { leg, at });
            Self::invalidate_pickup(state, env, leg);
        }
        none()
    }

    fn selection_changed_elsewhere(
        state: &mut BookingState,
        env: &BookingEnvironment,
        change: SelectionChange,
    ) -> Effects {
        let pickup_leg = match &change {
            SelectionChange::Address { leg, .. } | SelectionChange::DateTime { leg, .. } => Some(*leg),
            SelectionChange::LatestReservation(_) | SelectionChange::SearchType(_) => None,
        };
        let change = match change {
            SelectionChange::Address { leg, id: Some(id) }
                if state.addresses_loaded && !state.knows_address(id) =>
            {
                SelectionChange::Address { leg, id: None }
            },
            other => other,
        };

        let before = state.selection.clone();
        state.selection.apply(change);
        if before == state.selection {
            return none();
        }
        tracing::debug!(selection = ?state.selection, "Selection changed in another context");
        if let Some(leg) = pickup_leg {
            Self::invalidate_pickup(state, env, leg);
        }
        none()
    }
}
