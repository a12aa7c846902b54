//! Reservation Orchestrator.
//!
//! Builds ticket-creation payloads from the current selection and describes
//! the network calls as effects. Sequencing rules:
//!
//! - ticket creation completes before the payment link of that reservation
//!   is requested
//! - the outbound half of a round trip is created before the return half,
//!   whose request carries the outbound reservation id
//! - a payment link is only ever requested for an existing reservation id,
//!   and retrying it never re-creates the reservation
//!
//! The reducer decides *when*; this module decides *what*.

use crate::api::{LegPayload, ReturnTicketRequest, TicketRequest};
use crate::cycle::{BookingAction, BookingEnvironment, BookingState, CycleState, SearchGeneration};
use crate::error::{BookingError, Field, ValidationIssue};
use crate::types::{Leg, ReservationId, TripId, TripKind};
use std::sync::Arc;
use tripdesk_core::{async_effect, effect::Effect};

const CONFIRM: &str = "confirm_reservation";

/// The call a confirmation starts with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmPlan {
    /// Create a ticket: one-way, or the outbound half of a round trip
    Ticket {
        /// Outbound trip
        trip_id: TripId,
        /// Request body
        request: TicketRequest,
    },
    /// Extend the held outbound reservation with the return leg
    Return {
        /// Held outbound reservation
        outbound_id: ReservationId,
        /// Request body
        request: ReturnTicketRequest,
    },
    /// The return leg was confirmed before the outbound one: create the
    /// outbound half first, then the return half
    OutboundFirst {
        /// Outbound trip
        trip_id: TripId,
        /// Request body
        request: TicketRequest,
    },
}

/// Payload for one leg, built from the chosen trip, the seat selection, the
/// search endpoints and (private trips) the pickup selection.
///
/// Pickup address and time are read for `leg` only. A missing return pickup
/// is reported, never filled in from the boarding values.
///
/// # Errors
///
/// [`BookingError::Validation`] listing every missing field, or
/// [`BookingError::ActionNotAvailable`] when no search covers `leg`.
pub fn leg_payload(state: &BookingState, leg: Leg) -> Result<(TripId, LegPayload), BookingError> {
    let search = state
        .search
        .as_ref()
        .ok_or_else(|| BookingError::not_available(CONFIRM, "no search has been run"))?;
    let (from, to, date) = search.endpoints(leg).ok_or_else(|| {
        BookingError::not_available(CONFIRM, format!("a {} search has no {leg} leg", search.kind))
    })?;

    let slice = state.leg(leg);
    let pickup = search.mode.needs_pickup();
    let address_id = state.selection.address(leg).filter(|_| pickup);
    let pickup_at = state.selection.datetime(leg).filter(|_| pickup);

    let mut issues = Vec::new();
    if slice.trip.is_none() {
        issues.push(ValidationIssue::missing(Field::Trip(leg)));
    }
    if slice.selection.is_empty() {
        issues.push(ValidationIssue::missing(Field::Seats(leg)));
    }
    if pickup && address_id.is_none() {
        issues.push(ValidationIssue::missing(Field::PickupAddress(leg)));
    }
    if pickup && pickup_at.is_none() {
        issues.push(ValidationIssue::missing(Field::PickupTime(leg)));
    }

    match &slice.trip {
        Some(trip) if issues.is_empty() => Ok((
            trip.id,
            LegPayload {
                from_city_id: from,
                to_city_id: to,
                from_location_id: trip.boarding_location(from),
                to_location_id: trip.alighting_location(to),
                date,
                seats: slice.selection.to_vec(),
                address_id,
                pickup_at,
            },
        )),
        _ => Err(BookingError::validation(issues)),
    }
}

/// Validation failures of both legs in one error
fn combine(first: BookingError, second: Option<BookingError>) -> BookingError {
    match (first, second) {
        (BookingError::Validation { mut issues }, Some(BookingError::Validation { issues: more })) => {
            issues.extend(more);
            BookingError::Validation { issues }
        },
        (first, _) => first,
    }
}

/// Decide how confirming `leg` starts.
///
/// The return leg is only confirmable once both legs have a trip and at least
/// one seat, so a combined record never exists without both selections.
///
/// # Errors
///
/// Validation failures for every leg involved, or
/// [`BookingError::ActionNotAvailable`] for a return leg on a one-way trip.
pub fn plan_confirmation(state: &BookingState, leg: Leg) -> Result<ConfirmPlan, BookingError> {
    match (state.kind(), leg) {
        (TripKind::OneWay, Leg::Return) => Err(BookingError::not_available(
            CONFIRM,
            "one-way trips have no return leg",
        )),
        (TripKind::OneWay, Leg::Outbound) => {
            let (trip_id, boarding) = leg_payload(state, Leg::Outbound)?;
            Ok(ConfirmPlan::Ticket {
                trip_id,
                request: TicketRequest::one_way(boarding),
            })
        },
        (TripKind::Round, Leg::Outbound) => {
            let (trip_id, boarding) = leg_payload(state, Leg::Outbound)?;
            Ok(ConfirmPlan::Ticket {
                trip_id,
                request: TicketRequest::round_outbound(boarding),
            })
        },
        (TripKind::Round, Leg::Return) => {
            let ((outbound_trip, boarding), (return_trip, back)) =
                match (leg_payload(state, Leg::Outbound), leg_payload(state, Leg::Return)) {
                    (Ok(outbound), Ok(back)) => (outbound, back),
                    (Err(error), other) => return Err(combine(error, other.err())),
                    (Ok(_), Err(error)) => return Err(error),
                };

            Ok(match &state.reservation.outbound {
                Some(held) => ConfirmPlan::Return {
                    outbound_id: held.id,
                    request: ReturnTicketRequest {
                        outbound_reservation_id: held.id,
                        trip_id: return_trip,
                        return_leg: back,
                    },
                },
                None => ConfirmPlan::OutboundFirst {
                    trip_id: outbound_trip,
                    request: TicketRequest::round_outbound(boarding),
                },
            })
        },
    }
}

/// Return-leg request extending `outbound_id`
///
/// # Errors
///
/// Validation failures of the return leg.
pub fn return_request(
    state: &BookingState,
    outbound_id: ReservationId,
) -> Result<ReturnTicketRequest, BookingError> {
    let (trip_id, return_leg) = leg_payload(state, Leg::Return)?;
    Ok(ReturnTicketRequest {
        outbound_reservation_id: outbound_id,
        trip_id,
        return_leg,
    })
}

/// Where to resume after signing in
#[must_use]
pub fn return_path(cycle: CycleState, leg: Option<Leg>) -> String {
    match leg {
        Some(leg) => format!("/booking/{}?leg={leg}", cycle.slug()),
        None => format!("/booking/{}", cycle.slug()),
    }
}

/// `POST /trips/{id}/tickets`, answered by [`BookingAction::TicketCreated`]
pub fn create_ticket(
    env: &BookingEnvironment,
    generation: SearchGeneration,
    requested: Leg,
    trip_id: TripId,
    request: TicketRequest,
) -> Effect<BookingAction> {
    let api = Arc::clone(&env.api);
    async_effect! {
        let result = api.create_ticket(trip_id, request).await;
        Some(BookingAction::TicketCreated { generation, requested, result })
    }
}

/// `POST /reservations/{id}/return`, answered by
/// [`BookingAction::ReturnTicketCreated`]
pub fn create_return_ticket(
    env: &BookingEnvironment,
    generation: SearchGeneration,
    outbound_id: ReservationId,
    request: ReturnTicketRequest,
) -> Effect<BookingAction> {
    let api = Arc::clone(&env.api);
    async_effect! {
        let result = api.create_return_ticket(outbound_id, request).await;
        Some(BookingAction::ReturnTicketCreated { generation, outbound_id, result })
    }
}

/// `POST /reservations/{id}/payment-link`, answered by
/// [`BookingAction::PaymentLinkFetched`]
pub fn fetch_payment_link(
    env: &BookingEnvironment,
    generation: SearchGeneration,
    reservation_id: ReservationId,
) -> Effect<BookingAction> {
    let api = Arc::clone(&env.api);
    async_effect! {
        let result = api.payment_link(reservation_id).await;
        Some(BookingAction::PaymentLinkFetched { generation, reservation_id, result })
    }
}
