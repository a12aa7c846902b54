//! The booking cycle step and its transition function.
//!
//! [`CycleState::apply`] is the only way the step changes. Everything else
//! reads it.

use crate::types::{Leg, TripKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// One-way flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OneWayStep {
    /// Search issued, results pending
    Searching,
    /// Picking a trip from the results
    SelectingTrip,
    /// Picking seats on the chosen trip
    SelectingSeats,
    /// Reservation created; payment next
    ConfirmingReservation,
}

/// Round-trip flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStep {
    /// Search issued, results pending
    Searching,
    /// Picking the outbound trip
    SelectingOutboundTrip,
    /// Picking outbound seats
    SelectingOutboundSeats,
    /// Picking the return trip
    SelectingReturnTrip,
    /// Picking return seats
    SelectingReturnSeats,
    /// Combined reservation created; payment next
    ConfirmingReservation,
}

/// Where the user is in the booking cycle, per trip kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    /// One-way flow
    OneWay(OneWayStep),
    /// Round-trip flow
    Round(RoundStep),
}

impl Default for CycleState {
    fn default() -> Self {
        Self::OneWay(OneWayStep::Searching)
    }
}

/// Something that happened which may move the cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleEvent {
    /// A new search was issued
    SearchStarted(TripKind),
    /// Every leg's results arrived and at least one succeeded
    ResultsReady,
    /// A trip was chosen for a leg
    TripChosen(Leg),
    /// The user moved on to picking the return trip
    ReturnLegRequested,
    /// A reservation for a leg was created
    ReservationConfirmed(Leg),
}

/// Event not valid in the current step
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{event:?} is not valid while {from:?}")]
pub struct TransitionError {
    /// Step the event was applied to
    pub from: CycleState,
    /// Rejected event
    pub event: CycleEvent,
}

impl CycleState {
    /// Searching step for `kind`
    #[must_use]
    pub const fn searching(kind: TripKind) -> Self {
        match kind {
            TripKind::OneWay => Self::OneWay(OneWayStep::Searching),
            TripKind::Round => Self::Round(RoundStep::Searching),
        }
    }

    /// Trip kind of the current flow
    #[must_use]
    pub const fn kind(self) -> TripKind {
        match self {
            Self::OneWay(_) => TripKind::OneWay,
            Self::Round(_) => TripKind::Round,
        }
    }

    /// `true` while waiting for search results
    #[must_use]
    pub const fn is_searching(self) -> bool {
        matches!(
            self,
            Self::OneWay(OneWayStep::Searching) | Self::Round(RoundStep::Searching)
        )
    }

    /// `true` once the final reservation exists
    #[must_use]
    pub const fn is_confirming(self) -> bool {
        matches!(
            self,
            Self::OneWay(OneWayStep::ConfirmingReservation)
                | Self::Round(RoundStep::ConfirmingReservation)
        )
    }

    /// Position within its flow, starting at 0 for searching
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::OneWay(step) => step as u8,
            Self::Round(step) => step as u8,
        }
    }

    /// Path segment for this step, used in resumable return paths
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::OneWay(OneWayStep::Searching) | Self::Round(RoundStep::Searching) => "search",
            Self::OneWay(OneWayStep::SelectingTrip) => "trips",
            Self::OneWay(OneWayStep::SelectingSeats) => "seats",
            Self::Round(RoundStep::SelectingOutboundTrip) => "outbound/trips",
            Self::Round(RoundStep::SelectingOutboundSeats) => "outbound/seats",
            Self::Round(RoundStep::SelectingReturnTrip) => "return/trips",
            Self::Round(RoundStep::SelectingReturnSeats) => "return/seats",
            Self::OneWay(OneWayStep::ConfirmingReservation)
            | Self::Round(RoundStep::ConfirmingReservation) => "confirm",
        }
    }

    /// Step `event` leads to, without changing `self`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the event is not valid now.
    pub fn next(self, event: CycleEvent) -> Result<Self, TransitionError> {
        use CycleEvent as E;
        use OneWayStep as O;
        use RoundStep as R;

        let refused = TransitionError { from: self, event };
        let next = match (self, event) {
            (_, E::SearchStarted(kind)) => Self::searching(kind),

            (Self::OneWay(O::Searching), E::ResultsReady) => Self::OneWay(O::SelectingTrip),
            (Self::Round(R::Searching), E::ResultsReady) => Self::Round(R::SelectingOutboundTrip),

            (Self::OneWay(O::Searching), E::TripChosen(Leg::Outbound)) => return Err(refused),
            (Self::OneWay(step), E::TripChosen(Leg::Outbound)) => {
                Self::OneWay(forward(step, O::SelectingSeats))
            },
            (Self::Round(R::Searching), E::TripChosen(Leg::Outbound)) => return Err(refused),
            (Self::Round(step), E::TripChosen(Leg::Outbound)) => {
                Self::Round(forward(step, R::SelectingOutboundSeats))
            },
            (Self::Round(step), E::TripChosen(Leg::Return))
                if step as u8 >= R::SelectingReturnTrip as u8 =>
            {
                Self::Round(forward(step, R::SelectingReturnSeats))
            },

            (Self::Round(step), E::ReturnLegRequested)
                if step as u8 >= R::SelectingOutboundSeats as u8 =>
            {
                Self::Round(forward(step, R::SelectingReturnTrip))
            },

            (
                Self::OneWay(step @ (O::SelectingSeats | O::ConfirmingReservation)),
                E::ReservationConfirmed(Leg::Outbound),
            ) => Self::OneWay(forward(step, O::ConfirmingReservation)),
            (Self::Round(step), E::ReservationConfirmed(Leg::Outbound))
                if step as u8 >= R::SelectingOutboundSeats as u8 =>
            {
                Self::Round(forward(step, R::SelectingReturnTrip))
            },
            (
                Self::Round(step @ (R::SelectingReturnSeats | R::ConfirmingReservation)),
                E::ReservationConfirmed(Leg::Return),
            ) => Self::Round(forward(step, R::ConfirmingReservation)),

            _ => return Err(refused),
        };
        Ok(next)
    }

    /// Apply `event`. On error the step is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the event is not valid now.
    pub fn apply(&mut self, event: CycleEvent) -> Result<(), TransitionError> {
        let from = *self;
        let next = from.next(event)?;
        if next != from {
            tracing::debug!(?from, to = ?next, ?event, "Booking cycle advanced");
        }
        *self = next;
        Ok(())
    }

    /// `true` if `event` is valid now
    #[must_use]
    pub fn allows(self, event: CycleEvent) -> bool {
        self.next(event).is_ok()
    }
}

/// Later of two steps of the same flow; the cycle never moves backwards
/// outside a new search.
fn forward<S: Copy + Into<u8>>(current: S, target: S) -> S {
    let (at, to): (u8, u8) = (current.into(), target.into());
    match at.cmp(&to) {
        Ordering::Less => target,
        Ordering::Equal | Ordering::Greater => current,
    }
}

impl From<OneWayStep> for u8 {
    fn from(step: OneWayStep) -> Self {
        step as Self
    }
}

impl From<RoundStep> for u8 {
    fn from(step: RoundStep) -> Self {
        step as Self
    }
}
