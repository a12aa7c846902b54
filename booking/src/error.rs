//! Error types for the booking cycle.
//!
//! [`BookingError`] is what callers see. Transport failures
//! ([`ApiError`](crate::api::ApiError)) are converted at the reducer boundary and
//! never escape the session API as-is.

use crate::api::ApiError;
use crate::types::{Leg, ReservationId, TripId};
use std::fmt;
use thiserror::Error;
use tripdesk_runtime::StoreError;

/// Form field a validation issue refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    /// Boarding city
    From,
    /// Destination city
    To,
    /// Outbound date
    Departure,
    /// Return date
    ReturnDate,
    /// Selected trip for a leg
    Trip(Leg),
    /// Seat selection for a leg
    Seats(Leg),
    /// Pickup address (private trips)
    PickupAddress(Leg),
    /// Pickup date and time (private trips)
    PickupTime(Leg),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From => f.write_str("from"),
            Self::To => f.write_str("to"),
            Self::Departure => f.write_str("departure date"),
            Self::ReturnDate => f.write_str("return date"),
            Self::Trip(leg) => write!(f, "{leg} trip"),
            Self::Seats(leg) => write!(f, "{leg} seats"),
            Self::PickupAddress(leg) => write!(f, "{leg} pickup address"),
            Self::PickupTime(leg) => write!(f, "{leg} pickup time"),
        }
    }
}

/// What is wrong with a field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Problem {
    /// Required but empty
    Missing,
    /// Set although the trip kind does not use it
    Unexpected,
    /// Destination equals origin
    SameAsOrigin,
    /// Return date earlier than departure
    BeforeDeparture,
}

/// One validation failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValidationIssue {
    /// Offending field
    pub field: Field,
    /// What is wrong with it
    pub problem: Problem,
}

impl ValidationIssue {
    /// A required field that was left empty
    #[must_use]
    pub const fn missing(field: Field) -> Self {
        Self {
            field,
            problem: Problem::Missing,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.problem {
            Problem::Missing => write!(f, "{} is required", self.field),
            Problem::Unexpected => write!(f, "{} is not allowed for one-way trips", self.field),
            Problem::SameAsOrigin => write!(f, "{} must differ from the origin", self.field),
            Problem::BeforeDeparture => {
                write!(f, "{} must not be before the departure date", self.field)
            },
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors signalled by the booking cycle.
///
/// Every variant carries the leg (and where useful the trip or reservation)
/// it concerns, so a retry can target the right sub-flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Local, pre-network; nothing was sent
    #[error("Invalid input: {}", join_issues(.issues))]
    Validation {
        /// Every problem found
        issues: Vec<ValidationIssue>,
    },

    /// The trip id is not in the current result list (stale navigation)
    #[error("Trip {trip_id} is not among the {leg} results")]
    TripNotFound {
        /// Leg the selection targeted
        leg: Leg,
        /// Unknown trip
        trip_id: TripId,
    },

    /// Missing or rejected credential
    #[error("Sign-in required to continue at {return_path}")]
    AuthRequired {
        /// Leg the operation was for, if any
        leg: Option<Leg>,
        /// Where to resume after signing in
        return_path: String,
    },

    /// The server refused the reservation (seat race lost, ...)
    #[error("Reservation for the {leg} leg was rejected: {message}")]
    ReservationRejected {
        /// Leg being confirmed
        leg: Leg,
        /// Server message
        message: String,
    },

    /// Transient or unknown reservation failure; retryable
    #[error("Reservation for the {leg} leg failed: {message}")]
    ReservationFailed {
        /// Leg being confirmed
        leg: Leg,
        /// Failure description
        message: String,
    },

    /// The payment link could not be fetched; the reservation is intact
    #[error("Payment link for reservation {reservation_id} unavailable: {message}")]
    PaymentLink {
        /// Confirmed reservation
        reservation_id: ReservationId,
        /// Failure description
        message: String,
    },

    /// Address book fetch or create failed
    #[error("Address book unavailable: {message}")]
    AddressPersistence {
        /// Failure description
        message: String,
    },

    /// Boarding locations could not be loaded
    #[error("Location directory unavailable: {message}")]
    DirectoryUnavailable {
        /// Failure description
        message: String,
    },

    /// Order history could not be fetched
    #[error("Order history unavailable: {message}")]
    OrdersUnavailable {
        /// Failure description
        message: String,
    },

    /// One leg's trip search failed
    #[error("Search for {leg} trips failed: {message}")]
    SearchFailed {
        /// Leg whose list is missing
        leg: Leg,
        /// Failure description
        message: String,
    },

    /// Seat map fetch failed
    #[error("Seat map for trip {trip_id} ({leg}) unavailable: {message}")]
    SeatMapFailed {
        /// Leg
        leg: Leg,
        /// Trip the map was requested for
        trip_id: TripId,
        /// Failure description
        message: String,
    },

    /// The action does not apply to the current step
    #[error("{action} is not available: {reason}")]
    ActionNotAvailable {
        /// Attempted action
        action: &'static str,
        /// Why it was refused
        reason: String,
    },

    /// A newer search replaced the one this operation belonged to
    #[error("{operation} was superseded by a newer search")]
    Superseded {
        /// Operation that was waiting
        operation: &'static str,
    },

    /// The session gave up waiting for the operation's outcome
    #[error("{operation} interrupted: {source}")]
    Interrupted {
        /// Operation that was waiting
        operation: &'static str,
        /// Store failure
        source: StoreError,
    },
}

impl BookingError {
    /// Validation failure from a list of issues
    #[must_use]
    pub const fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation { issues }
    }

    /// Refused action
    #[must_use]
    pub fn not_available(action: &'static str, reason: impl Into<String>) -> Self {
        Self::ActionNotAvailable {
            action,
            reason: reason.into(),
        }
    }

    /// Map a ticket-creation failure: 401 asks for sign-in, 400 carries the
    /// server's message, anything else is a retryable failure.
    #[must_use]
    pub fn from_ticket_failure(leg: Leg, error: ApiError, return_path: String) -> Self {
        match error {
            ApiError::Unauthorized => Self::AuthRequired {
                leg: Some(leg),
                return_path,
            },
            ApiError::Rejected { message } => Self::ReservationRejected { leg, message },
            other => Self::ReservationFailed {
                leg,
                message: other.to_string(),
            },
        }
    }

    /// Map a payment-link failure
    #[must_use]
    pub fn from_payment_failure(
        reservation_id: ReservationId,
        error: ApiError,
        return_path: String,
    ) -> Self {
        match error {
            ApiError::Unauthorized => Self::AuthRequired {
                leg: None,
                return_path,
            },
            other => Self::PaymentLink {
                reservation_id,
                message: other.to_string(),
            },
        }
    }

    /// Map an address book failure
    #[must_use]
    pub fn from_address_failure(error: ApiError, return_path: String) -> Self {
        match error {
            ApiError::Unauthorized => Self::AuthRequired {
                leg: None,
                return_path,
            },
            other => Self::AddressPersistence {
                message: other.to_string(),
            },
        }
    }

    /// Leg the error concerns, when it concerns one
    #[must_use]
    pub const fn leg(&self) -> Option<Leg> {
        match self {
            Self::TripNotFound { leg, .. }
            | Self::ReservationRejected { leg, .. }
            | Self::ReservationFailed { leg, .. }
            | Self::SearchFailed { leg, .. }
            | Self::SeatMapFailed { leg, .. } => Some(*leg),
            Self::AuthRequired { leg, .. } => *leg,
            _ => None,
        }
    }

    /// `true` when repeating the same user action may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReservationRejected { .. }
                | Self::ReservationFailed { .. }
                | Self::PaymentLink { .. }
                | Self::AddressPersistence { .. }
                | Self::DirectoryUnavailable { .. }
                | Self::OrdersUnavailable { .. }
                | Self::SearchFailed { .. }
                | Self::SeatMapFailed { .. }
                | Self::Interrupted { .. }
        )
    }
}
