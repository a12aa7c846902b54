//! Contract with the remote trip API.
//!
//! [`TripApi`] is the seam between the booking cycle and the network.
//! [`HttpTripApi`] talks JSON over HTTP; [`MockTripApi`] replays scripted
//! responses for tests and the demo.

use crate::history::Order;
use crate::seat_map::SeatMap;
use crate::types::{
    Address, AddressId, Location, LocationId, NewAddress, ReservationId, ReservationRecord,
    RoundReservationRecord, SeatNo, Trip, TripId, TripQuery,
};
use chrono::{NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod mock;

pub use http::HttpTripApi;
pub use mock::{ApiCall, MockTripApi};

/// Transport-level failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or rejected bearer credential (HTTP 401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Request understood but refused (HTTP 400)
    #[error("Rejected: {message}")]
    Rejected {
        /// Server message
        message: String,
    },

    /// Any other non-success status
    #[error("API error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The request never completed (connection, timeout, ...)
    #[error("Request failed: {0}")]
    Request(String),

    /// The response body did not match the expected shape
    #[error("Response parsing failed: {0}")]
    Decode(String),
}

/// Result alias for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Boxed future returned by [`TripApi`] methods
pub type ApiFuture<'a, T> = BoxFuture<'a, ApiResult<T>>;

/// Seat map request for one selected trip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMapQuery {
    /// Trip
    pub trip_id: TripId,
    /// Boarding city
    pub from_city_id: LocationId,
    /// Destination city
    pub to_city_id: LocationId,
    /// Boarding station
    pub from_location_id: LocationId,
    /// Drop-off station
    pub to_location_id: LocationId,
    /// Travel date
    pub date: NaiveDate,
}

/// One leg of a ticket-creation payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegPayload {
    /// Boarding city
    pub from_city_id: LocationId,
    /// Destination city
    pub to_city_id: LocationId,
    /// Boarding station
    pub from_location_id: LocationId,
    /// Drop-off station
    pub to_location_id: LocationId,
    /// Travel date
    pub date: NaiveDate,
    /// Seats to hold
    pub seats: Vec<SeatNo>,
    /// Pickup address (private trips)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_id: Option<AddressId>,
    /// Pickup time (private trips)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_at: Option<NaiveDateTime>,
}

/// `POST /trips/{id}/tickets` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    /// 1 for one-way, 2 for the first half of a round trip
    pub round: u8,
    /// Outbound leg
    pub boarding: LegPayload,
    /// Return leg, when created together with the outbound one
    #[serde(rename = "return", default, skip_serializing_if = "Option::is_none")]
    pub return_leg: Option<LegPayload>,
}

impl TicketRequest {
    /// One-way ticket
    #[must_use]
    pub const fn one_way(boarding: LegPayload) -> Self {
        Self {
            round: 1,
            boarding,
            return_leg: None,
        }
    }

    /// Outbound half of a round trip; the return half follows through
    /// [`TripApi::create_return_ticket`].
    #[must_use]
    pub const fn round_outbound(boarding: LegPayload) -> Self {
        Self {
            round: 2,
            boarding,
            return_leg: None,
        }
    }
}

/// `POST /reservations/{id}/return` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTicketRequest {
    /// Outbound reservation the return extends
    pub outbound_reservation_id: ReservationId,
    /// Return trip
    pub trip_id: TripId,
    /// Return leg details
    #[serde(rename = "return")]
    pub return_leg: LegPayload,
}

/// `POST /reservations/{id}/payment-link` response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    /// Checkout URL
    pub url: String,
}

/// Remote trip API.
///
/// Every method returns a boxed future so the trait stays object safe and an
/// `Arc<dyn TripApi>` can be moved into effects.
pub trait TripApi: Send + Sync {
    /// Boarding locations
    fn locations(&self) -> ApiFuture<'_, Vec<Location>>;

    /// Trips for one leg
    fn search_trips(&self, query: TripQuery) -> ApiFuture<'_, Vec<Trip>>;

    /// Layout of a selected trip
    fn seat_map(&self, query: SeatMapQuery) -> ApiFuture<'_, SeatMap>;

    /// Create a ticket (authenticated)
    fn create_ticket(&self, trip_id: TripId, request: TicketRequest)
    -> ApiFuture<'_, ReservationRecord>;

    /// Extend an outbound reservation with its return leg (authenticated)
    fn create_return_ticket(
        &self,
        reservation_id: ReservationId,
        request: ReturnTicketRequest,
    ) -> ApiFuture<'_, RoundReservationRecord>;

    /// Checkout URL for a confirmed reservation (authenticated)
    fn payment_link(&self, reservation_id: ReservationId) -> ApiFuture<'_, PaymentLink>;

    /// Saved addresses (authenticated)
    fn list_addresses(&self) -> ApiFuture<'_, Vec<Address>>;

    /// Save an address (authenticated)
    fn create_address(&self, address: NewAddress) -> ApiFuture<'_, Address>;

    /// Order history (authenticated)
    fn list_orders(&self) -> ApiFuture<'_, Vec<Order>>;
}
