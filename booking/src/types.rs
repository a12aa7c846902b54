//! Domain types for the booking client.
//!
//! Identifiers, search criteria, trips, reservation records and addresses.
//! Seat layouts live in [`crate::seat_map`]; orders in [`crate::history`].

use crate::error::{BookingError, Field, Problem, ValidationIssue};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// A city or station known to the trip directory
    LocationId
);
numeric_id!(
    /// A scheduled trip returned by a search
    TripId
);
numeric_id!(
    /// A server-confirmed reservation (one-way or combined round)
    ReservationId
);
numeric_id!(
    /// An entry in the user's address book
    AddressId
);
numeric_id!(
    /// A completed order in the booking history
    OrderId
);

/// Seat number as printed on the vehicle ("12", "3A")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatNo(String);

impl SeatNo {
    /// Wrap a seat label
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Seat label
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeatNo {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SeatNo {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// From minor units
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Minor units
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// ============================================================================
// Search
// ============================================================================

/// One-way or round trip; fixed for the duration of one search
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripKind {
    /// Outbound leg only
    #[default]
    #[serde(rename = "one-way")]
    OneWay,
    /// Outbound and return legs
    #[serde(rename = "round")]
    Round,
}

impl TripKind {
    /// Legs a search of this kind fetches
    #[must_use]
    pub const fn legs(self) -> &'static [Leg] {
        match self {
            Self::OneWay => &[Leg::Outbound],
            Self::Round => &[Leg::Outbound, Leg::Return],
        }
    }
}

impl fmt::Display for TripKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneWay => f.write_str("one-way"),
            Self::Round => f.write_str("round"),
        }
    }
}

/// One directional half of a trip
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// Origin → destination
    Outbound,
    /// Destination → origin
    Return,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Return => f.write_str("return"),
        }
    }
}

/// How the trip is operated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Scheduled coach
    #[default]
    Bus,
    /// Chauffeured trip with door-to-door pickup
    Private,
    /// Rail
    Train,
}

impl TransportMode {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::Private => "private",
            Self::Train => "train",
        }
    }

    /// Private trips pick the traveller up at an address and time
    #[must_use]
    pub const fn needs_pickup(self) -> bool {
        matches!(self, Self::Private)
    }
}

/// Search form input as the user submitted it.
///
/// Nothing is guaranteed here; [`TripSearchCriteria::validate`] turns it into
/// an [`ActiveSearch`] or reports every problem at once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSearchCriteria {
    /// Boarding city
    pub from: Option<LocationId>,
    /// Destination city
    pub to: Option<LocationId>,
    /// Outbound travel date
    pub departure: Option<NaiveDate>,
    /// Return travel date; required for round trips only
    pub return_date: Option<NaiveDate>,
    /// One-way or round
    pub kind: TripKind,
    /// Bus, private or train
    pub mode: TransportMode,
}

impl TripSearchCriteria {
    /// One-way search
    #[must_use]
    pub const fn one_way(from: LocationId, to: LocationId, departure: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            departure: Some(departure),
            return_date: None,
            kind: TripKind::OneWay,
            mode: TransportMode::Bus,
        }
    }

    /// Round-trip search
    #[must_use]
    pub const fn round(
        from: LocationId,
        to: LocationId,
        departure: NaiveDate,
        return_date: NaiveDate,
    ) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            departure: Some(departure),
            return_date: Some(return_date),
            kind: TripKind::Round,
            mode: TransportMode::Bus,
        }
    }

    /// Same search with another transport mode
    #[must_use]
    pub const fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the form and freeze it into an [`ActiveSearch`].
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] listing every problem: missing
    /// from/to/departure, a return date missing on a round trip or present on
    /// a one-way trip, identical endpoints, or a return before departure.
    pub fn validate(&self) -> Result<ActiveSearch, BookingError> {
        let mut issues = Vec::new();

        if self.from.is_none() {
            issues.push(ValidationIssue::missing(Field::From));
        }
        match self.to {
            None => issues.push(ValidationIssue::missing(Field::To)),
            Some(to) if Some(to) == self.from => issues.push(ValidationIssue {
                field: Field::To,
                problem: Problem::SameAsOrigin,
            }),
            Some(_) => {},
        }
        if self.departure.is_none() {
            issues.push(ValidationIssue::missing(Field::Departure));
        }
        match (self.kind, self.return_date) {
            (TripKind::Round, None) => issues.push(ValidationIssue::missing(Field::ReturnDate)),
            (TripKind::OneWay, Some(_)) => issues.push(ValidationIssue {
                field: Field::ReturnDate,
                problem: Problem::Unexpected,
            }),
            (TripKind::Round, Some(back)) if self.departure.is_some_and(|d| back < d) => {
                issues.push(ValidationIssue {
                    field: Field::ReturnDate,
                    problem: Problem::BeforeDeparture,
                });
            },
            _ => {},
        }

        match (self.from, self.to, self.departure) {
            (Some(from), Some(to), Some(departure)) if issues.is_empty() => Ok(ActiveSearch {
                from,
                to,
                departure,
                return_date: self.return_date,
                kind: self.kind,
                mode: self.mode,
            }),
            _ => Err(BookingError::validation(issues)),
        }
    }
}

/// A validated search. Immutable once executed; a new search replaces it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSearch {
    /// Boarding city
    pub from: LocationId,
    /// Destination city
    pub to: LocationId,
    /// Outbound date
    pub departure: NaiveDate,
    /// Return date (round trips)
    pub return_date: Option<NaiveDate>,
    /// One-way or round
    pub kind: TripKind,
    /// Bus, private or train
    pub mode: TransportMode,
}

impl ActiveSearch {
    /// Query for one leg's trip list. The return leg swaps origin and
    /// destination and travels on the return date.
    #[must_use]
    pub fn query(&self, leg: Leg) -> Option<TripQuery> {
        match leg {
            Leg::Outbound => Some(TripQuery {
                from: self.from,
                to: self.to,
                date: self.departure,
                mode: self.mode,
            }),
            Leg::Return => self.return_date.map(|date| TripQuery {
                from: self.to,
                to: self.from,
                date,
                mode: self.mode,
            }),
        }
    }

    /// `(from, to, date)` for a leg
    #[must_use]
    pub fn endpoints(&self, leg: Leg) -> Option<(LocationId, LocationId, NaiveDate)> {
        self.query(leg).map(|q| (q.from, q.to, q.date))
    }

    /// Back to form input, for re-running the same search
    #[must_use]
    pub const fn criteria(&self) -> TripSearchCriteria {
        TripSearchCriteria {
            from: Some(self.from),
            to: Some(self.to),
            departure: Some(self.departure),
            return_date: self.return_date,
            kind: self.kind,
            mode: self.mode,
        }
    }
}

/// Trip list request for one leg
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripQuery {
    /// Boarding city
    pub from: LocationId,
    /// Destination city
    pub to: LocationId,
    /// Travel date
    pub date: NaiveDate,
    /// Transport mode
    pub mode: TransportMode,
}

// ============================================================================
// Directory
// ============================================================================

/// Boarding location offered by the directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Location id
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// Parent city for stations
    #[serde(default)]
    pub city_id: Option<LocationId>,
}

/// A city or station on a trip's route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripStop {
    /// Stop id
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// City a station belongs to
    #[serde(default)]
    pub city_id: Option<LocationId>,
}

/// A fare class on a trip
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// "adult", "child", ...
    pub label: String,
    /// Fare
    pub amount: Money,
}

/// A scheduled trip returned by a search. Read-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    /// Trip id
    pub id: TripId,
    /// Operating company
    pub company: String,
    /// Cities the trip boards in
    #[serde(default)]
    pub origin_cities: Vec<TripStop>,
    /// Cities the trip drops off in
    #[serde(default)]
    pub destination_cities: Vec<TripStop>,
    /// Boarding stations
    #[serde(default)]
    pub origin_stations: Vec<TripStop>,
    /// Drop-off stations
    #[serde(default)]
    pub destination_stations: Vec<TripStop>,
    /// Fares
    #[serde(default)]
    pub prices: Vec<PriceTier>,
    /// Seats still free when the search ran
    pub available_seats: u32,
    /// Scheduled departure
    pub departs_at: NaiveDateTime,
}

impl Trip {
    /// Station the traveller boards at in `city`: the first origin station
    /// belonging to the city, otherwise the city itself.
    #[must_use]
    pub fn boarding_location(&self, city: LocationId) -> LocationId {
        Self::station_in(&self.origin_stations, city)
    }

    /// Station the traveller leaves at in `city`
    #[must_use]
    pub fn alighting_location(&self, city: LocationId) -> LocationId {
        Self::station_in(&self.destination_stations, city)
    }

    /// Cheapest fare, if the trip lists any
    #[must_use]
    pub fn lowest_price(&self) -> Option<Money> {
        self.prices.iter().map(|p| p.amount).min()
    }

    fn station_in(stations: &[TripStop], city: LocationId) -> LocationId {
        stations
            .iter()
            .find(|s| s.city_id == Some(city))
            .map_or(city, |s| s.id)
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// One seat on a confirmed reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketLine {
    /// Seat
    pub seat_no: SeatNo,
    /// Fare charged for the seat
    pub price: Money,
}

/// Server-confirmed booking for one leg
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// Reservation id
    pub id: ReservationId,
    /// Trip the seats are on
    pub trip_id: TripId,
    /// Per-seat breakdown
    pub tickets: Vec<TicketLine>,
    /// Sum of ticket prices
    pub subtotal: Money,
    /// Discount applied
    #[serde(default)]
    pub discount: Money,
    /// Booking fees
    #[serde(default)]
    pub fees: Money,
    /// Amount due
    pub total: Money,
    /// Where to pay; absent until the payment link was fetched
    #[serde(default)]
    pub payment_url: Option<String>,
}

/// Combined outbound + return booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReservationRecord {
    /// Combined reservation id
    pub id: ReservationId,
    /// Outbound reservation the combined record extends
    pub outbound_id: ReservationId,
    /// Outbound seats
    pub outbound_tickets: Vec<TicketLine>,
    /// Return seats
    pub return_tickets: Vec<TicketLine>,
    /// Sum of ticket prices
    pub subtotal: Money,
    /// Discount applied
    #[serde(default)]
    pub discount: Money,
    /// Booking fees
    #[serde(default)]
    pub fees: Money,
    /// Amount due
    pub total: Money,
    /// Where to pay
    #[serde(default)]
    pub payment_url: Option<String>,
}

/// The last reservation the server created, whatever its shape.
///
/// This is what gets persisted so a reload after confirmation still shows the
/// reservation and its payment link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReservationPayload {
    /// One leg
    Ticket(ReservationRecord),
    /// Both legs of a round trip
    RoundTrip(RoundReservationRecord),
}

impl ReservationPayload {
    /// Reservation id
    #[must_use]
    pub const fn id(&self) -> ReservationId {
        match self {
            Self::Ticket(r) => r.id,
            Self::RoundTrip(r) => r.id,
        }
    }

    /// Payment URL, once fetched
    #[must_use]
    pub fn payment_url(&self) -> Option<&str> {
        match self {
            Self::Ticket(r) => r.payment_url.as_deref(),
            Self::RoundTrip(r) => r.payment_url.as_deref(),
        }
    }

    /// Amount due
    #[must_use]
    pub const fn total(&self) -> Money {
        match self {
            Self::Ticket(r) => r.total,
            Self::RoundTrip(r) => r.total,
        }
    }
}

// ============================================================================
// Address book
// ============================================================================

/// Saved pickup address for private trips
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Address id
    pub id: AddressId,
    /// "Home", "Office", ...
    pub label: String,
    /// Street and number
    pub street: String,
    /// City
    pub city: String,
}

/// Address book entry to create
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    /// Label
    pub label: String,
    /// Street and number
    pub street: String,
    /// City
    pub city: String,
}
