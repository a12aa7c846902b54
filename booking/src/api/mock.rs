//! Scripted in-memory [`TripApi`] for tests and the demo.
//!
//! Responses are queued per endpoint. A queue hands out its entries in order
//! and keeps repeating the last one. Ticket and payment-link calls with no
//! script succeed with synthesized records, numbered from 900.

use super::{
    ApiError, ApiFuture, ApiResult, PaymentLink, ReturnTicketRequest, SeatMapQuery,
    TicketRequest, TripApi,
};
use crate::history::Order;
use crate::seat_map::SeatMap;
use crate::types::{
    Address, AddressId, Location, LocationId, Money, NewAddress, ReservationId,
    ReservationRecord, RoundReservationRecord, SeatNo, TicketLine, Trip, TripId, TripQuery,
};
use futures::future::{self, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Seat price used for synthesized tickets
pub const MOCK_SEAT_PRICE: Money = Money::from_cents(2500);

/// First id handed out for synthesized reservations and addresses
pub const FIRST_MOCK_ID: u64 = 900;

/// A call received by [`MockTripApi`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    /// `locations()`
    Locations,
    /// `search_trips(query)`
    SearchTrips(TripQuery),
    /// `seat_map(query)`
    SeatMap(SeatMapQuery),
    /// `create_ticket(trip_id, request)`
    CreateTicket {
        /// Trip
        trip_id: TripId,
        /// Body
        request: TicketRequest,
    },
    /// `create_return_ticket(reservation_id, request)`
    CreateReturnTicket {
        /// Outbound reservation
        reservation_id: ReservationId,
        /// Body
        request: ReturnTicketRequest,
    },
    /// `payment_link(reservation_id)`
    PaymentLink(ReservationId),
    /// `list_addresses()`
    ListAddresses,
    /// `create_address(address)`
    CreateAddress(NewAddress),
    /// `list_orders()`
    ListOrders,
}

impl ApiCall {
    /// `true` for ticket and return-ticket creation
    #[must_use]
    pub const fn is_ticket_creation(&self) -> bool {
        matches!(self, Self::CreateTicket { .. } | Self::CreateReturnTicket { .. })
    }
}

/// Pop the next scripted result; the last one sticks
fn next<T: Clone>(queue: &mut VecDeque<ApiResult<T>>) -> Option<ApiResult<T>> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Default)]
struct Script {
    locations: Vec<Location>,
    trips: HashMap<(LocationId, LocationId), VecDeque<ApiResult<Vec<Trip>>>>,
    search_delays: HashMap<(LocationId, LocationId), Duration>,
    seat_maps: HashMap<TripId, VecDeque<ApiResult<SeatMap>>>,
    tickets: VecDeque<ApiResult<ReservationRecord>>,
    return_tickets: VecDeque<ApiResult<RoundReservationRecord>>,
    payment_links: VecDeque<ApiResult<PaymentLink>>,
    addresses: Vec<Address>,
    address_failure: Option<ApiError>,
    orders: Vec<Order>,
    created: HashMap<ReservationId, ReservationRecord>,
    next_id: u64,
    calls: Vec<ApiCall>,
}

/// Scripted trip API
pub struct MockTripApi {
    script: Mutex<Script>,
}

impl Default for MockTripApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTripApi {
    /// Empty script: no locations, empty trip lists, no seat maps
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                next_id: FIRST_MOCK_ID,
                ..Script::default()
            }),
        }
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut script)
    }

    /// Locations returned by `locations()`
    pub fn set_locations(&self, locations: Vec<Location>) {
        self.with_script(|s| s.locations = locations);
    }

    /// Queue a trip search result for `from → to`
    pub fn push_trips(&self, from: LocationId, to: LocationId, result: ApiResult<Vec<Trip>>) {
        self.with_script(|s| s.trips.entry((from, to)).or_default().push_back(result));
    }

    /// Delay every `from → to` search by `delay`
    pub fn delay_search(&self, from: LocationId, to: LocationId, delay: Duration) {
        self.with_script(|s| s.search_delays.insert((from, to), delay));
    }

    /// Queue a seat map result for `trip_id`
    pub fn push_seat_map(&self, trip_id: TripId, result: ApiResult<SeatMap>) {
        self.with_script(|s| s.seat_maps.entry(trip_id).or_default().push_back(result));
    }

    /// Queue a ticket creation result
    pub fn push_ticket(&self, result: ApiResult<ReservationRecord>) {
        self.with_script(|s| s.tickets.push_back(result));
    }

    /// Queue a return ticket creation result
    pub fn push_return_ticket(&self, result: ApiResult<RoundReservationRecord>) {
        self.with_script(|s| s.return_tickets.push_back(result));
    }

    /// Queue a payment link result
    pub fn push_payment_link(&self, result: ApiResult<PaymentLink>) {
        self.with_script(|s| s.payment_links.push_back(result));
    }

    /// Address book contents
    pub fn set_addresses(&self, addresses: Vec<Address>) {
        self.with_script(|s| s.addresses = addresses);
    }

    /// Make address book calls fail with `error`; `None` heals them
    pub fn fail_addresses(&self, error: Option<ApiError>) {
        self.with_script(|s| s.address_failure = error);
    }

    /// Orders returned by `list_orders()`
    pub fn set_orders(&self, orders: Vec<Order>) {
        self.with_script(|s| s.orders = orders);
    }

    /// Every call received so far
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.with_script(|s| s.calls.clone())
    }

    /// Number of calls matching `predicate`
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.with_script(|s| s.calls.iter().filter(|c| predicate(c)).count())
    }

    fn record(&self, call: ApiCall) {
        tracing::trace!(?call, "Mock API call");
        self.with_script(|s| s.calls.push(call));
    }

    fn synthesize_ticket(script: &mut Script, trip_id: TripId, request: &TicketRequest) -> ReservationRecord {
        let id = ReservationId(script.next_id);
        script.next_id += 1;

        let tickets = priced(&request.boarding.seats);
        let subtotal = tickets.iter().map(|t| t.price).sum();
        let record = ReservationRecord {
            id,
            trip_id,
            tickets,
            subtotal,
            discount: Money::ZERO,
            fees: Money::ZERO,
            total: subtotal,
            payment_url: None,
        };
        script.created.insert(id, record.clone());
        record
    }

    fn synthesize_return(
        script: &mut Script,
        outbound_id: ReservationId,
        request: &ReturnTicketRequest,
    ) -> RoundReservationRecord {
        let id = ReservationId(script.next_id);
        script.next_id += 1;

        let outbound_tickets = script
            .created
            .get(&outbound_id)
            .map(|r| r.tickets.clone())
            .unwrap_or_default();
        let return_tickets = priced(&request.return_leg.seats);
        let subtotal = outbound_tickets
            .iter()
            .chain(&return_tickets)
            .map(|t| t.price)
            .sum();

        RoundReservationRecord {
            id,
            outbound_id,
            outbound_tickets,
            return_tickets,
            subtotal,
            discount: Money::ZERO,
            fees: Money::ZERO,
            total: subtotal,
            payment_url: None,
        }
    }
}

fn priced(seats: &[SeatNo]) -> Vec<TicketLine> {
    seats
        .iter()
        .map(|seat_no| TicketLine {
            seat_no: seat_no.clone(),
            price: MOCK_SEAT_PRICE,
        })
        .collect()
}

impl TripApi for MockTripApi {
    fn locations(&self) -> ApiFuture<'_, Vec<Location>> {
        self.record(ApiCall::Locations);
        let locations = self.with_script(|s| s.locations.clone());
        future::ok(locations).boxed()
    }

    fn search_trips(&self, query: TripQuery) -> ApiFuture<'_, Vec<Trip>> {
        self.record(ApiCall::SearchTrips(query));
        let key = (query.from, query.to);
        let (result, delay) = self.with_script(|s| {
            let result = s
                .trips
                .get_mut(&key)
                .and_then(next)
                .unwrap_or_else(|| Ok(Vec::new()));
            (result, s.search_delays.get(&key).copied())
        });
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn seat_map(&self, query: SeatMapQuery) -> ApiFuture<'_, SeatMap> {
        self.record(ApiCall::SeatMap(query));
        let result = self.with_script(|s| {
            s.seat_maps
                .get_mut(&query.trip_id)
                .and_then(next)
                .unwrap_or_else(|| {
                    Err(ApiError::Status {
                        status: 404,
                        message: format!("no seat map for trip {}", query.trip_id),
                    })
                })
        });
        future::ready(result).boxed()
    }

    fn create_ticket(
        &self,
        trip_id: TripId,
        request: TicketRequest,
    ) -> ApiFuture<'_, ReservationRecord> {
        self.record(ApiCall::CreateTicket {
            trip_id,
            request: request.clone(),
        });
        let result = self.with_script(|s| match next(&mut s.tickets) {
            Some(Ok(record)) => {
                s.created.insert(record.id, record.clone());
                Ok(record)
            },
            Some(Err(error)) => Err(error),
            None => Ok(Self::synthesize_ticket(s, trip_id, &request)),
        });
        future::ready(result).boxed()
    }

    fn create_return_ticket(
        &self,
        reservation_id: ReservationId,
        request: ReturnTicketRequest,
    ) -> ApiFuture<'_, RoundReservationRecord> {
        self.record(ApiCall::CreateReturnTicket {
            reservation_id,
            request: request.clone(),
        });
        let result = self.with_script(|s| {
            next(&mut s.return_tickets)
                .unwrap_or_else(|| Ok(Self::synthesize_return(s, reservation_id, &request)))
        });
        future::ready(result).boxed()
    }

    fn payment_link(&self, reservation_id: ReservationId) -> ApiFuture<'_, PaymentLink> {
        self.record(ApiCall::PaymentLink(reservation_id));
        let result = self.with_script(|s| {
            next(&mut s.payment_links).unwrap_or_else(|| {
                Ok(PaymentLink {
                    url: format!("https://pay.example/checkout/{reservation_id}"),
                })
            })
        });
        future::ready(result).boxed()
    }

    fn list_addresses(&self) -> ApiFuture<'_, Vec<Address>> {
        self.record(ApiCall::ListAddresses);
        let result = self.with_script(|s| match &s.address_failure {
            Some(error) => Err(error.clone()),
            None => Ok(s.addresses.clone()),
        });
        future::ready(result).boxed()
    }

    fn create_address(&self, address: NewAddress) -> ApiFuture<'_, Address> {
        self.record(ApiCall::CreateAddress(address.clone()));
        let result = self.with_script(|s| {
            if let Some(error) = &s.address_failure {
                return Err(error.clone());
            }
            let created = Address {
                id: AddressId(s.next_id),
                label: address.label,
                street: address.street,
                city: address.city,
            };
            s.next_id += 1;
            s.addresses.push(created.clone());
            Ok(created)
        });
        future::ready(result).boxed()
    }

    fn list_orders(&self) -> ApiFuture<'_, Vec<Order>> {
        self.record(ApiCall::ListOrders);
        let orders = self.with_script(|s| s.orders.clone());
        future::ok(orders).boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::LegPayload;
    use chrono::NaiveDate;

    fn leg(seats: &[&str]) -> LegPayload {
        LegPayload {
            from_city_id: LocationId(1),
            to_city_id: LocationId(2),
            from_location_id: LocationId(1),
            to_location_id: LocationId(2),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            seats: seats.iter().map(|s| SeatNo::from(*s)).collect(),
            address_id: None,
            pickup_at: None,
        }
    }

    #[tokio::test]
    async fn last_scripted_result_sticks() {
        let api = MockTripApi::new();
        api.push_payment_link(Err(ApiError::Request("offline".into())));
        api.push_payment_link(Ok(PaymentLink {
            url: "https://pay.example/x".into(),
        }));

        assert!(api.payment_link(ReservationId(1)).await.is_err());
        assert!(api.payment_link(ReservationId(1)).await.is_ok());
        assert!(api.payment_link(ReservationId(1)).await.is_ok());
        assert_eq!(api.count_calls(|c| matches!(c, ApiCall::PaymentLink(_))), 3);
    }

    #[tokio::test]
    async fn synthesized_round_trip_carries_both_legs() {
        let api = MockTripApi::new();
        let outbound = api
            .create_ticket(TripId(7), TicketRequest::round_outbound(leg(&["12"])))
            .await
            .unwrap();
        assert_eq!(outbound.id, ReservationId(FIRST_MOCK_ID));
        assert_eq!(outbound.total, MOCK_SEAT_PRICE);

        let combined = api
            .create_return_ticket(
                outbound.id,
                ReturnTicketRequest {
                    outbound_reservation_id: outbound.id,
                    trip_id: TripId(15),
                    return_leg: leg(&["3"]),
                },
            )
            .await
            .unwrap();
        assert_eq!(combined.outbound_id, outbound.id);
        assert_eq!(combined.outbound_tickets.len(), 1);
        assert_eq!(combined.return_tickets.len(), 1);
        assert_eq!(combined.total, Money::from_cents(5000));
    }

    #[tokio::test]
    async fn address_failures_are_switchable() {
        let api = MockTripApi::new();
        api.fail_addresses(Some(ApiError::Unauthorized));
        assert_eq!(api.list_addresses().await, Err(ApiError::Unauthorized));

        api.fail_addresses(None);
        let created = api
            .create_address(NewAddress {
                label: "Home".into(),
                street: "Rua Augusta 1".into(),
                city: "Lisbon".into(),
            })
            .await
            .unwrap();
        assert_eq!(api.list_addresses().await.unwrap(), vec![created]);
    }
}
