//! Async facade over the booking store.
//!
//! A [`BookingSession`] owns one [`BookingStore`] and a listener task that
//! folds selection changes made by other contexts into it. Each operation
//! dispatches an action and, where the outcome depends on the network, waits
//! for the feedback action that settles it.
//!
//! ```ignore
//! let session = BookingSession::new(env, Duration::from_secs(30));
//! session.initialize().await?;
//!
//! let results = session.start_search(criteria).await?;
//! session.select_trip(Leg::Outbound, results.outbound[0].id).await?;
//! session.toggle_seat(Leg::Outbound, "12".into())?;
//! let outcome = session.confirm_reservation(Leg::Outbound).await?;
//! ```

use crate::api::ApiError;
use crate::cycle::{
    BookingAction, BookingEnvironment, BookingReducer, BookingState, BookingStore, CycleState,
    Notice, SearchGeneration,
};
use crate::error::BookingError;
use crate::history::{OrderHistory, group_orders};
use crate::persistence::{SelectionChange, SelectionStore};
use crate::seat_map::{SeatMap, SeatSelection};
use crate::types::{
    Address, AddressId, Leg, Location, NewAddress, ReservationPayload, ReservationRecord, SeatNo,
    Trip, TripId, TripKind, TripSearchCriteria,
};
use chrono::NaiveDateTime;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tripdesk_runtime::StoreError;

/// Trip lists of a settled search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResults {
    /// Outbound trips
    pub outbound: Vec<Trip>,
    /// Return trips (round trips whose return search succeeded)
    pub return_trips: Option<Vec<Trip>>,
    /// Legs whose search failed; each has a retry notice
    pub failures: Vec<BookingError>,
}

/// How a confirmation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Outbound half of a round trip is held; the return leg comes next
    OutboundHeld(ReservationRecord),
    /// The reservation to pay exists. The payment link may still have
    /// failed; [`BookingSession::retry_payment_link`] fetches it again.
    Reserved {
        /// Final reservation
        reservation: ReservationPayload,
        /// Checkout URL or why it is missing
        payment: Result<String, BookingError>,
    },
}

/// Terminal actions a confirmation waits for
enum ConfirmStep {
    Ticket(Result<ReservationRecord, ApiError>),
    ReturnTicket(Result<(), ApiError>),
    PaymentLink(Result<String, ApiError>),
}

/// Seat map answer an operation waits for
#[derive(Clone, Copy)]
struct PendingSeatMap {
    generation: SearchGeneration,
    leg: Leg,
    trip_id: TripId,
    request: u64,
}

/// One booking context: a store, its environment and the cross-context
/// listener.
pub struct BookingSession {
    store: BookingStore,
    env: BookingEnvironment,
    listener: JoinHandle<()>,
    wait_timeout: Duration,
}

impl BookingSession {
    /// Start a session. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(env: BookingEnvironment, wait_timeout: Duration) -> Self {
        let store = BookingStore::new(BookingState::new(), BookingReducer::new(), env.clone());
        let listener = spawn_listener(store.clone(), env.selections.clone());
        tracing::debug!(context = %env.selections.context_id(), "Booking session started");
        Self {
            store,
            env,
            listener,
            wait_timeout,
        }
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Dispatch `action`; fails with the notice it raised while being reduced.
    fn submit(&self, operation: &'static str, action: BookingAction) -> Result<u64, BookingError> {
        self.submit_reading(operation, action, |_| ()).map(|(mark, ())| mark)
    }

    /// [`Self::submit`], also reading `read` from the state the action left
    /// behind, before any other action is reduced.
    fn submit_reading<T>(
        &self,
        operation: &'static str,
        action: BookingAction,
        read: impl FnOnce(&BookingState) -> T,
    ) -> Result<(u64, T), BookingError> {
        let origin = action.name();
        let (_, (mark, raised, seen)) = self
            .store
            .send_and_inspect(action, BookingState::notice_mark, |s, mark| {
                let raised = s.raised_by(mark, origin).map(|n| n.error.clone());
                (mark, raised, read(s))
            })
            .map_err(|source| BookingError::Interrupted { operation, source })?;
        match raised {
            Some(error) => Err(error),
            None => Ok((mark, seen)),
        }
    }

    fn raised_by(&self, mark: u64, origin: &str) -> Option<BookingError> {
        self.store
            .state(|s| s.raised_by(mark, origin).map(|n| n.error.clone()))
    }

    /// Error of the notice `origin` raised after `mark`, or `fallback`
    fn failure(
        &self,
        mark: u64,
        origin: &str,
        fallback: impl FnOnce() -> BookingError,
    ) -> BookingError {
        self.raised_by(mark, origin).unwrap_or_else(fallback)
    }

    /// Wait for the feedback action `pick` accepts. Ends early with
    /// [`BookingError::Superseded`] once a newer search replaces `generation`.
    async fn wait_for<T>(
        &self,
        operation: &'static str,
        feed: &mut broadcast::Receiver<BookingAction>,
        generation: SearchGeneration,
        mut pick: impl FnMut(BookingAction) -> Option<T>,
    ) -> Result<T, BookingError> {
        let outcome = tokio::time::timeout(self.wait_timeout, async {
            loop {
                match feed.recv().await {
                    Ok(BookingAction::SearchSuperseded { generation: g }) if g == generation => {
                        return Ok(None);
                    },
                    Ok(action) => {
                        if let Some(found) = pick(action) {
                            return Ok(Some(found));
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(operation, skipped, "Session fell behind the action feed");
                    },
                    Err(RecvError::Closed) => return Err(StoreError::ChannelClosed),
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(Some(found))) => Ok(found),
            Ok(Ok(None)) => {
                tracing::debug!(operation, %generation, "Operation superseded by a newer search");
                Err(BookingError::Superseded { operation })
            },
            Ok(Err(source)) => Err(BookingError::Interrupted { operation, source }),
            Err(_) => Err(BookingError::Interrupted {
                operation,
                source: StoreError::Timeout,
            }),
        }
    }

    /// Dispatch an action that cannot be refused and wait for its answer
    async fn request<T>(
        &self,
        operation: &'static str,
        action: BookingAction,
        pick: impl Fn(&BookingAction) -> Option<T>,
    ) -> Result<T, BookingError> {
        let answer = self
            .store
            .send_and_wait_for(action, |a| pick(a).is_some(), self.wait_timeout)
            .await
            .map_err(|source| BookingError::Interrupted { operation, source })?;
        pick(&answer).ok_or(BookingError::Interrupted {
            operation,
            source: StoreError::ChannelClosed,
        })
    }

    // ========================================================================
    // Lifecycle and directory
    // ========================================================================

    /// Restore persisted selections and load the address book.
    ///
    /// # Errors
    ///
    /// The address book failure ([`BookingError::AddressPersistence`] or
    /// [`BookingError::AuthRequired`]). Selections are restored either way.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<Vec<Address>, BookingError> {
        let mark = self.store.state(BookingState::notice_mark);
        let loaded = self
            .request("initialize", BookingAction::Initialize, |a| match a {
                BookingAction::AddressesLoaded { result } => Some(result.is_ok()),
                _ => None,
            })
            .await?;
        if loaded {
            Ok(self.store.state(|s| s.addresses.clone()))
        } else {
            Err(self.failure(mark, "addresses_loaded", || BookingError::AddressPersistence {
                message: "address book unavailable".into(),
            }))
        }
    }

    /// Boarding locations.
    ///
    /// # Errors
    ///
    /// [`BookingError::DirectoryUnavailable`] when the directory cannot be
    /// reached.
    #[tracing::instrument(skip(self))]
    pub async fn load_locations(&self) -> Result<Vec<Location>, BookingError> {
        let mark = self.store.state(BookingState::notice_mark);
        let loaded = self
            .request("load_locations", BookingAction::LoadLocations, |a| match a {
                BookingAction::LocationsLoaded { result } => Some(result.is_ok()),
                _ => None,
            })
            .await?;
        if loaded {
            Ok(self.store.state(|s| s.locations.clone()))
        } else {
            Err(self.failure(mark, "locations_loaded", || BookingError::DirectoryUnavailable {
                message: "location directory unavailable".into(),
            }))
        }
    }

    // ========================================================================
    // Search, trips and seats
    // ========================================================================

    /// Validate `criteria` and run the search, returning once every leg
    /// answered.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] before any request, or the leg failure
    /// when no leg returned results.
    #[tracing::instrument(skip(self))]
    pub async fn start_search(
        &self,
        criteria: TripSearchCriteria,
    ) -> Result<SearchResults, BookingError> {
        const OP: &str = "start_search";
        let mut feed = self.store.subscribe_actions();
        let (mark, generation) =
            self.submit_reading(OP, BookingAction::StartSearch { criteria }, |s| s.generation)?;

        self.wait_for(OP, &mut feed, generation, |action| match action {
            BookingAction::SearchSettled { generation: g } if g == generation => Some(()),
            _ => None,
        })
        .await?;

        let (results, current, any_loaded) = self.store.state(|s| {
            let failures: Vec<BookingError> = s
                .notices_after(mark)
                .filter(|n| matches!(n.error, BookingError::SearchFailed { .. }))
                .map(|n| n.error.clone())
                .collect();
            let loaded = |leg: Leg| {
                let slice = s.leg(leg);
                slice.trips_loaded.then(|| slice.trips.clone())
            };
            let results = SearchResults {
                outbound: loaded(Leg::Outbound).unwrap_or_default(),
                return_trips: loaded(Leg::Return),
                failures,
            };
            let any_loaded = s.kind().legs().iter().any(|l| s.leg(*l).trips_loaded);
            (results, s.generation, any_loaded)
        });

        if current != generation {
            return Err(BookingError::Superseded { operation: OP });
        }
        if !any_loaded {
            return Err(results
                .failures
                .last()
                .cloned()
                .unwrap_or(BookingError::Interrupted {
                    operation: OP,
                    source: StoreError::ChannelClosed,
                }));
        }
        tracing::info!(
            %generation,
            outbound = results.outbound.len(),
            return_trips = results.return_trips.as_ref().map(Vec::len),
            failed = results.failures.len(),
            "Search settled"
        );
        Ok(results)
    }

    /// Fetch one leg's trips again after its search failed, returning once
    /// the search has settled.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] if the leg did not fail, or the
    /// new failure.
    #[tracing::instrument(skip(self))]
    pub async fn retry_search(&self, leg: Leg) -> Result<Vec<Trip>, BookingError> {
        const OP: &str = "retry_search";
        let mut feed = self.store.subscribe_actions();
        let (mark, generation) =
            self.submit_reading(OP, BookingAction::RetrySearch { leg }, |s| s.generation)?;

        let mut answered = None;
        self.wait_for(OP, &mut feed, generation, |action| match action {
            BookingAction::TripsLoaded {
                generation: g,
                leg: l,
                result,
            } if g == generation && l == leg => {
                answered = Some(result.is_ok());
                None
            },
            BookingAction::SearchSettled { generation: g } if g == generation => Some(()),
            _ => None,
        })
        .await?;

        if answered == Some(true) {
            Ok(self.store.state(|s| s.leg(leg).trips.clone()))
        } else {
            Err(self.failure(mark, "trips_loaded", || BookingError::SearchFailed {
                leg,
                message: "search failed".into(),
            }))
        }
    }

    /// Choose a trip and wait for its seat map.
    ///
    /// # Errors
    ///
    /// [`BookingError::TripNotFound`], [`BookingError::ActionNotAvailable`]
    /// or [`BookingError::SeatMapFailed`].
    #[tracing::instrument(skip(self))]
    pub async fn select_trip(&self, leg: Leg, trip_id: TripId) -> Result<SeatMap, BookingError> {
        const OP: &str = "select_trip";
        let mut feed = self.store.subscribe_actions();
        let (mark, (generation, request)) =
            self.submit_reading(OP, BookingAction::SelectTrip { leg, trip_id }, |s| {
                (s.generation, s.leg(leg).seat_map_request)
            })?;
        let pending = PendingSeatMap {
            generation,
            leg,
            trip_id,
            request,
        };
        self.await_seat_map(OP, &mut feed, mark, pending).await?;
        self.store
            .state(|s| s.leg(leg).seat_map.clone())
            .ok_or_else(|| BookingError::SeatMapFailed {
                leg,
                trip_id,
                message: "seat map missing after load".into(),
            })
    }

    /// Fetch the chosen trip's seat map again. Returns the seats that were
    /// dropped from the selection because someone else booked them.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] without a chosen trip, or
    /// [`BookingError::SeatMapFailed`].
    #[tracing::instrument(skip(self))]
    pub async fn refresh_seat_map(&self, leg: Leg) -> Result<Vec<SeatNo>, BookingError> {
        const OP: &str = "refresh_seat_map";
        let mut feed = self.store.subscribe_actions();
        let (mark, (generation, trip_id, request)) =
            self.submit_reading(OP, BookingAction::RefreshSeatMap { leg }, |s| {
                let slice = s.leg(leg);
                (s.generation, slice.trip_id(), slice.seat_map_request)
            })?;
        let trip_id =
            trip_id.ok_or_else(|| BookingError::not_available(OP, format!("no {leg} trip is selected")))?;
        let pending = PendingSeatMap {
            generation,
            leg,
            trip_id,
            request,
        };
        self.await_seat_map(OP, &mut feed, mark, pending).await?;
        Ok(self.store.state(|s| s.leg(leg).pruned.clone()))
    }

    /// Wait for the answer to `pending` or to a later request that replaced it
    async fn await_seat_map(
        &self,
        operation: &'static str,
        feed: &mut broadcast::Receiver<BookingAction>,
        mark: u64,
        pending: PendingSeatMap,
    ) -> Result<(), BookingError> {
        let PendingSeatMap {
            generation,
            leg,
            trip_id,
            request,
        } = pending;
        let ok = self
            .wait_for(operation, feed, generation, |action| match action {
                BookingAction::SeatMapLoaded {
                    generation: g,
                    leg: l,
                    trip_id: t,
                    request: r,
                    result,
                } if g == generation && l == leg && t == trip_id && r >= request => {
                    Some(result.is_ok())
                },
                _ => None,
            })
            .await?;
        if ok {
            return Ok(());
        }
        Err(self.failure(mark, "seat_map_loaded", || BookingError::SeatMapFailed {
            leg,
            trip_id,
            message: "seat map unavailable".into(),
        }))
    }

    /// Flip a seat. Seats that are not available are left out silently.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] while a confirmation is running.
    pub fn toggle_seat(&self, leg: Leg, seat_no: SeatNo) -> Result<SeatSelection, BookingError> {
        self.submit("toggle_seat", BookingAction::ToggleSeat { leg, seat_no })?;
        Ok(self.store.state(|s| s.leg(leg).selection.clone()))
    }

    /// Move on to picking the return trip.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] for one-way trips, outside the
    /// outbound seat step, or without outbound seats.
    pub fn advance_to_return_trip(&self) -> Result<CycleState, BookingError> {
        self.submit("advance_to_return_trip", BookingAction::AdvanceToReturnTrip)?;
        Ok(self.store.state(BookingState::cycle))
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Create the reservation for `leg` and, once the reservation to pay
    /// exists, its payment link.
    ///
    /// # Errors
    ///
    /// Validation, sign-in or reservation failures. A payment link failure
    /// is not an error here; it is reported inside
    /// [`ConfirmOutcome::Reserved`].
    #[tracing::instrument(skip(self))]
    pub async fn confirm_reservation(&self, leg: Leg) -> Result<ConfirmOutcome, BookingError> {
        const OP: &str = "confirm_reservation";
        let mut feed = self.store.subscribe_actions();
        let (mark, (generation, kind)) =
            self.submit_reading(OP, BookingAction::ConfirmReservation { leg }, |s| {
                (s.generation, s.kind())
            })?;

        loop {
            let step = self
                .wait_for(OP, &mut feed, generation, |action| match action {
                    BookingAction::TicketCreated {
                        generation: g,
                        requested,
                        result,
                    } if g == generation && requested == leg => Some(ConfirmStep::Ticket(result)),
                    BookingAction::ReturnTicketCreated {
                        generation: g,
                        result,
                        ..
                    } if g == generation => Some(ConfirmStep::ReturnTicket(result.map(|_| ()))),
                    BookingAction::PaymentLinkFetched {
                        generation: g,
                        result,
                        ..
                    } if g == generation => Some(ConfirmStep::PaymentLink(result.map(|l| l.url))),
                    _ => None,
                })
                .await?;

            match step {
                ConfirmStep::Ticket(Err(error)) => {
                    return Err(self.failure(mark, "ticket_created", || {
                        BookingError::from_ticket_failure(leg, error, String::new())
                    }));
                },
                ConfirmStep::Ticket(Ok(record)) if kind == TripKind::Round && leg == Leg::Outbound => {
                    return Ok(ConfirmOutcome::OutboundHeld(record));
                },
                ConfirmStep::ReturnTicket(Err(error)) => {
                    return Err(self.failure(mark, "return_ticket_created", || {
                        BookingError::from_ticket_failure(Leg::Return, error, String::new())
                    }));
                },
                ConfirmStep::Ticket(Ok(_)) | ConfirmStep::ReturnTicket(Ok(())) => {},
                ConfirmStep::PaymentLink(result) => {
                    let reservation = self.store.state(BookingState::final_reservation).ok_or(
                        BookingError::Interrupted {
                            operation: OP,
                            source: StoreError::ChannelClosed,
                        },
                    )?;
                    let payment = result.map_err(|error| {
                        self.failure(mark, "payment_link_fetched", || {
                            BookingError::from_payment_failure(reservation.id(), error, String::new())
                        })
                    });
                    return Ok(ConfirmOutcome::Reserved {
                        reservation,
                        payment,
                    });
                },
            }
        }
    }

    /// Fetch the payment link of the confirmed reservation again. Never
    /// creates a new reservation.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] without a reservation (or with a
    /// link already present), or [`BookingError::PaymentLink`].
    #[tracing::instrument(skip(self))]
    pub async fn retry_payment_link(&self) -> Result<String, BookingError> {
        const OP: &str = "retry_payment_link";
        let mut feed = self.store.subscribe_actions();
        let (mark, generation) =
            self.submit_reading(OP, BookingAction::RetryPaymentLink, |s| s.generation)?;

        let (reservation_id, result) = self
            .wait_for(OP, &mut feed, generation, |action| match action {
                BookingAction::PaymentLinkFetched {
                    generation: g,
                    reservation_id,
                    result,
                } if g == generation => Some((reservation_id, result)),
                _ => None,
            })
            .await?;
        result.map(|link| link.url).map_err(|error| {
            self.failure(mark, "payment_link_fetched", || {
                BookingError::from_payment_failure(reservation_id, error, String::new())
            })
        })
    }

    // ========================================================================
    // Address book and pickup
    // ========================================================================

    /// Reload the address book.
    ///
    /// # Errors
    ///
    /// [`BookingError::AddressPersistence`] or [`BookingError::AuthRequired`].
    #[tracing::instrument(skip(self))]
    pub async fn load_addresses(&self) -> Result<Vec<Address>, BookingError> {
        let mark = self.store.state(BookingState::notice_mark);
        let loaded = self
            .request("load_addresses", BookingAction::LoadAddresses, |a| match a {
                BookingAction::AddressesLoaded { result } => Some(result.is_ok()),
                _ => None,
            })
            .await?;
        if loaded {
            Ok(self.store.state(|s| s.addresses.clone()))
        } else {
            Err(self.failure(mark, "addresses_loaded", || BookingError::AddressPersistence {
                message: "address book unavailable".into(),
            }))
        }
    }

    /// Save an address, selecting it as the pickup for `leg` when given.
    ///
    /// # Errors
    ///
    /// [`BookingError::AddressPersistence`] or [`BookingError::AuthRequired`].
    #[tracing::instrument(skip(self))]
    pub async fn create_address(
        &self,
        leg: Option<Leg>,
        address: NewAddress,
    ) -> Result<Address, BookingError> {
        let mark = self.store.state(BookingState::notice_mark);
        let result = self
            .request(
                "create_address",
                BookingAction::CreateAddress { leg, address },
                |a| match a {
                    BookingAction::AddressCreated { result, .. } => Some(result.clone()),
                    _ => None,
                },
            )
            .await?;
        result.map_err(|error| {
            self.failure(mark, "address_created", || {
                BookingError::from_address_failure(error, String::new())
            })
        })
    }

    /// Choose or clear the pickup address of `leg`.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] for an id outside the loaded
    /// address book.
    pub fn select_address(&self, leg: Leg, address_id: Option<AddressId>) -> Result<(), BookingError> {
        self.submit("select_address", BookingAction::SelectAddress { leg, address_id })
            .map(drop)
    }

    /// Choose or clear the pickup time of `leg`.
    ///
    /// # Errors
    ///
    /// [`BookingError::Interrupted`] once the session is shutting down.
    pub fn select_pickup_time(
        &self,
        leg: Leg,
        at: Option<NaiveDateTime>,
    ) -> Result<(), BookingError> {
        self.submit("select_datetime", BookingAction::SelectDateTime { leg, at })
            .map(drop)
    }

    /// Remember the trip kind the search form should default to.
    ///
    /// # Errors
    ///
    /// [`BookingError::Interrupted`] once the session is shutting down.
    pub fn set_search_kind(&self, kind: TripKind) -> Result<(), BookingError> {
        self.submit("set_search_kind", BookingAction::SetSearchKind { kind })
            .map(drop)
    }

    // ========================================================================
    // Notices and history
    // ========================================================================

    /// Unacknowledged failures, oldest first
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.store.state(|s| s.notices.clone())
    }

    /// Acknowledge a notice.
    ///
    /// # Errors
    ///
    /// [`BookingError::Interrupted`] once the session is shutting down.
    pub fn dismiss_notice(&self, id: u64) -> Result<(), BookingError> {
        self.submit("dismiss_notice", BookingAction::DismissNotice { id })
            .map(drop)
    }

    /// Run a notice's retry affordance. The retried operation runs in the
    /// background; its outcome shows up in state and, on failure, as a new
    /// notice.
    ///
    /// # Errors
    ///
    /// [`BookingError::ActionNotAvailable`] if the notice is gone or has no
    /// retry, or the retried action's own refusal.
    pub fn retry_notice(&self, id: u64) -> Result<(), BookingError> {
        let retried = self.store.state(|s| {
            s.notices
                .iter()
                .find(|n| n.id == id)
                .and_then(|n| n.retry)
                .map(|retry| BookingAction::from(retry).name())
        });
        let mark = self.submit("retry_notice", BookingAction::RetryNotice { id })?;
        match retried.and_then(|origin| self.raised_by(mark, origin)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Order history, grouped for display.
    ///
    /// # Errors
    ///
    /// [`BookingError::AuthRequired`] without a valid credential, otherwise
    /// [`BookingError::OrdersUnavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn order_history(&self) -> Result<OrderHistory, BookingError> {
        let orders = self.env.api.list_orders().await.map_err(|error| match error {
            ApiError::Unauthorized => BookingError::AuthRequired {
                leg: None,
                return_path: "/orders".into(),
            },
            other => BookingError::OrdersUnavailable {
                message: other.to_string(),
            },
        })?;
        Ok(group_orders(orders, self.env.clock.as_ref()))
    }

    // ========================================================================
    // Inspection and shutdown
    // ========================================================================

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> BookingState {
        self.store.state(Clone::clone)
    }

    /// Read the current state through `f`
    pub fn read<T>(&self, f: impl FnOnce(&BookingState) -> T) -> T {
        self.store.state(f)
    }

    /// Stop accepting operations and wait for running requests.
    ///
    /// # Errors
    ///
    /// [`BookingError::Interrupted`] if requests are still running after
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BookingError> {
        self.listener.abort();
        self.store
            .shutdown(timeout)
            .await
            .map_err(|source| BookingError::Interrupted {
                operation: "shutdown",
                source,
            })
    }
}

impl Drop for BookingSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Every persisted selection as a change, used to resync after the listener
/// missed notifications
fn resync_changes(selections: &SelectionStore) -> Vec<SelectionChange> {
    let current = selections.load();
    let mut changes = Vec::with_capacity(6);
    for leg in [Leg::Outbound, Leg::Return] {
        changes.push(SelectionChange::Address {
            leg,
            id: current.address(leg),
        });
        changes.push(SelectionChange::DateTime {
            leg,
            at: current.datetime(leg),
        });
    }
    changes.push(SelectionChange::LatestReservation(current.latest_reservation));
    changes.push(SelectionChange::SearchType(current.search_type));
    changes
}

fn spawn_listener(store: BookingStore, selections: SelectionStore) -> JoinHandle<()> {
    let mut feed = selections.subscribe();
    tokio::spawn(async move {
        loop {
            let changes = match feed.recv().await {
                Ok(change) => selections.foreign_change(&change).into_iter().collect(),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Selection listener lagged, resyncing from storage");
                    resync_changes(&selections)
                },
                Err(RecvError::Closed) => break,
            };
            for change in changes {
                tracing::debug!(?change, "Selection changed in another context");
                if let Err(error) = store.send(BookingAction::SelectionChangedElsewhere { change }) {
                    tracing::debug!(%error, "Selection listener stopping");
                    return;
                }
            }
        }
    })
}
