//! End-to-end booking flows through [`BookingSession`] against the scripted
//! API.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{A, B, C, WAIT, coach, date, fixture, seats, trip};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tripdesk_booking::{
    BookingError, BookingState, ConfirmOutcome, CycleState,
    api::{ApiCall, ApiError, PaymentLink},
    cycle::{OneWayStep, RoundStep},
    history::{Order, OrderStatus},
    types::{Leg, Money, OrderId, ReservationId, TripId, TripSearchCriteria},
};

#[tokio::test]
async fn one_way_booking_reaches_payment() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(5, 1), trip(7, 1), trip(9, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));

    let results = session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    assert_eq!(results.outbound.len(), 3);
    assert!(results.return_trips.is_none());
    assert!(results.failures.is_empty());
    assert_eq!(
        session.read(BookingState::cycle),
        CycleState::OneWay(OneWayStep::SelectingTrip)
    );

    let map = session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    assert_eq!(map.slots().len(), 40);

    let selection = session.toggle_seat(Leg::Outbound, "12".into()).unwrap();
    assert_eq!(selection.to_vec(), seats(&["12"]));

    let ConfirmOutcome::Reserved {
        reservation,
        payment,
    } = session.confirm_reservation(Leg::Outbound).await.unwrap()
    else {
        panic!("one-way confirmation should produce the final reservation");
    };
    let url = payment.unwrap();
    assert!(!url.is_empty());
    assert_eq!(reservation.id(), ReservationId(900));
    assert_eq!(
        session.read(|s| s.final_reservation().and_then(|r| r.payment_url().map(str::to_owned))),
        Some(url)
    );

    let tickets: Vec<_> = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::CreateTicket { trip_id, request } => Some((trip_id, request)),
            _ => None,
        })
        .collect();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].0, TripId(7));
    assert_eq!(tickets[0].1.round, 1);
    assert_eq!(tickets[0].1.boarding.seats, seats(&["12"]));
    assert_eq!(tickets[0].1.boarding.from_location_id, common::A_CENTRAL);
}

#[tokio::test]
async fn booked_seat_toggle_changes_nothing() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&["5"])));
    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    let calls = api.calls().len();

    let selection = session.toggle_seat(Leg::Outbound, "5".into()).unwrap();

    assert!(selection.is_empty());
    assert_eq!(api.calls().len(), calls);
    assert!(session.notices().is_empty());
}

#[tokio::test]
async fn rejected_return_leg_keeps_outbound_and_seats() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_trips(B, A, Ok(vec![trip(15, 8)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
    api.push_seat_map(TripId(15), Ok(coach(&[])));
    api.push_return_ticket(Err(ApiError::Rejected {
        message: "seat taken".into(),
    }));

    let results = session
        .start_search(TripSearchCriteria::round(A, B, date(1), date(8)))
        .await
        .unwrap();
    assert_eq!(results.return_trips.map(|t| t.len()), Some(1));
    assert_eq!(
        session.read(BookingState::cycle),
        CycleState::Round(RoundStep::SelectingOutboundTrip)
    );

    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    session.toggle_seat(Leg::Outbound, "12".into()).unwrap();
    let ConfirmOutcome::OutboundHeld(held) =
        session.confirm_reservation(Leg::Outbound).await.unwrap()
    else {
        panic!("the outbound half of a round trip is held, not paid");
    };
    assert_eq!(held.id, ReservationId(900));

    assert_eq!(
        session.advance_to_return_trip().unwrap(),
        CycleState::Round(RoundStep::SelectingReturnTrip)
    );
    session.select_trip(Leg::Return, TripId(15)).await.unwrap();
    session.toggle_seat(Leg::Return, "3".into()).unwrap();

    let error = session.confirm_reservation(Leg::Return).await.unwrap_err();
    assert_eq!(
        error,
        BookingError::ReservationRejected {
            leg: Leg::Return,
            message: "seat taken".into(),
        }
    );

    let state = session.snapshot();
    assert_eq!(state.reservation.outbound.as_ref().map(|r| r.id), Some(ReservationId(900)));
    assert!(state.reservation.combined.is_none());
    assert_eq!(state.leg(Leg::Return).selection.to_vec(), seats(&["3"]));
    assert_eq!(state.leg(Leg::Outbound).selection.to_vec(), seats(&["12"]));

    let return_request = api.calls().into_iter().find_map(|call| match call {
        ApiCall::CreateReturnTicket {
            reservation_id,
            request,
        } => Some((reservation_id, request)),
        _ => None,
    });
    let (extended, request) = return_request.unwrap();
    assert_eq!(extended, ReservationId(900));
    assert_eq!(request.outbound_reservation_id, ReservationId(900));
    assert_eq!(request.trip_id, TripId(15));
}

#[tokio::test]
async fn payment_link_retry_never_recreates_the_reservation() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
    api.push_payment_link(Err(ApiError::Request("connection reset".into())));
    api.push_payment_link(Ok(PaymentLink {
        url: "https://pay.example/checkout/900".into(),
    }));

    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    session.toggle_seat(Leg::Outbound, "12".into()).unwrap();

    let ConfirmOutcome::Reserved {
        reservation,
        payment,
    } = session.confirm_reservation(Leg::Outbound).await.unwrap()
    else {
        panic!("one-way confirmation should produce the final reservation");
    };
    assert!(matches!(
        payment,
        Err(BookingError::PaymentLink {
            reservation_id: ReservationId(900),
            ..
        })
    ));
    assert_eq!(reservation.payment_url(), None);
    assert!(session.read(|s| s.final_reservation().is_some()));

    let url = session.retry_payment_link().await.unwrap();
    assert_eq!(url, "https://pay.example/checkout/900");
    assert_eq!(api.count_calls(ApiCall::is_ticket_creation), 1);
    assert_eq!(api.count_calls(|c| matches!(c, ApiCall::PaymentLink(_))), 2);
}

#[tokio::test]
async fn refreshed_seat_map_prunes_taken_seats() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
    api.push_seat_map(TripId(7), Ok(coach(&["12"])));

    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    session.toggle_seat(Leg::Outbound, "12".into()).unwrap();
    session.toggle_seat(Leg::Outbound, "14".into()).unwrap();

    let pruned = session.refresh_seat_map(Leg::Outbound).await.unwrap();

    assert_eq!(pruned, seats(&["12"]));
    assert_eq!(
        session.read(|s| s.leg(Leg::Outbound).selection.to_vec()),
        seats(&["14"])
    );
}

#[tokio::test]
async fn missing_credential_asks_for_sign_in_and_where_to_return() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
    api.push_ticket(Err(ApiError::Unauthorized));

    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    session.toggle_seat(Leg::Outbound, "12".into()).unwrap();

    let error = session.confirm_reservation(Leg::Outbound).await.unwrap_err();
    assert_eq!(
        error,
        BookingError::AuthRequired {
            leg: Some(Leg::Outbound),
            return_path: "/booking/seats?leg=outbound".into(),
        }
    );
    assert_eq!(
        session.read(|s| s.leg(Leg::Outbound).selection.to_vec()),
        seats(&["12"])
    );
}

#[tokio::test]
async fn confirming_without_seats_is_refused_before_any_request() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();

    let error = session.confirm_reservation(Leg::Outbound).await.unwrap_err();

    assert!(matches!(error, BookingError::Validation { .. }));
    assert_eq!(api.count_calls(ApiCall::is_ticket_creation), 0);
}

#[tokio::test]
async fn failed_search_reports_and_recovers_through_retry() {
    let (api, session) = fixture();
    api.push_trips(
        A,
        B,
        Err(ApiError::Status {
            status: 503,
            message: "unavailable".into(),
        }),
    );
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));

    let error = session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BookingError::SearchFailed {
            leg: Leg::Outbound,
            ..
        }
    ));
    let notice = session.notices().pop().unwrap();
    assert!(notice.retry.is_some());

    let trips = session.retry_search(Leg::Outbound).await.unwrap();
    assert_eq!(trips.len(), 1);
    assert_eq!(
        session.read(BookingState::cycle),
        CycleState::OneWay(OneWayStep::SelectingTrip)
    );
}

#[tokio::test]
async fn superseded_search_never_overwrites_the_new_one() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.delay_search(A, B, Duration::from_millis(100));
    api.push_trips(A, C, Ok(vec![trip(31, 1), trip(32, 1)]));

    let started = Instant::now();
    let ((stale, stale_elapsed), fresh) = tokio::join!(
        async {
            let result = session
                .start_search(TripSearchCriteria::one_way(A, B, date(1)))
                .await;
            (result, started.elapsed())
        },
        session.start_search(TripSearchCriteria::one_way(A, C, date(1))),
    );

    let fresh = fresh.unwrap();
    assert_eq!(fresh.outbound.len(), 2);
    assert_eq!(
        stale,
        Err(BookingError::Superseded {
            operation: "start_search"
        })
    );
    // ended by the newer search, not by the session's wait timeout
    assert!(stale_elapsed < WAIT / 4, "stale search took {stale_elapsed:?}");

    // let the delayed A -> B answer arrive; it must be dropped
    tokio::time::sleep(Duration::from_millis(200)).await;
    let outbound: Vec<_> = session.read(|s| s.leg(Leg::Outbound).trips.iter().map(|t| t.id).collect());
    assert_eq!(outbound, vec![TripId(31), TripId(32)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_only_report_their_own_results() {
    let (api, session) = fixture();
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_trips(A, C, Ok(vec![trip(31, 1), trip(32, 1)]));
    let session = Arc::new(session);

    for _ in 0..25 {
        let searches = [(B, TripId(7)), (C, TripId(31))].map(|(to, first)| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let result = session
                    .start_search(TripSearchCriteria::one_way(A, to, date(1)))
                    .await;
                (first, result)
            })
        });
        for search in searches {
            let (first, result) = search.await.unwrap();
            match result {
                Ok(results) => assert_eq!(results.outbound[0].id, first),
                Err(error) => assert_eq!(
                    error,
                    BookingError::Superseded {
                        operation: "start_search"
                    }
                ),
            }
        }
    }
}

#[tokio::test]
async fn order_history_is_grouped_at_the_session_clock() {
    let (api, session) = fixture();
    let order = |id: u64, status: OrderStatus, day: u32| Order {
        id: OrderId(id),
        reservation_id: ReservationId(id),
        status,
        company: "Costa Lines".into(),
        route: "A → B".into(),
        departs_at: common::at(day, 8).and_utc(),
        canceled_at: None,
        total: Money::from_cents(2500),
        payment_url: None,
    };
    // the test clock reads 2025-06-01 08:00 UTC
    api.set_orders(vec![
        order(1, OrderStatus::Paid, 10),
        order(2, OrderStatus::Unpaid, 12),
        order(3, OrderStatus::Paid, 1),
        order(4, OrderStatus::Canceled, 20),
    ]);

    let history = session.order_history().await.unwrap();

    assert_eq!(history.current[0].id, OrderId(1));
    assert_eq!(history.pending[0].id, OrderId(2));
    assert_eq!(history.past[0].id, OrderId(3));
    assert_eq!(history.canceled[0].id, OrderId(4));
    assert_eq!(history.len(), 4);
}
