//! Persisted selections: restore on initialize, the file backend, and
//! changes made by another context.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{A, B, address, at, coach, date, session, trip};
use std::sync::Arc;
use std::time::Duration;
use tripdesk_booking::{
    BookingSession, BookingState, ConfirmOutcome, FileBackend, MemoryBackend, MockTripApi, SelectionStore,
    types::{AddressId, Leg, TransportMode, TripId, TripKind, TripSearchCriteria},
};

async fn eventually(session: &BookingSession, check: impl Fn(&BookingState) -> bool) {
    for _ in 0..100 {
        if session.read(&check) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", session.snapshot().selection);
}

/// Private one-way trip A -> B on June 1st with trip 7 and a 40-seat coach
fn script_private(api: &MockTripApi) {
    api.set_addresses(vec![address(5, "Home"), address(6, "Office")]);
    api.push_trips(A, B, Ok(vec![trip(7, 1)]));
    api.push_seat_map(TripId(7), Ok(coach(&[])));
}

async fn book_private(session: &BookingSession) {
    session
        .start_search(TripSearchCriteria::one_way(A, B, date(1)).with_mode(TransportMode::Private))
        .await
        .unwrap();
    session.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    session.toggle_seat(Leg::Outbound, "12".into()).unwrap();
    session.select_address(Leg::Outbound, Some(AddressId(5))).unwrap();
    session.select_pickup_time(Leg::Outbound, Some(at(1, 7))).unwrap();

    let outcome = session.confirm_reservation(Leg::Outbound).await.unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Reserved { payment: Ok(_), .. }));
}

#[tokio::test]
async fn selections_survive_reinitialization() {
    let api = Arc::new(MockTripApi::new());
    script_private(&api);
    let backend = Arc::new(MemoryBackend::new());

    let first = session(&api, SelectionStore::new(backend.clone()));
    first.initialize().await.unwrap();
    book_private(&first).await;
    let written = first.snapshot().selection;
    first.shutdown(Duration::from_secs(1)).await.unwrap();
    drop(first);

    assert_eq!(written.boarding_address_id, Some(AddressId(5)));
    assert_eq!(written.boarding_datetime, Some(at(1, 7)));
    assert_eq!(written.search_type, Some(TripKind::OneWay));
    let latest = written.latest_reservation.clone().unwrap();
    assert!(latest.payment_url().is_some());

    let second = session(&api, SelectionStore::new(backend.clone()));
    second.initialize().await.unwrap();
    assert_eq!(second.snapshot().selection, written);
}

#[tokio::test]
async fn deleted_address_reads_back_as_unset() {
    let api = Arc::new(MockTripApi::new());
    api.set_addresses(vec![address(5, "Home")]);
    let backend = Arc::new(MemoryBackend::new());

    let first = session(&api, SelectionStore::new(backend.clone()));
    first.initialize().await.unwrap();
    first.select_address(Leg::Outbound, Some(AddressId(5))).unwrap();
    drop(first);

    api.set_addresses(vec![address(6, "Office")]);
    let second = session(&api, SelectionStore::new(backend.clone()));
    second.initialize().await.unwrap();

    assert_eq!(second.snapshot().selection.boarding_address_id, None);
    // the durable value is left for whoever still knows the address
    let durable = SelectionStore::new(backend).load();
    assert_eq!(durable.boarding_address_id, Some(AddressId(5)));
}

#[tokio::test]
async fn file_backend_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("selection.json");
    let api = Arc::new(MockTripApi::new());
    script_private(&api);

    let first = session(&api, SelectionStore::new(Arc::new(FileBackend::new(&path))));
    first.initialize().await.unwrap();
    book_private(&first).await;
    let written = first.snapshot().selection;
    drop(first);

    let document = std::fs::read_to_string(&path).unwrap();
    assert!(document.contains("tripdesk.boarding_address_id"));
    assert!(document.contains("tripdesk.latest_reservation"));

    let reopened = SelectionStore::new(Arc::new(FileBackend::new(&path)));
    assert_eq!(reopened.load(), written);
}

#[tokio::test]
async fn corrupt_file_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selection.json");
    std::fs::write(&path, "{ not json").unwrap();
    let api = Arc::new(MockTripApi::new());

    let session = session(&api, SelectionStore::new(Arc::new(FileBackend::new(&path))));
    session.initialize().await.unwrap();
    session.set_search_kind(TripKind::Round).unwrap();

    assert_eq!(session.read(|s| s.preferred_kind()), TripKind::Round);
    assert_eq!(session.snapshot().selection.boarding_address_id, None);
}

#[tokio::test]
async fn file_backends_on_one_path_see_each_others_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selection.json");
    let api = Arc::new(MockTripApi::new());
    api.set_addresses(vec![address(5, "Home")]);
    let backend = || Arc::new(FileBackend::new(&path).with_poll_interval(Duration::from_millis(20)));

    let first = session(&api, SelectionStore::new(backend()));
    first.initialize().await.unwrap();
    let second = session(&api, SelectionStore::new(backend()));
    second.initialize().await.unwrap();
    assert_eq!(second.read(|s| s.preferred_kind()), TripKind::OneWay);

    first.set_search_kind(TripKind::Round).unwrap();
    eventually(&second, |s| s.preferred_kind() == TripKind::Round).await;

    second.select_address(Leg::Outbound, Some(AddressId(5))).unwrap();
    eventually(&first, |s| s.selection.boarding_address_id == Some(AddressId(5))).await;

    let reopened = SelectionStore::new(backend()).load();
    assert_eq!(reopened.search_type, Some(TripKind::Round));
    assert_eq!(reopened.boarding_address_id, Some(AddressId(5)));
}

#[tokio::test]
async fn pickup_change_in_another_context_drops_the_private_reservation() {
    let api = Arc::new(MockTripApi::new());
    script_private(&api);
    let selections = SelectionStore::in_memory();

    let booking = session(&api, selections.clone());
    booking.initialize().await.unwrap();
    book_private(&booking).await;
    assert!(booking.read(|s| s.final_reservation().is_some()));

    let other_tab = session(&api, selections.sibling());
    other_tab.initialize().await.unwrap();
    other_tab
        .select_address(Leg::Outbound, Some(AddressId(6)))
        .unwrap();

    eventually(&booking, |s| {
        s.selection.boarding_address_id == Some(AddressId(6)) && s.final_reservation().is_none()
    })
    .await;
    assert_eq!(booking.read(|s| s.leg(Leg::Outbound).selection.len()), 1);
}

#[tokio::test]
async fn bus_booking_ignores_pickup_changes_elsewhere() {
    let api = Arc::new(MockTripApi::new());
    script_private(&api);
    let selections = SelectionStore::in_memory();

    let booking = session(&api, selections.clone());
    booking.initialize().await.unwrap();
    booking
        .start_search(TripSearchCriteria::one_way(A, B, date(1)))
        .await
        .unwrap();
    booking.select_trip(Leg::Outbound, TripId(7)).await.unwrap();
    booking.toggle_seat(Leg::Outbound, "12".into()).unwrap();
    booking.confirm_reservation(Leg::Outbound).await.unwrap();

    let other_tab = session(&api, selections.sibling());
    other_tab
        .select_pickup_time(Leg::Outbound, Some(at(1, 9)))
        .unwrap();

    eventually(&booking, |s| s.selection.boarding_datetime == Some(at(1, 9))).await;
    assert!(booking.read(|s| s.final_reservation().is_some()));
}
