//! Fixtures shared by the integration suites.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tripdesk_booking::{
    BookingEnvironment, BookingSession, MockTripApi, SelectionStore,
    seat_map::{Seat, SeatClass, SeatLayout, SeatMap},
    types::{Address, AddressId, LocationId, SeatNo, Trip, TripId, TripStop},
};
use tripdesk_testing::test_clock;

pub const A: LocationId = LocationId(1);
pub const B: LocationId = LocationId(2);
pub const C: LocationId = LocationId(3);
pub const A_CENTRAL: LocationId = LocationId(10);

pub const WAIT: Duration = Duration::from_secs(2);

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    date(day).and_hms_opt(hour, 0, 0).unwrap()
}

/// Trip leaving on `day`, boarding at A Central when it starts in A
pub fn trip(id: u64, day: u32) -> Trip {
    Trip {
        id: TripId(id),
        company: "Costa Lines".into(),
        origin_cities: Vec::new(),
        destination_cities: Vec::new(),
        origin_stations: vec![TripStop {
            id: A_CENTRAL,
            name: "A Central".into(),
            city_id: Some(A),
        }],
        destination_stations: Vec::new(),
        prices: Vec::new(),
        available_seats: 40,
        departs_at: at(day, 8),
    }
}

/// 10x4 coach numbered "1" to "40"; `booked` seats taken
pub fn coach(booked: &[&str]) -> SeatMap {
    let seats = (1..=40)
        .map(|n| {
            let seat_no = n.to_string();
            let class = if booked.contains(&seat_no.as_str()) {
                SeatClass::Booked
            } else {
                SeatClass::Available
            };
            Seat::numbered(seat_no, class)
        })
        .collect();
    SeatMap::new(SeatLayout { rows: 10, columns: 4 }, seats).unwrap()
}

pub fn seats(numbers: &[&str]) -> Vec<SeatNo> {
    numbers.iter().map(|n| SeatNo::from(*n)).collect()
}

pub fn address(id: u64, label: &str) -> Address {
    Address {
        id: AddressId(id),
        label: label.into(),
        street: format!("{id} Harbour Road"),
        city: "A".into(),
    }
}

/// Session over `api` and `selections`, clock fixed at 2025-06-01 08:00 UTC
pub fn session(api: &Arc<MockTripApi>, selections: SelectionStore) -> BookingSession {
    let env = BookingEnvironment::new(api.clone(), selections, Arc::new(test_clock()));
    BookingSession::new(env, WAIT)
}

/// Fresh mock API and a session over in-memory selections
pub fn fixture() -> (Arc<MockTripApi>, BookingSession) {
    let api = Arc::new(MockTripApi::new());
    let session = session(&api, SelectionStore::in_memory());
    (api, session)
}
