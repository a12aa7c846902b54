//! Booking Cycle Demo
//!
//! Walks a one-way bus booking through a [`BookingSession`] backed by the
//! scripted [`MockTripApi`]:
//! - search with a failing first attempt and a retry
//! - trip and seat selection, including a seat someone else holds
//! - reservation creation and payment handoff
//!
//! Persisted selections go to `TRIPDESK_STORAGE_PATH`, so a second run
//! restores the search-type preference written by the first.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info,tripdesk_booking=debug cargo run --bin demo
//! ```

use anyhow::Context;
use chrono::{Days, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tripdesk_booking::{
    BookingEnvironment, BookingSession, Config, ConfirmOutcome, FileBackend, MockTripApi,
    SelectionStore,
    api::ApiError,
    seat_map::{Seat, SeatClass, SeatLayout, SeatMap},
    types::{Leg, Location, LocationId, SeatNo, Trip, TripId, TripKind, TripSearchCriteria, TripStop},
};

const LISBON: LocationId = LocationId(1);
const PORTO: LocationId = LocationId(2);
const SETE_RIOS: LocationId = LocationId(11);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("reading configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.session.log_filter).unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n============================================");
    println!("   tripdesk - Booking Cycle Demo");
    println!("============================================\n");

    let api = Arc::new(MockTripApi::new());
    let departure = chrono::Local::now().date_naive() + Days::new(7);
    script(&api, departure)?;

    let selections = SelectionStore::new(Arc::new(
        FileBackend::new(&config.storage.path).with_poll_interval(config.storage.poll_interval),
    ));
    let env = BookingEnvironment::with_system_clock(api.clone(), selections);
    let session = BookingSession::new(env, config.session.wait_timeout);

    // Step 1: restore selections and load the directory
    session.initialize().await?;
    let previous = session.read(|s| s.preferred_kind());
    println!("1. Restored preference: {previous}");
    let locations = session.load_locations().await?;
    println!("   {} locations available\n", locations.len());
    session.set_search_kind(TripKind::OneWay)?;

    // Step 2: the first search fails, the notice's retry recovers it
    println!("2. Searching Lisbon -> Porto on {departure}...");
    let results = session
        .start_search(TripSearchCriteria::one_way(LISBON, PORTO, departure))
        .await;
    match results {
        Ok(results) if results.failures.is_empty() => {
            println!("   {} trips found\n", results.outbound.len());
        },
        Ok(_) | Err(_) => {
            for notice in session.notices() {
                println!("   ! {} (retry: {})", notice.error, notice.retry.is_some());
            }
            let trips = session.retry_search(Leg::Outbound).await?;
            println!("   Retried: {} trips found\n", trips.len());
        },
    }

    // Step 3: pick the trip and two seats
    println!("3. Choosing trip 501...");
    let map = session.select_trip(Leg::Outbound, TripId(501)).await?;
    session.toggle_seat(Leg::Outbound, SeatNo::from("2"))?;
    // "3" is booked; the toggle leaves the selection unchanged
    session.toggle_seat(Leg::Outbound, SeatNo::from("3"))?;
    let selection = session.toggle_seat(Leg::Outbound, SeatNo::from("4"))?;
    println!("{}", map.render(&selection));
    println!("   Selected: {:?}\n", selection.to_vec());

    // Step 4: reserve and hand off to payment
    println!("4. Confirming...");
    match session.confirm_reservation(Leg::Outbound).await? {
        ConfirmOutcome::Reserved {
            reservation,
            payment,
        } => {
            println!("   Reservation {} for {}", reservation.id(), reservation.total());
            match payment {
                Ok(url) => println!("   Pay at {url}\n"),
                Err(error) => println!("   Payment link unavailable: {error}\n"),
            }
        },
        ConfirmOutcome::OutboundHeld(record) => {
            println!("   Outbound held as {}\n", record.id);
        },
    }

    println!("   {} API calls made", api.calls().len());
    session.shutdown(Duration::from_secs(5)).await?;
    println!("\nDone.");
    Ok(())
}

fn script(api: &MockTripApi, departure: NaiveDate) -> anyhow::Result<()> {
    api.set_locations(vec![
        Location {
            id: LISBON,
            name: "Lisbon".into(),
            city_id: None,
        },
        Location {
            id: PORTO,
            name: "Porto".into(),
            city_id: None,
        },
        Location {
            id: SETE_RIOS,
            name: "Sete Rios".into(),
            city_id: Some(LISBON),
        },
    ]);

    let departs_at = departure
        .and_hms_opt(9, 30, 0)
        .context("building departure time")?;
    let trip = Trip {
        id: TripId(501),
        company: "Atlantic Coaches".into(),
        origin_cities: Vec::new(),
        destination_cities: Vec::new(),
        origin_stations: vec![TripStop {
            id: SETE_RIOS,
            name: "Sete Rios".into(),
            city_id: Some(LISBON),
        }],
        destination_stations: Vec::new(),
        prices: Vec::new(),
        available_seats: 3,
        departs_at,
    };
    api.push_trips(
        LISBON,
        PORTO,
        Err(ApiError::Status {
            status: 503,
            message: "search backend restarting".into(),
        }),
    );
    api.push_trips(LISBON, PORTO, Ok(vec![trip]));

    let seats = [
        ("1", SeatClass::Available),
        ("2", SeatClass::Available),
        ("3", SeatClass::Booked),
        ("4", SeatClass::Available),
    ]
    .into_iter()
    .map(|(n, class)| Seat::numbered(n, class))
    .collect();
    let map = SeatMap::new(SeatLayout { rows: 1, columns: 4 }, seats)?;
    api.push_seat_map(TripId(501), Ok(map));
    Ok(())
}
