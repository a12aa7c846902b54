//! `HttpTripApi` against a local mock server.

#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use tripdesk_booking::{
    ApiError, HttpTripApi, TripApi,
    api::{LegPayload, SeatMapQuery, TicketRequest},
    config::ApiConfig,
    types::{LocationId, NewAddress, ReservationId, SeatNo, TransportMode, TripId, TripQuery},
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

fn signed_in(server: &MockServer) -> HttpTripApi {
    let api = HttpTripApi::new(server.uri());
    api.set_token(Some("secret".into()));
    api
}

fn boarding() -> LegPayload {
    LegPayload {
        from_city_id: LocationId(1),
        to_city_id: LocationId(2),
        from_location_id: LocationId(10),
        to_location_id: LocationId(2),
        date: june(1),
        seats: vec![SeatNo::from("12")],
        address_id: None,
        pickup_at: None,
    }
}

#[tokio::test]
async fn search_sends_the_leg_as_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trips"))
        .and(query_param("from", "1"))
        .and(query_param("to", "2"))
        .and(query_param("date", "2025-06-01"))
        .and(query_param("mode", "bus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 7,
            "company": "Costa Lines",
            "origin_stations": [{ "id": 10, "name": "A Central", "city_id": 1 }],
            "available_seats": 40,
            "departs_at": "2025-06-01T08:00:00"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let trips = HttpTripApi::new(server.uri())
        .search_trips(TripQuery {
            from: LocationId(1),
            to: LocationId(2),
            date: june(1),
            mode: TransportMode::Bus,
        })
        .await
        .unwrap();

    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].id, TripId(7));
    assert_eq!(trips[0].boarding_location(LocationId(1)), LocationId(10));
}

#[tokio::test]
async fn seat_map_is_validated_on_decode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trips/7/seats"))
        .and(query_param("from_location_id", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "layout": { "rows": 1, "columns": 3 },
            "seats": [
                { "class": "driver" },
                { "seat_no": "1", "class": "available" }
            ]
        })))
        .mount(&server)
        .await;

    let result = HttpTripApi::new(server.uri())
        .seat_map(SeatMapQuery {
            trip_id: TripId(7),
            from_city_id: LocationId(1),
            to_city_id: LocationId(2),
            from_location_id: LocationId(10),
            to_location_id: LocationId(2),
            date: june(1),
        })
        .await;

    assert!(matches!(result, Err(ApiError::Decode(_))));
}

#[tokio::test]
async fn ticket_creation_carries_the_bearer_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/trips/7/tickets"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "round": 1,
            "boarding": { "from_location_id": 10, "seats": ["12"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 900,
            "trip_id": 7,
            "tickets": [{ "seat_no": "12", "price": 2500 }],
            "subtotal": 2500,
            "total": 2500
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = signed_in(&server)
        .create_ticket(TripId(7), TicketRequest::one_way(boarding()))
        .await
        .unwrap();

    assert_eq!(record.id, ReservationId(900));
    assert_eq!(record.payment_url, None);
}

#[tokio::test]
async fn bad_request_message_becomes_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/trips/7/tickets"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "seat taken" })))
        .mount(&server)
        .await;

    let error = signed_in(&server)
        .create_ticket(TripId(7), TicketRequest::one_way(boarding()))
        .await
        .unwrap_err();

    assert_eq!(
        error,
        ApiError::Rejected {
            message: "seat taken".into()
        }
    );
}

#[tokio::test]
async fn status_codes_map_to_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reservations/900/payment-link"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let api = signed_in(&server);

    assert_eq!(
        api.payment_link(ReservationId(900)).await.unwrap_err(),
        ApiError::Unauthorized
    );
    assert_eq!(
        api.list_orders().await.unwrap_err(),
        ApiError::Status {
            status: 502,
            message: "bad gateway".into()
        }
    );
}

#[tokio::test]
async fn authenticated_calls_without_a_token_never_leave_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/addresses"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let error = HttpTripApi::new(server.uri())
        .create_address(NewAddress {
            label: "Home".into(),
            street: "5 Harbour Road".into(),
            city: "A".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(error, ApiError::Unauthorized);
}

#[tokio::test]
async fn configured_timeout_surfaces_as_request_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/locations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let api = HttpTripApi::from_config(&ApiConfig {
        base_url: format!("{}/", server.uri()),
        token: None,
        request_timeout: Some(Duration::from_millis(50)),
    })
    .unwrap();

    assert!(matches!(api.locations().await, Err(ApiError::Request(_))));
}
