//! HTTP implementation of [`TripApi`].

use super::{
    ApiError, ApiFuture, ApiResult, PaymentLink, ReturnTicketRequest, SeatMapQuery,
    TicketRequest, TripApi,
};
use crate::config::ApiConfig;
use crate::history::Order;
use crate::seat_map::SeatMap;
use crate::types::{
    Address, Location, NewAddress, ReservationId, ReservationRecord, RoundReservationRecord,
    Trip, TripId, TripQuery,
};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{PoisonError, RwLock};

/// Whether an endpoint needs the bearer credential
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Auth {
    Public,
    Required,
}

/// JSON-over-HTTP trip API client
pub struct HttpTripApi {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpTripApi {
    /// Client for `base_url` with reqwest defaults and no credential
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    /// Client configured from [`ApiConfig`]
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(config.token.clone()),
        })
    }

    /// Replace the bearer credential; `None` signs out
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// `true` once a credential is set
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.bearer().is_some()
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(%method, %path))]
    async fn call<T, B>(
        &self,
        method: Method,
        path: String,
        query: &[(&str, String)],
        body: Option<&B>,
        auth: Auth,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url));

        match (self.bearer(), auth) {
            (Some(token), _) => request = request.bearer_auth(token),
            (None, Auth::Required) => {
                tracing::debug!("No credential for authenticated endpoint");
                return Err(ApiError::Unauthorized);
            },
            (None, Auth::Public) => {},
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "API call failed");
        Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::BAD_REQUEST => ApiError::Rejected {
                message: rejection_message(&body),
            },
            status => ApiError::Status {
                status: status.as_u16(),
                message: body,
            },
        })
    }
}

/// `{"message": "..."}` when the server sends one, the raw body otherwise
fn rejection_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body).map_or_else(|_| body.trim().to_string(), |b| b.message)
}

const NO_BODY: Option<&()> = None;

impl TripApi for HttpTripApi {
    fn locations(&self) -> ApiFuture<'_, Vec<Location>> {
        Box::pin(self.call(Method::GET, "/locations".into(), &[], NO_BODY, Auth::Public))
    }

    fn search_trips(&self, query: TripQuery) -> ApiFuture<'_, Vec<Trip>> {
        Box::pin(async move {
            let params = [
                ("from", query.from.to_string()),
                ("to", query.to.to_string()),
                ("date", query.date.to_string()),
                ("mode", query.mode.as_str().to_string()),
            ];
            self.call(Method::GET, "/trips".into(), &params, NO_BODY, Auth::Public)
                .await
        })
    }

    fn seat_map(&self, query: SeatMapQuery) -> ApiFuture<'_, SeatMap> {
        Box::pin(async move {
            let params = [
                ("from_city_id", query.from_city_id.to_string()),
                ("to_city_id", query.to_city_id.to_string()),
                ("from_location_id", query.from_location_id.to_string()),
                ("to_location_id", query.to_location_id.to_string()),
                ("date", query.date.to_string()),
            ];
            self.call(
                Method::GET,
                format!("/trips/{}/seats", query.trip_id),
                &params,
                NO_BODY,
                Auth::Public,
            )
            .await
        })
    }

    fn create_ticket(
        &self,
        trip_id: TripId,
        request: TicketRequest,
    ) -> ApiFuture<'_, ReservationRecord> {
        Box::pin(async move {
            self.call(
                Method::POST,
                format!("/trips/{trip_id}/tickets"),
                &[],
                Some(&request),
                Auth::Required,
            )
            .await
        })
    }

    fn create_return_ticket(
        &self,
        reservation_id: ReservationId,
        request: ReturnTicketRequest,
    ) -> ApiFuture<'_, RoundReservationRecord> {
        Box::pin(async move {
            self.call(
                Method::POST,
                format!("/reservations/{reservation_id}/return"),
                &[],
                Some(&request),
                Auth::Required,
            )
            .await
        })
    }

    fn payment_link(&self, reservation_id: ReservationId) -> ApiFuture<'_, PaymentLink> {
        Box::pin(self.call(
            Method::POST,
            format!("/reservations/{reservation_id}/payment-link"),
            &[],
            NO_BODY,
            Auth::Required,
        ))
    }

    fn list_addresses(&self) -> ApiFuture<'_, Vec<Address>> {
        Box::pin(self.call(Method::GET, "/addresses".into(), &[], NO_BODY, Auth::Required))
    }

    fn create_address(&self, address: NewAddress) -> ApiFuture<'_, Address> {
        Box::pin(async move {
            self.call(
                Method::POST,
                "/addresses".into(),
                &[],
                Some(&address),
                Auth::Required,
            )
            .await
        })
    }

    fn list_orders(&self) -> ApiFuture<'_, Vec<Order>> {
        Box::pin(self.call(Method::GET, "/orders".into(), &[], NO_BODY, Auth::Required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let api = HttpTripApi::new("http://localhost:8000/api/");
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert!(!api.has_token());

        api.set_token(Some("secret".into()));
        assert!(api.has_token());
    }

    #[test]
    fn rejection_message_prefers_json_field() {
        assert_eq!(rejection_message(r#"{"message":"seat taken"}"#), "seat taken");
        assert_eq!(rejection_message("plain failure\n"), "plain failure");
    }
}
