//! Location/Trip Directory Client.

use crate::api::{ApiResult, TripApi};
use crate::types::{Location, Trip, TripQuery};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Cache {
    locations: Option<Vec<Location>>,
    searches: HashMap<TripQuery, Vec<Trip>>,
}

/// Fetches boarding locations and trip lists, remembering the last
/// successful response for each.
#[derive(Clone)]
pub struct TripDirectory {
    api: Arc<dyn TripApi>,
    cache: Arc<Mutex<Cache>>,
}

impl TripDirectory {
    /// Directory over `api`
    #[must_use]
    pub fn new(api: Arc<dyn TripApi>) -> Self {
        Self {
            api,
            cache: Arc::new(Mutex::new(Cache::default())),
        }
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut Cache) -> T) -> T {
        f(&mut self.cache.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Boarding locations
    ///
    /// # Errors
    ///
    /// Propagates the API failure; the cache keeps the previous list.
    pub async fn locations(&self) -> ApiResult<Vec<Location>> {
        let locations = self.api.locations().await?;
        self.with_cache(|c| c.locations = Some(locations.clone()));
        Ok(locations)
    }

    /// Trips for one leg
    ///
    /// # Errors
    ///
    /// Propagates the API failure; the cache keeps the previous result.
    #[tracing::instrument(level = "debug", skip(self), fields(from = %query.from, to = %query.to, date = %query.date))]
    pub async fn search(&self, query: TripQuery) -> ApiResult<Vec<Trip>> {
        let trips = self.api.search_trips(query).await?;
        tracing::debug!(count = trips.len(), "Trips found");
        self.with_cache(|c| c.searches.insert(query, trips.clone()));
        Ok(trips)
    }

    /// Last successful location list
    #[must_use]
    pub fn cached_locations(&self) -> Option<Vec<Location>> {
        self.with_cache(|c| c.locations.clone())
    }

    /// Last successful result for `query`
    #[must_use]
    pub fn cached_search(&self, query: &TripQuery) -> Option<Vec<Trip>> {
        self.with_cache(|c| c.searches.get(query).cloned())
    }

    /// Forget cached trip lists
    pub fn clear_searches(&self) {
        self.with_cache(|c| c.searches.clear());
    }
}
