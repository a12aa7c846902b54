//! Dependencies of the booking reducer.

use crate::api::TripApi;
use crate::directory::TripDirectory;
use crate::persistence::SelectionStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tripdesk_core::environment::{Clock, SystemClock};

/// Production environment for the booking cycle.
///
/// Tests build it over a `MockTripApi`, an in-memory `SelectionStore` and a
/// `FixedClock`.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Remote trip API
    pub api: Arc<dyn TripApi>,
    /// Location and trip lookups, cached
    pub directory: TripDirectory,
    /// Durable selections
    pub selections: SelectionStore,
    /// Time source for notices
    pub clock: Arc<dyn Clock>,
}

impl BookingEnvironment {
    /// Environment over `api` and `selections`
    #[must_use]
    pub fn new(api: Arc<dyn TripApi>, selections: SelectionStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory: TripDirectory::new(Arc::clone(&api)),
            api,
            selections,
            clock,
        }
    }

    /// Environment on the wall clock
    #[must_use]
    pub fn with_system_clock(api: Arc<dyn TripApi>, selections: SelectionStore) -> Self {
        Self::new(api, selections, Arc::new(SystemClock))
    }

    /// Current time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
