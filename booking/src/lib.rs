//! # tripdesk booking
//!
//! Booking cycle for bus, private-vehicle and train trips: search, trip and
//! seat selection, reservation creation and the handoff to payment.
//!
//! ## Layers
//!
//! - [`types`], [`seat_map`], [`history`]: domain data and pure rules
//! - [`api`]: the [`TripApi`](api::TripApi) contract, an HTTP client and a
//!   scripted mock
//! - [`directory`], [`persistence`]: the location/trip directory and the
//!   durable, cross-context selection store
//! - [`cycle`]: the reducer that owns the booking state machine, with
//!   [`reservation`] describing the ticket and payment calls it makes
//! - [`session`]: an async facade that dispatches actions and waits for
//!   their outcome
//!
//! ## Example
//!
//! ```ignore
//! use tripdesk_booking::{BookingEnvironment, BookingSession, SelectionStore};
//!
//! let env = BookingEnvironment::with_system_clock(api, SelectionStore::in_memory());
//! let session = BookingSession::new(env, config.session.wait_timeout);
//! session.initialize().await?;
//! let results = session.start_search(criteria).await?;
//! ```

pub mod api;
pub mod config;
pub mod cycle;
pub mod directory;
pub mod error;
pub mod history;
pub mod persistence;
pub mod reservation;
pub mod seat_map;
pub mod session;
pub mod types;

pub use api::{ApiError, HttpTripApi, MockTripApi, TripApi};
pub use config::Config;
pub use cycle::{
    BookingAction, BookingEnvironment, BookingReducer, BookingState, BookingStore, CycleState,
    Notice,
};
pub use error::BookingError;
pub use persistence::{FileBackend, MemoryBackend, SelectionStore};
pub use session::{BookingSession, ConfirmOutcome, SearchResults};
