//! Booking Cycle Controller.
//!
//! The cycle is a reducer over [`BookingState`]: user intents and network
//! results are both [`BookingAction`]s, and every network call is an effect
//! whose result comes back as an action tagged with the
//! [`SearchGeneration`] it was issued for.
//!
//! Drive it through a [`BookingStore`], usually wrapped in a
//! [`BookingSession`](crate::session::BookingSession).

pub mod actions;
pub mod environment;
pub mod reducer;
pub mod state;
pub mod step;


pub use actions::BookingAction;
pub use environment::BookingEnvironment;
pub use reducer::BookingReducer;
pub use state::{
    BookingState, LegPair, LegState, Notice, Pending, ReservationSlice, RetryAction,
    SearchGeneration,
};
pub use step::{CycleEvent, CycleState, OneWayStep, RoundStep, TransitionError};

use tripdesk_runtime::Store;

/// Store running the booking cycle
pub type BookingStore = Store<BookingState, BookingAction, BookingEnvironment, BookingReducer>;
