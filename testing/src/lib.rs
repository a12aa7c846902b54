//! # tripdesk testing
//!
//! Helpers shared by every tripdesk test suite:
//!
//! - [`ReducerTest`]: Given/When/Then harness for a single reducer step
//! - [`assertions`]: effect assertions
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`init_test_tracing`]: opt-in log output while debugging a test
//!
//! ```ignore
//! use tripdesk_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(BookingReducer::new())
//!     .with_env(test_environment())
//!     .given_state(BookingState::default())
//!     .when_action(BookingAction::StartSearch { criteria })
//!     .then_state(|s| assert!(s.pending.searching()))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use tripdesk_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Deterministic environment implementations
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Clock frozen at one instant, movable by tests.
    #[derive(Debug)]
    pub struct FixedClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Freeze time at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// A clock fixed at 2025-06-01 08:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-06-01T08:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use mocks::{FixedClock, test_clock};

/// Route `tracing` output to the test writer, honouring `RUST_LOG`.
///
/// Safe to call from many tests; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fixed_clock_stays_put_until_moved() {
        let clock = test_clock();
        let first = clock.now();
        assert_eq!(first, clock.now());

        clock.set(first + Duration::days(1));
        assert_eq!(clock.now() - first, Duration::days(1));
    }
}
