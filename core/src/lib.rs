//! # tripdesk core
//!
//! The functional core every tripdesk feature is written against.
//!
//! A feature is described by four things:
//!
//! - **State**: owned, cloneable data for the feature
//! - **Action**: every input the feature reacts to, user intents and network
//!   results alike
//! - **Reducer**: `(State, Action, Environment) → Effects`, the only place state
//!   changes
//! - **Effect**: a description of work for the runtime to perform; async work
//!   feeds its result back as another action
//!
//! Dependencies (HTTP API, durable storage, clock) reach reducers through the
//! `Environment` associated type, so tests swap them for fakes.
//!
//! ## Example
//!
//! ```ignore
//! use tripdesk_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for SeatCounter {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<CounterAction>; 4]> {
//!         match action {
//!             CounterAction::SeatPicked => state.picked += 1,
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Declarative helpers for building effects
pub mod effect_macros;

/// Reducer trait
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Business logic for one feature.
    ///
    /// `reduce` validates the action, mutates state in place and returns the
    /// effects the runtime must execute. It never performs I/O itself beyond
    /// what the environment exposes synchronously.
    pub trait Reducer {
        /// State this reducer owns
        type State;

        /// Inputs this reducer handles
        type Action;

        /// Injected dependencies
        type Environment;

        /// Apply `action` to `state` and describe the follow-up work.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect descriptions returned by reducers
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// A side effect for the runtime to execute.
    ///
    /// Effects are values. The runtime spawns them and dispatches whatever
    /// action they produce back into the same store.
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Run all effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another; each completes before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Dispatch `action` after `duration`
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action dispatched once the delay elapses
            action: Box<Action>,
        },

        /// Async computation; `Some(action)` is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Run `effects` concurrently
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Run `effects` in order
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// `true` for `Effect::None`
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment traits shared by every feature
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of "now".
    ///
    /// Production code uses [`SystemClock`]; tests pin time with a fixed clock
    /// so date-dependent rules (order history buckets, default departure
    /// dates) are deterministic.
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
