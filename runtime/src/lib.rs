//! # tripdesk runtime
//!
//! The `Store` owns a feature's state, runs its reducer for every dispatched
//! action and executes the returned effects on the tokio runtime. Actions
//! produced by effects are fed back into the same store and broadcast to
//! observers, which is how callers await the outcome of a network round trip.
//!
//! ```ignore
//! use tripdesk_runtime::Store;
//!
//! let store = Store::new(BookingState::default(), BookingReducer::new(), env);
//!
//! let mut handle = store.send(BookingAction::LoadAddresses)?;
//! handle.wait().await;
//!
//! let count = store.state(|s| s.addresses.len());
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tripdesk_core::{effect::Effect, reducer::Reducer};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors surfaced by [`Store`](crate::Store) operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// `send()` was called after shutdown started
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown gave up with effects still running
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// `send_and_wait_for` did not observe a matching action in time
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast channel closed while waiting
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Completion tracking shared by one dispatched action and every effect
/// (and feedback action) it transitively causes.
#[derive(Clone)]
struct Tracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl Tracking {
    fn new() -> (Self, EffectHandle) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());
        let handle = EffectHandle {
            counter: Arc::clone(&counter),
            completion: rx,
        };
        (
            Self {
                counter,
                notifier: Arc::new(tx),
            },
            handle,
        )
    }

    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notifier.send_replace(());
        }
    }
}

/// Decrements tracking counters when an effect task ends, panics included.
struct TrackingGuard {
    tracking: Tracking,
    pending: Arc<AtomicUsize>,
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.tracking.decrement();
    }
}

/// Handle returned by [`Store::send`].
///
/// Waiting on it resolves once every effect started by the action, and every
/// effect started by the actions those effects fed back, has finished.
#[derive(Clone)]
pub struct EffectHandle {
    counter: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    /// A handle with nothing to wait for
    #[must_use]
    pub fn completed() -> Self {
        Tracking::new().1
    }

    /// Wait until the effect cascade finishes
    pub async fn wait(&mut self) {
        while self.counter.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait with an upper bound
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if effects are still running after `timeout`.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.counter.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct Inner<S, A, E, R> {
    state: RwLock<S>,
    reducer: R,
    environment: E,
    shutdown: AtomicBool,
    pending_effects: Arc<AtomicUsize>,
    action_broadcast: broadcast::Sender<A>,
}

/// Runtime coordinator for one reducer.
///
/// Cloning a `Store` is cheap and yields another handle to the same state.
///
/// The reducer runs synchronously under a write lock, so concurrent `send`s
/// are serialised at the reducer while their effects run concurrently.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    inner: Arc<Inner<S, A, E, R>>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a store with an action broadcast capacity of 64
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, 64)
    }

    /// Create a store with a custom action broadcast capacity
    #[must_use]
    pub fn with_broadcast_capacity(
        initial_state: S,
        reducer: R,
        environment: E,
        capacity: usize,
    ) -> Self {
        let (action_broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(initial_state),
                reducer,
                environment,
                shutdown: AtomicBool::new(false),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }),
        }
    }

    /// Dispatch an action.
    ///
    /// Runs the reducer, starts the returned effects and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] once [`Store::shutdown`] was called.
    pub fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        let (tracking, handle) = Tracking::new();
        self.dispatch(action, &tracking)?;
        Ok(handle)
    }

    /// Dispatch an action and look at the state on both sides of its
    /// reduction.
    ///
    /// `before` and `after` run under the reducer's write lock, so no other
    /// action is reduced between them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] once [`Store::shutdown`] was called.
    pub fn send_and_inspect<B, T>(
        &self,
        action: A,
        before: impl FnOnce(&S) -> B,
        after: impl FnOnce(&S, B) -> T,
    ) -> Result<(EffectHandle, T), StoreError> {
        let (tracking, handle) = Tracking::new();
        let inspected = self.dispatch_inspecting(action, &tracking, before, after)?;
        Ok((handle, inspected))
    }

    /// Dispatch an action and wait for the first effect-produced action
    /// matching `predicate`.
    ///
    /// The subscription is taken before dispatching, so a result produced
    /// immediately is not missed. The matching action has already been
    /// reduced when it is returned.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`] if nothing matched within `timeout`
    /// - [`StoreError::ChannelClosed`] if the broadcast channel closed
    /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.inner.action_broadcast.subscribe();
        self.send(action)?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Observe every action produced by effects
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.inner.action_broadcast.subscribe()
    }

    /// Read state through a closure
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Number of effects currently running
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.inner.pending_effects.load(Ordering::Acquire)
    }

    /// Stop accepting actions and wait for running effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating store shutdown");
        self.inner.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        loop {
            let pending = self.pending_effects();
            if pending == 0 {
                tracing::info!("All effects completed, shutdown successful");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::error!(pending_effects = pending, "Shutdown timed out");
                return Err(StoreError::ShutdownTimeout(pending));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn dispatch(&self, action: A, tracking: &Tracking) -> Result<(), StoreError> {
        self.dispatch_inspecting(action, tracking, |_| (), |_, ()| ())
    }

    fn dispatch_inspecting<B, T>(
        &self,
        action: A,
        tracking: &Tracking,
        before: impl FnOnce(&S) -> B,
        after: impl FnOnce(&S, B) -> T,
    ) -> Result<T, StoreError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::warn!(?action, "Rejected action: store is shutting down");
            return Err(StoreError::ShutdownInProgress);
        }

        metrics::counter!("store.commands.total").increment(1);
        tracing::trace!(?action, "Reducing action");

        let (effects, inspected) = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let seen = before(&state);
            let effects = self
                .inner
                .reducer
                .reduce(&mut state, action, &self.inner.environment);
            (effects, after(&state, seen))
        };

        for effect in effects {
            self.execute_effect(effect, tracking);
        }
        Ok(inspected)
    }

    /// Reduce an effect-produced action, then let observers see it.
    fn feed_back(&self, action: A, tracking: &Tracking) {
        let observed = action.clone();
        if let Err(error) = self.dispatch(action, tracking) {
            tracing::debug!(%error, "Dropped feedback action");
            return;
        }
        // No receivers is fine.
        let _ = self.inner.action_broadcast.send(observed);
    }

    fn spawn_tracked<F>(&self, tracking: &Tracking, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracking.increment();
        self.inner.pending_effects.fetch_add(1, Ordering::SeqCst);
        let guard = TrackingGuard {
            tracking: tracking.clone(),
            pending: Arc::clone(&self.inner.pending_effects),
        };
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    fn execute_effect(&self, effect: Effect<A>, tracking: &Tracking) {
        match effect {
            Effect::None => {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Future(fut) => {
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                let store = self.clone();
                let feedback = tracking.clone();
                self.spawn_tracked(tracking, async move {
                    if let Some(action) = fut.await {
                        store.feed_back(action, &feedback);
                    }
                });
            },
            Effect::Delay { duration, action } => {
                metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                let store = self.clone();
                let feedback = tracking.clone();
                self.spawn_tracked(tracking, async move {
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action, &feedback);
                });
            },
            Effect::Parallel(effects) => {
                metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                for effect in effects {
                    self.execute_effect(effect, tracking);
                }
            },
            Effect::Sequential(effects) => {
                metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                let store = self.clone();
                self.spawn_tracked(tracking, async move {
                    for effect in effects {
                        let (step, mut done) = Tracking::new();
                        store.execute_effect(effect, &step);
                        done.wait().await;
                    }
                });
            },
        }
    }
}
