//! # Ticket Exchange Runtime
//!
//! The [`Store`] is the single consistency domain of the exchange. It owns
//! the state behind one `RwLock` and coordinates reducer execution and effect
//! handling.
//!
//! ## Guarantees
//!
//! - Every `send` runs the reducer under the write lock, so mutating actions
//!   never interleave.
//! - Readers take the read lock and always see a fully committed state.
//! - Lock acquisition for writers is bounded by [`StoreConfig::lock_timeout`].
//! - Effects run after the lock has been released.
//!
//! ## Example
//!
//! ```ignore
//! use ticket_exchange_runtime::Store;
//!
//! let store = Store::new(TicketSaleState::new(), TicketSaleReducer::new(), environment);
//!
//! let mut handle = store.send(TicketAction::Initialize { count, base_price }).await?;
//! handle.wait().await;
//!
//! let unsold = store.state(|state| state.registry.unsold_count()).await;
//! ```

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticket_exchange_core::{effect::Effect, reducer::Reducer};
use tokio::sync::{broadcast, watch, RwLock};

pub use store::Store;

/// Error types for the Store runtime
pub mod error {
    use std::time::Duration;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    ///
    /// `E` is the reducer's rejection type.
    #[derive(Error, Debug)]
    pub enum StoreError<E> {
        /// The reducer rejected the action; state is unchanged
        #[error("Action rejected: {0}")]
        Rejected(E),

        /// The write lock could not be acquired in time; state is unchanged
        #[error("Timed out after {0:?} waiting for the state lock")]
        LockTimeout(Duration),

        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),
    }

    impl<E> StoreError<E> {
        /// Returns the reducer rejection, if that is what this error is
        #[must_use]
        pub const fn rejection(&self) -> Option<&E> {
            match self {
                Self::Rejected(error) => Some(error),
                _ => None,
            }
        }
    }
}

pub use error::StoreError;

/// Store configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ticket_exchange_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_lock_timeout(Duration::from_millis(250))
///     .with_broadcast_capacity(1024);
/// assert_eq!(config.broadcast_capacity, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on waiting for the write lock
    pub lock_timeout: Duration,
    /// Capacity of the committed-action broadcast channel
    pub broadcast_capacity: usize,
    /// Default timeout for graceful shutdown
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Set the lock timeout
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the broadcast channel capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            broadcast_capacity: 256,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of that
/// action (and the feedback actions they produce) to finish.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone, Debug)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (handle, _tracking) = Self::new();
        handle
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all effects to complete, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`tokio::time::error::Elapsed`] if effects are still running
    /// when the timeout expires.
    pub async fn wait_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.wait()).await
    }
}

#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrements the effect counter on drop, even if the effect panicked
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        if self.0.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.0.notifier.send(());
        }
    }
}

struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The store and its send/effect loop
pub mod store {
    use super::{
        broadcast, Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, BoxFuture, DecrementGuard,
        Duration, Effect, EffectHandle, EffectTracking, Instant, Ordering, Reducer, RwLock,
        StoreConfig, StoreError,
    };

    /// Owns `S` and applies `A` to it through `R`, one action at a time
    ///
    /// Clones share state, the broadcast channel and the shutdown flag.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        config: StoreConfig,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Committed actions announced through `Effect::Publish`.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                config: self.config.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        R::Error: std::fmt::Display + Send,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new store with a custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                config,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// The environment this store injects into the reducer
        pub const fn environment(&self) -> &E {
            &self.environment
        }

        /// Send an action to the store
        ///
        /// The reducer runs under the write lock. On success, published
        /// actions are broadcast before the lock is released and the
        /// remaining effects are spawned afterwards.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Rejected`]: the reducer rejected the action
        /// - [`StoreError::LockTimeout`]: the write lock was not acquired in time
        /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError<R::Error>> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }
            self.apply(action).await
        }

        /// Runs `action` through the reducer without the shutdown gate
        ///
        /// Actions produced by effects take this path, so an effect that was
        /// already running when shutdown began still lands its result.
        async fn apply(&self, action: A) -> Result<EffectHandle, StoreError<R::Error>> {
            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let Ok(mut state) =
                    tokio::time::timeout(self.config.lock_timeout, self.state.write()).await
                else {
                    tracing::warn!(
                        timeout_ms = self.config.lock_timeout.as_millis(),
                        "Timed out waiting for write lock"
                    );
                    metrics::counter!("store.lock.timeouts").increment(1);
                    return Err(StoreError::LockTimeout(self.config.lock_timeout));
                };
                tracing::trace!("Acquired write lock on state");

                let start = Instant::now();
                let result = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                let effects = match result {
                    Ok(effects) => effects,
                    Err(error) => {
                        tracing::debug!(%error, "Reducer rejected action");
                        metrics::counter!("store.commands.rejected").increment(1);
                        return Err(StoreError::Rejected(error));
                    },
                };

                // Broadcast under the lock so subscribers see commit order
                let mut deferred = Vec::with_capacity(effects.len());
                for effect in effects {
                    match effect {
                        Effect::Publish(action) => {
                            let _ = self.action_broadcast.send(action);
                        },
                        other => deferred.push(other),
                    }
                }
                deferred
            };

            tracing::trace!("Executing {} effects", effects.len());
            for effect in effects {
                self.execute_effect(effect, &tracking);
            }

            Ok(handle)
        }

        /// Read current state via a closure
        ///
        /// The read lock is held only for the duration of `f`. The wait for
        /// it is bounded without a timeout of its own: the lock is fair, so
        /// a reader queues behind at most the writers already waiting, and
        /// each writer either gives up after [`StoreConfig::lock_timeout`]
        /// or holds the lock for one synchronous reducer call. Nothing is
        /// awaited while the write lock is held.
        ///
        /// ```ignore
        /// let unsold = store.state(|s| s.registry.unsold_count()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Subscribe to committed actions
        ///
        /// Receives every action published by the reducer after this call.
        /// Slow receivers get [`broadcast::error::RecvError::Lagged`].
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Number of effects currently running across all actions
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Stop accepting actions and wait for running effects to drain
        ///
        /// Actions produced by effects that are still running are applied
        /// while draining; only [`Store::send`] is closed.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
        /// after `timeout`.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError<R::Error>> {
            tracing::info!("Store shutdown initiated");
            self.shutdown.store(true, Ordering::Release);

            let drained = tokio::time::timeout(timeout, async {
                while self.pending_effects.load(Ordering::SeqCst) > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;

            match drained {
                Ok(()) => {
                    tracing::info!("Store shutdown complete");
                    Ok(())
                },
                Err(_) => {
                    let remaining = self.pending_effects.load(Ordering::SeqCst);
                    tracing::error!(remaining, "Store shutdown timed out");
                    Err(StoreError::ShutdownTimeout(remaining))
                },
            }
        }

        /// Shut down using the configured default timeout
        ///
        /// # Errors
        ///
        /// See [`Store::shutdown`].
        pub async fn shutdown_default(&self) -> Result<(), StoreError<R::Error>> {
            self.shutdown(self.config.shutdown_timeout).await
        }

        fn execute_effect(&self, effect: Effect<A>, tracking: &EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Publish(action) => {
                    metrics::counter!("store.effects.executed", "type" => "publish").increment(1);
                    let _ = self.action_broadcast.send(action);
                },
                effect @ (Effect::Future(_) | Effect::Sequential(_)) => {
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
                    let guard = DecrementGuard(tracking.clone());
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        let _pending_guard = pending_guard;
                        store.run_effect(effect).await;
                    });
                },
            }
        }

        /// Run an effect to completion on the current task
        fn run_effect(self, effect: Effect<A>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Publish(action) => {
                        let _ = self.action_broadcast.send(action);
                    },
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future")
                            .increment(1);
                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, applying it");
                            if let Err(error) = self.apply(action).await {
                                tracing::error!(%error, "Feedback action was not applied");
                            }
                        }
                    },
                    Effect::Sequential(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "sequential")
                            .increment(1);
                        for effect in effects {
                            self.clone().run_effect(effect).await;
                        }
                    },
                }
            })
        }
    }
}
