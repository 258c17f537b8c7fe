//! # Ticket Exchange Core
//!
//! Core traits and types for the ticket exchange.
//!
//! All ownership changes flow through a single [`reducer::Reducer`]:
//!
//! - **State**: the registry of tickets and the two offer ledgers
//! - **Action**: commands (requests to change state) and events (facts)
//! - **Reducer**: `(State, Action, Environment) → Result<Effects, Error>`
//! - **Effect**: side effect descriptions, executed by the runtime
//! - **Environment**: injected dependencies (clock, settlement)
//!
//! A reducer either commits an action completely and returns the effects to
//! run, or rejects it with a typed error and leaves state untouched.
//!
//! ## Example
//!
//! ```ignore
//! use ticket_exchange_core::*;
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = CounterEnvironment;
//!     type Error = CounterError;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         env: &CounterEnvironment,
//!     ) -> Result<Effects<CounterAction>, CounterError> {
//!         match action {
//!             CounterAction::Increment => {
//!                 state.count = state.count.checked_add(1).ok_or(CounterError::Overflow)?;
//!                 Ok(smallvec![Effect::Publish(CounterAction::Incremented)])
//!             }
//!             _ => Ok(SmallVec::new()),
//!         }
//!     }
//! }
//! ```

// Shared by every domain crate
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Effects returned by a single reducer call.
///
/// Most commands produce between zero and four effects, so they stay inline.
pub type Effects<Action> = SmallVec<[effect::Effect<Action>; 4]>;

/// State transitions
///
/// Reducers validate an action against current state, commit it in place and
/// describe the side effects that should follow.
pub mod reducer {
    use super::Effects;

    /// Turns one action into a state change plus effect descriptions
    ///
    /// # Type Parameters
    ///
    /// - `State`: what the reducer mutates
    /// - `Action`: commands, events and feedback it accepts
    /// - `Environment`: clock, backends and other injected services
    /// - `Error`: Typed rejection returned when validation fails
    ///
    /// # Contract
    ///
    /// When `reduce` returns `Err`, `state` must be exactly as it was before
    /// the call. Validation happens first, mutation last.
    pub trait Reducer {
        /// Mutable state
        type State;

        /// Input actions
        type Action;

        /// Injected services
        type Environment;

        /// The rejection type surfaced to callers
        type Error;

        /// Applies `action` to `state`
        ///
        /// Validation comes first: an `Err` must leave `state` exactly as it
        /// was. On `Ok`, `state` has been updated and the returned effects
        /// describe the follow-up work. Nothing here may block or do I/O.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not valid for the current
        /// state. No state change is applied in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Effects<Self::Action>, Self::Error>;
    }
}

/// Follow-up work returned by reducers
///
/// The store interprets these after the reducer returns.
/// They are values (not execution).
pub mod effect {
    use futures::future::BoxFuture;

    /// One unit of follow-up work
    ///
    /// Building an effect does nothing; the store runs it once the reducer
    /// has committed.
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Run effects one after another, each waiting for the previous to finish
        Sequential(Vec<Effect<Action>>),

        /// Async work, run on its own task
        ///
        /// A returned action is sent back through the store
        Future(BoxFuture<'static, Option<Action>>),

        /// Announce a committed action to subscribers
        ///
        /// Published actions are not fed back into the reducer.
        Publish(Action),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => f.write_str("None"),
                Effect::Sequential(effects) => {
                    f.debug_tuple("Sequential").field(effects).finish()
                },
                Effect::Future(_) => f.write_str("Future(..)"),
                Effect::Publish(action) => f.debug_tuple("Publish").field(action).finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Runs `effects` one after another on a single task
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Returns the published action, if this is a `Publish` effect
        #[must_use]
        pub const fn published(&self) -> Option<&Action> {
            match self {
                Effect::Publish(action) => Some(action),
                _ => None,
            }
        }
    }
}

/// Injected services
///
/// Reducers reach the outside world only through these traits.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of event timestamps
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_exchange_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::{smallvec, Effects};

    #[derive(Debug, Clone, PartialEq)]
    enum Probe {
        Ping,
    }

    #[test]
    fn publish_exposes_action() {
        let effect = Effect::Publish(Probe::Ping);
        assert_eq!(effect.published(), Some(&Probe::Ping));
        assert_eq!(Effect::<Probe>::None.published(), None);
    }

    #[test]
    fn debug_hides_future_body() {
        let effects: Effects<Probe> = smallvec![
            Effect::chain(vec![Effect::None]),
            Effect::Future(Box::pin(async { Some(Probe::Ping) })),
        ];
        let rendered = format!("{effects:?}");
        assert_eq!(rendered, "[Sequential([None]), Future(..)]");
    }

    #[test]
    fn future_effect_yields_feedback_action() {
        let Effect::Future(fut) = Effect::Future(Box::pin(async { Some(Probe::Ping) })) else {
            unreachable!("constructed as a future")
        };
        assert_eq!(tokio_test::block_on(fut), Some(Probe::Ping));
    }
}
