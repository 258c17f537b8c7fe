//! # Ticket Exchange Testing
//!
//! Deterministic clocks, a one-step reducer harness ([`ReducerTest`]) and
//! effect checks, shared by the unit and integration tests of every crate.
//!
//! ## Example
//!
//! ```ignore
//! use ticket_exchange_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(TicketSaleReducer::new())
//!     .with_env(test_environment())
//!     .given_state(TicketSaleState::new())
//!     .when_action(TicketAction::Initialize { count: 10, base_price: Money::from_cents(1) })
//!     .then_state(|state| assert_eq!(state.registry.len(), 10))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use ticket_exchange_core::environment::Clock;

/// Given-When-Then harness
pub mod reducer_test;

pub use reducer_test::{assertions, ReducerTest};

/// Stand-ins for environment services
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Clock frozen at one instant
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_exchange_testing::mocks::FixedClock;
    /// use ticket_exchange_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Clock that always reports `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock frozen at 2025-01-01T00:00:00Z
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Routes `tracing` output to the test writer, filtered by `RUST_LOG`
/// (default `warn`)
///
/// Idempotent: later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{test_clock, FixedClock};
