//! Given-When-Then harness for a single reducer step.
//!
//! Each test drives exactly one action. It expects either a commit
//! (`then_effects`) or a rejection (`then_error`), never both.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use ticket_exchange_core::{effect::Effect, reducer::Reducer};

/// Check on the state after the step
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Check comparing the state before and after the step
type StateDiffAssertion<S> = Box<dyn FnOnce(&S, &S)>;

/// Check on the effects of a committed step
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Check on the error of a rejected step
type ErrorAssertion<Err> = Box<dyn FnOnce(&Err)>;

/// One reducer step under test
///
/// # Example
///
/// ```ignore
/// use ticket_exchange_testing::ReducerTest;
///
/// ReducerTest::new(TicketSaleReducer::new())
///     .with_env(test_environment())
///     .given_state(initialized_state())
///     .when_action(TicketAction::BuyTicket { ticket_id, buyer, paid: Money::ZERO })
///     .then_error(|error| assert!(matches!(error, TicketError::InsufficientPayment { .. })))
///     .then_state_unchanged()
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    diff_assertions: Vec<StateDiffAssertion<R::State>>,
    effect_assertions: Vec<EffectAssertion<R::Action>>,
    error_assertions: Vec<ErrorAssertion<R::Error>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone,
    R::Error: std::fmt::Debug,
{
    /// Starts a test around `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            diff_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Environment passed to `reduce`
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Given: the state before the step
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// When: the action driving the step
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Then: check the state after the step, whatever the outcome
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Then: the step commits, and its effects pass `assertion`
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<R::Action>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Then: the step is rejected, and its error passes `assertion`
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Runs the step and every check
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set, if the
    /// outcome (commit vs rejection) does not match the assertions, or if
    /// any assertion fails.
    #[allow(clippy::panic, clippy::expect_used)]
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("given_state() was not called");
        let before = if self.diff_assertions.is_empty() {
            None
        } else {
            Some(state.clone())
        };

        let action = self.action.expect("when_action() was not called");

        let env = self
            .environment
            .expect("with_env() was not called");

        let outcome = self.reducer.reduce(&mut state, action, &env);

        match outcome {
            Ok(effects) => {
                if !self.error_assertions.is_empty() {
                    panic!("expected a rejection, but the action committed");
                }
                for assertion in self.effect_assertions {
                    assertion(&effects);
                }
            },
            Err(error) => {
                if !self.effect_assertions.is_empty() {
                    panic!("expected a commit, but the action was rejected: {error:?}");
                }
                for assertion in self.error_assertions {
                    assertion(&error);
                }
            },
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        if let Some(before) = before {
            for assertion in self.diff_assertions {
                assertion(&before, &state);
            }
        }
    }
}

impl<R> ReducerTest<R>
where
    R: Reducer + 'static,
    R::State: Clone + PartialEq + std::fmt::Debug + 'static,
    R::Error: std::fmt::Debug,
{
    /// Assert that the state after the action equals the state before it
    #[must_use]
    pub fn then_state_unchanged(mut self) -> Self {
        self.diff_assertions.push(Box::new(|before: &R::State, after: &R::State| {
            assert_eq!(before, after, "State changed although it should not have");
        }));
        self
    }
}

/// Checks over reducer effects
pub mod assertions {
    use ticket_exchange_core::effect::Effect;

    /// Passes for an empty list or a lone `Effect::None`
    ///
    /// # Panics
    ///
    /// Panics on anything else.
    #[allow(clippy::panic)]
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.is_empty() || matches!(effects, [Effect::None]),
            "expected no effects, got {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// # Panics
    ///
    /// Panics unless exactly `expected` effects were returned.
    #[allow(clippy::panic)]
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "wrong number of effects"
        );
    }

    /// # Panics
    ///
    /// Panics unless some effect runs asynchronously.
    #[allow(clippy::panic)]
    pub fn assert_has_async_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, Effect::Future(_) | Effect::Sequential(_))),
            "no Future or Sequential effect returned"
        );
    }

    /// Collect every action published by the effects, in order
    #[must_use]
    pub fn published<A>(effects: &[Effect<A>]) -> Vec<&A> {
        effects.iter().filter_map(Effect::published).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_exchange_core::{smallvec, Effects, SmallVec};

    /// Seats 1..=capacity, each either held or free
    #[derive(Clone, Debug, PartialEq)]
    struct Hall {
        capacity: u32,
        held: Vec<u32>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum SeatAction {
        Hold(u32),
        Release(u32),
        Held(u32),
    }

    #[derive(Debug, PartialEq)]
    enum SeatError {
        NoSuchSeat(u32),
        Taken(u32),
    }

    struct SeatReducer;

    impl Reducer for SeatReducer {
        type State = Hall;
        type Action = SeatAction;
        type Environment = ();
        type Error = SeatError;

        fn reduce(
            &self,
            hall: &mut Hall,
            action: SeatAction,
            _env: &(),
        ) -> Result<Effects<SeatAction>, SeatError> {
            match action {
                SeatAction::Hold(seat) if seat == 0 || seat > hall.capacity => {
                    Err(SeatError::NoSuchSeat(seat))
                },
                SeatAction::Hold(seat) if hall.held.contains(&seat) => Err(SeatError::Taken(seat)),
                SeatAction::Hold(seat) => {
                    hall.held.push(seat);
                    Ok(smallvec![Effect::Publish(SeatAction::Held(seat))])
                },
                SeatAction::Release(seat) => {
                    hall.held.retain(|held| *held != seat);
                    Ok(SmallVec::new())
                },
                SeatAction::Held(_) => Ok(SmallVec::new()),
            }
        }
    }

    fn hall() -> Hall {
        Hall { capacity: 4, held: vec![2] }
    }

    #[test]
    fn commit_runs_state_and_effect_checks() {
        ReducerTest::new(SeatReducer)
            .with_env(())
            .given_state(hall())
            .when_action(SeatAction::Hold(3))
            .then_state(|hall| assert_eq!(hall.held, vec![2, 3]))
            .then_effects(|effects| {
                assert_eq!(assertions::published(effects), vec![&SeatAction::Held(3)]);
            })
            .run();
    }

    #[test]
    fn rejection_leaves_state_alone() {
        ReducerTest::new(SeatReducer)
            .with_env(())
            .given_state(hall())
            .when_action(SeatAction::Hold(2))
            .then_error(|error| assert_eq!(*error, SeatError::Taken(2)))
            .then_state_unchanged()
            .run();

        ReducerTest::new(SeatReducer)
            .with_env(())
            .given_state(hall())
            .when_action(SeatAction::Hold(9))
            .then_error(|error| assert_eq!(*error, SeatError::NoSuchSeat(9)))
            .run();
    }

    #[test]
    #[should_panic(expected = "expected a rejection")]
    fn unexpected_commit_fails_the_test() {
        ReducerTest::new(SeatReducer)
            .with_env(())
            .given_state(hall())
            .when_action(SeatAction::Release(2))
            .then_error(|_| {})
            .run();
    }

    #[test]
    #[should_panic(expected = "State changed")]
    fn state_change_is_caught() {
        ReducerTest::new(SeatReducer)
            .with_env(())
            .given_state(hall())
            .when_action(SeatAction::Release(2))
            .then_state_unchanged()
            .run();
    }

    #[test]
    fn effect_list_checks() {
        assertions::assert_no_effects::<SeatAction>(&[]);
        assertions::assert_no_effects::<SeatAction>(&[Effect::None]);
        assertions::assert_effects_count(&[Effect::Publish(SeatAction::Held(1)), Effect::None], 2);
    }
}
