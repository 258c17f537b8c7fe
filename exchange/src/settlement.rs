//! Settlement: the external value-transfer collaborator.
//!
//! The exchange never moves value itself. After a purchase commits, the
//! reducer describes the transfers as [`SettlementInstruction`]s and the
//! runtime executes them against a [`Settlement`] implementation. A failed
//! instruction is reported back, never compensated by undoing the commit.

use crate::types::{Money, PartyId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Settlement result
pub type SettlementResult<T> = Result<T, SettlementError>;

/// Boxed settlement future
pub type SettlementFuture = Pin<Box<dyn Future<Output = SettlementResult<SettlementReceipt>> + Send>>;

/// Why a settlement call failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementError {
    /// The counterparty or ledger refused the transfer
    #[error("Settlement declined: {reason}")]
    Declined {
        /// Decline reason
        reason: String,
    },
    /// The settlement backend could not be reached in time
    #[error("Settlement timed out")]
    Timeout,
    /// Not attempted because an earlier step for the same purchase failed
    #[error("Settlement skipped: an earlier step failed")]
    Skipped,
    /// Other failure
    #[error("Settlement error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// Proof that a settlement call went through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Backend transaction id
    pub transaction_id: String,
    /// Amount moved
    pub amount: Money,
}

/// One value movement owed after a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementInstruction {
    /// Move the price from buyer to seller (or treasury)
    Transfer {
        /// Paying party
        from: PartyId,
        /// Receiving party
        to: PartyId,
        /// Amount
        amount: Money,
    },
    /// Return overpayment to the buyer
    Refund {
        /// Buyer
        to: PartyId,
        /// Excess over the price
        amount: Money,
    },
}

impl SettlementInstruction {
    /// Amount moved by this instruction
    #[must_use]
    pub const fn amount(&self) -> Money {
        match self {
            Self::Transfer { amount, .. } | Self::Refund { amount, .. } => *amount,
        }
    }

    /// Runs the instruction against `settlement`
    #[must_use]
    pub fn execute(&self, settlement: &dyn Settlement) -> SettlementFuture {
        match *self {
            Self::Transfer { from, to, amount } => settlement.transfer_value(from, to, amount),
            Self::Refund { to, amount } => settlement.refund(to, amount),
        }
    }
}

/// Settlement trait
///
/// Abstraction over whatever ledger actually moves value.
pub trait Settlement: Send + Sync {
    /// Move `amount` from `from` to `to`
    ///
    /// # Errors
    ///
    /// Returns error if the transfer fails
    fn transfer_value(&self, from: PartyId, to: PartyId, amount: Money) -> SettlementFuture;

    /// Return `amount` to `to`
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(&self, to: PartyId, amount: Money) -> SettlementFuture;
}

/// In-memory settlement for development and testing
///
/// Records every instruction it receives (including failed ones) and can be
/// switched into a failing mode to exercise the reconciliation path.
#[derive(Clone, Debug, Default)]
pub struct MockSettlement {
    calls: Arc<Mutex<Vec<SettlementInstruction>>>,
    failing: Arc<AtomicBool>,
    latency: Duration,
}

impl MockSettlement {
    /// Creates a mock that settles every instruction immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock that declines every instruction
    #[must_use]
    pub fn failing() -> Self {
        let mock = Self::new();
        mock.set_failing(true);
        mock
    }

    /// Simulate backend latency on every call
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Switch failing mode on or off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every instruction received so far, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<SettlementInstruction> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Total of every transfer addressed to `party`, settled or not
    #[must_use]
    pub fn received_by(&self, party: PartyId) -> Money {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                SettlementInstruction::Transfer { to, amount, .. } if *to == party => Some(*amount),
                _ => None,
            })
            .fold(Money::ZERO, |total, amount| total.checked_add(amount).unwrap_or(total))
    }

    fn settle(&self, instruction: SettlementInstruction) -> SettlementFuture {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instruction);
        let failing = self.failing.load(Ordering::SeqCst);
        let latency = self.latency;

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if failing {
                tracing::warn!(?instruction, "Mock settlement declined");
                return Err(SettlementError::Declined {
                    reason: "mock settlement is in failing mode".to_string(),
                });
            }

            let transaction_id = format!("mock_txn_{}", uuid::Uuid::new_v4());
            tracing::info!(
                ?instruction,
                amount = instruction.amount().cents(),
                transaction_id = %transaction_id,
                "Mock settlement processed"
            );

            Ok(SettlementReceipt {
                transaction_id,
                amount: instruction.amount(),
            })
        })
    }
}

impl Settlement for MockSettlement {
    fn transfer_value(&self, from: PartyId, to: PartyId, amount: Money) -> SettlementFuture {
        self.settle(SettlementInstruction::Transfer { from, to, amount })
    }

    fn refund(&self, to: PartyId, amount: Money) -> SettlementFuture {
        self.settle(SettlementInstruction::Refund { to, amount })
    }
}
