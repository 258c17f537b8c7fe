//! Purchase flow: the reducer that owns every ownership change.
//!
//! Each command is handled in two phases. `validate_*` checks the command
//! against the registry and both ledgers without touching them and produces
//! the event describing the change; [`TicketSaleReducer::apply_event`] then
//! commits that event. A rejected command therefore never leaves a trace.
//!
//! Settlement runs after the commit as a chain of effects whose outcomes are
//! fed back as `Settlement*` actions.

use crate::error::TicketError;
use crate::registry::TicketRegistry;
use crate::resale::{ResaleEntry, ResaleLedger, ResaleListing};
use crate::settlement::{Settlement, SettlementError, SettlementInstruction, SettlementReceipt};
use crate::swap::{SwapLedger, SwapOffer, SwapOfferView};
use crate::types::{Money, Owner, PartyId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ticket_exchange_core::{
    effect::Effect, environment::Clock, reducer::Reducer, smallvec, Effects, SmallVec,
};
use ticket_exchange_macros::Action;

// ============================================================================
// Actions (Commands + Events + Feedback)
// ============================================================================

/// Actions for the ticket sale
#[derive(Action, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketAction {
    // Commands
    /// Create the fixed inventory
    #[command]
    Initialize {
        /// Number of tickets
        count: u32,
        /// Price of every ticket in the primary sale
        base_price: Money,
    },

    /// Buy a ticket: primary sale if unsold, otherwise against its resale listing
    #[command]
    BuyTicket {
        /// Ticket to buy
        ticket_id: TicketId,
        /// Buyer
        buyer: PartyId,
        /// Value supplied
        paid: Money,
    },

    /// Assign an unsold ticket before the sale opens
    #[command]
    MintTicket {
        /// Ticket to assign
        ticket_id: TicketId,
        /// New holder
        owner: PartyId,
    },

    /// Offer a held ticket for swap
    #[command]
    OfferSwap {
        /// Offered ticket
        ticket_id: TicketId,
        /// Holder
        offerer: PartyId,
    },

    /// Accept a swap offer by giving up a held ticket in return
    #[command]
    AcceptSwap {
        /// Ticket carrying the offer
        offered_ticket: TicketId,
        /// Ticket the acceptor gives in exchange
        counter_ticket: TicketId,
        /// Holder of `counter_ticket`
        acceptor: PartyId,
    },

    /// Withdraw a swap offer
    #[command]
    CancelSwapOffer {
        /// Offered ticket
        ticket_id: TicketId,
        /// Party that made the offer
        offerer: PartyId,
    },

    /// List a held ticket for resale
    #[command]
    ListForResale {
        /// Ticket to list
        ticket_id: TicketId,
        /// Holder
        lister: PartyId,
        /// Asking price
        price: Money,
    },

    /// List the lister's lowest-numbered ticket for resale
    #[command]
    ResaleTicket {
        /// Holder
        lister: PartyId,
        /// Asking price
        price: Money,
    },

    /// Buy a ticket against its resale listing
    #[command]
    AcceptResale {
        /// Listed ticket
        ticket_id: TicketId,
        /// Buyer
        buyer: PartyId,
        /// Value supplied
        paid: Money,
    },

    /// Withdraw a resale listing
    #[command]
    CancelResale {
        /// Listed ticket
        ticket_id: TicketId,
        /// Party that listed it
        lister: PartyId,
    },

    // Events
    /// Inventory was created
    #[event]
    InventoryInitialized {
        /// Number of tickets
        count: u32,
        /// Base price
        base_price: Money,
        /// When created
        at: DateTime<Utc>,
    },

    /// Primary sale completed
    #[event]
    TicketPurchased {
        /// Ticket sold
        ticket_id: TicketId,
        /// New holder
        buyer: PartyId,
        /// Price charged
        price: Money,
        /// Excess returned to the buyer
        refund: Money,
        /// When sold
        at: DateTime<Utc>,
    },

    /// Ticket assigned before the sale
    #[event]
    TicketMinted {
        /// Ticket assigned
        ticket_id: TicketId,
        /// New holder
        owner: PartyId,
        /// When assigned
        at: DateTime<Utc>,
    },

    /// Swap offer recorded
    #[event]
    SwapOffered {
        /// Offered ticket
        ticket_id: TicketId,
        /// Holder
        offerer: PartyId,
        /// Ownership epoch the offer is bound to
        epoch: u64,
        /// When offered
        at: DateTime<Utc>,
    },

    /// Two tickets changed hands
    #[event]
    SwapCompleted {
        /// Ticket that carried the offer
        offered_ticket: TicketId,
        /// Previous holder of `offered_ticket`
        offerer: PartyId,
        /// Ticket given in exchange
        counter_ticket: TicketId,
        /// Previous holder of `counter_ticket`
        acceptor: PartyId,
        /// When swapped
        at: DateTime<Utc>,
    },

    /// Swap offer withdrawn
    #[event]
    SwapOfferCancelled {
        /// Offered ticket
        ticket_id: TicketId,
        /// Party that made the offer
        offerer: PartyId,
        /// When withdrawn
        at: DateTime<Utc>,
    },

    /// Resale listing recorded
    #[event]
    ResaleListed {
        /// Listed ticket
        ticket_id: TicketId,
        /// Holder
        lister: PartyId,
        /// Asking price
        price: Money,
        /// Ownership epoch the listing is bound to
        epoch: u64,
        /// When listed
        at: DateTime<Utc>,
    },

    /// Resale completed
    #[event]
    ResaleCompleted {
        /// Ticket sold
        ticket_id: TicketId,
        /// Previous holder
        seller: PartyId,
        /// New holder
        buyer: PartyId,
        /// Price charged
        price: Money,
        /// Excess returned to the buyer
        refund: Money,
        /// When sold
        at: DateTime<Utc>,
    },

    /// Resale listing withdrawn
    #[event]
    ResaleCancelled {
        /// Listed ticket
        ticket_id: TicketId,
        /// Party that listed it
        lister: PartyId,
        /// When withdrawn
        at: DateTime<Utc>,
    },

    // Feedback
    /// A settlement instruction went through
    #[feedback]
    SettlementSucceeded {
        /// Ticket the payment belongs to
        ticket_id: TicketId,
        /// Executed instruction
        instruction: SettlementInstruction,
        /// Backend receipt
        receipt: SettlementReceipt,
    },

    /// A settlement instruction failed after its commit
    #[feedback]
    SettlementFailed {
        /// Ticket the payment belongs to
        ticket_id: TicketId,
        /// Failed instruction
        instruction: SettlementInstruction,
        /// Backend error
        error: SettlementError,
        /// When the failure was observed
        at: DateTime<Utc>,
    },
}

// ============================================================================
// State
// ============================================================================

/// Settlement that failed after its purchase committed
///
/// Kept for reconciliation; the ownership change stands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSettlement {
    /// Ticket the payment belongs to
    pub ticket_id: TicketId,
    /// Failed instruction
    pub instruction: SettlementInstruction,
    /// Backend error
    pub error: SettlementError,
    /// When the failure was observed
    pub at: DateTime<Utc>,
}

/// All mutable state of the exchange
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSaleState {
    /// Ticket ownership
    pub registry: TicketRegistry,
    /// Outstanding swap offers
    pub swaps: SwapLedger,
    /// Outstanding resale listings
    pub resales: ResaleLedger,
    /// Number of primary sales so far; minting closes after the first
    pub primary_sales: u64,
    /// Number of completed resales
    pub resales_completed: u64,
    /// Number of completed swaps
    pub swaps_completed: u64,
    /// Number of settlement instructions confirmed by the backend
    pub settlements_confirmed: u64,
    /// Settlement failures awaiting reconciliation
    pub failed_settlements: Vec<FailedSettlement>,
}

impl TicketSaleState {
    /// Creates empty, uninitialized state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of a ticket
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::UnknownTicket`] if the id is out of range.
    pub fn owner_of(&self, ticket_id: TicketId) -> Result<Owner, TicketError> {
        self.registry.owner_of(ticket_id)
    }

    /// Offer recorded on a ticket, with its liveness
    #[must_use]
    pub fn get_swap_offer(&self, ticket_id: TicketId) -> Option<SwapOfferView> {
        self.swaps.view(&self.registry, ticket_id)
    }

    /// Valid resale listings in ticket order
    pub fn check_resale(&self) -> impl Iterator<Item = ResaleEntry> + '_ {
        self.resales.check_resale(&self.registry)
    }

    /// Lowest-numbered ticket held by `party`
    #[must_use]
    pub fn ticket_of(&self, party: PartyId) -> Option<TicketId> {
        self.registry.ticket_of(party)
    }

    /// Whether the registry's reverse index agrees with its forward map
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.registry.is_consistent()
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the ticket sale
#[derive(Clone)]
pub struct TicketSaleEnvironment {
    /// Clock for event timestamps
    pub clock: Arc<dyn Clock>,
    /// Value transfer backend
    pub settlement: Arc<dyn Settlement>,
    /// Party receiving primary sale proceeds
    pub treasury: PartyId,
}

impl TicketSaleEnvironment {
    /// Creates a new `TicketSaleEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, settlement: Arc<dyn Settlement>, treasury: PartyId) -> Self {
        Self {
            clock,
            settlement,
            treasury,
        }
    }
}

impl std::fmt::Debug for TicketSaleEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSaleEnvironment")
            .field("treasury", &self.treasury)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the ticket sale
#[derive(Clone, Debug, Default)]
pub struct TicketSaleReducer;

impl TicketSaleReducer {
    /// Creates a new `TicketSaleReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate_initialize(
        state: &TicketSaleState,
        count: u32,
        base_price: Money,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        state.registry.check_initialize(count, base_price)?;
        Ok(TicketAction::InventoryInitialized {
            count,
            base_price,
            at,
        })
    }

    /// Routes a purchase to the primary sale or to the ticket's resale listing
    fn validate_buy(
        state: &TicketSaleState,
        ticket_id: TicketId,
        buyer: PartyId,
        paid: Money,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        if !state.registry.owner_of(ticket_id)?.is_unsold() {
            if state.resales.resolve(&state.registry, ticket_id).is_ok() {
                return Self::validate_accept_resale(state, ticket_id, buyer, paid, at);
            }
            return Err(TicketError::TicketAlreadyOwned { ticket_id });
        }

        let price = state
            .registry
            .base_price()
            .ok_or(TicketError::UnknownTicket { ticket_id })?;
        if paid < price {
            return Err(TicketError::InsufficientPayment {
                required: price,
                paid,
            });
        }

        Ok(TicketAction::TicketPurchased {
            ticket_id,
            buyer,
            price,
            refund: paid.saturating_sub(price),
            at,
        })
    }

    fn validate_mint(
        state: &TicketSaleState,
        ticket_id: TicketId,
        owner: PartyId,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        if let Owner::Party(current) = state.registry.owner_of(ticket_id)? {
            return Err(TicketError::AlreadyOwned {
                ticket_id,
                owner: current,
            });
        }
        if state.primary_sales > 0 {
            return Err(TicketError::MintingClosed);
        }
        Ok(TicketAction::TicketMinted {
            ticket_id,
            owner,
            at,
        })
    }

    fn validate_offer_swap(
        state: &TicketSaleState,
        ticket_id: TicketId,
        offerer: PartyId,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        let epoch = SwapLedger::validate_offer(&state.registry, ticket_id, offerer)?;
        Ok(TicketAction::SwapOffered {
            ticket_id,
            offerer,
            epoch,
            at,
        })
    }

    fn validate_accept_swap(
        state: &TicketSaleState,
        offered_ticket: TicketId,
        counter_ticket: TicketId,
        acceptor: PartyId,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        state.registry.owner_of(offered_ticket)?;
        if offered_ticket == counter_ticket {
            return Err(TicketError::SelfSwap {
                ticket_id: offered_ticket,
            });
        }

        let offer = state.swaps.resolve(&state.registry, offered_ticket)?;
        if offer.offerer == acceptor {
            return Err(TicketError::SelfSwap {
                ticket_id: offered_ticket,
            });
        }
        state.registry.require_owner(counter_ticket, acceptor)?;

        Ok(TicketAction::SwapCompleted {
            offered_ticket,
            offerer: offer.offerer,
            counter_ticket,
            acceptor,
            at,
        })
    }

    fn validate_cancel_swap(
        state: &TicketSaleState,
        ticket_id: TicketId,
        offerer: PartyId,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        state.registry.owner_of(ticket_id)?;
        state.swaps.validate_cancel(ticket_id, offerer)?;
        Ok(TicketAction::SwapOfferCancelled {
            ticket_id,
            offerer,
            at,
        })
    }

    fn validate_list(
        state: &TicketSaleState,
        ticket_id: TicketId,
        lister: PartyId,
        price: Money,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        let epoch = ResaleLedger::validate_listing(&state.registry, ticket_id, lister, price)?;
        Ok(TicketAction::ResaleListed {
            ticket_id,
            lister,
            price,
            epoch,
            at,
        })
    }

    fn validate_accept_resale(
        state: &TicketSaleState,
        ticket_id: TicketId,
        buyer: PartyId,
        paid: Money,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        state.registry.owner_of(ticket_id)?;
        let listing = state.resales.resolve(&state.registry, ticket_id)?;
        if listing.lister == buyer {
            return Err(TicketError::SelfPurchase { ticket_id });
        }
        if paid < listing.price {
            return Err(TicketError::InsufficientPayment {
                required: listing.price,
                paid,
            });
        }

        Ok(TicketAction::ResaleCompleted {
            ticket_id,
            seller: listing.lister,
            buyer,
            price: listing.price,
            refund: paid.saturating_sub(listing.price),
            at,
        })
    }

    fn validate_cancel_resale(
        state: &TicketSaleState,
        ticket_id: TicketId,
        lister: PartyId,
        at: DateTime<Utc>,
    ) -> Result<TicketAction, TicketError> {
        state.registry.owner_of(ticket_id)?;
        state.resales.validate_cancel(ticket_id, lister)?;
        Ok(TicketAction::ResaleCancelled {
            ticket_id,
            lister,
            at,
        })
    }

    /// Validates a command and returns the event it would commit
    ///
    /// # Errors
    ///
    /// Returns the [`TicketError`] describing why the command is refused.
    pub fn decide(
        state: &TicketSaleState,
        command: &TicketAction,
        at: DateTime<Utc>,
    ) -> Result<Option<TicketAction>, TicketError> {
        let event = match *command {
            TicketAction::Initialize { count, base_price } => {
                Self::validate_initialize(state, count, base_price, at)?
            },
            TicketAction::BuyTicket {
                ticket_id,
                buyer,
                paid,
            } => Self::validate_buy(state, ticket_id, buyer, paid, at)?,
            TicketAction::MintTicket { ticket_id, owner } => {
                Self::validate_mint(state, ticket_id, owner, at)?
            },
            TicketAction::OfferSwap { ticket_id, offerer } => {
                Self::validate_offer_swap(state, ticket_id, offerer, at)?
            },
            TicketAction::AcceptSwap {
                offered_ticket,
                counter_ticket,
                acceptor,
            } => Self::validate_accept_swap(state, offered_ticket, counter_ticket, acceptor, at)?,
            TicketAction::CancelSwapOffer { ticket_id, offerer } => {
                Self::validate_cancel_swap(state, ticket_id, offerer, at)?
            },
            TicketAction::ListForResale {
                ticket_id,
                lister,
                price,
            } => Self::validate_list(state, ticket_id, lister, price, at)?,
            TicketAction::ResaleTicket { lister, price } => {
                let ticket_id = state
                    .registry
                    .ticket_of(lister)
                    .ok_or(TicketError::NoTicketHeld { party: lister })?;
                Self::validate_list(state, ticket_id, lister, price, at)?
            },
            TicketAction::AcceptResale {
                ticket_id,
                buyer,
                paid,
            } => Self::validate_accept_resale(state, ticket_id, buyer, paid, at)?,
            TicketAction::CancelResale { ticket_id, lister } => {
                Self::validate_cancel_resale(state, ticket_id, lister, at)?
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Applies an event to state
    ///
    /// Events reaching this point have been validated by [`Self::decide`]
    /// against the same state, so the registry calls cannot fail; their
    /// errors are still propagated rather than ignored.
    fn apply_event(state: &mut TicketSaleState, event: &TicketAction) -> Result<(), TicketError> {
        match *event {
            TicketAction::InventoryInitialized {
                count, base_price, ..
            } => state.registry.initialize(count, base_price)?,

            TicketAction::TicketPurchased {
                ticket_id, buyer, ..
            } => {
                state.registry.transfer(ticket_id, Owner::Unsold, buyer.into())?;
                state.primary_sales += 1;
            },

            TicketAction::TicketMinted {
                ticket_id, owner, ..
            } => state.registry.transfer(ticket_id, Owner::Unsold, owner.into())?,

            TicketAction::SwapOffered {
                ticket_id,
                offerer,
                epoch,
                at,
            } => state.swaps.record(SwapOffer {
                ticket_id,
                offerer,
                epoch,
                offered_at: at,
            }),

            TicketAction::SwapCompleted {
                offered_ticket,
                offerer,
                counter_ticket,
                acceptor,
                ..
            } => {
                state
                    .registry
                    .exchange(offered_ticket, offerer, counter_ticket, acceptor)?;
                state.swaps.remove(offered_ticket);
                state.swaps_completed += 1;
            },

            TicketAction::SwapOfferCancelled { ticket_id, .. } => {
                state.swaps.remove(ticket_id);
            },

            TicketAction::ResaleListed {
                ticket_id,
                lister,
                price,
                epoch,
                at,
            } => state.resales.record(ResaleListing {
                ticket_id,
                lister,
                price,
                epoch,
                listed_at: at,
            }),

            TicketAction::ResaleCompleted {
                ticket_id,
                seller,
                buyer,
                ..
            } => {
                state.registry.transfer(ticket_id, seller.into(), buyer.into())?;
                state.resales.remove(ticket_id);
                state.resales_completed += 1;
            },

            TicketAction::ResaleCancelled { ticket_id, .. } => {
                state.resales.remove(ticket_id);
            },

            // Commands and feedback are not events
            _ => {},
        }
        Ok(())
    }

    /// Settlement owed by a committed event, in execution order
    fn settlement_for(event: &TicketAction, treasury: PartyId) -> Vec<SettlementInstruction> {
        let (buyer, payee, price, refund) = match *event {
            TicketAction::TicketPurchased {
                buyer,
                price,
                refund,
                ..
            } => (buyer, treasury, price, refund),
            TicketAction::ResaleCompleted {
                seller,
                buyer,
                price,
                refund,
                ..
            } => (buyer, seller, price, refund),
            _ => return Vec::new(),
        };

        let mut instructions = vec![SettlementInstruction::Transfer {
            from: buyer,
            to: payee,
            amount: price,
        }];
        if !refund.is_zero() {
            instructions.push(SettlementInstruction::Refund {
                to: buyer,
                amount: refund,
            });
        }
        instructions
    }

    /// Chains the instructions into effects that report their outcome
    ///
    /// Once a step fails the remaining steps are not sent to the backend;
    /// each is reported as [`SettlementError::Skipped`] so it still reaches
    /// the reconciliation journal.
    fn settlement_effect(
        env: &TicketSaleEnvironment,
        ticket_id: TicketId,
        instructions: Vec<SettlementInstruction>,
    ) -> Effect<TicketAction> {
        let halted = Arc::new(AtomicBool::new(false));
        let effects = instructions
            .into_iter()
            .map(|instruction| {
                let settlement = Arc::clone(&env.settlement);
                let clock = Arc::clone(&env.clock);
                let halted = Arc::clone(&halted);
                Effect::Future(Box::pin(async move {
                    let outcome = if halted.load(Ordering::Acquire) {
                        Err(SettlementError::Skipped)
                    } else {
                        instruction.execute(settlement.as_ref()).await
                    };
                    if outcome.is_err() {
                        halted.store(true, Ordering::Release);
                    }
                    Some(match outcome {
                        Ok(receipt) => TicketAction::SettlementSucceeded {
                            ticket_id,
                            instruction,
                            receipt,
                        },
                        Err(error) => TicketAction::SettlementFailed {
                            ticket_id,
                            instruction,
                            error,
                            at: clock.now(),
                        },
                    })
                }))
            })
            .collect();
        Effect::chain(effects)
    }

    fn handle_feedback(state: &mut TicketSaleState, action: TicketAction) {
        match action {
            TicketAction::SettlementSucceeded {
                ticket_id,
                instruction,
                receipt,
            } => {
                tracing::debug!(
                    %ticket_id,
                    ?instruction,
                    transaction_id = %receipt.transaction_id,
                    "Settlement confirmed"
                );
                state.settlements_confirmed += 1;
            },
            TicketAction::SettlementFailed {
                ticket_id,
                instruction,
                error,
                at,
            } => {
                tracing::error!(
                    %ticket_id,
                    ?instruction,
                    %error,
                    "Settlement failed after commit; recorded for reconciliation"
                );
                metrics::counter!("ticket_exchange.settlement.failed").increment(1);
                state.failed_settlements.push(FailedSettlement {
                    ticket_id,
                    instruction,
                    error,
                    at,
                });
            },
            _ => {},
        }
    }
}

impl Reducer for TicketSaleReducer {
    type State = TicketSaleState;
    type Action = TicketAction;
    type Environment = TicketSaleEnvironment;
    type Error = TicketError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects<Self::Action>, Self::Error> {
        if action.is_feedback() {
            Self::handle_feedback(state, action);
            return Ok(SmallVec::new());
        }

        let event = match Self::decide(state, &action, env.clock.now()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Events are outputs of this reducer, never inputs
                tracing::debug!(action = action.action_name(), "Ignoring non-command action");
                return Ok(SmallVec::new());
            },
            Err(error) => {
                tracing::warn!(
                    command = action.action_name(),
                    kind = error.kind(),
                    %error,
                    "Command rejected"
                );
                return Err(error);
            },
        };

        Self::apply_event(state, &event)?;
        debug_assert!(state.is_consistent(), "registry index out of sync");

        tracing::info!(
            command = action.action_name(),
            event = event.event_type(),
            "Command committed"
        );
        metrics::counter!("ticket_exchange.events.committed", "event" => event.action_name())
            .increment(1);

        let instructions = Self::settlement_for(&event, env.treasury);
        let ticket_id = match &event {
            TicketAction::TicketPurchased { ticket_id, .. }
            | TicketAction::ResaleCompleted { ticket_id, .. } => Some(*ticket_id),
            _ => None,
        };

        let mut effects: Effects<TicketAction> = smallvec![Effect::Publish(event)];
        if let Some(ticket_id) = ticket_id {
            effects.push(Self::settlement_effect(env, ticket_id, instructions));
        }
        Ok(effects)
    }
}
