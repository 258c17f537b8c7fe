//! `TicketExchange`: typed front door over the store.
//!
//! Every mutating method sends one command through the store's write lock
//! and returns an [`EffectHandle`] that completes once settlement for that
//! command has been attempted. Queries read a consistent snapshot.

use crate::config::ExchangeConfig;
use crate::error::TicketError;
use crate::purchase::{
    FailedSettlement, TicketAction, TicketSaleEnvironment, TicketSaleReducer, TicketSaleState,
};
use crate::resale::ResaleEntry;
use crate::settlement::Settlement;
use crate::swap::SwapOfferView;
use crate::types::{Money, Owner, PartyId, TicketId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ticket_exchange_core::environment::Clock;
use ticket_exchange_runtime::{EffectHandle, Store, StoreConfig, StoreError};
use tokio::sync::broadcast;

/// Store specialised to the ticket sale
pub type TicketStore = Store<TicketSaleState, TicketAction, TicketSaleEnvironment, TicketSaleReducer>;

/// Failure of an exchange call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The command was refused; nothing changed
    #[error(transparent)]
    Ticket(#[from] TicketError),

    /// The exchange was too busy to take the command in time; nothing changed
    #[error("Exchange busy: no lock within {0:?}")]
    Busy(Duration),

    /// The exchange no longer accepts commands
    #[error("Exchange is shutting down")]
    ShuttingDown,

    /// Shutdown gave up with settlements still running
    #[error("Shutdown timed out with {0} settlements still running")]
    ShutdownTimeout(usize),
}

impl ExchangeError {
    /// Whether the same call may succeed later or with different input
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Ticket(error) => error.is_retryable(),
            Self::Busy(_) => true,
            Self::ShuttingDown | Self::ShutdownTimeout(_) => false,
        }
    }

    /// The domain rejection, if that is what this error is
    #[must_use]
    pub const fn ticket_error(&self) -> Option<&TicketError> {
        match self {
            Self::Ticket(error) => Some(error),
            _ => None,
        }
    }
}

impl From<StoreError<TicketError>> for ExchangeError {
    fn from(error: StoreError<TicketError>) -> Self {
        match error {
            StoreError::Rejected(error) => Self::Ticket(error),
            StoreError::LockTimeout(timeout) => Self::Busy(timeout),
            StoreError::ShutdownInProgress => Self::ShuttingDown,
            StoreError::ShutdownTimeout(remaining) => Self::ShutdownTimeout(remaining),
        }
    }
}

/// Ticket exchange
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TicketExchange {
    store: TicketStore,
}

impl TicketExchange {
    /// Creates an exchange with an empty (uninitialized) inventory
    #[must_use]
    pub fn new(environment: TicketSaleEnvironment, config: StoreConfig) -> Self {
        Self {
            store: Store::with_config(
                TicketSaleState::new(),
                TicketSaleReducer::new(),
                environment,
                config,
            ),
        }
    }

    /// Creates an exchange wired from configuration
    #[must_use]
    pub fn from_config(
        config: &ExchangeConfig,
        clock: Arc<dyn Clock>,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        let environment = TicketSaleEnvironment::new(clock, settlement, config.inventory.treasury);
        Self::new(environment, config.store_config())
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &TicketStore {
        &self.store
    }

    async fn dispatch(&self, action: TicketAction) -> Result<EffectHandle, ExchangeError> {
        Ok(self.store.send(action).await?)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Create `count` unsold tickets at `base_price`
    ///
    /// # Errors
    ///
    /// [`TicketError::AlreadyInitialized`], [`TicketError::InvalidInventory`],
    /// or a store failure.
    pub async fn initialize(&self, count: u32, base_price: Money) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::Initialize { count, base_price }).await
    }

    /// Buy a ticket, from the primary sale or against its resale listing
    ///
    /// # Errors
    ///
    /// [`TicketError::TicketAlreadyOwned`], [`TicketError::InsufficientPayment`],
    /// [`TicketError::UnknownTicket`], or a store failure.
    pub async fn buy_ticket(
        &self,
        ticket_id: TicketId,
        buyer: PartyId,
        paid: Money,
    ) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::BuyTicket {
            ticket_id,
            buyer,
            paid,
        })
        .await
    }

    /// Assign an unsold ticket before the sale opens
    ///
    /// # Errors
    ///
    /// [`TicketError::AlreadyOwned`], [`TicketError::MintingClosed`],
    /// [`TicketError::UnknownTicket`], or a store failure.
    pub async fn mint_ticket(&self, owner: PartyId, ticket_id: TicketId) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::MintTicket { ticket_id, owner }).await
    }

    /// Offer a held ticket for swap
    ///
    /// # Errors
    ///
    /// [`TicketError::NotOwner`], [`TicketError::UnknownTicket`], or a store failure.
    pub async fn offer_swap(&self, ticket_id: TicketId, offerer: PartyId) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::OfferSwap { ticket_id, offerer }).await
    }

    /// Trade `counter_ticket` for the ticket carrying the offer
    ///
    /// # Errors
    ///
    /// [`TicketError::NoActiveOffer`], [`TicketError::StaleOffer`],
    /// [`TicketError::NotOwner`], [`TicketError::SelfSwap`], or a store failure.
    pub async fn accept_swap(
        &self,
        offered_ticket: TicketId,
        counter_ticket: TicketId,
        acceptor: PartyId,
    ) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::AcceptSwap {
            offered_ticket,
            counter_ticket,
            acceptor,
        })
        .await
    }

    /// Same as [`Self::accept_swap`]
    ///
    /// # Errors
    ///
    /// See [`Self::accept_swap`].
    pub async fn swap_tickets(
        &self,
        offered_ticket: TicketId,
        counter_ticket: TicketId,
        acceptor: PartyId,
    ) -> Result<EffectHandle, ExchangeError> {
        self.accept_swap(offered_ticket, counter_ticket, acceptor).await
    }

    /// Withdraw a swap offer
    ///
    /// # Errors
    ///
    /// [`TicketError::NoActiveOffer`], [`TicketError::NotOwner`], or a store failure.
    pub async fn cancel_swap_offer(&self, ticket_id: TicketId, offerer: PartyId) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::CancelSwapOffer { ticket_id, offerer }).await
    }

    /// List a held ticket for resale at `price`
    ///
    /// # Errors
    ///
    /// [`TicketError::NotOwner`], [`TicketError::InvalidPrice`],
    /// [`TicketError::UnknownTicket`], or a store failure.
    pub async fn list_for_resale(
        &self,
        ticket_id: TicketId,
        price: Money,
        lister: PartyId,
    ) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::ListForResale {
            ticket_id,
            lister,
            price,
        })
        .await
    }

    /// List the lister's lowest-numbered ticket for resale at `price`
    ///
    /// # Errors
    ///
    /// [`TicketError::NoTicketHeld`], [`TicketError::InvalidPrice`], or a store failure.
    pub async fn resale_ticket(&self, price: Money, lister: PartyId) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::ResaleTicket { lister, price }).await
    }

    /// Buy a ticket against its resale listing
    ///
    /// # Errors
    ///
    /// [`TicketError::NoActiveListing`], [`TicketError::StaleListing`],
    /// [`TicketError::InsufficientPayment`], [`TicketError::SelfPurchase`],
    /// or a store failure.
    pub async fn accept_resale(
        &self,
        ticket_id: TicketId,
        buyer: PartyId,
        paid: Money,
    ) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::AcceptResale {
            ticket_id,
            buyer,
            paid,
        })
        .await
    }

    /// Withdraw a resale listing
    ///
    /// # Errors
    ///
    /// [`TicketError::NoActiveListing`], [`TicketError::NotOwner`], or a store failure.
    pub async fn cancel_resale(&self, ticket_id: TicketId, lister: PartyId) -> Result<EffectHandle, ExchangeError> {
        self.dispatch(TicketAction::CancelResale { ticket_id, lister }).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current owner of a ticket
    ///
    /// # Errors
    ///
    /// [`TicketError::UnknownTicket`] if the id is out of range.
    pub async fn owner_of(&self, ticket_id: TicketId) -> Result<Owner, TicketError> {
        self.store.state(|state| state.owner_of(ticket_id)).await
    }

    /// Same as [`Self::owner_of`]
    ///
    /// # Errors
    ///
    /// See [`Self::owner_of`].
    pub async fn get_ticket_owner(&self, ticket_id: TicketId) -> Result<Owner, TicketError> {
        self.owner_of(ticket_id).await
    }

    /// Offer recorded on a ticket, with its liveness
    pub async fn get_swap_offer(&self, ticket_id: TicketId) -> Option<SwapOfferView> {
        self.store.state(|state| state.get_swap_offer(ticket_id)).await
    }

    /// Valid resale listings in ticket order, as of now
    pub async fn check_resale(&self) -> Vec<ResaleEntry> {
        self.store.state(|state| state.check_resale().collect()).await
    }

    /// Lowest-numbered ticket held by `party`
    pub async fn get_ticket_of(&self, party: PartyId) -> Option<TicketId> {
        self.store.state(|state| state.ticket_of(party)).await
    }

    /// Every ticket held by `party`
    pub async fn tickets_of(&self, party: PartyId) -> Vec<TicketId> {
        self.store
            .state(|state| state.registry.tickets_of(party).collect())
            .await
    }

    /// Number of tickets not sold yet
    pub async fn unsold_count(&self) -> usize {
        self.store.state(|state| state.registry.unsold_count()).await
    }

    /// Settlements that failed after their commit
    pub async fn failed_settlements(&self) -> Vec<FailedSettlement> {
        self.store.state(|state| state.failed_settlements.clone()).await
    }

    /// Full copy of the current state
    pub async fn snapshot(&self) -> TicketSaleState {
        self.store.state(TicketSaleState::clone).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribe to committed events, in commit order
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<TicketAction> {
        self.store.subscribe_actions()
    }

    /// Stop accepting commands and wait for running settlements
    ///
    /// # Errors
    ///
    /// [`ExchangeError::ShutdownTimeout`] if settlements are still running
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ExchangeError> {
        Ok(self.store.shutdown(timeout).await?)
    }
}
