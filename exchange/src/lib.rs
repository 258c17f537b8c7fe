//! # Ticket Exchange
//!
//! Ownership state machine for a fixed inventory of numbered tickets.
//!
//! Tickets change hands in three ways: a primary sale from the unsold
//! inventory, a two-sided swap between holders, and resale against a listing.
//! All three run through a single reducer ([`purchase::TicketSaleReducer`])
//! inside one store, so:
//!
//! - every ticket has exactly one owner (or is unsold) at all times
//! - a rejected command changes nothing
//! - swap offers and resale listings die with the ownership they were made
//!   under, even if the ticket later returns to the same party
//!
//! Value movement is delegated to a [`settlement::Settlement`] backend after
//! each commit. Settlement failures are journaled, never rolled back.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticket_exchange::{ExchangeConfig, MockSettlement, Money, PartyId, TicketExchange, TicketId};
//! use ticket_exchange_core::environment::SystemClock;
//!
//! let config = ExchangeConfig::from_env();
//! let exchange = TicketExchange::from_config(&config, Arc::new(SystemClock), MockSettlement::shared());
//!
//! exchange.initialize(100, Money::from_cents(1)).await?;
//! let alice = PartyId::new();
//! exchange.buy_ticket(TicketId::new(1), alice, Money::from_cents(1)).await?;
//! assert_eq!(exchange.get_ticket_of(alice).await, Some(TicketId::new(1)));
//! ```

pub mod config;
pub mod error;
pub mod exchange;
pub mod purchase;
pub mod registry;
pub mod resale;
pub mod settlement;
pub mod swap;
pub mod types;

pub use config::ExchangeConfig;
pub use error::TicketError;
pub use exchange::{ExchangeError, TicketExchange, TicketStore};
pub use purchase::{
    FailedSettlement, TicketAction, TicketSaleEnvironment, TicketSaleReducer, TicketSaleState,
};
pub use registry::TicketRegistry;
pub use resale::{ResaleEntry, ResaleLedger, ResaleListing};
pub use settlement::{
    MockSettlement, Settlement, SettlementError, SettlementInstruction, SettlementReceipt,
};
pub use swap::{SwapLedger, SwapOffer, SwapOfferView};
pub use types::{Money, Owner, PartyId, TicketId};
