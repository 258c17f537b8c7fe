//! Typed failures of the ownership state machine.
//!
//! Every variant is a validation failure raised before any mutation.

use crate::types::{Money, Owner, PartyId, TicketId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a ticket operation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketError {
    /// Ticket number outside the fixed inventory
    #[error("Ticket {ticket_id} is not part of the inventory")]
    UnknownTicket {
        /// Requested ticket
        ticket_id: TicketId,
    },

    /// Caller does not hold the ticket it acts on
    #[error("{claimed} does not own ticket {ticket_id}")]
    NotOwner {
        /// Ticket acted on
        ticket_id: TicketId,
        /// Party that claimed ownership
        claimed: Owner,
    },

    /// Mint attempted on a ticket that already has an owner
    #[error("Ticket {ticket_id} is already owned by {owner}")]
    AlreadyOwned {
        /// Ticket to mint
        ticket_id: TicketId,
        /// Current owner
        owner: PartyId,
    },

    /// Primary purchase attempted on a ticket that is no longer unsold
    #[error("Ticket {ticket_id} already owned")]
    TicketAlreadyOwned {
        /// Ticket to buy
        ticket_id: TicketId,
    },

    /// Supplied value below the required price
    #[error("Insufficient payment: paid {paid}, required {required}")]
    InsufficientPayment {
        /// Price to pay
        required: Money,
        /// Value supplied
        paid: Money,
    },

    /// No swap offer recorded for the ticket
    #[error("No active swap offer for ticket {ticket_id}")]
    NoActiveOffer {
        /// Ticket looked up
        ticket_id: TicketId,
    },

    /// Swap offer voided by an ownership change
    #[error("Swap offer for ticket {ticket_id} is stale")]
    StaleOffer {
        /// Ticket looked up
        ticket_id: TicketId,
    },

    /// No resale listing recorded for the ticket
    #[error("No active resale listing for ticket {ticket_id}")]
    NoActiveListing {
        /// Ticket looked up
        ticket_id: TicketId,
    },

    /// Resale listing voided by an ownership change
    #[error("Resale listing for ticket {ticket_id} is stale")]
    StaleListing {
        /// Ticket looked up
        ticket_id: TicketId,
    },

    /// Resale price must be positive
    #[error("Invalid resale price {price}")]
    InvalidPrice {
        /// Rejected price
        price: Money,
    },

    /// Inventory can only be created once
    #[error("Inventory already initialized")]
    AlreadyInitialized,

    /// Inventory needs at least one ticket and a positive base price
    #[error("Invalid inventory: {count} tickets at {base_price}")]
    InvalidInventory {
        /// Requested ticket count
        count: u32,
        /// Requested base price
        base_price: Money,
    },

    /// A party cannot swap with itself or trade a ticket for itself
    #[error("Ticket {ticket_id} cannot be swapped with its own holder")]
    SelfSwap {
        /// Offered ticket
        ticket_id: TicketId,
    },

    /// A lister cannot buy its own listing
    #[error("Ticket {ticket_id} cannot be bought back by its lister")]
    SelfPurchase {
        /// Listed ticket
        ticket_id: TicketId,
    },

    /// The party holds no ticket to list
    #[error("{party} holds no ticket")]
    NoTicketHeld {
        /// Caller
        party: PartyId,
    },

    /// Minting is only possible before the first primary sale
    #[error("Minting is closed once the sale has opened")]
    MintingClosed,
}

impl TicketError {
    /// Whether the caller may succeed by retrying with different input
    ///
    /// Only an insufficient payment can be fixed by the caller alone (by
    /// paying more). Every other kind depends on ticket state the caller
    /// does not control.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientPayment { .. })
    }

    /// Stable short name of the failure kind, used as a log and metric label
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTicket { .. } => "unknown_ticket",
            Self::NotOwner { .. } => "not_owner",
            Self::AlreadyOwned { .. } => "already_owned",
            Self::TicketAlreadyOwned { .. } => "ticket_already_owned",
            Self::InsufficientPayment { .. } => "insufficient_payment",
            Self::NoActiveOffer { .. } => "no_active_offer",
            Self::StaleOffer { .. } => "stale_offer",
            Self::NoActiveListing { .. } => "no_active_listing",
            Self::StaleListing { .. } => "stale_listing",
            Self::InvalidPrice { .. } => "invalid_price",
            Self::AlreadyInitialized => "already_initialized",
            Self::InvalidInventory { .. } => "invalid_inventory",
            Self::SelfSwap { .. } => "self_swap",
            Self::SelfPurchase { .. } => "self_purchase",
            Self::NoTicketHeld { .. } => "no_ticket_held",
            Self::MintingClosed => "minting_closed",
        }
    }
}
