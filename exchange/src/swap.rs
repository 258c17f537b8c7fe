//! Swap offer ledger.
//!
//! At most one offer per ticket. An offer is only honoured while the ticket
//! is still at the ownership epoch it was made under.

use crate::error::TicketError;
use crate::registry::TicketRegistry;
use crate::types::{PartyId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standing proposal by a ticket holder to trade that ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOffer {
    /// Offered ticket
    pub ticket_id: TicketId,
    /// Holder at offer time
    pub offerer: PartyId,
    /// Ownership epoch of the ticket at offer time
    pub epoch: u64,
    /// When the offer was made
    pub offered_at: DateTime<Utc>,
}

impl SwapOffer {
    /// Whether the ticket is still held by the offerer under the same epoch
    #[must_use]
    pub fn is_valid(&self, registry: &TicketRegistry) -> bool {
        registry.owner_of(self.ticket_id).is_ok_and(|owner| owner.is(self.offerer))
            && registry.epoch_of(self.ticket_id) == Ok(self.epoch)
    }
}

/// Read-only view returned by `get_swap_offer`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOfferView {
    /// Party that made the offer
    pub offerer: PartyId,
    /// False once the ticket has changed hands since the offer
    pub active: bool,
}

/// Outstanding swap offers keyed by ticket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLedger {
    offers: BTreeMap<TicketId, SwapOffer>,
}

impl SwapLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `offerer` may offer `ticket_id` and returns the epoch to record
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicket`] if the id is out of range
    /// - [`TicketError::NotOwner`] if `offerer` does not hold the ticket
    pub fn validate_offer(
        registry: &TicketRegistry,
        ticket_id: TicketId,
        offerer: PartyId,
    ) -> Result<u64, TicketError> {
        registry.require_owner(ticket_id, offerer)
    }

    /// Records an offer, replacing any prior one on the same ticket
    pub fn record(&mut self, offer: SwapOffer) {
        self.offers.insert(offer.ticket_id, offer);
    }

    /// Returns the offer on `ticket_id` if it can still be accepted
    ///
    /// # Errors
    ///
    /// - [`TicketError::NoActiveOffer`] if nothing was offered
    /// - [`TicketError::StaleOffer`] if the ticket changed hands since
    pub fn resolve(
        &self,
        registry: &TicketRegistry,
        ticket_id: TicketId,
    ) -> Result<&SwapOffer, TicketError> {
        let offer = self
            .offers
            .get(&ticket_id)
            .ok_or(TicketError::NoActiveOffer { ticket_id })?;
        if offer.is_valid(registry) {
            Ok(offer)
        } else {
            Err(TicketError::StaleOffer { ticket_id })
        }
    }

    /// Checks that `offerer` may revoke the offer on `ticket_id`
    ///
    /// A stale offer can still be withdrawn by the party that made it.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NoActiveOffer`] if nothing was offered
    /// - [`TicketError::NotOwner`] if `offerer` did not make the offer
    pub fn validate_cancel(&self, ticket_id: TicketId, offerer: PartyId) -> Result<(), TicketError> {
        let offer = self
            .offers
            .get(&ticket_id)
            .ok_or(TicketError::NoActiveOffer { ticket_id })?;
        if offer.offerer == offerer {
            Ok(())
        } else {
            Err(TicketError::NotOwner {
                ticket_id,
                claimed: offerer.into(),
            })
        }
    }

    /// Deletes the offer on `ticket_id`, if any
    pub fn remove(&mut self, ticket_id: TicketId) -> Option<SwapOffer> {
        self.offers.remove(&ticket_id)
    }

    /// Offerer and liveness of the offer on `ticket_id`
    #[must_use]
    pub fn view(&self, registry: &TicketRegistry, ticket_id: TicketId) -> Option<SwapOfferView> {
        self.offers.get(&ticket_id).map(|offer| SwapOfferView {
            offerer: offer.offerer,
            active: offer.is_valid(registry),
        })
    }

    /// Number of offers still valid
    #[must_use]
    pub fn active_count(&self, registry: &TicketRegistry) -> usize {
        self.offers.values().filter(|offer| offer.is_valid(registry)).count()
    }
}
