//! Resale listing ledger.
//!
//! Listings follow the same epoch rule as swap offers: a listing made before
//! the ticket last changed hands is void, even if the lister holds it again.

use crate::error::TicketError;
use crate::registry::TicketRegistry;
use crate::types::{Money, PartyId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standing offer to sell a held ticket at a fixed price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleListing {
    /// Listed ticket
    pub ticket_id: TicketId,
    /// Holder at listing time
    pub lister: PartyId,
    /// Asking price
    pub price: Money,
    /// Ownership epoch of the ticket at listing time
    pub epoch: u64,
    /// When the ticket was listed
    pub listed_at: DateTime<Utc>,
}

impl ResaleListing {
    /// Whether the ticket is still held by the lister under the same epoch
    #[must_use]
    pub fn is_valid(&self, registry: &TicketRegistry) -> bool {
        registry.owner_of(self.ticket_id).is_ok_and(|owner| owner.is(self.lister))
            && registry.epoch_of(self.ticket_id) == Ok(self.epoch)
    }
}

/// One row of `check_resale`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleEntry {
    /// Listed ticket
    pub ticket_id: TicketId,
    /// Asking price
    pub price: Money,
    /// Current holder
    pub lister: PartyId,
}

/// Outstanding resale listings keyed by ticket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleLedger {
    listings: BTreeMap<TicketId, ResaleListing>,
}

impl ResaleLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `lister` may list `ticket_id` at `price` and returns the epoch
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicket`] if the id is out of range
    /// - [`TicketError::NotOwner`] if `lister` does not hold the ticket
    /// - [`TicketError::InvalidPrice`] if the price is zero
    pub fn validate_listing(
        registry: &TicketRegistry,
        ticket_id: TicketId,
        lister: PartyId,
        price: Money,
    ) -> Result<u64, TicketError> {
        let epoch = registry.require_owner(ticket_id, lister)?;
        if price.is_zero() {
            return Err(TicketError::InvalidPrice { price });
        }
        Ok(epoch)
    }

    /// Records a listing, replacing any prior one on the same ticket
    pub fn record(&mut self, listing: ResaleListing) {
        self.listings.insert(listing.ticket_id, listing);
    }

    /// Returns the listing on `ticket_id` if it can still be bought
    ///
    /// # Errors
    ///
    /// - [`TicketError::NoActiveListing`] if the ticket is not listed
    /// - [`TicketError::StaleListing`] if the ticket changed hands since
    pub fn resolve(
        &self,
        registry: &TicketRegistry,
        ticket_id: TicketId,
    ) -> Result<&ResaleListing, TicketError> {
        let listing = self
            .listings
            .get(&ticket_id)
            .ok_or(TicketError::NoActiveListing { ticket_id })?;
        if listing.is_valid(registry) {
            Ok(listing)
        } else {
            Err(TicketError::StaleListing { ticket_id })
        }
    }

    /// Checks that `lister` may withdraw the listing on `ticket_id`
    ///
    /// # Errors
    ///
    /// - [`TicketError::NoActiveListing`] if the ticket is not listed
    /// - [`TicketError::NotOwner`] if `lister` did not list it
    pub fn validate_cancel(&self, ticket_id: TicketId, lister: PartyId) -> Result<(), TicketError> {
        let listing = self
            .listings
            .get(&ticket_id)
            .ok_or(TicketError::NoActiveListing { ticket_id })?;
        if listing.lister == lister {
            Ok(())
        } else {
            Err(TicketError::NotOwner {
                ticket_id,
                claimed: lister.into(),
            })
        }
    }

    /// Deletes the listing on `ticket_id`, if any
    pub fn remove(&mut self, ticket_id: TicketId) -> Option<ResaleListing> {
        self.listings.remove(&ticket_id)
    }

    /// Raw listing on `ticket_id`, valid or not
    #[must_use]
    pub fn get(&self, ticket_id: TicketId) -> Option<&ResaleListing> {
        self.listings.get(&ticket_id)
    }

    /// Valid listings in ticket order
    ///
    /// Computed lazily from the current state on every call; stale listings
    /// are skipped.
    pub fn check_resale<'a>(
        &'a self,
        registry: &'a TicketRegistry,
    ) -> impl Iterator<Item = ResaleEntry> + 'a {
        self.listings
            .values()
            .filter(move |listing| listing.is_valid(registry))
            .map(|listing| ResaleEntry {
                ticket_id: listing.ticket_id,
                price: listing.price,
                lister: listing.lister,
            })
    }
}
