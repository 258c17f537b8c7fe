//! Ticket registry: the authoritative map of ticket number to owner.
//!
//! The registry is the only place ownership changes. It keeps a reverse
//! index (party → tickets) in step with the forward map, and a per-ticket
//! ownership epoch that increments on every transfer. Offers and listings
//! remember the epoch they were created under; a mismatch voids them.

use crate::error::TicketError;
use crate::types::{Money, Owner, PartyId, TicketId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Ownership record of a single ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TicketSlot {
    owner: Owner,
    epoch: u64,
}

/// Authoritative ticket ownership
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRegistry {
    /// `None` until the inventory is created
    base_price: Option<Money>,
    /// Slot `n - 1` holds ticket `n`
    slots: Vec<TicketSlot>,
    holdings: BTreeMap<PartyId, BTreeSet<TicketId>>,
}

impl TicketRegistry {
    /// Creates an empty, uninitialized registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates an `initialize` request without applying it
    ///
    /// # Errors
    ///
    /// - [`TicketError::AlreadyInitialized`] on a second call
    /// - [`TicketError::InvalidInventory`] for zero tickets or a zero price
    pub const fn check_initialize(&self, count: u32, base_price: Money) -> Result<(), TicketError> {
        if self.base_price.is_some() {
            return Err(TicketError::AlreadyInitialized);
        }
        if count == 0 || base_price.is_zero() {
            return Err(TicketError::InvalidInventory { count, base_price });
        }
        Ok(())
    }

    /// Creates `count` unsold tickets priced at `base_price`
    ///
    /// # Errors
    ///
    /// See [`TicketRegistry::check_initialize`].
    pub fn initialize(&mut self, count: u32, base_price: Money) -> Result<(), TicketError> {
        self.check_initialize(count, base_price)?;
        self.slots = vec![
            TicketSlot {
                owner: Owner::Unsold,
                epoch: 0,
            };
            count as usize
        ];
        self.base_price = Some(base_price);
        Ok(())
    }

    /// Whether the inventory has been created
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.base_price.is_some()
    }

    /// Inventory-wide original price, once initialized
    #[must_use]
    pub const fn base_price(&self) -> Option<Money> {
        self.base_price
    }

    /// Number of tickets in the inventory
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks if the inventory is empty (always true before initialization)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every ticket id in the inventory, in order
    pub fn ids(&self) -> impl Iterator<Item = TicketId> + '_ {
        (1..=self.slots.len()).filter_map(|n| u32::try_from(n).ok().map(TicketId::new))
    }

    fn slot(&self, ticket_id: TicketId) -> Result<&TicketSlot, TicketError> {
        let index = (ticket_id.get() as usize).checked_sub(1);
        index
            .and_then(|i| self.slots.get(i))
            .ok_or(TicketError::UnknownTicket { ticket_id })
    }

    fn slot_mut(&mut self, ticket_id: TicketId) -> Result<&mut TicketSlot, TicketError> {
        let index = (ticket_id.get() as usize).checked_sub(1);
        index
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(TicketError::UnknownTicket { ticket_id })
    }

    /// Current owner of a ticket
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::UnknownTicket`] if the id is out of range.
    pub fn owner_of(&self, ticket_id: TicketId) -> Result<Owner, TicketError> {
        self.slot(ticket_id).map(|slot| slot.owner)
    }

    /// Ownership epoch of a ticket (number of transfers so far)
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::UnknownTicket`] if the id is out of range.
    pub fn epoch_of(&self, ticket_id: TicketId) -> Result<u64, TicketError> {
        self.slot(ticket_id).map(|slot| slot.epoch)
    }

    /// Verifies that `party` holds `ticket_id` and returns the current epoch
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicket`] if the id is out of range
    /// - [`TicketError::NotOwner`] if `party` is not the holder
    pub fn require_owner(&self, ticket_id: TicketId, party: PartyId) -> Result<u64, TicketError> {
        let slot = self.slot(ticket_id)?;
        if slot.owner.is(party) {
            Ok(slot.epoch)
        } else {
            Err(TicketError::NotOwner {
                ticket_id,
                claimed: Owner::Party(party),
            })
        }
    }

    /// Lowest-numbered ticket held by `party`
    #[must_use]
    pub fn ticket_of(&self, party: PartyId) -> Option<TicketId> {
        self.holdings
            .get(&party)
            .and_then(|tickets| tickets.first().copied())
    }

    /// All tickets held by `party`, in order
    pub fn tickets_of(&self, party: PartyId) -> impl Iterator<Item = TicketId> + '_ {
        self.holdings.get(&party).into_iter().flatten().copied()
    }

    /// Number of tickets still unsold
    #[must_use]
    pub fn unsold_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.owner.is_unsold()).count()
    }

    /// Atomically reassigns a ticket from `from` to `to`
    ///
    /// Bumps the ticket's epoch, which voids every offer and listing made
    /// under the previous owner.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicket`] if the id is out of range
    /// - [`TicketError::NotOwner`] if `from` is not the current owner
    pub fn transfer(&mut self, ticket_id: TicketId, from: Owner, to: Owner) -> Result<(), TicketError> {
        let slot = self.slot_mut(ticket_id)?;
        if slot.owner != from {
            return Err(TicketError::NotOwner {
                ticket_id,
                claimed: from,
            });
        }
        slot.owner = to;
        slot.epoch += 1;

        if let Some(previous) = from.party() {
            if let Some(tickets) = self.holdings.get_mut(&previous) {
                tickets.remove(&ticket_id);
                if tickets.is_empty() {
                    self.holdings.remove(&previous);
                }
            }
        }
        if let Some(next) = to.party() {
            self.holdings.entry(next).or_default().insert(ticket_id);
        }
        Ok(())
    }

    /// Trades `first` (held by `first_owner`) for `second` (held by
    /// `second_owner`) as one unit
    ///
    /// Both sides are validated before either ticket moves.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicket`] if either id is out of range
    /// - [`TicketError::NotOwner`] if either party does not hold its side
    pub fn exchange(
        &mut self,
        first: TicketId,
        first_owner: PartyId,
        second: TicketId,
        second_owner: PartyId,
    ) -> Result<(), TicketError> {
        self.require_owner(first, first_owner)?;
        self.require_owner(second, second_owner)?;

        self.transfer(first, first_owner.into(), second_owner.into())?;
        self.transfer(second, second_owner.into(), first_owner.into())
    }

    /// Checks that the reverse index matches the forward map exactly
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.holdings.values().map(BTreeSet::len).sum();
        let held = self.slots.iter().filter(|slot| !slot.owner.is_unsold()).count();
        indexed == held
            && self.holdings.iter().all(|(party, tickets)| {
                !tickets.is_empty()
                    && tickets
                        .iter()
                        .all(|ticket| self.owner_of(*ticket).is_ok_and(|owner| owner.is(*party)))
            })
    }
}
