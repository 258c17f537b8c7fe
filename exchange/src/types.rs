//! Domain types for the ticket exchange.
//!
//! Identifiers, money and the owner sentinel shared by the registry and the
//! two ledgers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Number of a ticket in the fixed inventory (`1..=count`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(u32);

impl TicketId {
    /// Creates a `TicketId` from its number
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the ticket number
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External party identifier (a buyer, seller or swap counterparty)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(Uuid);

impl PartyId {
    /// Creates a new random `PartyId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PartyId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PartyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ownership
// ============================================================================

/// Current holder of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    /// Not sold yet; only a primary purchase or a mint can change this
    Unsold,
    /// Held by a party
    Party(PartyId),
}

impl Owner {
    /// Checks if the ticket is still unsold
    #[must_use]
    pub const fn is_unsold(&self) -> bool {
        matches!(self, Self::Unsold)
    }

    /// Returns the holding party, if any
    #[must_use]
    pub const fn party(&self) -> Option<PartyId> {
        match self {
            Self::Unsold => None,
            Self::Party(party) => Some(*party),
        }
    }

    /// Checks if `party` is the holder
    #[must_use]
    pub fn is(&self, party: PartyId) -> bool {
        self.party() == Some(party)
    }
}

impl From<PartyId> for Owner {
    fn from(party: PartyId) -> Self {
        Self::Party(party)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsold => write!(f, "unsold"),
            Self::Party(party) => write!(f, "{party}"),
        }
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount of value in minor units (hundredths of a price unit)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero value
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts, clamping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display_uses_two_decimals() {
        assert_eq!(Money::from_cents(1).to_string(), "0.01");
        assert_eq!(Money::from_cents(250).to_string(), "2.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn money_saturates_at_zero() {
        let one = Money::from_cents(1);
        let two = Money::from_cents(2);
        assert_eq!(two.saturating_sub(one), one);
        assert_eq!(one.saturating_sub(two), Money::ZERO);
        assert_eq!(Money::from_cents(u64::MAX).checked_add(one), None);
    }

    #[test]
    fn owner_helpers() {
        let party = PartyId::new();
        let owner = Owner::from(party);
        assert!(owner.is(party));
        assert!(!owner.is(PartyId::new()));
        assert!(Owner::Unsold.is_unsold());
        assert_eq!(Owner::Unsold.party(), None);
        assert_eq!(Owner::Unsold.to_string(), "unsold");
    }
}
