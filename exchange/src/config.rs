//! Configuration management for the ticket exchange.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unset or unparsable values fall back to the default.

use crate::types::{Money, PartyId};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use ticket_exchange_runtime::StoreConfig;
use uuid::Uuid;

/// Exchange configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Inventory created at startup
    pub inventory: InventoryConfig,
    /// Store tuning
    pub store: StoreSettings,
    /// Log filter (trace, debug, info, warn, error or a directive list)
    pub log_level: String,
}

/// Inventory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Number of tickets
    pub ticket_count: u32,
    /// Primary sale price in minor units
    pub base_price_cents: u64,
    /// Party receiving primary sale proceeds
    pub treasury: PartyId,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Upper bound on waiting for the write lock, in milliseconds
    pub lock_timeout_ms: u64,
    /// Capacity of the event broadcast channel
    pub broadcast_capacity: usize,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl ExchangeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            inventory: InventoryConfig {
                ticket_count: parse_or(&lookup, "TICKET_COUNT", 100),
                base_price_cents: parse_or(&lookup, "TICKET_BASE_PRICE_CENTS", 1),
                treasury: lookup("TREASURY_PARTY_ID")
                    .and_then(|value| Uuid::parse_str(value.trim()).ok())
                    .map_or_else(|| PartyId::from_uuid(Uuid::nil()), PartyId::from_uuid),
            },
            store: StoreSettings {
                lock_timeout_ms: parse_or(&lookup, "STORE_LOCK_TIMEOUT_MS", 5_000),
                broadcast_capacity: parse_or(&lookup, "EVENT_BROADCAST_CAPACITY", 256),
                shutdown_timeout: parse_or(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Base price as money
    #[must_use]
    pub const fn base_price(&self) -> Money {
        Money::from_cents(self.inventory.base_price_cents)
    }

    /// Runtime configuration for the store
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_lock_timeout(Duration::from_millis(self.store.lock_timeout_ms))
            .with_broadcast_capacity(self.store.broadcast_capacity)
            .with_shutdown_timeout(Duration::from_secs(self.store.shutdown_timeout))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
