// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance refresh after funds move.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use super::cache::TtlCache;
use crate::ledger::{LedgerError, LedgerRpc};

const BALANCE_CACHE_CAPACITY: usize = 1_024;
const BALANCE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Balances {
    pub address: String,
    pub balance_drops: u64,
    /// Ledger objects owned; open escrows count towards the reserve.
    pub owner_count: u32,
    pub refreshed_at: DateTime<Utc>,
}

#[async_trait]
pub trait BalanceRefresher: Send + Sync {
    async fn refresh_balances(&self, address: &str) -> Result<Balances, LedgerError>;
}

/// Reads balances from `account_info` and keeps the last result per address.
pub struct LedgerBalanceRefresher {
    ledger: Arc<dyn LedgerRpc>,
    cache: TtlCache<Balances>,
}

impl LedgerBalanceRefresher {
    pub fn new(ledger: Arc<dyn LedgerRpc>) -> Self {
        Self {
            ledger,
            cache: TtlCache::new(BALANCE_CACHE_CAPACITY, BALANCE_CACHE_TTL),
        }
    }
}

#[async_trait]
impl BalanceRefresher for LedgerBalanceRefresher {
    async fn refresh_balances(&self, address: &str) -> Result<Balances, LedgerError> {
        let info = self.ledger.account_info(address).await.inspect_err(|_| {
            self.cache.invalidate(address);
        })?;

        let balances = Balances {
            address: info.address,
            balance_drops: info.balance_drops,
            owner_count: info.owner_count,
            refreshed_at: Utc::now(),
        };
        debug!(
            address,
            balance_drops = balances.balance_drops,
            "Refreshed balances"
        );
        self.cache.put(address, balances.clone());
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FakeLedger;

    const ADDRESS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[tokio::test]
    async fn refresh_updates_cache() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.fund(ADDRESS, 5, 75_000_000);
        let refresher = LedgerBalanceRefresher::new(ledger.clone());

        assert!(refresher.cache.get(ADDRESS).is_none());
        let balances = refresher.refresh_balances(ADDRESS).await.unwrap();
        assert_eq!(balances.balance_drops, 75_000_000);
        assert_eq!(refresher.cache.get(ADDRESS).unwrap().balance_drops, 75_000_000);
    }

    #[tokio::test]
    async fn failed_refresh_drops_stale_entry() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.fund(ADDRESS, 5, 75_000_000);
        let refresher = LedgerBalanceRefresher::new(ledger.clone());
        refresher.refresh_balances(ADDRESS).await.unwrap();

        ledger.set_unreachable(true);
        assert!(refresher.refresh_balances(ADDRESS).await.is_err());
        assert!(refresher.cache.get(ADDRESS).is_none());
    }
}
