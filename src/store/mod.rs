//! Persistence seams: the local ledger of matches, wager records and user
//! statistics, and wallet resolution.
//!
//! Two backends implement both traits:
//! - `ValkeyStore`: Valkey (Redis-compatible), the production store
//! - `MemoryStore`: dashmap-backed, used when Valkey is unreachable and in tests
//!
//! Idempotence lives here: `insert_wager` never overwrites an existing
//! `(user, match)` record and `mark_claimed` flips at most once. Callers update
//! statistics only when those report that a write actually happened.

pub mod memory;
pub mod valkey;

pub use memory::MemoryStore;
pub use valkey::ValkeyStore;

use crate::domain::{MatchInfo, WagerRecord};
use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-user running totals, in ETH.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub wagers: u64,
    pub total_wagered: Decimal,
    pub wins: u64,
    pub total_won: Decimal,
    pub total_profit: Decimal,
    pub refunds: u64,
    pub total_refunded: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsDelta {
    Wagered(Decimal),
    Won { payout: Decimal, profit: Decimal },
    Refunded(Decimal),
}

impl UserStats {
    pub fn apply(&mut self, delta: StatsDelta) {
        match delta {
            StatsDelta::Wagered(amount) => {
                self.wagers += 1;
                self.total_wagered += amount;
            }
            StatsDelta::Won { payout, profit } => {
                self.wins += 1;
                self.total_won += payout;
                self.total_profit += profit;
            }
            StatsDelta::Refunded(amount) => {
                self.refunds += 1;
                self.total_refunded += amount;
            }
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_match(&self, match_id: i64) -> anyhow::Result<Option<MatchInfo>>;

    async fn upsert_match(&self, info: &MatchInfo) -> anyhow::Result<()>;

    /// Record the on-chain id for a match. An id that is already set is kept;
    /// the stored id is returned either way.
    async fn set_on_chain_match_id(&self, match_id: i64, on_chain_match_id: u64) -> anyhow::Result<u64>;

    /// Matches with kickoff in `[from, to]`, ordered by kickoff.
    async fn matches_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MatchInfo>>;

    async fn get_wager(&self, user_id: &str, match_id: i64) -> anyhow::Result<Option<WagerRecord>>;

    /// Insert unless a record for `(user, match)` exists. Returns whether the
    /// record was written.
    async fn insert_wager(&self, record: &WagerRecord) -> anyhow::Result<bool>;

    /// Flip `claimed` to true. Returns whether this call did the flip.
    async fn mark_claimed(&self, user_id: &str, match_id: i64) -> anyhow::Result<bool>;

    async fn get_stats(&self, user_id: &str) -> anyhow::Result<UserStats>;

    async fn apply_stats(&self, user_id: &str, delta: StatsDelta) -> anyhow::Result<UserStats>;
}

#[async_trait]
pub trait WalletResolver: Send + Sync {
    async fn resolve_primary_wallet(&self, user_id: &str) -> anyhow::Result<Option<Address>>;

    /// Linked wallets in link order. May include the primary wallet.
    async fn resolve_linked_wallets(&self, user_id: &str) -> anyhow::Result<Vec<Address>>;
}

/// Primary wallet first, then linked wallets, without duplicates.
pub async fn candidate_wallets(
    resolver: &dyn WalletResolver,
    user_id: &str,
) -> anyhow::Result<Vec<Address>> {
    let mut wallets = Vec::new();
    if let Some(primary) = resolver.resolve_primary_wallet(user_id).await? {
        wallets.push(primary);
    }
    for wallet in resolver.resolve_linked_wallets(user_id).await? {
        if !wallets.contains(&wallet) {
            wallets.push(wallet);
        }
    }
    Ok(wallets)
}
