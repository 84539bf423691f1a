use crate::domain::{MatchInfo, WagerRecord};
use crate::store::{Ledger, StatsDelta, UserStats, WalletResolver};
use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Process-local store. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    matches: Arc<DashMap<i64, MatchInfo>>,
    wagers: Arc<DashMap<(String, i64), WagerRecord>>,
    stats: Arc<DashMap<String, UserStats>>,
    primary: Arc<DashMap<String, Address>>,
    linked: Arc<DashMap<String, Vec<Address>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_primary_wallet(&self, user_id: &str, wallet: Address) {
        self.primary.insert(user_id.to_string(), wallet);
    }

    pub fn link_wallet(&self, user_id: &str, wallet: Address) {
        let mut wallets = self.linked.entry(user_id.to_string()).or_default();
        if !wallets.contains(&wallet) {
            wallets.push(wallet);
        }
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn get_match(&self, match_id: i64) -> anyhow::Result<Option<MatchInfo>> {
        Ok(self.matches.get(&match_id).map(|m| m.clone()))
    }

    async fn upsert_match(&self, info: &MatchInfo) -> anyhow::Result<()> {
        match self.matches.entry(info.id) {
            Entry::Occupied(mut existing) => {
                let on_chain = existing.get().on_chain_match_id;
                let mut updated = info.clone();
                updated.on_chain_match_id = on_chain.or(info.on_chain_match_id);
                existing.insert(updated);
            }
            Entry::Vacant(slot) => {
                slot.insert(info.clone());
            }
        }
        Ok(())
    }

    async fn set_on_chain_match_id(&self, match_id: i64, on_chain_match_id: u64) -> anyhow::Result<u64> {
        let mut info = self
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| anyhow::anyhow!("match {match_id} not found"))?;
        Ok(*info.on_chain_match_id.get_or_insert(on_chain_match_id))
    }

    async fn matches_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MatchInfo>> {
        let mut matches: Vec<MatchInfo> = self
            .matches
            .iter()
            .filter(|m| m.kickoff_time >= from && m.kickoff_time <= to)
            .map(|m| m.clone())
            .collect();
        matches.sort_by_key(|m| (m.kickoff_time, m.id));
        Ok(matches)
    }

    async fn get_wager(&self, user_id: &str, match_id: i64) -> anyhow::Result<Option<WagerRecord>> {
        Ok(self
            .wagers
            .get(&(user_id.to_string(), match_id))
            .map(|w| w.clone()))
    }

    async fn insert_wager(&self, record: &WagerRecord) -> anyhow::Result<bool> {
        match self.wagers.entry((record.user_id.clone(), record.match_id)) {
            Entry::Occupied(_) => {
                debug!(user = %record.user_id, match_id = record.match_id, "wager already recorded");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn mark_claimed(&self, user_id: &str, match_id: i64) -> anyhow::Result<bool> {
        match self.wagers.get_mut(&(user_id.to_string(), match_id)) {
            Some(mut record) if !record.claimed => {
                record.claimed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_stats(&self, user_id: &str) -> anyhow::Result<UserStats> {
        Ok(self
            .stats
            .get(user_id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn apply_stats(&self, user_id: &str, delta: StatsDelta) -> anyhow::Result<UserStats> {
        let mut stats = self.stats.entry(user_id.to_string()).or_default();
        stats.apply(delta);
        Ok(stats.clone())
    }
}

#[async_trait]
impl WalletResolver for MemoryStore {
    async fn resolve_primary_wallet(&self, user_id: &str) -> anyhow::Result<Option<Address>> {
        Ok(self.primary.get(user_id).map(|w| *w))
    }

    async fn resolve_linked_wallets(&self, user_id: &str) -> anyhow::Result<Vec<Address>> {
        Ok(self
            .linked
            .get(user_id)
            .map(|w| w.clone())
            .unwrap_or_default())
    }
}
