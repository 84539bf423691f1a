//! Valkey (Redis-compatible) ledger and wallet directory.
//!
//! Data model (all keys under `{prefix}:`):
//!   match:{id}                 → JSON MatchInfo
//!   match_chain:{id}           → on-chain match id           (SET NX, never overwritten)
//!   matches:kickoff            → ZSET of match ids, score = kickoff unix secs
//!   wager:{user}:{match}       → JSON WagerRecord            (SET NX)
//!   claimed:{user}:{match}     → "1"                         (SET NX, the claimed flip)
//!   stats:{user}               → JSON UserStats
//!   wallet:primary:{user}      → address string
//!   wallet:linked:{user}       → LIST of address strings, link order

use crate::domain::{MatchInfo, WagerRecord};
use crate::store::{Ledger, StatsDelta, UserStats, WalletResolver};
use alloy::primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Compare-and-set on the stats record: `ARGV[1]` is the value the caller
/// read (empty for none), `ARGV[2]` the replacement.
const STATS_CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if (current == false and ARGV[1] == '') or current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

const STATS_CAS_ATTEMPTS: u32 = 64;

/// Valkey-backed store.
///
/// The multiplexed connection is cheap to clone; each call works on its own
/// clone so the store can be shared behind `Arc` without a lock.
#[derive(Clone)]
pub struct ValkeyStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl ValkeyStore {
    /// Connect to Valkey/Redis.
    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = url, prefix = prefix, "connected to Valkey");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Build a namespaced key: "{prefix}:{suffix}"
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// Test connectivity.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let pong: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    async fn chain_id_of(&self, match_id: i64) -> anyhow::Result<Option<u64>> {
        let key = self.key(&format!("match_chain:{match_id}"));
        let id: Option<u64> = self.conn().get(&key).await?;
        Ok(id)
    }

    async fn load_match(&self, match_id: i64) -> anyhow::Result<Option<MatchInfo>> {
        let key = self.key(&format!("match:{match_id}"));
        let json: Option<String> = self.conn().get(&key).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let mut info: MatchInfo = serde_json::from_str(&json)
            .with_context(|| format!("corrupt match record {match_id}"))?;
        if let Some(on_chain) = self.chain_id_of(match_id).await? {
            info.on_chain_match_id = Some(on_chain);
        }
        Ok(Some(info))
    }
}

#[async_trait]
impl Ledger for ValkeyStore {
    async fn get_match(&self, match_id: i64) -> anyhow::Result<Option<MatchInfo>> {
        self.load_match(match_id).await
    }

    async fn upsert_match(&self, info: &MatchInfo) -> anyhow::Result<()> {
        let key = self.key(&format!("match:{}", info.id));
        let json = serde_json::to_string(info)?;
        let mut conn = self.conn();
        conn.set::<_, _, ()>(&key, &json).await?;
        conn.zadd::<_, _, _, ()>(
            self.key("matches:kickoff"),
            info.id,
            info.kickoff_time.timestamp(),
        )
        .await?;
        if let Some(on_chain) = info.on_chain_match_id {
            self.set_on_chain_match_id(info.id, on_chain).await?;
        }
        debug!(match_id = info.id, "stored match");
        Ok(())
    }

    async fn set_on_chain_match_id(&self, match_id: i64, on_chain_match_id: u64) -> anyhow::Result<u64> {
        let match_key = self.key(&format!("match:{match_id}"));
        let exists: bool = self.conn().exists(&match_key).await?;
        if !exists {
            anyhow::bail!("match {match_id} not found");
        }

        let key = self.key(&format!("match_chain:{match_id}"));
        let written: bool = self.conn().set_nx(&key, on_chain_match_id).await?;
        if written {
            return Ok(on_chain_match_id);
        }
        let stored = self
            .chain_id_of(match_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("on-chain id for match {match_id} vanished"))?;
        if stored != on_chain_match_id {
            warn!(
                match_id,
                stored,
                offered = on_chain_match_id,
                "on-chain match id already set, keeping stored id"
            );
        }
        Ok(stored)
    }

    async fn matches_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MatchInfo>> {
        let ids: Vec<i64> = self
            .conn()
            .zrangebyscore(self.key("matches:kickoff"), from.timestamp(), to.timestamp())
            .await?;
        let mut matches = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_match(id).await? {
                Some(info) => matches.push(info),
                None => warn!(match_id = id, "kickoff index points at missing match"),
            }
        }
        Ok(matches)
    }

    async fn get_wager(&self, user_id: &str, match_id: i64) -> anyhow::Result<Option<WagerRecord>> {
        let key = self.key(&format!("wager:{user_id}:{match_id}"));
        let json: Option<String> = self.conn().get(&key).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let mut record: WagerRecord = serde_json::from_str(&json)
            .with_context(|| format!("corrupt wager record {user_id}:{match_id}"))?;
        let claimed_key = self.key(&format!("claimed:{user_id}:{match_id}"));
        let claimed: bool = self.conn().exists(&claimed_key).await?;
        record.claimed |= claimed;
        Ok(Some(record))
    }

    async fn insert_wager(&self, record: &WagerRecord) -> anyhow::Result<bool> {
        let key = self.key(&format!("wager:{}:{}", record.user_id, record.match_id));
        let json = serde_json::to_string(record)?;
        let written: bool = self.conn().set_nx(&key, &json).await?;
        if !written {
            debug!(user = %record.user_id, match_id = record.match_id, "wager already recorded");
        }
        Ok(written)
    }

    async fn mark_claimed(&self, user_id: &str, match_id: i64) -> anyhow::Result<bool> {
        let Some(record) = self.get_wager(user_id, match_id).await? else {
            return Ok(false);
        };
        if record.claimed {
            return Ok(false);
        }
        let key = self.key(&format!("claimed:{user_id}:{match_id}"));
        let flipped: bool = self.conn().set_nx(&key, "1").await?;
        Ok(flipped)
    }

    async fn get_stats(&self, user_id: &str) -> anyhow::Result<UserStats> {
        let key = self.key(&format!("stats:{user_id}"));
        let json: Option<String> = self.conn().get(&key).await?;
        match json {
            Some(j) => Ok(serde_json::from_str(&j)?),
            None => Ok(UserStats::default()),
        }
    }

    async fn apply_stats(&self, user_id: &str, delta: StatsDelta) -> anyhow::Result<UserStats> {
        let key = self.key(&format!("stats:{user_id}"));
        let script = redis::Script::new(STATS_CAS_SCRIPT);
        for attempt in 1..=STATS_CAS_ATTEMPTS {
            let current: Option<String> = self.conn().get(&key).await?;
            let mut stats = match &current {
                Some(j) => serde_json::from_str(j)
                    .with_context(|| format!("corrupt stats record for {user_id}"))?,
                None => UserStats::default(),
            };
            stats.apply(delta);

            let swapped: bool = script
                .key(&key)
                .arg(current.as_deref().unwrap_or(""))
                .arg(serde_json::to_string(&stats)?)
                .invoke_async(&mut self.conn())
                .await?;
            if swapped {
                return Ok(stats);
            }
            debug!(user = %user_id, attempt, "stats changed concurrently, retrying");
        }
        anyhow::bail!("stats for {user_id} kept changing, gave up after {STATS_CAS_ATTEMPTS} attempts")
    }
}

#[async_trait]
impl WalletResolver for ValkeyStore {
    async fn resolve_primary_wallet(&self, user_id: &str) -> anyhow::Result<Option<Address>> {
        let key = self.key(&format!("wallet:primary:{user_id}"));
        let raw: Option<String> = self.conn().get(&key).await?;
        raw.map(|s| Address::from_str(&s).with_context(|| format!("bad primary wallet for {user_id}")))
            .transpose()
    }

    async fn resolve_linked_wallets(&self, user_id: &str) -> anyhow::Result<Vec<Address>> {
        let key = self.key(&format!("wallet:linked:{user_id}"));
        let raw: Vec<String> = self.conn().lrange(&key, 0, -1).await?;
        let mut wallets = Vec::with_capacity(raw.len());
        for entry in raw {
            match Address::from_str(&entry) {
                Ok(wallet) => wallets.push(wallet),
                Err(e) => warn!(user = %user_id, entry = %entry, error = %e, "skipping malformed linked wallet"),
            }
        }
        Ok(wallets)
    }
}
