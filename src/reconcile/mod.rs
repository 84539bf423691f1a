//! Reconciliation: repair local ledger drift against the chain for one user.
//!
//! Insert-only. Records already present locally are never touched, so a
//! second run with no new on-chain activity writes nothing.

use crate::domain::amount::to_decimal;
use crate::domain::{MatchInfo, WagerError, WagerRecord};
use crate::onchain::ContractGateway;
use crate::store::{Ledger, StatsDelta, WalletResolver};
use alloy::primitives::Address;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub wallet: Option<Address>,
    /// Matches with an on-chain identity included in the batch query.
    pub matches_checked: usize,
    /// Local match ids whose wager records were recovered.
    pub recovered: Vec<i64>,
    /// On-chain bets that already had a local record.
    pub already_synced: usize,
}

pub struct Reconciler {
    gateway: Arc<dyn ContractGateway>,
    ledger: Arc<dyn Ledger>,
    wallets: Arc<dyn WalletResolver>,
    lookback: Duration,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        ledger: Arc<dyn Ledger>,
        wallets: Arc<dyn WalletResolver>,
        lookback: Duration,
    ) -> Self {
        Self {
            gateway,
            ledger,
            wallets,
            lookback,
        }
    }

    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileReport, WagerError> {
        self.reconcile_at(user_id, Utc::now()).await
    }

    /// Recent matches (lookback window) and today's, deduplicated, keyed by
    /// on-chain id.
    async fn candidate_matches(&self, now: DateTime<Utc>) -> Result<BTreeMap<u64, MatchInfo>, WagerError> {
        let today_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let today_end = today_start + Duration::days(1) - Duration::seconds(1);

        let mut matches = self.ledger.matches_between(now - self.lookback, now).await?;
        matches.extend(self.ledger.matches_between(today_start, today_end).await?);

        Ok(matches
            .into_iter()
            .filter_map(|m| m.on_chain_match_id.map(|id| (id, m)))
            .collect())
    }

    pub(crate) async fn reconcile_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<ReconcileReport, WagerError> {
        let wallet = self
            .wallets
            .resolve_primary_wallet(user_id)
            .await?
            .ok_or(WagerError::NoWallet)?;

        let matches = self.candidate_matches(now).await?;
        let mut report = ReconcileReport {
            wallet: Some(wallet),
            matches_checked: matches.len(),
            ..Default::default()
        };
        if matches.is_empty() {
            return Ok(report);
        }

        let ids: Vec<u64> = matches.keys().copied().collect();
        let bets = self
            .gateway
            .get_batch_user_bets(&ids, wallet)
            .await
            .map_err(WagerError::from_read)?;

        for (on_chain_id, bet) in bets {
            let Some(info) = matches.get(&on_chain_id) else {
                warn!(user = %user_id, on_chain_id, "batch returned an unrequested match");
                continue;
            };
            if self.ledger.get_wager(user_id, info.id).await?.is_some() {
                report.already_synced += 1;
                continue;
            }
            let Some(prediction) = bet.prediction else {
                warn!(user = %user_id, match_id = info.id, "on-chain bet has no readable prediction, skipping");
                continue;
            };

            let record = WagerRecord {
                user_id: user_id.to_string(),
                wallet_address: wallet,
                match_id: info.id,
                on_chain_match_id: on_chain_id,
                prediction,
                stake_wei: bet.amount,
                tx_hash: None,
                claimed: bet.claimed,
            };
            if !self.ledger.insert_wager(&record).await? {
                report.already_synced += 1;
                continue;
            }

            match to_decimal(bet.amount) {
                Some(stake) => {
                    if let Err(e) = self.ledger.apply_stats(user_id, StatsDelta::Wagered(stake)).await {
                        warn!(user = %user_id, match_id = info.id, error = %e, "failed to update user stats");
                    }
                }
                None => warn!(user = %user_id, match_id = info.id, wei = %bet.amount, "stake exceeds decimal range, stats not credited"),
            }
            info!(user = %user_id, match_id = info.id, wallet = %wallet, "recovered wager record from chain");
            report.recovered.push(info.id);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Prediction, UserBet};
    use crate::store::MemoryStore;
    use crate::testkit::{match_info, wager_record, FakeGateway, WALLET_A};
    use alloy::primitives::U256;

    struct Fixture {
        gateway: Arc<FakeGateway>,
        store: Arc<MemoryStore>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryStore::new());
        store.set_primary_wallet("u1", WALLET_A);
        let reconciler = Reconciler::new(
            gateway.clone(),
            store.clone(),
            store.clone(),
            Duration::days(DEFAULT_LOOKBACK_DAYS),
        );
        Fixture {
            gateway,
            store,
            reconciler,
        }
    }

    async fn on_chain_match(store: &MemoryStore, id: i64, hours: i64, on_chain_id: u64) {
        let mut info = match_info(id, hours);
        info.on_chain_match_id = Some(on_chain_id);
        store.upsert_match(&info).await.unwrap();
    }

    fn bet(amount: u64, prediction: Prediction) -> UserBet {
        UserBet {
            amount: U256::from(amount),
            prediction: Some(prediction),
            claimed: false,
        }
    }

    #[tokio::test]
    async fn recovers_missing_records_in_one_batch() {
        let f = fixture();
        on_chain_match(&f.store, 1, -48, 101).await;
        on_chain_match(&f.store, 2, -2, 102).await;
        on_chain_match(&f.store, 3, -24 * 30, 103).await;
        f.store.upsert_match(&match_info(4, -1)).await.unwrap();
        f.gateway.set_bet(101, WALLET_A, bet(5_000_000_000_000_000, Prediction::Away));
        f.gateway.set_bet(102, WALLET_A, bet(10_000_000_000_000_000, Prediction::Draw));
        f.gateway.set_bet(103, WALLET_A, bet(1, Prediction::Home));
        f.store.insert_wager(&{
            let mut r = wager_record("u1", 2, 10_000_000_000_000_000);
            r.on_chain_match_id = 102;
            r
        })
        .await
        .unwrap();

        let report = f.reconciler.reconcile("u1").await.unwrap();
        assert_eq!(report.wallet, Some(WALLET_A));
        assert_eq!(report.recovered, vec![1]);
        assert_eq!(report.already_synced, 1);
        assert_eq!(f.gateway.batch_calls(), 1);

        let recovered = f.store.get_wager("u1", 1).await.unwrap().unwrap();
        assert_eq!(recovered.prediction, Prediction::Away);
        assert_eq!(recovered.stake_wei, U256::from(5_000_000_000_000_000u64));
        assert_eq!(recovered.tx_hash, None);
        assert_eq!(
            f.store.get_stats("u1").await.unwrap().total_wagered.to_string(),
            "0.005"
        );
        // Older than the lookback window.
        assert!(f.store.get_wager("u1", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_run_inserts_nothing() {
        let f = fixture();
        on_chain_match(&f.store, 1, -5, 101).await;
        f.gateway.set_bet(101, WALLET_A, bet(100, Prediction::Home));

        let first = f.reconciler.reconcile("u1").await.unwrap();
        assert_eq!(first.recovered, vec![1]);
        let second = f.reconciler.reconcile("u1").await.unwrap();
        assert!(second.recovered.is_empty());
        assert_eq!(second.already_synced, 1);
        assert_eq!(f.store.get_stats("u1").await.unwrap().wagers, 1);
    }

    #[tokio::test]
    async fn includes_later_today() {
        let f = fixture();
        let now = Utc::now().date_naive().and_hms_opt(10, 0, 0).unwrap().and_utc();
        let mut info = match_info(9, 0);
        info.kickoff_time = now + Duration::hours(8);
        info.on_chain_match_id = Some(109);
        f.store.upsert_match(&info).await.unwrap();
        f.gateway.set_bet(109, WALLET_A, bet(100, Prediction::Home));

        let report = f.reconciler.reconcile_at("u1", now).await.unwrap();
        assert_eq!(report.matches_checked, 1);
        assert_eq!(report.recovered, vec![9]);
    }

    #[tokio::test]
    async fn requires_a_wallet() {
        let f = fixture();
        assert!(matches!(
            f.reconciler.reconcile("stranger").await,
            Err(WagerError::NoWallet)
        ));
    }

    #[tokio::test]
    async fn nothing_on_chain_skips_the_batch_call() {
        let f = fixture();
        f.store.upsert_match(&match_info(4, -1)).await.unwrap();
        let report = f.reconciler.reconcile("u1").await.unwrap();
        assert_eq!(report.matches_checked, 0);
        assert_eq!(f.gateway.batch_calls(), 0);
    }
}
