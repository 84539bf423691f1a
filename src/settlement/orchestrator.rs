use crate::correlation::{self, TokenKind};
use crate::domain::amount::{format_eth, to_decimal};
use crate::domain::{MatchInfo, SettlementKind, WagerError, WagerRecord};
use crate::intent::{IntentRegister, WagerIntent};
use crate::onchain::abi;
use crate::onchain::{ContractGateway, GatewayError, TxReceipt};
use crate::settlement::{RetryPolicy, SettlementOutcome, SettlementState};
use crate::store::{candidate_wallets, Ledger, StatsDelta, WalletResolver};
use crate::transport::{ChatTransport, MessageOptions, Prompt, TransportError};

use alloy::primitives::{Address, Bytes, B256, U256};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a prompt goes and how its correlation suffix is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub user_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
}

impl Interaction {
    pub fn new(user_id: &str, channel_id: &str, thread_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            thread_id: thread_id.map(str::to_string),
        }
    }

    pub fn opts(&self) -> MessageOptions {
        MessageOptions::in_thread(self.thread_id.clone())
    }

    /// Thread id when replying in a thread, otherwise a millisecond timestamp.
    pub fn correlation_suffix(&self) -> String {
        match &self.thread_id {
            Some(thread) => thread.clone(),
            None => chrono::Utc::now().timestamp_millis().to_string(),
        }
    }

    pub fn token(&self, kind: TokenKind, match_id: i64) -> String {
        correlation::encode(kind, match_id, &self.user_id, &self.correlation_suffix())
    }
}

pub struct SettlementOrchestrator {
    gateway: Arc<dyn ContractGateway>,
    ledger: Arc<dyn Ledger>,
    wallets: Arc<dyn WalletResolver>,
    transport: Arc<dyn ChatTransport>,
    intents: IntentRegister,
    retry: RetryPolicy,
    /// One match creation in flight per local match.
    creating: DashMap<i64, Arc<Mutex<()>>>,
}

impl SettlementOrchestrator {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        ledger: Arc<dyn Ledger>,
        wallets: Arc<dyn WalletResolver>,
        transport: Arc<dyn ChatTransport>,
        intents: IntentRegister,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            ledger,
            wallets,
            transport,
            intents,
            retry,
            creating: DashMap::new(),
        }
    }

    fn transition(&self, kind: SettlementKind, user_id: &str, match_id: i64, state: SettlementState) {
        if state.is_terminal() {
            info!(kind = %kind, user = %user_id, match_id, state = %state, "settlement finished");
        } else {
            debug!(kind = %kind, user = %user_id, match_id, state = %state, "settlement transition");
        }
    }

    /// Make sure the match exists on-chain, creating it with the manager
    /// wallet if needed. Returns the match with its on-chain id set.
    pub async fn ensure_match_on_chain(&self, match_id: i64) -> Result<(MatchInfo, u64), WagerError> {
        let lock = self
            .creating
            .entry(match_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.ensure_match_locked(match_id).await
        };
        drop(lock);
        // Last one out removes the lock; waiters still hold a clone.
        self.creating
            .remove_if(&match_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn ensure_match_locked(&self, match_id: i64) -> Result<(MatchInfo, u64), WagerError> {
        let mut info = self
            .ledger
            .get_match(match_id)
            .await?
            .ok_or(WagerError::MatchUnavailable(match_id))?;
        if let Some(on_chain_id) = info.on_chain_match_id {
            return Ok((info, on_chain_id));
        }

        let created = self
            .retry
            .run(
                "createMatch",
                || self.gateway.create_match(&info),
                GatewayError::may_rebroadcast,
            )
            .await
            .map_err(|e| {
                warn!(match_id, error = %e, "match creation failed");
                WagerError::from(e)
            })?;

        let on_chain_id = self
            .ledger
            .set_on_chain_match_id(match_id, created.on_chain_match_id)
            .await?;
        info!(
            match_id,
            on_chain_match_id = on_chain_id,
            tx = %created.tx_hash,
            "match created on-chain"
        );
        info.on_chain_match_id = Some(on_chain_id);
        Ok((info, on_chain_id))
    }

    pub(crate) async fn send_prompt(&self, ctx: &Interaction, prompt: &Prompt) -> Result<(), WagerError> {
        let opts = ctx.opts();
        self.retry
            .run(
                "send_interactive_prompt",
                || {
                    self.transport
                        .send_interactive_prompt(&ctx.channel_id, prompt, &ctx.user_id, &opts)
                },
                TransportError::is_network,
            )
            .await
            .map_err(|e| WagerError::Transport(e.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn request_tx(
        &self,
        ctx: &Interaction,
        kind: SettlementKind,
        token_kind: TokenKind,
        match_id: i64,
        title: String,
        data: Bytes,
        value: U256,
        signer: Option<Address>,
    ) -> Result<SettlementOutcome, WagerError> {
        let request_id = ctx.token(token_kind, match_id);
        let prompt = Prompt::Transaction {
            id: request_id.clone(),
            title,
            chain_id: self.gateway.chain_id(),
            to: self.gateway.contract_address(),
            data,
            value,
            signer,
        };
        self.send_prompt(ctx, &prompt).await?;
        self.transition(kind, &ctx.user_id, match_id, SettlementState::TxRequested);
        Ok(SettlementOutcome::TxRequested { kind, request_id })
    }

    /// Confirmed wager → on-chain match → transaction prompt. The intent
    /// must already be in the settling stage.
    pub async fn request_wager(&self, ctx: &Interaction, intent: &WagerIntent) -> Result<SettlementOutcome, WagerError> {
        self.transition(SettlementKind::Wager, &ctx.user_id, intent.match_id, SettlementState::Confirmed);

        // Checked before creation so the manager wallet never pays for a
        // match nobody can bet on.
        let current = self
            .ledger
            .get_match(intent.match_id)
            .await?
            .ok_or(WagerError::MatchUnavailable(intent.match_id))?;
        if !current.betting_open_at(chrono::Utc::now()) {
            return Err(WagerError::BettingClosed(current.id));
        }
        if self.ledger.get_wager(&ctx.user_id, current.id).await?.is_some() {
            return Err(WagerError::AlreadyWagered(current.id));
        }

        let (info, on_chain_id) = self.ensure_match_on_chain(intent.match_id).await?;
        self.transition(
            SettlementKind::Wager,
            &ctx.user_id,
            intent.match_id,
            SettlementState::MatchEnsuredOnChain,
        );
        // Creation can outlast kickoff.
        if !info.betting_open_at(chrono::Utc::now()) {
            return Err(WagerError::BettingClosed(info.id));
        }

        let signer = self.wallets.resolve_primary_wallet(&ctx.user_id).await?;
        let outcome = self
            .request_tx(
                ctx,
                SettlementKind::Wager,
                TokenKind::Wager,
                info.id,
                format!(
                    "Bet {} ETH on {} ({})",
                    format_eth(intent.stake_wei),
                    info.pick_label(intent.prediction),
                    info.label()
                ),
                self.gateway.encode_place_bet(on_chain_id, intent.prediction),
                intent.stake_wei,
                signer,
            )
            .await?;

        if let SettlementOutcome::TxRequested { request_id, .. } = &outcome {
            self.intents.attach_correlation(&ctx.user_id, request_id);
        }
        Ok(outcome)
    }

    pub async fn request_claim(
        &self,
        ctx: &Interaction,
        info: &MatchInfo,
        record: &WagerRecord,
    ) -> Result<SettlementOutcome, WagerError> {
        self.transition(SettlementKind::Claim, &ctx.user_id, info.id, SettlementState::Confirmed);
        self.request_tx(
            ctx,
            SettlementKind::Claim,
            TokenKind::Claim,
            info.id,
            format!("Claim winnings for {}", info.label()),
            self.gateway.encode_claim_winnings(record.on_chain_match_id),
            U256::ZERO,
            Some(record.wallet_address),
        )
        .await
    }

    pub async fn request_refund(
        &self,
        ctx: &Interaction,
        info: &MatchInfo,
        record: &WagerRecord,
    ) -> Result<SettlementOutcome, WagerError> {
        self.transition(SettlementKind::Refund, &ctx.user_id, info.id, SettlementState::Confirmed);
        self.request_tx(
            ctx,
            SettlementKind::Refund,
            TokenKind::ClaimRefund,
            info.id,
            format!("Claim refund for {}", info.label()),
            self.gateway.encode_claim_refund(record.on_chain_match_id),
            U256::ZERO,
            Some(record.wallet_address),
        )
        .await
    }

    /// Await the receipt of a user-signed transaction once and record the
    /// outcome. Safe to call twice for the same transaction. A wager result
    /// only clears the intent whose prompt carried `request_id`.
    pub async fn settle(
        &self,
        ctx: &Interaction,
        kind: SettlementKind,
        request_id: &str,
        match_id: i64,
        tx_hash: B256,
    ) -> Result<SettlementOutcome, WagerError> {
        self.transition(kind, &ctx.user_id, match_id, SettlementState::TxSubmitted);

        let receipt = match self.gateway.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.transition(kind, &ctx.user_id, match_id, SettlementState::Unconfirmable);
                warn!(kind = %kind, tx = %tx_hash, error = %e, "receipt unavailable");
                return Err(WagerError::TransactionUnconfirmable {
                    kind,
                    tx_hash,
                    reason: e.to_string(),
                });
            }
        };

        if !receipt.success {
            self.transition(kind, &ctx.user_id, match_id, SettlementState::Reverted);
            if kind == SettlementKind::Wager {
                self.clear_answered_intent(&ctx.user_id, match_id, request_id);
            }
            return Err(WagerError::TransactionReverted { kind, tx_hash });
        }

        let outcome = match kind {
            SettlementKind::Wager => self.settle_wager(ctx, request_id, match_id, tx_hash).await?,
            SettlementKind::Claim => self.settle_claim(ctx, match_id, &receipt).await?,
            SettlementKind::Refund => self.settle_refund(ctx, match_id, tx_hash).await?,
        };
        self.transition(kind, &ctx.user_id, match_id, SettlementState::Success);
        Ok(outcome)
    }

    /// Drop the wager intent answered by a transaction result. A stale or
    /// duplicate result for another prompt leaves the live intent alone.
    pub(crate) fn clear_answered_intent(&self, user_id: &str, match_id: i64, request_id: &str) -> Option<WagerIntent> {
        self.intents
            .clear_if(user_id, |i| i.awaits_transaction(match_id, request_id))
    }

    async fn settle_wager(
        &self,
        ctx: &Interaction,
        request_id: &str,
        match_id: i64,
        tx_hash: B256,
    ) -> Result<SettlementOutcome, WagerError> {
        let intent = self.clear_answered_intent(&ctx.user_id, match_id, request_id);
        let unrecorded = SettlementOutcome::WagerSettled {
            record: None,
            newly_recorded: false,
            needs_reconcile: true,
            tx_hash,
        };

        let on_chain_id = match self.ledger.get_match(match_id).await {
            Ok(Some(MatchInfo {
                on_chain_match_id: Some(id),
                ..
            })) => id,
            Ok(_) => {
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, "wager mined for a match without on-chain id, manual reconciliation needed");
                return Ok(unrecorded);
            }
            Err(e) => {
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, error = %e, "ledger unavailable after wager mined");
                return Ok(unrecorded);
            }
        };

        let found = match self.probe_wallets(&ctx.user_id, on_chain_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, error = %e, "wallet probe failed, manual reconciliation needed");
                return Ok(unrecorded);
            }
        };
        let Some((wallet, bet)) = found else {
            warn!(user = %ctx.user_id, match_id, tx = %tx_hash, "no linked wallet shows this bet, manual reconciliation needed");
            return Ok(unrecorded);
        };
        let Some(prediction) = bet.prediction.or(intent.as_ref().map(|i| i.prediction)) else {
            warn!(user = %ctx.user_id, match_id, wallet = %wallet, "bet has no readable prediction, manual reconciliation needed");
            return Ok(unrecorded);
        };

        let record = WagerRecord {
            user_id: ctx.user_id.clone(),
            wallet_address: wallet,
            match_id,
            on_chain_match_id: on_chain_id,
            prediction,
            stake_wei: bet.amount,
            tx_hash: Some(tx_hash),
            claimed: false,
        };

        let (newly_recorded, needs_reconcile) = match self.ledger.insert_wager(&record).await {
            Ok(true) => {
                self.credit(&ctx.user_id, StatsDelta::Wagered(decimal_or_zero(bet.amount)))
                    .await;
                info!(user = %ctx.user_id, match_id, wallet = %wallet, tx = %tx_hash, "wager recorded");
                (true, false)
            }
            Ok(false) => (false, false),
            Err(e) => {
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, error = %e, "wager mined but not recorded locally");
                (false, true)
            }
        };

        Ok(SettlementOutcome::WagerSettled {
            record: Some(record),
            newly_recorded,
            needs_reconcile,
            tx_hash,
        })
    }

    /// First wallet (primary, then linked) holding a bet on the match.
    async fn probe_wallets(
        &self,
        user_id: &str,
        on_chain_id: u64,
    ) -> anyhow::Result<Option<(Address, crate::domain::UserBet)>> {
        let wallets = candidate_wallets(self.wallets.as_ref(), user_id).await?;
        let probes = wallets
            .iter()
            .map(|wallet| self.gateway.get_user_bet(on_chain_id, *wallet));
        let results = futures::future::join_all(probes).await;
        debug!(user = %user_id, probed = wallets.len(), "probed wallets for bet");

        let mut last_error = None;
        for (wallet, result) in wallets.into_iter().zip(results) {
            match result {
                Ok(Some(bet)) if bet.is_placed() => return Ok(Some((wallet, bet))),
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(anyhow::anyhow!(e)),
            None => Ok(None),
        }
    }

    async fn settle_claim(
        &self,
        ctx: &Interaction,
        match_id: i64,
        receipt: &TxReceipt,
    ) -> Result<SettlementOutcome, WagerError> {
        let tx_hash = receipt.tx_hash;
        let record = self.ledger.get_wager(&ctx.user_id, match_id).await.unwrap_or_else(|e| {
            warn!(user = %ctx.user_id, match_id, error = %e, "ledger read failed after claim mined");
            None
        });
        let on_chain_id = match &record {
            Some(r) => Some(r.on_chain_match_id),
            None => self
                .ledger
                .get_match(match_id)
                .await
                .ok()
                .flatten()
                .and_then(|m| m.on_chain_match_id),
        };

        let exact = on_chain_id.and_then(|id| {
            abi::find_winnings_claimed(&receipt.logs, self.gateway.contract_address(), id)
        });
        let (payout, profit, approximate) = match exact {
            Some(p) => (p.amount, p.profit, false),
            None => {
                let stake = record.as_ref().map(|r| r.stake_wei).unwrap_or(U256::ZERO);
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, "no WinningsClaimed event, reporting stake as payout");
                (stake, U256::ZERO, true)
            }
        };

        let (newly_recorded, needs_reconcile) = self
            .flip_claimed(ctx, match_id, record.is_some(), tx_hash)
            .await;
        if newly_recorded {
            self.credit(
                &ctx.user_id,
                StatsDelta::Won {
                    payout: decimal_or_zero(payout),
                    profit: decimal_or_zero(profit),
                },
            )
            .await;
        }

        Ok(SettlementOutcome::ClaimSettled {
            payout,
            profit,
            approximate,
            newly_recorded,
            needs_reconcile,
            tx_hash,
        })
    }

    async fn settle_refund(&self, ctx: &Interaction, match_id: i64, tx_hash: B256) -> Result<SettlementOutcome, WagerError> {
        let record = self.ledger.get_wager(&ctx.user_id, match_id).await.unwrap_or_else(|e| {
            warn!(user = %ctx.user_id, match_id, error = %e, "ledger read failed after refund mined");
            None
        });
        let amount = record.as_ref().map(|r| r.stake_wei).unwrap_or(U256::ZERO);

        let (newly_recorded, needs_reconcile) = self
            .flip_claimed(ctx, match_id, record.is_some(), tx_hash)
            .await;
        if newly_recorded {
            self.credit(&ctx.user_id, StatsDelta::Refunded(decimal_or_zero(amount)))
                .await;
        }

        Ok(SettlementOutcome::RefundSettled {
            amount,
            newly_recorded,
            needs_reconcile,
            tx_hash,
        })
    }

    /// Returns `(flipped, needs_reconcile)`.
    async fn flip_claimed(&self, ctx: &Interaction, match_id: i64, has_record: bool, tx_hash: B256) -> (bool, bool) {
        if !has_record {
            warn!(user = %ctx.user_id, match_id, tx = %tx_hash, "claim mined without a local wager record");
            return (false, true);
        }
        match self.ledger.mark_claimed(&ctx.user_id, match_id).await {
            Ok(flipped) => {
                if !flipped {
                    debug!(user = %ctx.user_id, match_id, tx = %tx_hash, "already marked claimed");
                }
                (flipped, false)
            }
            Err(e) => {
                warn!(user = %ctx.user_id, match_id, tx = %tx_hash, error = %e, "claim mined but not recorded locally");
                (false, true)
            }
        }
    }

    async fn credit(&self, user_id: &str, delta: StatsDelta) {
        if let Err(e) = self.ledger.apply_stats(user_id, delta).await {
            warn!(user = %user_id, error = %e, "failed to update user stats");
        }
    }
}

fn decimal_or_zero(wei: U256) -> Decimal {
    to_decimal(wei).unwrap_or_else(|| {
        warn!(wei = %wei, "amount exceeds decimal range, stats not credited");
        Decimal::ZERO
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Prediction, UserBet};
    use crate::testkit::{claimed_receipt, match_info, wager_record, Harness, WALLET_A, WALLET_B};

    fn bet(amount: u64, prediction: Prediction) -> UserBet {
        UserBet {
            amount: U256::from(amount),
            prediction: Some(prediction),
            claimed: false,
        }
    }

    const TOKEN: &str = "wager-7-u1-form";

    async fn settling_intent(h: &Harness, match_id: i64) -> WagerIntent {
        let intent = h
            .intents
            .create("u1", match_id, Prediction::Home, "0.01", U256::from(10_000_000_000_000_000u64))
            .unwrap();
        let token = format!("wager-{match_id}-u1-form");
        h.intents.attach_correlation("u1", &token);
        h.intents.begin_settlement(&token, "u1").unwrap();
        intent
    }

    #[tokio::test]
    async fn creates_match_once_then_requests_wager_tx() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        let intent = settling_intent(&h, 7).await;

        let outcome = h.orchestrator().request_wager(&h.ctx("u1"), &intent).await.unwrap();
        let SettlementOutcome::TxRequested { kind, request_id } = outcome else {
            panic!("expected tx request");
        };
        assert_eq!(kind, SettlementKind::Wager);
        assert!(request_id.starts_with("wager-7-"));
        assert_eq!(h.gateway.create_calls(), 1);
        assert_eq!(
            h.store.get_match(7).await.unwrap().unwrap().on_chain_match_id,
            Some(42)
        );
        assert_eq!(
            h.intents.get("u1").unwrap().correlation_token.as_deref(),
            Some(request_id.as_str())
        );

        let prompts = h.transport.prompts();
        let Some(Prompt::Transaction { value, to, signer, .. }) = prompts.last() else {
            panic!("expected transaction prompt");
        };
        assert_eq!(*value, intent.stake_wei);
        assert_eq!(*to, h.gateway.contract_address());
        assert_eq!(*signer, Some(WALLET_A));

        // Second ensure reuses the stored id.
        h.orchestrator().ensure_match_on_chain(7).await.unwrap();
        assert_eq!(h.gateway.create_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_ensures_create_once() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        let orchestrator = h.orchestrator();
        let (a, b) = tokio::join!(
            orchestrator.ensure_match_on_chain(7),
            orchestrator.ensure_match_on_chain(7)
        );
        assert_eq!(a.unwrap().1, b.unwrap().1);
        assert_eq!(h.gateway.create_calls(), 1);
        assert!(orchestrator.creating.is_empty());
    }

    #[tokio::test]
    async fn structural_creation_errors_are_not_retried() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        h.gateway
            .fail_create_with(GatewayError::InsufficientGas("insufficient funds".into()));
        let orchestrator = h.orchestrator();
        let err = orchestrator.ensure_match_on_chain(7).await.unwrap_err();
        assert!(matches!(err, WagerError::InsufficientGas));
        assert_eq!(h.gateway.create_calls(), 1);
        assert!(orchestrator.creating.is_empty());
    }

    #[tokio::test]
    async fn transient_creation_errors_are_retried() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        h.gateway
            .fail_create_with(GatewayError::NonceConflict("nonce too low".into()));
        let (_, id) = h.orchestrator().ensure_match_on_chain(7).await.unwrap();
        assert_eq!(id, 42);
        assert_eq!(h.gateway.create_calls(), 2);
    }

    #[tokio::test]
    async fn timed_out_creation_is_not_resent() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        h.gateway
            .fail_create_with(GatewayError::RpcTimeout("createMatch exceeded 10s".into()));
        let err = h.orchestrator().ensure_match_on_chain(7).await.unwrap_err();
        assert!(matches!(err, WagerError::GatewayUnavailable(_)));
        assert_eq!(h.gateway.create_calls(), 1);
        assert_eq!(h.store.get_match(7).await.unwrap().unwrap().on_chain_match_id, None);
    }

    #[tokio::test]
    async fn closed_betting_skips_match_creation() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        let intent = settling_intent(&h, 7).await;
        // Kickoff passed between the prompt and the confirm.
        h.add_match(match_info(7, -1)).await;

        let err = h.orchestrator().request_wager(&h.ctx("u1"), &intent).await.unwrap_err();
        assert!(matches!(err, WagerError::BettingClosed(7)));
        assert_eq!(h.gateway.create_calls(), 0);
        assert!(h.transport.prompts().is_empty());
    }

    #[tokio::test]
    async fn existing_wager_skips_match_creation() {
        let h = Harness::new();
        h.add_match(match_info(7, 2)).await;
        let intent = settling_intent(&h, 7).await;
        h.store.insert_wager(&wager_record("u1", 7, 100)).await.unwrap();

        let err = h.orchestrator().request_wager(&h.ctx("u1"), &intent).await.unwrap_err();
        assert!(matches!(err, WagerError::AlreadyWagered(7)));
        assert_eq!(h.gateway.create_calls(), 0);
    }

    #[tokio::test]
    async fn wager_success_records_the_probed_wallet() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        settling_intent(&h, 7).await;
        h.gateway.set_bet(42, WALLET_B, bet(10_000_000_000_000_000, Prediction::Home));
        let tx = B256::repeat_byte(1);
        h.gateway.set_receipt(tx, true, vec![]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap();
        let SettlementOutcome::WagerSettled {
            record: Some(record),
            newly_recorded: true,
            needs_reconcile: false,
            ..
        } = outcome
        else {
            panic!("expected a newly recorded wager");
        };
        assert_eq!(record.wallet_address, WALLET_B);
        assert_eq!(record.on_chain_match_id, 42);
        assert_eq!(record.tx_hash, Some(tx));
        assert!(h.intents.get("u1").is_none());
        assert_eq!(h.store.get_stats("u1").await.unwrap().wagers, 1);

        // Duplicate delivery records nothing new.
        let again = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap();
        assert!(matches!(
            again,
            SettlementOutcome::WagerSettled {
                newly_recorded: false,
                ..
            }
        ));
        assert_eq!(h.store.get_stats("u1").await.unwrap().wagers, 1);
    }

    #[tokio::test]
    async fn wager_without_visible_bet_needs_reconciliation() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        let tx = B256::repeat_byte(2);
        h.gateway.set_receipt(tx, true, vec![]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SettlementOutcome::WagerSettled {
                record: None,
                needs_reconcile: true,
                ..
            }
        ));
        assert!(h.store.get_wager("u1", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reverted_wager_clears_intent_and_records_nothing() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        settling_intent(&h, 7).await;
        let tx = B256::repeat_byte(3);
        h.gateway.set_receipt(tx, false, vec![]);

        let err = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::TransactionReverted { .. }));
        assert!(h.intents.get("u1").is_none());
        assert!(h.store.get_wager("u1", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_wager_result_keeps_newer_intent() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        h.add_match(match_info(8, 2)).await;
        settling_intent(&h, 7).await;
        h.gateway.set_bet(42, WALLET_A, bet(10_000_000_000_000_000, Prediction::Home));
        let tx = B256::repeat_byte(1);
        h.gateway.set_receipt(tx, true, vec![]);
        h.orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap();

        h.intents
            .create("u1", 8, Prediction::Away, "0.01", U256::from(10_000_000_000_000_000u64))
            .unwrap();
        h.intents.attach_correlation("u1", "wager-8-u1-form");

        let again = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap();
        assert!(matches!(
            again,
            SettlementOutcome::WagerSettled {
                newly_recorded: false,
                ..
            }
        ));
        assert_eq!(h.intents.get("u1").unwrap().match_id, 8);
    }

    #[tokio::test]
    async fn stale_revert_keeps_newer_intent() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        settling_intent(&h, 8).await;
        let tx = B256::repeat_byte(3);
        h.gateway.set_receipt(tx, false, vec![]);

        let err = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::TransactionReverted { .. }));
        let live = h.intents.get("u1").unwrap();
        assert_eq!(live.match_id, 8);
        assert_eq!(live.correlation_token.as_deref(), Some("wager-8-u1-form"));
    }

    #[tokio::test]
    async fn unconfirmable_leaves_state_untouched() {
        let h = Harness::new();
        let mut info = match_info(7, 2);
        info.on_chain_match_id = Some(42);
        h.add_match(info).await;
        settling_intent(&h, 7).await;

        let err = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Wager, TOKEN, 7, B256::repeat_byte(4))
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::TransactionUnconfirmable { .. }));
        assert!(h.intents.get("u1").is_some());
        assert!(h.store.get_wager("u1", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_uses_exact_event_amounts_once() {
        let h = Harness::new();
        h.add_settled_wager("u1", 7, 100).await;
        let tx = B256::repeat_byte(5);
        h.gateway
            .set_receipt(tx, true, vec![claimed_receipt(h.gateway.contract_address(), 42, 180, 80)]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Claim, "claim-7-u1-1", 7, tx)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::ClaimSettled {
                payout: U256::from(180u64),
                profit: U256::from(80u64),
                approximate: false,
                newly_recorded: true,
                needs_reconcile: false,
                tx_hash: tx,
            }
        );
        assert!(h.store.get_wager("u1", 7).await.unwrap().unwrap().claimed);

        h.orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Claim, "claim-7-u1-1", 7, tx)
            .await
            .unwrap();
        assert_eq!(h.store.get_stats("u1").await.unwrap().wins, 1);
    }

    #[tokio::test]
    async fn claim_without_event_falls_back_to_stake() {
        let h = Harness::new();
        h.add_settled_wager("u1", 7, 100).await;
        let tx = B256::repeat_byte(6);
        h.gateway.set_receipt(tx, true, vec![]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Claim, "claim-7-u1-1", 7, tx)
            .await
            .unwrap();
        let SettlementOutcome::ClaimSettled {
            payout,
            profit,
            approximate,
            ..
        } = outcome
        else {
            panic!("expected a claim outcome");
        };
        assert!(approximate);
        assert_eq!(payout, U256::from(100u64));
        assert_eq!(profit, U256::ZERO);
    }

    #[tokio::test]
    async fn reverted_claim_leaves_record_untouched() {
        let h = Harness::new();
        h.add_settled_wager("u1", 7, 100).await;
        let tx = B256::repeat_byte(7);
        h.gateway.set_receipt(tx, false, vec![]);

        let err = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Refund, "claimrefund-7-u1-1", 7, tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WagerError::TransactionReverted {
                kind: SettlementKind::Refund,
                ..
            }
        ));
        assert!(!h.store.get_wager("u1", 7).await.unwrap().unwrap().claimed);
    }

    #[tokio::test]
    async fn refund_credits_the_stake() {
        let h = Harness::new();
        h.add_settled_wager("u1", 7, 100).await;
        let tx = B256::repeat_byte(8);
        h.gateway.set_receipt(tx, true, vec![]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Refund, "claimrefund-7-u1-1", 7, tx)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SettlementOutcome::RefundSettled {
                newly_recorded: true,
                ..
            }
        ));
        assert_eq!(h.store.get_stats("u1").await.unwrap().refunds, 1);
    }

    #[tokio::test]
    async fn ledger_failure_after_success_is_partial() {
        let h = Harness::new();
        h.add_settled_wager("u1", 7, 100).await;
        h.ledger.fail_writes(true);
        let tx = B256::repeat_byte(9);
        h.gateway.set_receipt(tx, true, vec![]);

        let outcome = h
            .orchestrator()
            .settle(&h.ctx("u1"), SettlementKind::Refund, "claimrefund-7-u1-1", 7, tx)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SettlementOutcome::RefundSettled {
                newly_recorded: false,
                needs_reconcile: true,
                ..
            }
        ));
    }
}
