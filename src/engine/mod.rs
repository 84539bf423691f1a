//! Wager engine: the operations the chat router calls, and the routing of
//! button clicks and wallet transaction results back to them.
//!
//! Every inbound event runs as its own task. Nothing here holds a lock across
//! an await except the orchestrator's per-match creation lock; same-user races
//! are settled by the intent register's `Pending -> Settling` transition.

pub mod command;
pub mod replies;

pub use command::Command;

use crate::correlation::{self, ButtonAction, TokenKind};
use crate::domain::amount::parse_stake;
use crate::domain::{MatchInfo, Prediction, SettlementKind, WagerError, WagerRecord};
use crate::eligibility::ClaimResolver;
use crate::intent::{IntentRegister, WagerIntent};
use crate::onchain::ContractGateway;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::settlement::orchestrator::Interaction;
use crate::settlement::{RetryPolicy, SettlementOrchestrator, SettlementOutcome};
use crate::store::{Ledger, WalletResolver};
use crate::transport::ChatTransport;

use alloy::primitives::{B256, U256};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One inbound chat event, as delivered by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        text: String,
    },
    ButtonClick {
        request_id: String,
        component_id: String,
    },
    TransactionResult {
        request_id: String,
        #[serde(default)]
        tx_hash: Option<B256>,
        success: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { match_id: i64 },
    /// No live intent: already cancelled, settled or expired.
    NothingPending,
}

/// A claim offered to the user, awaiting their confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimQuote {
    pub request_id: String,
    pub amount: U256,
    /// Winnings-type claim on a match nobody predicted correctly.
    pub no_winners: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonOutcome {
    Settlement(SettlementOutcome),
    Cancel(CancelOutcome),
    /// Claim or refund prompt dismissed.
    Dismissed(SettlementKind),
}

pub struct WagerEngine {
    ledger: Arc<dyn Ledger>,
    wallets: Arc<dyn WalletResolver>,
    transport: Arc<dyn ChatTransport>,
    intents: IntentRegister,
    orchestrator: SettlementOrchestrator,
    resolver: ClaimResolver,
    reconciler: Reconciler,
}

impl WagerEngine {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        ledger: Arc<dyn Ledger>,
        wallets: Arc<dyn WalletResolver>,
        transport: Arc<dyn ChatTransport>,
        intents: IntentRegister,
        retry: RetryPolicy,
        reconcile_lookback: chrono::Duration,
    ) -> Self {
        Self {
            orchestrator: SettlementOrchestrator::new(
                gateway.clone(),
                ledger.clone(),
                wallets.clone(),
                transport.clone(),
                intents.clone(),
                retry,
            ),
            resolver: ClaimResolver::new(gateway.clone(), ledger.clone()),
            reconciler: Reconciler::new(gateway, ledger.clone(), wallets.clone(), reconcile_lookback),
            ledger,
            wallets,
            transport,
            intents,
        }
    }

    pub fn intents(&self) -> &IntentRegister {
        &self.intents
    }

    async fn load_match(&self, match_id: i64) -> Result<MatchInfo, WagerError> {
        self.ledger
            .get_match(match_id)
            .await?
            .ok_or(WagerError::MatchUnavailable(match_id))
    }

    async fn load_wager(&self, user_id: &str, info: &MatchInfo) -> Result<WagerRecord, WagerError> {
        self.ledger.get_wager(user_id, info.id).await?.ok_or_else(|| {
            WagerError::NotEligible(format!("You have no bet on {}", info.label()))
        })
    }

    /// Validate a bet, store it as the user's pending intent and ask them to
    /// confirm it.
    pub async fn place_wager_intent(
        &self,
        ctx: &Interaction,
        match_id: i64,
        prediction: Prediction,
        stake: &str,
    ) -> Result<WagerIntent, WagerError> {
        let stake_wei = parse_stake(stake)?;
        let info = self.load_match(match_id).await?;
        if !info.betting_open_at(chrono::Utc::now()) {
            return Err(WagerError::BettingClosed(match_id));
        }
        if self.ledger.get_wager(&ctx.user_id, match_id).await?.is_some() {
            return Err(WagerError::AlreadyWagered(match_id));
        }
        if self.wallets.resolve_primary_wallet(&ctx.user_id).await?.is_none() {
            return Err(WagerError::NoWallet);
        }

        let intent = self
            .intents
            .create(&ctx.user_id, match_id, prediction, stake, stake_wei)?;
        let token = ctx.token(TokenKind::Wager, match_id);
        self.intents.attach_correlation(&ctx.user_id, &token);

        let prompt = replies::wager_prompt(token, &info, &intent);
        if let Err(e) = self.orchestrator.send_prompt(ctx, &prompt).await {
            // Without a prompt there is nothing to confirm.
            self.intents.clear(&ctx.user_id);
            return Err(e);
        }
        Ok(intent)
    }

    /// Confirm button: take the intent into settlement and request the
    /// wager transaction. A second confirm finds no pending intent.
    pub async fn confirm_intent(&self, ctx: &Interaction, token: &str) -> Result<SettlementOutcome, WagerError> {
        let intent = self.intents.begin_settlement(token, &ctx.user_id)?;
        match self.orchestrator.request_wager(ctx, &intent).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if keeps_intent(&e) {
                    self.intents.release(&ctx.user_id);
                    info!(user = %ctx.user_id, match_id = intent.match_id, error = %e, "wager not requested, intent kept for retry");
                } else {
                    self.intents.clear(&ctx.user_id);
                    info!(user = %ctx.user_id, match_id = intent.match_id, error = %e, "wager rejected, intent cleared");
                }
                Err(e)
            }
        }
    }

    pub fn cancel_intent(&self, user_id: &str) -> CancelOutcome {
        match self.intents.clear(user_id) {
            Some(intent) => {
                info!(user = %user_id, match_id = intent.match_id, "wager intent cancelled");
                CancelOutcome::Cancelled {
                    match_id: intent.match_id,
                }
            }
            None => CancelOutcome::NothingPending,
        }
    }

    /// Check the winnings path and offer the claim for confirmation.
    pub async fn request_claim(&self, ctx: &Interaction, match_id: i64) -> Result<ClaimQuote, WagerError> {
        let info = self.load_match(match_id).await?;
        let record = self.load_wager(&ctx.user_id, &info).await?;
        let (amount, no_winners) = self.resolver.check_claim(&info, &record).await?;

        let quote = ClaimQuote {
            request_id: ctx.token(TokenKind::Claim, match_id),
            amount,
            no_winners,
        };
        let prompt = replies::claim_prompt(quote.request_id.clone(), &info, &quote);
        self.orchestrator.send_prompt(ctx, &prompt).await?;
        Ok(quote)
    }

    /// Check the refund path and offer the refund for confirmation.
    pub async fn request_refund(&self, ctx: &Interaction, match_id: i64) -> Result<ClaimQuote, WagerError> {
        let info = self.load_match(match_id).await?;
        let record = self.load_wager(&ctx.user_id, &info).await?;
        let amount = self.resolver.check_refund(&info, &record).await?;

        let quote = ClaimQuote {
            request_id: ctx.token(TokenKind::Refund, match_id),
            amount,
            no_winners: false,
        };
        let prompt = replies::refund_prompt(quote.request_id.clone(), &info, amount);
        self.orchestrator.send_prompt(ctx, &prompt).await?;
        Ok(quote)
    }

    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileReport, WagerError> {
        self.reconciler.reconcile(user_id).await
    }

    /// Route a click on one of our prompts.
    pub async fn handle_button_click(
        &self,
        ctx: &Interaction,
        request_id: &str,
        component_id: &str,
    ) -> Result<ButtonOutcome, WagerError> {
        let meta = correlation::decode(request_id).ok_or(WagerError::InvalidCorrelationToken)?;
        let action =
            ButtonAction::resolve(meta.kind, component_id).ok_or(WagerError::InvalidCorrelationToken)?;
        debug!(user = %ctx.user_id, match_id = meta.match_id, action = ?action, "button click");

        match action {
            ButtonAction::Confirm => self
                .confirm_intent(ctx, request_id)
                .await
                .map(ButtonOutcome::Settlement),
            ButtonAction::Cancel => {
                self.guard_foreign_intent(ctx, request_id)?;
                Ok(ButtonOutcome::Cancel(self.cancel_intent(&ctx.user_id)))
            }
            ButtonAction::ClaimConfirm => {
                let info = self.load_match(meta.match_id).await?;
                let record = self.load_wager(&ctx.user_id, &info).await?;
                self.resolver.check_claim(&info, &record).await?;
                self.orchestrator
                    .request_claim(ctx, &info, &record)
                    .await
                    .map(ButtonOutcome::Settlement)
            }
            ButtonAction::RefundConfirm => {
                let info = self.load_match(meta.match_id).await?;
                let record = self.load_wager(&ctx.user_id, &info).await?;
                self.resolver.check_refund(&info, &record).await?;
                self.orchestrator
                    .request_refund(ctx, &info, &record)
                    .await
                    .map(ButtonOutcome::Settlement)
            }
            ButtonAction::ClaimCancel => Ok(ButtonOutcome::Dismissed(SettlementKind::Claim)),
            ButtonAction::RefundCancel => Ok(ButtonOutcome::Dismissed(SettlementKind::Refund)),
        }
    }

    /// Route the wallet's answer to a transaction prompt.
    pub async fn handle_transaction_result(
        &self,
        ctx: &Interaction,
        request_id: &str,
        tx_hash: Option<B256>,
        success: bool,
    ) -> Result<SettlementOutcome, WagerError> {
        let meta = correlation::decode(request_id).ok_or(WagerError::InvalidCorrelationToken)?;
        let kind = match meta.kind {
            TokenKind::Wager => SettlementKind::Wager,
            TokenKind::Claim => SettlementKind::Claim,
            TokenKind::ClaimRefund => SettlementKind::Refund,
            TokenKind::Refund => return Err(WagerError::InvalidCorrelationToken),
        };
        if meta.kind.uses_intent() {
            self.guard_foreign_intent(ctx, request_id)?;
        }

        let tx_hash = match tx_hash {
            Some(hash) if success => hash,
            _ => {
                info!(user = %ctx.user_id, kind = %kind, match_id = meta.match_id, "transaction not submitted by wallet");
                if kind == SettlementKind::Wager {
                    self.orchestrator
                        .clear_answered_intent(&ctx.user_id, meta.match_id, request_id);
                }
                return Ok(SettlementOutcome::NotSubmitted { kind });
            }
        };
        self.orchestrator
            .settle(ctx, kind, request_id, meta.match_id, tx_hash)
            .await
    }

    /// Reject a response whose token belongs to another user's live intent.
    fn guard_foreign_intent(&self, ctx: &Interaction, token: &str) -> Result<(), WagerError> {
        match self.intents.get_by_correlation_token(token) {
            Ok(intent) if intent.user_id != ctx.user_id => {
                warn!(user = %ctx.user_id, owner = %intent.user_id, "response to another user's prompt");
                Err(WagerError::NotEligible(
                    "This confirmation belongs to another user".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Handle one event and reply in the originating channel.
    pub async fn handle(&self, ctx: &Interaction, event: InboundEvent) {
        let reply = match self.dispatch(ctx, event).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(user = %ctx.user_id, error = %e, "request failed");
                Some(e.user_message())
            }
        };
        let Some(text) = reply else {
            return;
        };
        if let Err(e) = self
            .transport
            .send_message(&ctx.channel_id, &text, &ctx.opts())
            .await
        {
            warn!(user = %ctx.user_id, channel = %ctx.channel_id, error = %e, "failed to deliver reply");
        }
    }

    async fn dispatch(&self, ctx: &Interaction, event: InboundEvent) -> Result<Option<String>, WagerError> {
        match event {
            InboundEvent::Command { text } => {
                let Some(command) = Command::parse(&text)? else {
                    return Ok(None);
                };
                match command {
                    // The confirmation prompt is the reply.
                    Command::Bet {
                        match_id,
                        prediction,
                        stake,
                    } => self
                        .place_wager_intent(ctx, match_id, prediction, &stake)
                        .await
                        .map(|_| None),
                    Command::Cancel => Ok(Some(replies::cancel_message(&self.cancel_intent(&ctx.user_id)))),
                    Command::Claim { match_id } => self.request_claim(ctx, match_id).await.map(|_| None),
                    Command::ClaimRefund { match_id } => self.request_refund(ctx, match_id).await.map(|_| None),
                    Command::Sync => {
                        let report = self.reconcile(&ctx.user_id).await?;
                        Ok(Some(replies::reconcile_message(&report)))
                    }
                }
            }
            InboundEvent::ButtonClick {
                request_id,
                component_id,
            } => {
                let outcome = self.handle_button_click(ctx, &request_id, &component_id).await?;
                Ok(Some(match outcome {
                    ButtonOutcome::Settlement(outcome) => replies::settlement_message(&outcome),
                    ButtonOutcome::Cancel(outcome) => replies::cancel_message(&outcome),
                    ButtonOutcome::Dismissed(kind) => replies::dismissed_message(kind),
                }))
            }
            InboundEvent::TransactionResult {
                request_id,
                tx_hash,
                success,
            } => {
                let outcome = self
                    .handle_transaction_result(ctx, &request_id, tx_hash, success)
                    .await?;
                Ok(Some(replies::settlement_message(&outcome)))
            }
        }
    }
}

/// Errors after which pressing Confirm again can still succeed.
fn keeps_intent(err: &WagerError) -> bool {
    !matches!(
        err,
        WagerError::BettingClosed(_)
            | WagerError::AlreadyWagered(_)
            | WagerError::MatchUnavailable(_)
            | WagerError::IntentExpiredOrMissing
    )
}
