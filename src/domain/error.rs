//! Wager lifecycle error taxonomy.
//!
//! Expected outcomes (expired intent, already claimed, wrong claim path) are
//! values of [`WagerError`], not panics. Every variant renders a user-facing
//! message that names a next action.

use crate::domain::{ClaimType, Prediction, SettlementKind};
use crate::onchain::GatewayError;
use alloy::primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WagerError {
    #[error("no live intent for this request (expired or already processed)")]
    IntentExpiredOrMissing,
    #[error("a wager is already pending confirmation")]
    AlreadyPending,
    #[error("match {0} is not available")]
    MatchUnavailable(i64),
    #[error("betting closed for match {0}")]
    BettingClosed(i64),
    #[error("user already has a wager on match {0}")]
    AlreadyWagered(i64),
    #[error("unknown prediction '{0}'")]
    InvalidPrediction(String),
    #[error("invalid stake: {0}")]
    InvalidStake(String),
    #[error("no wallet linked to this user")]
    NoWallet,
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("manager wallet has insufficient gas")]
    InsufficientGas,
    #[error("bot wallet is not an authorized match manager")]
    NotAuthorizedManager,
    #[error("nonce conflict on manager wallet")]
    NonceConflict,
    #[error("contract rejected the call: {0}")]
    GatewayRejected(String),
    #[error("already claimed")]
    AlreadyClaimed,
    #[error("not eligible: {0}")]
    NotEligible(String),
    #[error("prediction {prediction} lost, result was {result}")]
    PredictionLost {
        prediction: Prediction,
        result: Prediction,
    },
    #[error("wrong claim path, contract reports a {actual} claim")]
    WrongClaimType { actual: ClaimType },
    #[error("invalid correlation token")]
    InvalidCorrelationToken,
    #[error("{kind} transaction {tx_hash} reverted")]
    TransactionReverted { kind: SettlementKind, tx_hash: B256 },
    #[error("{kind} transaction {tx_hash} unconfirmable: {reason}")]
    TransactionUnconfirmable {
        kind: SettlementKind,
        tx_hash: B256,
        reason: String,
    },
    #[error("ledger error: {0}")]
    Ledger(#[from] anyhow::Error),
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl From<GatewayError> for WagerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InsufficientGas(_) => WagerError::InsufficientGas,
            GatewayError::NotAuthorizedManager(_) => WagerError::NotAuthorizedManager,
            GatewayError::NonceConflict(_) => WagerError::NonceConflict,
            GatewayError::RpcTimeout(msg) | GatewayError::Unavailable(msg) => {
                WagerError::GatewayUnavailable(msg)
            }
            GatewayError::Contract(msg) => WagerError::GatewayRejected(msg),
        }
    }
}

impl WagerError {
    /// Read paths surface gateway failures as `GatewayUnavailable` regardless
    /// of class.
    pub fn from_read(err: GatewayError) -> Self {
        WagerError::GatewayUnavailable(err.to_string())
    }

    /// Text shown to the user. Always includes what to do next.
    pub fn user_message(&self) -> String {
        match self {
            WagerError::IntentExpiredOrMissing => {
                "This request was already processed or has expired. \
                 Start a new bet with /bet if you still want to place one."
                    .to_string()
            }
            WagerError::AlreadyPending => "You already have a bet waiting for confirmation. \
                 Confirm or cancel it first, or use /cancel."
                .to_string(),
            WagerError::MatchUnavailable(id) => format!(
                "Match #{id} isn't available. Check /matches for today's fixtures."
            ),
            WagerError::BettingClosed(id) => format!(
                "Betting on match #{id} has closed (kickoff has passed). Pick another match from /matches."
            ),
            WagerError::AlreadyWagered(id) => format!(
                "You've already placed a bet on match #{id}. Only one bet per match is allowed; use /mybets to see it."
            ),
            WagerError::InvalidPrediction(pick) => format!(
                "'{pick}' isn't a prediction. Pick home, draw or away, e.g. /bet 7 home 0.01."
            ),
            WagerError::InvalidStake(reason) => {
                format!("Invalid stake: {reason}. Try again with an amount like 0.01.")
            }
            WagerError::NoWallet => "No wallet is linked to your account. \
                 Link a wallet and try again."
                .to_string(),
            WagerError::GatewayUnavailable(_) => "The blockchain is not responding right now. \
                 Please try again in a minute."
                .to_string(),
            WagerError::InsufficientGas => "The bot's wallet is out of gas to create this match on-chain. \
                 An admin has to top it up; your bet is still pending, so press Confirm again once they do."
                .to_string(),
            WagerError::NotAuthorizedManager => "The bot is not authorized to create matches on the contract. \
                 An admin needs to grant it the match-manager role; your bet is still pending, \
                 so press Confirm again afterwards."
                .to_string(),
            WagerError::NonceConflict => "The bot's wallet has a transaction stuck in flight. \
                 Wait a moment and press Confirm again; your bet is still pending."
                .to_string(),
            WagerError::GatewayRejected(_) => "The contract rejected the request. \
                 Your bet is still pending; press Confirm to retry, or contact support if it keeps failing."
                .to_string(),
            WagerError::AlreadyClaimed => {
                "This bet has already been claimed. Check /mybets for your history.".to_string()
            }
            WagerError::NotEligible(reason) => {
                format!("{reason}. Check /mybets or try again after the match is settled.")
            }
            WagerError::PredictionLost { prediction, result } => format!(
                "Your prediction ({prediction}) didn't win; the result was {result}. \
                 Nothing to claim for this match. Better luck next time with /bet!"
            ),
            WagerError::WrongClaimType { actual } => match actual {
                ClaimType::Refund => "This match was cancelled, so your stake comes back as a refund. \
                     Use /claim_refund instead."
                    .to_string(),
                ClaimType::Winnings => "This match is settled through the winnings claim \
                     (if nobody picked the result, every stake is returned that way). \
                     Use /claim instead."
                    .to_string(),
                ClaimType::None => "Nothing is claimable for this match yet. Try again later.".to_string(),
            },
            WagerError::InvalidCorrelationToken => {
                "That button or transaction isn't recognised. Please run the command again.".to_string()
            }
            WagerError::TransactionReverted { kind, tx_hash } => match kind {
                SettlementKind::Wager => format!(
                    "Your bet transaction failed on-chain ({tx_hash}). Nothing was recorded; \
                     start again with /bet."
                ),
                SettlementKind::Claim | SettlementKind::Refund => format!(
                    "The {kind} transaction failed on-chain ({tx_hash}). Likely causes: \
                     a different wallet signed than the one that placed the bet, \
                     it was already claimed, or the match isn't resolved yet. \
                     Check /mybets and try again with the wallet that placed the bet."
                ),
            },
            WagerError::TransactionUnconfirmable { kind, tx_hash, .. } => format!(
                "I couldn't confirm your {kind} transaction {tx_hash}. It may still go through: \
                 check it on a block explorer, then run /sync to refresh your record."
            ),
            WagerError::Ledger(_) => "Something went wrong saving your data. \
                 Please try again, or contact support if this persists."
                .to_string(),
            WagerError::Transport(_) => "I couldn't deliver the confirmation prompt. \
                 Please run the command again."
                .to_string(),
            WagerError::Usage(usage) => format!("Usage: {usage}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_gateway_errors_keep_their_class() {
        let e: WagerError = GatewayError::InsufficientGas("x".into()).into();
        assert!(matches!(e, WagerError::InsufficientGas));
        let e: WagerError = GatewayError::NotAuthorizedManager("x".into()).into();
        assert!(matches!(e, WagerError::NotAuthorizedManager));
        let e: WagerError = GatewayError::RpcTimeout("x".into()).into();
        assert!(matches!(e, WagerError::GatewayUnavailable(_)));
    }

    #[test]
    fn read_failures_are_always_unavailable() {
        let e = WagerError::from_read(GatewayError::Contract("boom".into()));
        assert!(matches!(e, WagerError::GatewayUnavailable(_)));
    }

    #[test]
    fn wrong_claim_type_points_at_the_other_command() {
        let refund = WagerError::WrongClaimType { actual: ClaimType::Refund };
        assert!(refund.user_message().contains("/claim_refund"));
        let winnings = WagerError::WrongClaimType { actual: ClaimType::Winnings };
        assert!(winnings.user_message().contains("/claim "));
    }

    #[test]
    fn unknown_prediction_shows_the_choices() {
        let text = WagerError::InvalidPrediction("over".into()).user_message();
        assert!(text.contains("home, draw or away"));
        assert!(!text.contains("/mybets"));
    }

    #[test]
    fn reverted_wager_asks_for_a_fresh_command() {
        let e = WagerError::TransactionReverted {
            kind: SettlementKind::Wager,
            tx_hash: B256::ZERO,
        };
        assert!(e.user_message().contains("/bet"));
    }
}
