//! Claim eligibility: can this wallet claim against this match, and through
//! which path?
//!
//! The contract's claim-status view distinguishes three claimable cases:
//! a correct prediction (winnings), a cancelled match (refund), and a
//! resolved match nobody predicted correctly. The last one is still a
//! winnings-type claim paying back the stake and must not be offered as a
//! refund.
//!
//! Gateway reads are never retried here.

use crate::domain::{ClaimType, MatchInfo, MatchStatus, Prediction, WagerError, WagerRecord};
use crate::onchain::ContractGateway;
use crate::store::Ledger;
use alloy::primitives::U256;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// No on-chain identity yet, or no result (and not cancelled).
    NotResolvable,
    Claimable {
        claim_type: ClaimType,
        amount: U256,
        /// Winnings-type claim on a match nobody predicted correctly.
        no_winners: bool,
    },
    AlreadyClaimed,
    Lost {
        prediction: Prediction,
        result: Prediction,
    },
    NotYetClaimable,
}

pub struct ClaimResolver {
    gateway: Arc<dyn ContractGateway>,
    ledger: Arc<dyn Ledger>,
}

impl ClaimResolver {
    pub fn new(gateway: Arc<dyn ContractGateway>, ledger: Arc<dyn Ledger>) -> Self {
        Self { gateway, ledger }
    }

    pub async fn resolve(&self, info: &MatchInfo, record: &WagerRecord) -> Result<Eligibility, WagerError> {
        let Some(on_chain_id) = info.on_chain_match_id else {
            return Ok(Eligibility::NotResolvable);
        };
        if info.result.is_none() && info.status != MatchStatus::Cancelled {
            return Ok(Eligibility::NotResolvable);
        }
        let wallet = record.wallet_address;

        if record.claimed {
            self.check_claimed_on_chain(on_chain_id, record).await;
            return Ok(Eligibility::AlreadyClaimed);
        }

        let status = self
            .gateway
            .get_claim_status(on_chain_id, wallet)
            .await
            .map_err(WagerError::from_read)?;

        if status.can_claim {
            let no_winners = status.claim_type == ClaimType::Winnings
                && info.result.is_some_and(|result| result != record.prediction);
            return Ok(Eligibility::Claimable {
                claim_type: status.claim_type,
                amount: status.amount,
                no_winners,
            });
        }

        let bet = self
            .gateway
            .get_user_bet(on_chain_id, wallet)
            .await
            .map_err(WagerError::from_read)?;
        if bet.is_some_and(|b| b.claimed) {
            match self.ledger.mark_claimed(&record.user_id, record.match_id).await {
                Ok(_) => info!(
                    user = %record.user_id,
                    match_id = record.match_id,
                    "claimed on-chain but not locally, ledger updated"
                ),
                Err(e) => warn!(
                    user = %record.user_id,
                    match_id = record.match_id,
                    error = %e,
                    "failed to mirror on-chain claimed flag"
                ),
            }
            return Ok(Eligibility::AlreadyClaimed);
        }

        if let Some(result) = info.result {
            if result != record.prediction {
                return Ok(Eligibility::Lost {
                    prediction: record.prediction,
                    result,
                });
            }
        }
        Ok(Eligibility::NotYetClaimable)
    }

    /// Local says claimed; the chain should agree.
    async fn check_claimed_on_chain(&self, on_chain_id: u64, record: &WagerRecord) {
        if let Ok(Some(bet)) = self.gateway.get_user_bet(on_chain_id, record.wallet_address).await {
            if !bet.claimed {
                warn!(
                    user = %record.user_id,
                    match_id = record.match_id,
                    wallet = %record.wallet_address,
                    "ledger marks bet claimed but the chain does not"
                );
            }
        }
    }

    /// Amount claimable through the winnings path, or why not.
    pub async fn check_claim(&self, info: &MatchInfo, record: &WagerRecord) -> Result<(U256, bool), WagerError> {
        match self.resolve(info, record).await? {
            Eligibility::Claimable {
                claim_type: ClaimType::Winnings,
                amount,
                no_winners,
            } => Ok((amount, no_winners)),
            Eligibility::Claimable { claim_type, .. } => {
                Err(WagerError::WrongClaimType { actual: claim_type })
            }
            Eligibility::AlreadyClaimed => Err(WagerError::AlreadyClaimed),
            Eligibility::Lost { prediction, result } => {
                Err(WagerError::PredictionLost { prediction, result })
            }
            Eligibility::NotResolvable => Err(not_settled(info)),
            Eligibility::NotYetClaimable => Err(WagerError::NotEligible(format!(
                "Nothing is claimable yet for {}",
                info.label()
            ))),
        }
    }

    /// Refund amount for a cancelled match, or why not. A no-winners
    /// resolution is rejected here in favour of the winnings path.
    pub async fn check_refund(&self, info: &MatchInfo, record: &WagerRecord) -> Result<U256, WagerError> {
        match self.resolve(info, record).await? {
            Eligibility::Claimable {
                claim_type: ClaimType::Refund,
                amount,
                ..
            } => Ok(amount),
            Eligibility::Claimable { claim_type, .. } => {
                Err(WagerError::WrongClaimType { actual: claim_type })
            }
            Eligibility::AlreadyClaimed => Err(WagerError::AlreadyClaimed),
            Eligibility::Lost { prediction, result } => {
                Err(WagerError::PredictionLost { prediction, result })
            }
            Eligibility::NotResolvable => Err(not_settled(info)),
            Eligibility::NotYetClaimable => {
                let on_chain_id = info.on_chain_match_id.unwrap_or_default();
                let eligibility = self
                    .gateway
                    .is_refund_eligible(on_chain_id, record.wallet_address)
                    .await
                    .map_err(WagerError::from_read)?;
                let reason = eligibility
                    .reason
                    .unwrap_or_else(|| "This bet is not eligible for a refund".to_string());
                Err(WagerError::NotEligible(reason))
            }
        }
    }
}

fn not_settled(info: &MatchInfo) -> WagerError {
    WagerError::NotEligible(format!("{} has not been settled yet", info.label()))
}
