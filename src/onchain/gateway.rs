use crate::domain::{ClaimStatus, MatchInfo, Prediction, RefundEligibility, UserBet};
use crate::onchain::abi;
use crate::onchain::GatewayError;
use alloy::primitives::{Address, Bytes, Log, B256};
use async_trait::async_trait;

/// Result of registering a match with the escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMatch {
    pub on_chain_match_id: u64,
    pub tx_hash: B256,
}

/// The parts of a mined receipt settlement cares about.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<Log>,
}

/// Typed operations against the escrow contract.
///
/// Read operations never mutate. Writes are limited to `create_match`, signed
/// by the bot's manager wallet; user-side calls are only encoded here and
/// signed in the user's own wallet.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    fn contract_address(&self) -> Address;

    fn chain_id(&self) -> u64;

    async fn create_match(&self, info: &MatchInfo) -> Result<CreatedMatch, GatewayError>;

    fn encode_place_bet(&self, on_chain_match_id: u64, prediction: Prediction) -> Bytes {
        abi::place_bet_calldata(on_chain_match_id, prediction)
    }

    fn encode_claim_winnings(&self, on_chain_match_id: u64) -> Bytes {
        abi::claim_winnings_calldata(on_chain_match_id)
    }

    fn encode_claim_refund(&self, on_chain_match_id: u64) -> Bytes {
        abi::claim_refund_calldata(on_chain_match_id)
    }

    /// `None` when the wallet has no bet on the match.
    async fn get_user_bet(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<Option<UserBet>, GatewayError>;

    /// Bets of `wallet` on each of `on_chain_match_ids`, in one call. Only
    /// placed bets are returned.
    async fn get_batch_user_bets(
        &self,
        on_chain_match_ids: &[u64],
        wallet: Address,
    ) -> Result<Vec<(u64, UserBet)>, GatewayError>;

    async fn get_claim_status(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<ClaimStatus, GatewayError>;

    async fn is_refund_eligible(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<RefundEligibility, GatewayError>;

    /// Wait for the receipt of `tx_hash`, bounded by the gateway's receipt
    /// timeout.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, GatewayError>;
}
