//! Escrow contract ABI and the pure helpers around it: call data encoding
//! and receipt log decoding.
//!
//! Nothing here performs I/O, so settlement interpretation can be tested
//! against hand-built logs.

use crate::domain::{Prediction, UserBet};
use alloy::primitives::{Address, Bytes, Log, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    #[sol(rpc)]
    interface IWagerEscrow {
        struct Bet {
            uint256 amount;
            uint8 prediction;
            bool claimed;
        }

        event MatchCreated(uint256 indexed matchId, string homeTeam, string awayTeam, uint256 kickoffTime);
        event BetPlaced(uint256 indexed matchId, address indexed user, uint8 prediction, uint256 amount);
        event WinningsClaimed(uint256 indexed matchId, address indexed user, uint256 amount, uint256 profit);
        event RefundClaimed(uint256 indexed matchId, address indexed user, uint256 amount);

        function createMatch(string homeTeam, string awayTeam, string competition, uint256 kickoffTime) external returns (uint256);
        function placeBet(uint256 matchId, uint8 prediction) external payable;
        function claimWinnings(uint256 matchId) external;
        function claimRefund(uint256 matchId) external;

        function getUserBet(uint256 matchId, address user) external view returns (Bet memory);
        function getBatchUserBets(uint256[] matchIds, address user) external view returns (Bet[] memory);
        function getClaimStatus(uint256 matchId, address user) external view returns (bool canClaim, uint8 claimType, uint256 amount);
        function isRefundEligible(uint256 matchId, address user) external view returns (bool eligible, string reason);
    }
}

pub fn place_bet_calldata(on_chain_match_id: u64, prediction: Prediction) -> Bytes {
    IWagerEscrow::placeBetCall {
        matchId: U256::from(on_chain_match_id),
        prediction: prediction.as_u8(),
    }
    .abi_encode()
    .into()
}

pub fn claim_winnings_calldata(on_chain_match_id: u64) -> Bytes {
    IWagerEscrow::claimWinningsCall {
        matchId: U256::from(on_chain_match_id),
    }
    .abi_encode()
    .into()
}

pub fn claim_refund_calldata(on_chain_match_id: u64) -> Bytes {
    IWagerEscrow::claimRefundCall {
        matchId: U256::from(on_chain_match_id),
    }
    .abi_encode()
    .into()
}

impl From<&IWagerEscrow::Bet> for UserBet {
    fn from(bet: &IWagerEscrow::Bet) -> Self {
        UserBet {
            amount: bet.amount,
            prediction: Prediction::from_u8(bet.prediction),
            claimed: bet.claimed,
        }
    }
}

/// Exact payout of a successful claim, read from the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedPayout {
    pub amount: U256,
    pub profit: U256,
}

/// Find the `WinningsClaimed` event for `on_chain_match_id` emitted by the
/// escrow at `escrow`.
pub fn find_winnings_claimed(logs: &[Log], escrow: Address, on_chain_match_id: u64) -> Option<ClaimedPayout> {
    let wanted = U256::from(on_chain_match_id);
    logs.iter()
        .filter(|log| log.address == escrow)
        .filter_map(|log| IWagerEscrow::WinningsClaimed::decode_log_data(&log.data).ok())
        .find(|event| event.matchId == wanted)
        .map(|event| ClaimedPayout {
            amount: event.amount,
            profit: event.profit,
        })
}

/// On-chain id assigned by a `createMatch` transaction.
pub fn find_match_created(logs: &[Log], escrow: Address) -> Option<u64> {
    logs.iter()
        .filter(|log| log.address == escrow)
        .filter_map(|log| IWagerEscrow::MatchCreated::decode_log_data(&log.data).ok())
        .find_map(|event| u64::try_from(event.matchId).ok())
}
