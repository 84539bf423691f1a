//! Settlement: drive one wager, claim or refund from user confirmation to a
//! recorded outcome.
//!
//! Per operation the states are
//! `Confirmed → MatchEnsuredOnChain → TxRequested → TxSubmitted →
//! {Success, Reverted, Unconfirmable}`. `MatchEnsuredOnChain` only applies to
//! wagers. Local state is written only after a receipt reports success.

pub mod orchestrator;
pub mod retry;

pub use orchestrator::SettlementOrchestrator;
pub use retry::RetryPolicy;

use crate::domain::{SettlementKind, WagerRecord};
use alloy::primitives::{B256, U256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Confirmed,
    MatchEnsuredOnChain,
    TxRequested,
    TxSubmitted,
    Success,
    Reverted,
    Unconfirmable,
}

impl SettlementState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SettlementState::Success | SettlementState::Reverted | SettlementState::Unconfirmable
        )
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementState::Confirmed => "confirmed",
            SettlementState::MatchEnsuredOnChain => "match_ensured_on_chain",
            SettlementState::TxRequested => "tx_requested",
            SettlementState::TxSubmitted => "tx_submitted",
            SettlementState::Success => "success",
            SettlementState::Reverted => "reverted",
            SettlementState::Unconfirmable => "unconfirmable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// A transaction was handed to the user's wallet for signature.
    TxRequested { kind: SettlementKind, request_id: String },
    WagerSettled {
        /// `None` when no linked wallet shows the bet.
        record: Option<WagerRecord>,
        newly_recorded: bool,
        /// On-chain success the local ledger could not capture.
        needs_reconcile: bool,
        tx_hash: B256,
    },
    ClaimSettled {
        payout: U256,
        profit: U256,
        /// No claim event in the receipt; payout is the stake floor.
        approximate: bool,
        newly_recorded: bool,
        needs_reconcile: bool,
        tx_hash: B256,
    },
    RefundSettled {
        amount: U256,
        newly_recorded: bool,
        needs_reconcile: bool,
        tx_hash: B256,
    },
    /// The wallet declined or never produced a transaction.
    NotSubmitted { kind: SettlementKind },
}
