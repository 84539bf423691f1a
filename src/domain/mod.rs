//! Core wager types shared by the intent register, the settlement
//! orchestrator, the reconciler and the ledger.
//!
//! Amounts that touch the chain are always integer wei (`U256`). Decimal
//! presentations are derived from that single integer via [`amount`].

pub mod amount;
pub mod error;

pub use error::WagerError;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A match outcome a user can stake on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Prediction {
    Home,
    Draw,
    Away,
}

impl Prediction {
    /// Escrow contract encoding. `0` means "no prediction" on-chain.
    pub fn as_u8(self) -> u8 {
        match self {
            Prediction::Home => 1,
            Prediction::Draw => 2,
            Prediction::Away => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Prediction::Home),
            2 => Some(Prediction::Draw),
            3 => Some(Prediction::Away),
            _ => None,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Home => write!(f, "HOME"),
            Prediction::Draw => write!(f, "DRAW"),
            Prediction::Away => write!(f, "AWAY"),
        }
    }
}

impl FromStr for Prediction {
    type Err = WagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" | "h" | "1" => Ok(Prediction::Home),
            "draw" | "d" | "x" => Ok(Prediction::Draw),
            "away" | "a" | "2" => Ok(Prediction::Away),
            other => Err(WagerError::InvalidPrediction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
    Postponed,
    Cancelled,
}

/// A fixture as stored locally. Owned by the fixture collaborator; this
/// crate only reads it and assigns `on_chain_match_id` lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub id: i64,
    pub on_chain_match_id: Option<u64>,
    pub home_team: String,
    pub away_team: String,
    pub competition: String,
    pub kickoff_time: DateTime<Utc>,
    pub result: Option<Prediction>,
    pub status: MatchStatus,
}

impl MatchInfo {
    pub fn betting_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MatchStatus::Scheduled && now < self.kickoff_time
    }

    pub fn label(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    /// Team name (or "Draw") for a prediction on this match.
    pub fn pick_label(&self, prediction: Prediction) -> &str {
        match prediction {
            Prediction::Home => &self.home_team,
            Prediction::Draw => "Draw",
            Prediction::Away => &self.away_team,
        }
    }
}

/// Durable ledger row: one per `(user_id, match_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerRecord {
    pub user_id: String,
    pub wallet_address: Address,
    pub match_id: i64,
    pub on_chain_match_id: u64,
    pub prediction: Prediction,
    #[serde(with = "amount::wei_string")]
    pub stake_wei: U256,
    /// None for wagers recovered by reconciliation.
    pub tx_hash: Option<B256>,
    pub claimed: bool,
}

/// A wallet's bet as reported by the escrow contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBet {
    pub amount: U256,
    pub prediction: Option<Prediction>,
    pub claimed: bool,
}

impl UserBet {
    pub fn is_placed(&self) -> bool {
        !self.amount.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    None,
    Winnings,
    Refund,
}

impl ClaimType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ClaimType::Winnings,
            2 => ClaimType::Refund,
            _ => ClaimType::None,
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimType::None => write!(f, "none"),
            ClaimType::Winnings => write!(f, "winnings"),
            ClaimType::Refund => write!(f, "refund"),
        }
    }
}

/// Contract claim-status view, computed per request and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimStatus {
    pub can_claim: bool,
    pub claim_type: ClaimType,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundEligibility {
    pub eligible: bool,
    pub reason: Option<String>,
}

/// The three on-chain operations a settlement can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementKind {
    Wager,
    Claim,
    Refund,
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementKind::Wager => write!(f, "wager"),
            SettlementKind::Claim => write!(f, "claim"),
            SettlementKind::Refund => write!(f, "refund"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn prediction_contract_encoding() {
        for p in [Prediction::Home, Prediction::Draw, Prediction::Away] {
            assert_eq!(Prediction::from_u8(p.as_u8()), Some(p));
        }
        assert_eq!(Prediction::from_u8(0), None);
        assert_eq!(Prediction::from_u8(4), None);
    }

    #[test]
    fn prediction_parsing() {
        assert_eq!("Home".parse::<Prediction>().unwrap(), Prediction::Home);
        assert_eq!(" x ".parse::<Prediction>().unwrap(), Prediction::Draw);
        assert_eq!("away".parse::<Prediction>().unwrap(), Prediction::Away);
        assert!(matches!(
            "over".parse::<Prediction>(),
            Err(WagerError::InvalidPrediction(pick)) if pick == "over"
        ));
    }

    #[test]
    fn betting_closes_at_kickoff() {
        let kickoff = Utc::now() + Duration::hours(1);
        let mut m = MatchInfo {
            id: 7,
            on_chain_match_id: None,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            competition: "EPL".into(),
            kickoff_time: kickoff,
            result: None,
            status: MatchStatus::Scheduled,
        };
        assert!(m.betting_open_at(kickoff - Duration::minutes(1)));
        assert!(!m.betting_open_at(kickoff));
        m.status = MatchStatus::Postponed;
        assert!(!m.betting_open_at(kickoff - Duration::minutes(1)));
        assert_eq!(m.pick_label(Prediction::Away), "Chelsea");
    }

    #[test]
    fn wager_record_stores_stake_as_decimal_wei() {
        let record = WagerRecord {
            user_id: "0xuser".into(),
            wallet_address: Address::ZERO,
            match_id: 7,
            on_chain_match_id: 42,
            prediction: Prediction::Home,
            stake_wei: U256::from(10_000_000_000_000_000u64),
            tx_hash: None,
            claimed: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["stake_wei"], "10000000000000000");
        assert_eq!(json["prediction"], "HOME");
        let back: WagerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
