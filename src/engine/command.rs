//! Slash commands owned by the wager engine.

use crate::domain::{Prediction, WagerError};

const BET_USAGE: &str = "/bet <match> <home|draw|away> <stake>, e.g. /bet 7 home 0.01";
const CLAIM_USAGE: &str = "/claim <match>, e.g. /claim 7";
const REFUND_USAGE: &str = "/claim_refund <match>, e.g. /claim_refund 7";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Bet {
        match_id: i64,
        prediction: Prediction,
        stake: String,
    },
    Cancel,
    Claim {
        match_id: i64,
    },
    ClaimRefund {
        match_id: i64,
    },
    Sync,
}

impl Command {
    /// `Ok(None)` for text that is not one of our commands (other handlers
    /// own it). Malformed arguments to one of ours are a usage error.
    pub fn parse(text: &str) -> Result<Option<Self>, WagerError> {
        let mut words = text.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let name = head.strip_prefix('/').unwrap_or(head);
        // "/bet@wagerline" style mentions
        let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match name.as_str() {
            "bet" => match args.as_slice() {
                [match_ref, pick, stake] => Command::Bet {
                    match_id: parse_match_ref(match_ref).ok_or(WagerError::Usage(BET_USAGE))?,
                    prediction: pick.parse()?,
                    stake: stake.to_string(),
                },
                _ => return Err(WagerError::Usage(BET_USAGE)),
            },
            "cancel" => Command::Cancel,
            "claim" => Command::Claim {
                match_id: single_match_ref(&args).ok_or(WagerError::Usage(CLAIM_USAGE))?,
            },
            "claim_refund" | "refund" => Command::ClaimRefund {
                match_id: single_match_ref(&args).ok_or(WagerError::Usage(REFUND_USAGE))?,
            },
            "sync" => Command::Sync,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn single_match_ref(args: &[&str]) -> Option<i64> {
    match args {
        [match_ref] => parse_match_ref(match_ref),
        _ => None,
    }
}

/// `7` or `#7`.
fn parse_match_ref(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('#').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
