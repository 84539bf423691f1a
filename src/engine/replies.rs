//! User-facing prompts and messages.

use crate::correlation::{CANCEL_COMPONENT, CONFIRM_COMPONENT};
use crate::domain::amount::format_eth;
use crate::domain::{MatchInfo, SettlementKind};
use crate::engine::{CancelOutcome, ClaimQuote};
use crate::intent::WagerIntent;
use crate::reconcile::ReconcileReport;
use crate::settlement::SettlementOutcome;
use crate::transport::{ButtonStyle, Prompt, PromptButton};
use alloy::primitives::{B256, U256};

fn confirm_buttons(confirm_label: &str) -> Vec<PromptButton> {
    vec![
        PromptButton {
            id: CONFIRM_COMPONENT.into(),
            label: confirm_label.into(),
            style: ButtonStyle::Primary,
        },
        PromptButton {
            id: CANCEL_COMPONENT.into(),
            label: "Cancel".into(),
            style: ButtonStyle::Danger,
        },
    ]
}

pub fn wager_prompt(token: String, info: &MatchInfo, intent: &WagerIntent) -> Prompt {
    Prompt::Form {
        id: token,
        title: format!("Confirm bet on {}", info.label()),
        body: format!(
            "{} ETH on {} ({}).\nKickoff {}. This offer expires at {}.",
            intent.stake,
            info.pick_label(intent.prediction),
            intent.prediction,
            info.kickoff_time.format("%Y-%m-%d %H:%M UTC"),
            intent.expires_at.format("%H:%M:%S UTC"),
        ),
        buttons: confirm_buttons("Confirm"),
    }
}

pub fn claim_prompt(token: String, info: &MatchInfo, quote: &ClaimQuote) -> Prompt {
    let body = if quote.no_winners {
        format!(
            "Nobody predicted the result of {}, so every stake is paid back through the winnings claim.\n\
             You can claim {} ETH.",
            info.label(),
            format_eth(quote.amount)
        )
    } else {
        format!("You won on {}! You can claim {} ETH.", info.label(), format_eth(quote.amount))
    };
    Prompt::Form {
        id: token,
        title: format!("Claim winnings for {}", info.label()),
        body,
        buttons: confirm_buttons("Claim"),
    }
}

pub fn refund_prompt(token: String, info: &MatchInfo, amount: U256) -> Prompt {
    Prompt::Form {
        id: token,
        title: format!("Claim refund for {}", info.label()),
        body: format!(
            "{} was cancelled. Your stake of {} ETH can be refunded.",
            info.label(),
            format_eth(amount)
        ),
        buttons: confirm_buttons("Refund"),
    }
}

pub fn cancel_message(outcome: &CancelOutcome) -> String {
    match outcome {
        CancelOutcome::Cancelled { match_id } => {
            format!("Your pending bet on match #{match_id} was cancelled. Start a new one with /bet.")
        }
        CancelOutcome::NothingPending => {
            "Nothing to cancel: this request was already processed or has expired.".to_string()
        }
    }
}

fn sync_hint() -> &'static str {
    "Run /sync in a minute to repair your record."
}

pub fn settlement_message(outcome: &SettlementOutcome) -> String {
    match outcome {
        SettlementOutcome::TxRequested { kind, .. } => {
            format!("Sign the {kind} transaction in your wallet to continue.")
        }
        SettlementOutcome::WagerSettled {
            record: Some(record),
            needs_reconcile,
            tx_hash,
            ..
        } => {
            let mut text = format!(
                "Bet placed: {} ETH on {} for match #{} ({}).",
                format_eth(record.stake_wei),
                record.prediction,
                record.match_id,
                short_hash(tx_hash)
            );
            if *needs_reconcile {
                text.push_str(" It is on-chain, but I couldn't save it locally. ");
                text.push_str(sync_hint());
            }
            text
        }
        SettlementOutcome::WagerSettled {
            record: None,
            tx_hash,
            ..
        } => format!(
            "Your bet transaction succeeded ({}), but I couldn't match it to one of your wallets yet. {}",
            short_hash(tx_hash),
            sync_hint()
        ),
        SettlementOutcome::ClaimSettled {
            payout,
            profit,
            approximate,
            needs_reconcile,
            tx_hash,
            ..
        } => {
            let mut text = if *approximate {
                format!(
                    "Claim confirmed ({}). You received at least {} ETH; check your wallet for the exact amount.",
                    short_hash(tx_hash),
                    format_eth(*payout)
                )
            } else {
                format!(
                    "Claim confirmed ({}). You received {} ETH ({} ETH profit).",
                    short_hash(tx_hash),
                    format_eth(*payout),
                    format_eth(*profit)
                )
            };
            if *needs_reconcile {
                text.push(' ');
                text.push_str(sync_hint());
            }
            text
        }
        SettlementOutcome::RefundSettled {
            amount,
            needs_reconcile,
            tx_hash,
            ..
        } => {
            let mut text = format!(
                "Refund confirmed ({}). {} ETH is back in your wallet.",
                short_hash(tx_hash),
                format_eth(*amount)
            );
            if *needs_reconcile {
                text.push(' ');
                text.push_str(sync_hint());
            }
            text
        }
        SettlementOutcome::NotSubmitted { kind } => match kind {
            SettlementKind::Wager => {
                "The bet transaction was not signed, so nothing was placed. Start again with /bet.".to_string()
            }
            SettlementKind::Claim => {
                "The claim transaction was not signed. Run /claim again when you're ready.".to_string()
            }
            SettlementKind::Refund => {
                "The refund transaction was not signed. Run /claim_refund again when you're ready.".to_string()
            }
        },
    }
}

pub fn dismissed_message(kind: SettlementKind) -> String {
    format!("OK, the {kind} was not submitted. Nothing changed.")
}

pub fn reconcile_message(report: &ReconcileReport) -> String {
    if report.recovered.is_empty() {
        return format!(
            "Your bets are in sync ({} recent matches checked).",
            report.matches_checked
        );
    }
    let ids: Vec<String> = report.recovered.iter().map(|id| format!("#{id}")).collect();
    format!(
        "Recovered {} bet(s) from the chain: {}. Check /mybets.",
        report.recovered.len(),
        ids.join(", ")
    )
}

fn short_hash(hash: &B256) -> String {
    let full = hash.to_string();
    format!("{}…{}", &full[..10], &full[full.len() - 6..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::wager_record;

    #[test]
    fn partial_success_points_at_sync() {
        let text = settlement_message(&SettlementOutcome::WagerSettled {
            record: Some(wager_record("u1", 7, 10_000_000_000_000_000)),
            newly_recorded: false,
            needs_reconcile: true,
            tx_hash: B256::repeat_byte(0xab),
        });
        assert!(text.contains("0.01 ETH on HOME"));
        assert!(text.contains("/sync"));
    }

    #[test]
    fn approximate_claims_say_so() {
        let text = settlement_message(&SettlementOutcome::ClaimSettled {
            payout: U256::from(10_000_000_000_000_000u64),
            profit: U256::ZERO,
            approximate: true,
            newly_recorded: true,
            needs_reconcile: false,
            tx_hash: B256::ZERO,
        });
        assert!(text.contains("at least 0.01 ETH"));
    }

    #[test]
    fn short_hashes() {
        assert_eq!(short_hash(&B256::repeat_byte(0xab)), "0xabababab…ababab");
    }
}
