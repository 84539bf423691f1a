//! Correlation tokens: routing metadata packed into the opaque identifiers
//! the chat transport hands back with button clicks and transaction results.
//!
//! Format: `{kind}-{match_id}-{user_prefix}-{thread_or_timestamp}`.
//!
//! The user prefix is for log correlation only. It is not unique and must
//! never be used to authorize anything; ownership checks use the full user
//! id from the inbound event.

use std::fmt;

pub const SEPARATOR: char = '-';
const USER_PREFIX_LEN: usize = 8;
const MAX_SUFFIX_LEN: usize = 32;
const MIN_SEGMENTS: usize = 3;

pub const CONFIRM_COMPONENT: &str = "confirm";
pub const CANCEL_COMPONENT: &str = "cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Wager confirmation prompt and the wager transaction.
    Wager,
    /// Winnings claim prompt and the claim transaction.
    Claim,
    /// The refund transaction.
    ClaimRefund,
    /// Refund confirmation prompt.
    Refund,
}

impl TokenKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TokenKind::Wager => "wager",
            TokenKind::Claim => "claim",
            TokenKind::ClaimRefund => "claimrefund",
            TokenKind::Refund => "refund",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "wager" => Some(TokenKind::Wager),
            "claim" => Some(TokenKind::Claim),
            "claimrefund" => Some(TokenKind::ClaimRefund),
            "refund" => Some(TokenKind::Refund),
            _ => None,
        }
    }

    /// Claim and refund flows never consult the intent register.
    pub fn uses_intent(self) -> bool {
        self == TokenKind::Wager
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub kind: TokenKind,
    pub match_id: i64,
    pub user_prefix: String,
    pub suffix: String,
}

/// Alphanumeric-only, so no separator can leak into a segment.
fn sanitize(raw: &str, max: usize) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(max)
        .collect()
}

pub fn user_prefix(user_id: &str) -> String {
    let stripped = user_id
        .strip_prefix("0x")
        .or_else(|| user_id.strip_prefix("0X"))
        .unwrap_or(user_id);
    sanitize(stripped, USER_PREFIX_LEN).to_ascii_lowercase()
}

pub fn encode(kind: TokenKind, match_id: i64, user_id: &str, thread_or_timestamp: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}{}",
        kind.prefix(),
        match_id,
        user_prefix(user_id),
        sanitize(thread_or_timestamp, MAX_SUFFIX_LEN),
        sep = SEPARATOR
    )
}

/// Purely syntactic; never fails loudly. Anything malformed is `None`.
pub fn decode(token: &str) -> Option<TokenMetadata> {
    let segments: Vec<&str> = token.splitn(4, SEPARATOR).collect();
    if segments.len() < MIN_SEGMENTS {
        return None;
    }

    let kind = TokenKind::from_prefix(segments[0])?;
    let raw_id = segments[1];
    if raw_id.is_empty() || !raw_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let match_id = raw_id.parse::<i64>().ok()?;

    Some(TokenMetadata {
        kind,
        match_id,
        user_prefix: segments[2].to_string(),
        suffix: segments.get(3).map(|s| s.to_string()).unwrap_or_default(),
    })
}

/// Kind of a token by its leading segment.
pub fn classify(token: &str) -> Option<TokenKind> {
    token
        .split(SEPARATOR)
        .next()
        .and_then(TokenKind::from_prefix)
}

/// The closed set of button actions, resolved once from the token kind and
/// the clicked component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Confirm,
    Cancel,
    ClaimConfirm,
    ClaimCancel,
    RefundConfirm,
    RefundCancel,
}

impl ButtonAction {
    pub fn resolve(kind: TokenKind, component_id: &str) -> Option<Self> {
        let confirm = match component_id {
            CONFIRM_COMPONENT => true,
            CANCEL_COMPONENT => false,
            _ => return None,
        };
        match (kind, confirm) {
            (TokenKind::Wager, true) => Some(ButtonAction::Confirm),
            (TokenKind::Wager, false) => Some(ButtonAction::Cancel),
            (TokenKind::Claim, true) => Some(ButtonAction::ClaimConfirm),
            (TokenKind::Claim, false) => Some(ButtonAction::ClaimCancel),
            (TokenKind::Refund, true) => Some(ButtonAction::RefundConfirm),
            (TokenKind::Refund, false) => Some(ButtonAction::RefundCancel),
            (TokenKind::ClaimRefund, _) => None,
        }
    }
}
