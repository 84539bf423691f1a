//! Intent register: at most one live wager intent per user, with TTL.
//!
//! Expiry is lazy: an expired intent is treated as absent by every read.
//! [`IntentRegister::sweep_expired`] only reclaims memory.
//!
//! Single-flight for confirmation is the intent's stage. Confirming moves
//! `Pending -> Settling` under the map's shard lock, so a duplicate confirm
//! sees `Settling` (or nothing) and degrades to "already processed".

use crate::domain::{Prediction, WagerError};
use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_INTENT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStage {
    /// Waiting for the user to press Confirm.
    Pending,
    /// Confirm accepted; match creation or the wager transaction is in flight.
    Settling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WagerIntent {
    pub user_id: String,
    pub match_id: i64,
    pub prediction: Prediction,
    /// Stake exactly as typed, e.g. "0.01".
    pub stake: String,
    pub stake_wei: U256,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub correlation_token: Option<String>,
    pub stage: IntentStage,
}

impl WagerIntent {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a transaction result carrying `token` for `match_id` answers
    /// this intent's outstanding wager prompt.
    pub fn awaits_transaction(&self, match_id: i64, token: &str) -> bool {
        self.stage == IntentStage::Settling
            && self.match_id == match_id
            && self.correlation_token.as_deref() == Some(token)
    }
}

/// Thread-safe intent store keyed by user id, with a reverse index from
/// correlation token to user id.
#[derive(Clone)]
pub struct IntentRegister {
    by_user: Arc<DashMap<String, WagerIntent>>,
    by_token: Arc<DashMap<String, String>>,
    ttl: chrono::Duration,
}

impl Default for IntentRegister {
    fn default() -> Self {
        Self::new(DEFAULT_INTENT_TTL)
    }
}

impl IntentRegister {
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_user: Arc::new(DashMap::new()),
            by_token: Arc::new(DashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// Store a new intent. Fails with `AlreadyPending` if a live one exists.
    pub fn create(
        &self,
        user_id: &str,
        match_id: i64,
        prediction: Prediction,
        stake: &str,
        stake_wei: U256,
    ) -> Result<WagerIntent, WagerError> {
        self.create_at(user_id, match_id, prediction, stake, stake_wei, Utc::now())
    }

    pub(crate) fn create_at(
        &self,
        user_id: &str,
        match_id: i64,
        prediction: Prediction,
        stake: &str,
        stake_wei: U256,
        now: DateTime<Utc>,
    ) -> Result<WagerIntent, WagerError> {
        let intent = WagerIntent {
            user_id: user_id.to_string(),
            match_id,
            prediction,
            stake: stake.trim().to_string(),
            stake_wei,
            created_at: now,
            expires_at: now + self.ttl,
            correlation_token: None,
            stage: IntentStage::Pending,
        };

        match self.by_user.entry(user_id.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_expired_at(now) {
                    return Err(WagerError::AlreadyPending);
                }
                if let Some(token) = existing.get().correlation_token.as_deref() {
                    self.by_token.remove(token);
                }
                existing.insert(intent.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(intent.clone());
            }
        }

        info!(
            user = %user_id,
            match_id,
            prediction = %prediction,
            stake = %intent.stake,
            expires_at = %intent.expires_at,
            "wager intent created"
        );
        Ok(intent)
    }

    /// Attach the prompt's correlation token. Overwrites any previous token:
    /// only the most recent prompt is honoured.
    pub fn attach_correlation(&self, user_id: &str, token: &str) -> bool {
        let Some(mut intent) = self.by_user.get_mut(user_id) else {
            return false;
        };
        if let Some(old) = intent.correlation_token.replace(token.to_string()) {
            if old != token {
                self.by_token.remove(&old);
            }
        }
        self.by_token.insert(token.to_string(), user_id.to_string());
        true
    }

    /// The user's intent, if present and not expired.
    pub fn get(&self, user_id: &str) -> Option<WagerIntent> {
        self.get_at(user_id, Utc::now())
    }

    pub(crate) fn get_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<WagerIntent> {
        self.by_user
            .get(user_id)
            .filter(|i| !i.is_expired_at(now))
            .map(|i| i.clone())
    }

    /// Remove the user's intent. Returns the removed intent only if it was
    /// still live, so a second clear reports nothing.
    pub fn clear(&self, user_id: &str) -> Option<WagerIntent> {
        self.clear_at(user_id, Utc::now())
    }

    pub(crate) fn clear_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<WagerIntent> {
        let (_, intent) = self.by_user.remove(user_id)?;
        if let Some(token) = intent.correlation_token.as_deref() {
            self.by_token.remove(token);
        }
        debug!(user = %user_id, match_id = intent.match_id, "wager intent cleared");
        (!intent.is_expired_at(now)).then_some(intent)
    }

    /// Remove the user's intent only if `accept` returns true for it. Intents
    /// that fail the check stay untouched.
    pub fn clear_if(&self, user_id: &str, accept: impl FnOnce(&WagerIntent) -> bool) -> Option<WagerIntent> {
        let now = Utc::now();
        let (_, intent) = self.by_user.remove_if(user_id, |_, intent| accept(intent))?;
        if let Some(token) = intent.correlation_token.as_deref() {
            self.by_token.remove(token);
        }
        debug!(user = %user_id, match_id = intent.match_id, "wager intent cleared");
        (!intent.is_expired_at(now)).then_some(intent)
    }

    /// Reverse lookup for an incoming button click or transaction response.
    pub fn get_by_correlation_token(&self, token: &str) -> Result<WagerIntent, WagerError> {
        self.get_by_correlation_token_at(token, Utc::now())
    }

    pub(crate) fn get_by_correlation_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<WagerIntent, WagerError> {
        let user_id = self
            .by_token
            .get(token)
            .map(|u| u.clone())
            .ok_or(WagerError::IntentExpiredOrMissing)?;
        self.by_user
            .get(&user_id)
            .filter(|i| !i.is_expired_at(now) && i.correlation_token.as_deref() == Some(token))
            .map(|i| i.clone())
            .ok_or(WagerError::IntentExpiredOrMissing)
    }

    /// Claim the intent behind `token` for settlement on behalf of `user_id`.
    ///
    /// Exactly one caller wins; later callers get `IntentExpiredOrMissing`.
    /// A click from a different user than the intent's owner is rejected
    /// without touching the intent.
    pub fn begin_settlement(&self, token: &str, user_id: &str) -> Result<WagerIntent, WagerError> {
        self.begin_settlement_at(token, user_id, Utc::now())
    }

    pub(crate) fn begin_settlement_at(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WagerIntent, WagerError> {
        let owner = self
            .by_token
            .get(token)
            .map(|u| u.clone())
            .ok_or(WagerError::IntentExpiredOrMissing)?;
        if owner != user_id {
            return Err(WagerError::NotEligible(
                "This confirmation belongs to another user".into(),
            ));
        }

        let mut intent = self
            .by_user
            .get_mut(&owner)
            .ok_or(WagerError::IntentExpiredOrMissing)?;
        if intent.is_expired_at(now)
            || intent.correlation_token.as_deref() != Some(token)
            || intent.stage != IntentStage::Pending
        {
            return Err(WagerError::IntentExpiredOrMissing);
        }
        intent.stage = IntentStage::Settling;
        Ok(intent.clone())
    }

    /// Hand a settling intent back to the user so Confirm can be pressed
    /// again (used when a retryable error happens before any transaction).
    pub fn release(&self, user_id: &str) {
        if let Some(mut intent) = self.by_user.get_mut(user_id) {
            intent.stage = IntentStage::Pending;
        }
    }

    /// Drop expired intents. Returns how many were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut expired_tokens = Vec::new();
        let before = self.by_user.len();
        self.by_user.retain(|_, intent| {
            if intent.is_expired_at(now) {
                if let Some(token) = intent.correlation_token.clone() {
                    expired_tokens.push(token);
                }
                false
            } else {
                true
            }
        });
        for token in expired_tokens {
            self.by_token.remove(&token);
        }
        before.saturating_sub(self.by_user.len())
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
