//! Test doubles and fixtures shared by module tests.

use crate::domain::{
    ClaimStatus, ClaimType, MatchInfo, MatchStatus, Prediction, RefundEligibility, UserBet,
    WagerRecord,
};
use crate::engine::WagerEngine;
use crate::intent::IntentRegister;
use crate::onchain::abi::IWagerEscrow;
use crate::onchain::{ContractGateway, CreatedMatch, GatewayError, TxReceipt};
use crate::settlement::orchestrator::Interaction;
use crate::settlement::{RetryPolicy, SettlementOrchestrator};
use crate::store::{Ledger, MemoryStore, StatsDelta, UserStats};
use crate::transport::{ChatTransport, MessageOptions, Prompt, TransportError};

use alloy::primitives::{address, Address, Log, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ESCROW: Address = address!("00000000000000000000000000000000000000e5");
pub const WALLET_A: Address = address!("00000000000000000000000000000000000000a1");
pub const WALLET_B: Address = address!("00000000000000000000000000000000000000b2");
pub const CHAIN_ID: u64 = 84532;

/// Scheduled match `id` kicking off `hours` from now, not yet on-chain.
pub fn match_info(id: i64, hours: i64) -> MatchInfo {
    MatchInfo {
        id,
        on_chain_match_id: None,
        home_team: "Arsenal".into(),
        away_team: "Chelsea".into(),
        competition: "Premier League".into(),
        kickoff_time: Utc::now() + chrono::Duration::hours(hours),
        result: None,
        status: MatchStatus::Scheduled,
    }
}

/// HOME wager by `user` from `WALLET_A` on on-chain match 42.
pub fn wager_record(user_id: &str, match_id: i64, stake_wei: u64) -> WagerRecord {
    WagerRecord {
        user_id: user_id.into(),
        wallet_address: WALLET_A,
        match_id,
        on_chain_match_id: 42,
        prediction: Prediction::Home,
        stake_wei: U256::from(stake_wei),
        tx_hash: None,
        claimed: false,
    }
}

pub fn claimed_receipt(escrow: Address, on_chain_id: u64, amount: u64, profit: u64) -> Log {
    Log {
        address: escrow,
        data: IWagerEscrow::WinningsClaimed {
            matchId: U256::from(on_chain_id),
            user: WALLET_A,
            amount: U256::from(amount),
            profit: U256::from(profit),
        }
        .encode_log_data(),
    }
}

#[derive(Default)]
struct GatewayState {
    next_match_id: u64,
    create_errors: VecDeque<GatewayError>,
    create_calls: usize,
    batch_calls: usize,
    read_error: Option<GatewayError>,
    bets: HashMap<(u64, Address), UserBet>,
    claim_status: HashMap<(u64, Address), ClaimStatus>,
    refunds: HashMap<(u64, Address), RefundEligibility>,
    receipts: HashMap<B256, TxReceipt>,
}

/// Scripted escrow. Unknown receipts time out.
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState {
                next_match_id: 42,
                ..Default::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut GatewayState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_create_with(&self, err: GatewayError) {
        self.with(|s| s.create_errors.push_back(err));
    }

    pub fn fail_reads(&self, err: GatewayError) {
        self.with(|s| s.read_error = Some(err));
    }

    pub fn set_bet(&self, on_chain_id: u64, wallet: Address, bet: UserBet) {
        self.with(|s| s.bets.insert((on_chain_id, wallet), bet));
    }

    pub fn set_claim_status(&self, on_chain_id: u64, wallet: Address, status: ClaimStatus) {
        self.with(|s| s.claim_status.insert((on_chain_id, wallet), status));
    }

    pub fn set_refund_eligibility(&self, on_chain_id: u64, wallet: Address, eligibility: RefundEligibility) {
        self.with(|s| s.refunds.insert((on_chain_id, wallet), eligibility));
    }

    pub fn set_receipt(&self, tx_hash: B256, success: bool, logs: Vec<Log>) {
        self.with(|s| {
            s.receipts.insert(
                tx_hash,
                TxReceipt {
                    tx_hash,
                    success,
                    block_number: Some(1),
                    logs,
                },
            )
        });
    }

    pub fn create_calls(&self) -> usize {
        self.with(|s| s.create_calls)
    }

    pub fn batch_calls(&self) -> usize {
        self.with(|s| s.batch_calls)
    }

    fn read_error(&self) -> Result<(), GatewayError> {
        self.with(|s| s.read_error.clone()).map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ContractGateway for FakeGateway {
    fn contract_address(&self) -> Address {
        ESCROW
    }

    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn create_match(&self, _info: &MatchInfo) -> Result<CreatedMatch, GatewayError> {
        // Let a concurrent caller reach the creation lock.
        tokio::task::yield_now().await;
        self.with(|s| {
            s.create_calls += 1;
            if let Some(err) = s.create_errors.pop_front() {
                return Err(err);
            }
            let id = s.next_match_id;
            s.next_match_id += 1;
            Ok(CreatedMatch {
                on_chain_match_id: id,
                tx_hash: B256::with_last_byte(id as u8),
            })
        })
    }

    async fn get_user_bet(&self, on_chain_match_id: u64, wallet: Address) -> Result<Option<UserBet>, GatewayError> {
        self.read_error()?;
        Ok(self.with(|s| s.bets.get(&(on_chain_match_id, wallet)).copied()))
    }

    async fn get_batch_user_bets(
        &self,
        on_chain_match_ids: &[u64],
        wallet: Address,
    ) -> Result<Vec<(u64, UserBet)>, GatewayError> {
        self.read_error()?;
        Ok(self.with(|s| {
            s.batch_calls += 1;
            on_chain_match_ids
                .iter()
                .filter_map(|id| s.bets.get(&(*id, wallet)).map(|bet| (*id, *bet)))
                .filter(|(_, bet)| bet.is_placed())
                .collect()
        }))
    }

    async fn get_claim_status(&self, on_chain_match_id: u64, wallet: Address) -> Result<ClaimStatus, GatewayError> {
        self.read_error()?;
        Ok(self.with(|s| {
            s.claim_status
                .get(&(on_chain_match_id, wallet))
                .copied()
                .unwrap_or(ClaimStatus {
                    can_claim: false,
                    claim_type: ClaimType::None,
                    amount: U256::ZERO,
                })
        }))
    }

    async fn is_refund_eligible(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<RefundEligibility, GatewayError> {
        self.read_error()?;
        Ok(self.with(|s| {
            s.refunds
                .get(&(on_chain_match_id, wallet))
                .cloned()
                .unwrap_or(RefundEligibility {
                    eligible: false,
                    reason: None,
                })
        }))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, GatewayError> {
        self.with(|s| s.receipts.get(&tx_hash).cloned())
            .ok_or_else(|| GatewayError::RpcTimeout(format!("no receipt for {tx_hash}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message { channel_id: String, text: String },
    Prompt { channel_id: String, recipient: String, prompt: Prompt },
}

/// Records everything sent. Can fail the next N prompt sends with a 503.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    failing_prompts: AtomicUsize,
}

impl RecordingTransport {
    pub fn fail_next_prompts(&self, n: usize) {
        self.failing_prompts.store(n, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Message { text, .. } => Some(text.clone()),
                Sent::Prompt { .. } => None,
            })
            .collect()
    }

    pub fn last_message(&self) -> String {
        self.messages().pop().unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Prompt { prompt, .. } => Some(prompt.clone()),
                Sent::Message { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, channel_id: &str, text: &str, _opts: &MessageOptions) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Message {
            channel_id: channel_id.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn send_interactive_prompt(
        &self,
        channel_id: &str,
        prompt: &Prompt,
        recipient_user_id: &str,
        _opts: &MessageOptions,
    ) -> Result<(), TransportError> {
        let failing = self.failing_prompts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_prompts.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Relay {
                status: 503,
                body: "relay down".into(),
            });
        }
        self.sent.lock().unwrap().push(Sent::Prompt {
            channel_id: channel_id.into(),
            recipient: recipient_user_id.into(),
            prompt: prompt.clone(),
        });
        Ok(())
    }
}

/// Ledger whose writes can be switched to fail, for partial-success paths.
pub struct FlakyLedger {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyLedger {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("ledger write refused");
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get_match(&self, match_id: i64) -> anyhow::Result<Option<MatchInfo>> {
        self.inner.get_match(match_id).await
    }

    async fn upsert_match(&self, info: &MatchInfo) -> anyhow::Result<()> {
        self.check()?;
        self.inner.upsert_match(info).await
    }

    async fn set_on_chain_match_id(&self, match_id: i64, on_chain_match_id: u64) -> anyhow::Result<u64> {
        self.check()?;
        self.inner.set_on_chain_match_id(match_id, on_chain_match_id).await
    }

    async fn matches_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> anyhow::Result<Vec<MatchInfo>> {
        self.inner.matches_between(from, to).await
    }

    async fn get_wager(&self, user_id: &str, match_id: i64) -> anyhow::Result<Option<WagerRecord>> {
        self.inner.get_wager(user_id, match_id).await
    }

    async fn insert_wager(&self, record: &WagerRecord) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.insert_wager(record).await
    }

    async fn mark_claimed(&self, user_id: &str, match_id: i64) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.mark_claimed(user_id, match_id).await
    }

    async fn get_stats(&self, user_id: &str) -> anyhow::Result<UserStats> {
        self.inner.get_stats(user_id).await
    }

    async fn apply_stats(&self, user_id: &str, delta: StatsDelta) -> anyhow::Result<UserStats> {
        self.check()?;
        self.inner.apply_stats(user_id, delta).await
    }
}

/// Everything wired against fakes. `u1` owns `WALLET_A` (primary) and
/// `WALLET_B` (linked).
pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<FlakyLedger>,
    pub transport: Arc<RecordingTransport>,
    pub intents: IntentRegister,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        store.set_primary_wallet("u1", WALLET_A);
        store.link_wallet("u1", WALLET_B);
        Self {
            gateway: Arc::new(FakeGateway::new()),
            ledger: Arc::new(FlakyLedger::new(store.clone())),
            store: Arc::new(store),
            transport: Arc::new(RecordingTransport::default()),
            intents: IntentRegister::new(Duration::from_secs(300)),
        }
    }

    pub fn retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    pub fn ctx(&self, user_id: &str) -> Interaction {
        Interaction::new(user_id, "c1", None)
    }

    pub fn orchestrator(&self) -> SettlementOrchestrator {
        SettlementOrchestrator::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.store.clone(),
            self.transport.clone(),
            self.intents.clone(),
            Self::retry(),
        )
    }

    pub fn engine(&self) -> WagerEngine {
        WagerEngine::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.store.clone(),
            self.transport.clone(),
            self.intents.clone(),
            Self::retry(),
            chrono::Duration::days(7),
        )
    }

    pub async fn add_match(&self, info: MatchInfo) {
        self.store.upsert_match(&info).await.unwrap();
    }

    /// Finished match 7-style fixture on-chain as 42 with result HOME, plus
    /// the user's HOME wager from `WALLET_A`.
    pub async fn add_settled_wager(&self, user_id: &str, match_id: i64, stake_wei: u64) {
        let mut info = match_info(match_id, -3);
        info.on_chain_match_id = Some(42);
        info.result = Some(Prediction::Home);
        info.status = MatchStatus::Finished;
        self.add_match(info).await;
        self.store
            .insert_wager(&wager_record(user_id, match_id, stake_wei))
            .await
            .unwrap();
    }
}
