//! Escrow gateway over an HTTP JSON-RPC provider.
//!
//! Every call is bounded by the configured RPC timeout. The manager signer
//! is optional: without it the gateway still serves reads and receipt
//! lookups, and `create_match` fails as not authorized.

use crate::config::ChainConfig;
use crate::domain::{ClaimStatus, ClaimType, MatchInfo, RefundEligibility, UserBet};
use crate::onchain::abi::{self, IWagerEscrow};
use crate::onchain::gateway::{ContractGateway, CreatedMatch, TxReceipt};
use crate::onchain::GatewayError;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::Context;
use async_trait::async_trait;
use std::fmt::Display;
use std::future::IntoFuture;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct EscrowGateway {
    provider: DynProvider,
    escrow: IWagerEscrow::IWagerEscrowInstance<DynProvider>,
    address: Address,
    chain_id: u64,
    manager: Option<Address>,
    rpc_timeout: Duration,
    receipt_timeout: Duration,
    receipt_poll: Duration,
}

impl EscrowGateway {
    /// Build the gateway and verify the endpoint serves the configured chain.
    pub async fn connect(config: &ChainConfig) -> anyhow::Result<Self> {
        let address = config.escrow_address()?;
        let url = config
            .rpc_url
            .parse()
            .with_context(|| format!("invalid rpc url {}", config.rpc_url))?;

        let (provider, manager) = match &config.manager_key {
            Some(key) => {
                let signer = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
                    .context("invalid manager private key")?;
                let manager = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(url)
                    .erased();
                (provider, Some(manager))
            }
            None => {
                warn!("no manager key configured, match creation disabled");
                (ProviderBuilder::new().connect_http(url).erased(), None)
            }
        };

        let gateway = Self {
            escrow: IWagerEscrow::new(address, provider.clone()),
            provider,
            address,
            chain_id: config.chain_id,
            manager,
            rpc_timeout: config.rpc_timeout(),
            receipt_timeout: config.receipt_timeout(),
            receipt_poll: config.receipt_poll_interval(),
        };

        let remote = gateway
            .bounded("eth_chainId", gateway.provider.get_chain_id())
            .await?;
        if remote != gateway.chain_id {
            anyhow::bail!(
                "rpc endpoint serves chain {remote}, configured chain is {}",
                gateway.chain_id
            );
        }

        info!(
            escrow = %address,
            chain_id = gateway.chain_id,
            manager = ?gateway.manager,
            "escrow gateway connected"
        );
        Ok(gateway)
    }

    async fn bounded<T, E, F>(&self, op: &'static str, fut: F) -> Result<T, GatewayError>
    where
        E: Display,
        F: IntoFuture<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.rpc_timeout, fut.into_future()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = GatewayError::classify(e.to_string());
                debug!(op, error = %err, "escrow call failed");
                Err(err)
            }
            Err(_) => Err(GatewayError::RpcTimeout(format!(
                "{op} exceeded {}s",
                self.rpc_timeout.as_secs()
            ))),
        }
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<TxReceipt, GatewayError> {
        loop {
            let receipt = self
                .bounded(
                    "eth_getTransactionReceipt",
                    self.provider.get_transaction_receipt(tx_hash),
                )
                .await;

            match receipt {
                Ok(Some(receipt)) => {
                    return Ok(TxReceipt {
                        tx_hash,
                        success: receipt.status(),
                        block_number: receipt.block_number,
                        logs: receipt
                            .inner
                            .logs()
                            .iter()
                            .map(|log| log.inner.clone())
                            .collect(),
                    });
                }
                Ok(None) => {}
                Err(e) if e.is_network() => {
                    debug!(tx = %tx_hash, error = %e, "receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[async_trait]
impl ContractGateway for EscrowGateway {
    fn contract_address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn create_match(&self, info: &MatchInfo) -> Result<CreatedMatch, GatewayError> {
        if self.manager.is_none() {
            return Err(GatewayError::NotAuthorizedManager(
                "no manager key configured".into(),
            ));
        }

        let kickoff = U256::from(info.kickoff_time.timestamp().max(0) as u64);
        let call = self.escrow.createMatch(
            info.home_team.clone(),
            info.away_team.clone(),
            info.competition.clone(),
            kickoff,
        );
        // A timed-out send may still be mined; treat it like an unconfirmed
        // receipt so nothing resends it.
        let pending = self
            .bounded("createMatch", call.send())
            .await
            .map_err(|e| match e {
                GatewayError::RpcTimeout(msg) => {
                    GatewayError::Contract(format!("createMatch broadcast unconfirmed: {msg}"))
                }
                other => other,
            })?;
        let tx_hash = *pending.tx_hash();
        info!(match_id = info.id, tx = %tx_hash, "createMatch submitted");

        // Not network-classified: retrying would submit a second createMatch.
        let receipt = self.wait_for_receipt(tx_hash).await.map_err(|e| {
            GatewayError::Contract(format!("createMatch {tx_hash} unconfirmed: {e}"))
        })?;
        if !receipt.success {
            return Err(GatewayError::Contract(format!(
                "createMatch {tx_hash} reverted"
            )));
        }
        let on_chain_match_id = abi::find_match_created(&receipt.logs, self.address)
            .ok_or_else(|| {
                GatewayError::Contract(format!("createMatch {tx_hash} emitted no MatchCreated"))
            })?;

        Ok(CreatedMatch {
            on_chain_match_id,
            tx_hash,
        })
    }

    async fn get_user_bet(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<Option<UserBet>, GatewayError> {
        let call = self.escrow.getUserBet(U256::from(on_chain_match_id), wallet);
        let bet = self.bounded("getUserBet", call.call()).await?;
        let bet = UserBet::from(&bet);
        Ok(bet.is_placed().then_some(bet))
    }

    async fn get_batch_user_bets(
        &self,
        on_chain_match_ids: &[u64],
        wallet: Address,
    ) -> Result<Vec<(u64, UserBet)>, GatewayError> {
        if on_chain_match_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = on_chain_match_ids.iter().map(|id| U256::from(*id)).collect();
        let call = self.escrow.getBatchUserBets(ids, wallet);
        let bets = self.bounded("getBatchUserBets", call.call()).await?;

        if bets.len() != on_chain_match_ids.len() {
            return Err(GatewayError::Contract(format!(
                "getBatchUserBets returned {} entries for {} ids",
                bets.len(),
                on_chain_match_ids.len()
            )));
        }

        Ok(on_chain_match_ids
            .iter()
            .zip(bets.iter())
            .map(|(id, bet)| (*id, UserBet::from(bet)))
            .filter(|(_, bet)| bet.is_placed())
            .collect())
    }

    async fn get_claim_status(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<ClaimStatus, GatewayError> {
        let call = self
            .escrow
            .getClaimStatus(U256::from(on_chain_match_id), wallet);
        let status = self.bounded("getClaimStatus", call.call()).await?;
        Ok(ClaimStatus {
            can_claim: status.canClaim,
            claim_type: ClaimType::from_u8(status.claimType),
            amount: status.amount,
        })
    }

    async fn is_refund_eligible(
        &self,
        on_chain_match_id: u64,
        wallet: Address,
    ) -> Result<RefundEligibility, GatewayError> {
        let call = self
            .escrow
            .isRefundEligible(U256::from(on_chain_match_id), wallet);
        let result = self.bounded("isRefundEligible", call.call()).await?;
        Ok(RefundEligibility {
            eligible: result.eligible,
            reason: (!result.reason.is_empty()).then_some(result.reason),
        })
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, GatewayError> {
        match tokio::time::timeout(self.receipt_timeout, self.poll_receipt(tx_hash)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::RpcTimeout(format!(
                "no receipt for {tx_hash} after {}s",
                self.receipt_timeout.as_secs()
            ))),
        }
    }
}
