//! Escrow contract access.
//!
//! - `abi`: `sol!` bindings, call data encoders and receipt log decoding
//! - `gateway`: the `ContractGateway` seam the settlement layer talks to
//! - `escrow`: alloy-backed implementation against a JSON-RPC endpoint
//!
//! Provider errors are classified once, here, into [`GatewayError`]. The rest
//! of the crate only ever matches on the class.

pub mod abi;
pub mod escrow;
pub mod gateway;

pub use escrow::EscrowGateway;
pub use gateway::{ContractGateway, CreatedMatch, TxReceipt};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("insufficient gas: {0}")]
    InsufficientGas(String),
    #[error("not an authorized match manager: {0}")]
    NotAuthorizedManager(String),
    #[error("nonce conflict: {0}")]
    NonceConflict(String),
    #[error("rpc timeout: {0}")]
    RpcTimeout(String),
    #[error("rpc unavailable: {0}")]
    Unavailable(String),
    #[error("contract error: {0}")]
    Contract(String),
}

impl GatewayError {
    /// Classify a raw provider or contract error message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        if lower.contains("insufficient funds")
            || lower.contains("out of gas")
            || lower.contains("gas required exceeds")
        {
            GatewayError::InsufficientGas(message)
        } else if lower.contains("notmatchmanager")
            || lower.contains("not authorized")
            || lower.contains("caller is not")
            || lower.contains("unauthorized")
        {
            GatewayError::NotAuthorizedManager(message)
        } else if lower.contains("nonce too low")
            || lower.contains("replacement transaction underpriced")
            || lower.contains("already known")
        {
            GatewayError::NonceConflict(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            GatewayError::RpcTimeout(message)
        } else if lower.contains("connection")
            || lower.contains("error sending request")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("503")
        {
            GatewayError::Unavailable(message)
        } else {
            GatewayError::Contract(message)
        }
    }

    /// Transient failures that are worth retrying with backoff.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            GatewayError::RpcTimeout(_) | GatewayError::Unavailable(_) | GatewayError::NonceConflict(_)
        )
    }

    /// Transient failures after which a write can be sent again. A timed-out
    /// send may already sit in the mempool, so it is excluded.
    pub fn may_rebroadcast(&self) -> bool {
        self.is_network() && !matches!(self, GatewayError::RpcTimeout(_))
    }
}
