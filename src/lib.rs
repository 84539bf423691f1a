//! Wager lifecycle and on-chain reconciliation for a chat-driven sports
//! betting bot.
//!
//! The `wagerline` binary wires these modules to Valkey, an EVM escrow
//! contract and a chat relay.

pub mod config;
pub mod correlation;
pub mod domain;
pub mod eligibility;
pub mod engine;
pub mod intent;
pub mod logging;
pub mod onchain;
pub mod reconcile;
pub mod server;
pub mod settlement;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testkit;
