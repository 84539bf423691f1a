//! Chat transport seam.
//!
//! The bot never renders anything itself: it hands messages and interactive
//! prompts to a relay that owns the chat platform connection. Prompts carry
//! an opaque `id` (a correlation token) that the relay returns unchanged
//! with the button click or transaction result.

pub mod signing;

use crate::domain::amount;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("relay error {status}: {body}")]
    Relay { status: u16, body: String },
    #[error("signing failed: {0}")]
    Signing(#[from] signing::SignatureError),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Failures worth retrying: connection problems, timeouts, 429 and 5xx.
    pub fn is_network(&self) -> bool {
        match self {
            TransportError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TransportError::Relay { status, .. } => *status == 429 || *status >= 500,
            TransportError::Signing(_) | TransportError::Encode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Visible only to the recipient.
    #[serde(default)]
    pub ephemeral: bool,
}

impl MessageOptions {
    pub fn in_thread(thread_id: Option<String>) -> Self {
        Self {
            thread_id,
            ephemeral: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptButton {
    pub id: String,
    pub label: String,
    pub style: ButtonStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prompt {
    /// Message with buttons. Clicks come back with `id` and the button id.
    Form {
        id: String,
        title: String,
        body: String,
        buttons: Vec<PromptButton>,
    },
    /// Transaction for the recipient's wallet to sign. The outcome comes
    /// back with `id`, the transaction hash and a success flag.
    Transaction {
        id: String,
        title: String,
        chain_id: u64,
        to: Address,
        data: Bytes,
        #[serde(with = "amount::wei_string")]
        value: U256,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signer: Option<Address>,
    },
}

impl Prompt {
    pub fn id(&self) -> &str {
        match self {
            Prompt::Form { id, .. } | Prompt::Transaction { id, .. } => id,
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<(), TransportError>;

    async fn send_interactive_prompt(
        &self,
        channel_id: &str,
        prompt: &Prompt,
        recipient_user_id: &str,
        opts: &MessageOptions,
    ) -> Result<(), TransportError>;
}

#[derive(Serialize)]
struct MessageBody<'a> {
    channel_id: &'a str,
    text: &'a str,
    #[serde(flatten)]
    opts: &'a MessageOptions,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    channel_id: &'a str,
    recipient: &'a str,
    prompt: &'a Prompt,
    #[serde(flatten)]
    opts: &'a MessageOptions,
}

/// Relay client posting signed JSON to `{base_url}/messages` and
/// `{base_url}/prompts`.
pub struct WebhookTransport {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl WebhookTransport {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(body)?;
        let headers = signing::signed_headers(&self.secret, "POST", path, &body)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Relay { status, body });
        }
        debug!(path = path, status = status, "relay accepted");
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for WebhookTransport {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<(), TransportError> {
        self.post(
            "/messages",
            &MessageBody {
                channel_id,
                text,
                opts,
            },
        )
        .await
    }

    async fn send_interactive_prompt(
        &self,
        channel_id: &str,
        prompt: &Prompt,
        recipient_user_id: &str,
        opts: &MessageOptions,
    ) -> Result<(), TransportError> {
        self.post(
            "/prompts",
            &PromptBody {
                channel_id,
                recipient: recipient_user_id,
                prompt,
                opts,
            },
        )
        .await
    }
}
