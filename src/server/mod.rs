//! Inbound event endpoint for the chat relay.
//!
//!   POST /events   → signed `InboundEnvelope`, answered 202 and handled in
//!                    its own task
//!   GET  /health   → liveness

use crate::engine::{InboundEvent, WagerEngine};
use crate::settlement::orchestrator::Interaction;
use crate::transport::signing;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

const EVENTS_PATH: &str = "/events";

/// Who sent the event and where to answer, plus the event itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundEnvelope {
    pub user_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub event: InboundEvent,
}

impl InboundEnvelope {
    fn interaction(&self) -> Interaction {
        Interaction::new(&self.user_id, &self.channel_id, self.thread_id.as_deref())
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<WagerEngine>,
    pub secret: Arc<str>,
    pub max_clock_skew_secs: i64,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route(EVENTS_PATH, post(events))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves. In-flight event tasks are not awaited.
pub async fn serve(
    state: ServerState,
    bind_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "event endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "pending_intents": state.engine.intents().len(),
    }))
}

async fn events(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = signing::verify(
        &state.secret,
        &headers,
        "POST",
        EVENTS_PATH,
        &body,
        now,
        state.max_clock_skew_secs,
    ) {
        warn!(error = %e, "rejected unsigned or badly signed event");
        return StatusCode::UNAUTHORIZED;
    }

    let envelope: InboundEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed event body");
            return StatusCode::BAD_REQUEST;
        }
    };
    debug!(user = %envelope.user_id, channel = %envelope.channel_id, event = ?envelope.event, "event accepted");

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let ctx = envelope.interaction();
        engine.handle(&ctx, envelope.event).await;
    });
    StatusCode::ACCEPTED
}
