use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use wagerline::config::Config;
use wagerline::engine::WagerEngine;
use wagerline::intent::IntentRegister;
use wagerline::onchain::EscrowGateway;
use wagerline::server::{self, ServerState};
use wagerline::settlement::RetryPolicy;
use wagerline::store::{Ledger, MemoryStore, ValkeyStore, WalletResolver};
use wagerline::transport::WebhookTransport;

const CONFIG_PATH: &str = "wagerline.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(Path::new(CONFIG_PATH))?
    } else {
        Config::from_env()
    };

    wagerline::logging::init(&config.logging);
    info!("wagerline v{} starting", env!("CARGO_PKG_VERSION"));
    if !Path::new(CONFIG_PATH).exists() {
        info!("no {CONFIG_PATH} found, using env-only config");
    }
    config.validate()?;

    let (ledger, wallets) = open_store(&config).await;

    let gateway = Arc::new(EscrowGateway::connect(&config.chain).await?);

    let transport = Arc::new(WebhookTransport::new(
        &config.transport.relay_url,
        &config.transport.secret,
        Duration::from_secs(config.transport.request_timeout_secs),
    )?);

    let intents = IntentRegister::new(config.wagers.intent_ttl());
    let engine = Arc::new(WagerEngine::new(
        gateway,
        ledger,
        wallets,
        transport,
        intents.clone(),
        RetryPolicy::new(config.wagers.retry_attempts, config.wagers.retry_base_delay()),
        config.wagers.reconcile_lookback(),
    ));

    // Expiry is lazy; this only reclaims memory.
    let sweeper = {
        let intents = intents.clone();
        let mut ticker = tokio::time::interval(config.wagers.sweep_interval());
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let reclaimed = intents.sweep_expired();
                if reclaimed > 0 {
                    debug!(reclaimed, remaining = intents.len(), "swept expired intents");
                }
            }
        })
    };

    let state = ServerState {
        engine,
        secret: Arc::from(config.transport.secret.as_str()),
        max_clock_skew_secs: config.server.max_clock_skew_secs,
    };
    let result = server::serve(state, &config.server.bind, shutdown_signal()).await;

    sweeper.abort();
    info!("wagerline stopped");
    result
}

/// Valkey when reachable, otherwise a process-local store.
async fn open_store(config: &Config) -> (Arc<dyn Ledger>, Arc<dyn WalletResolver>) {
    let connected = match ValkeyStore::connect(&config.valkey.url, &config.valkey.key_prefix).await {
        Ok(store) => store.ping().await.map(|_| store),
        Err(e) => Err(e),
    };
    match connected {
        Ok(store) => {
            let store = Arc::new(store);
            let ledger: Arc<dyn Ledger> = store.clone();
            let wallets: Arc<dyn WalletResolver> = store;
            (ledger, wallets)
        }
        Err(e) => {
            warn!(error = %e, "Valkey unavailable, running with in-memory store (state is lost on restart)");
            let store = Arc::new(MemoryStore::new());
            let ledger: Arc<dyn Ledger> = store.clone();
            let wallets: Arc<dyn WalletResolver> = store;
            (ledger, wallets)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
