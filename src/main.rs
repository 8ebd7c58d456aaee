// =============================================================================
// Aurum Trader — Main Entry Point
// =============================================================================
//
// Wires the Scheduler to a Store (Postgres if DATABASE_URL is set, otherwise
// an in-process store suitable for paper trading and local runs), a Binance
// USDS-M futures adapter, and an LLM oracle built from whichever provider
// keys are present in the environment. Ctrl-C drains every running engine
// before the process exits.

mod config;
mod engine;
mod error;
mod execution;
mod indicators;
mod market_data;
mod oracle;
mod positions;
mod prompt;
mod risk;
mod scheduler;
mod store;
mod types;

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::market_data::binance::BinanceAdapter;
use crate::oracle::providers::OpenAiProvider;
use crate::oracle::LlmOracle;
use crate::scheduler::{EngineDeps, Scheduler};
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PgStore;
use crate::store::Store;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Aurum Trader — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load_with_env(RUNTIME_CONFIG_PATH);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            info!("connecting to Postgres store");
            let pg = PgStore::connect(url.expose(), config.db_pool_size).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set, running against an in-process store (state is lost on restart)");
            Arc::new(InMemoryStore::new())
        }
    };

    let api_key = config.exchange_api_key.as_ref().map(|s| s.expose().to_string()).unwrap_or_default();
    let api_secret = config.exchange_api_secret.as_ref().map(|s| s.expose().to_string()).unwrap_or_default();
    let adapter: Arc<dyn market_data::ExchangeAdapter> = Arc::new(BinanceAdapter::new(api_key, api_secret));

    let mut providers: Vec<Arc<dyn oracle::LlmProvider>> = Vec::new();
    for (name, key) in &config.llm_api_keys {
        let base_url = match name.as_str() {
            "anthropic" => "https://api.anthropic.com/v1",
            _ => "https://api.openai.com/v1",
        };
        providers.push(Arc::new(OpenAiProvider::new(name.clone(), key.clone(), base_url, Decimal::new(1, 2), Decimal::new(3, 2))));
    }
    if providers.is_empty() {
        warn!("no LLM provider keys configured; the oracle will synthesize safe-hold decisions every cycle");
    }

    let redis_url = std::env::var("REDIS_URL").ok();
    let oracle = Arc::new(LlmOracle::new(providers, config.llm_cache_ttl_secs, config.llm_daily_cost_limit, redis_url.as_deref()));

    let paper = std::env::var("PAPER_TRADING").map(|v| v != "false" && v != "0").unwrap_or(true);
    info!(paper, "engine execution mode");

    let deps = EngineDeps {
        store: store.clone(),
        adapter,
        oracle,
        paper,
        fee_rate: config.paper_fee_rate,
        paper_slippage_bps: config.paper_slippage_bps,
        failure_threshold: config.engine_failure_threshold,
    };
    let scheduler = Arc::new(Scheduler::new(deps));

    match scheduler.rehydrate().await {
        Ok(n) => info!(count = n, "cold-start rehydration complete"),
        Err(e) => error!(error = %e, "cold-start rehydration failed"),
    }

    let reaper_scheduler = scheduler.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            reaper_scheduler.reap_finished();
        }
    });

    info!("scheduler running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping all engines");

    for bot_id in scheduler.list_running() {
        scheduler.stop_bot(bot_id).await;
    }

    if let Err(e) = config.save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurum Trader shut down complete.");
    Ok(())
}
