// =============================================================================
// Scheduler — process-wide registry of live per-bot engines
// =============================================================================
//
// Each bot gets its own cancellable tokio task; a panic inside one engine
// never touches the others because `tokio::spawn` already isolates panics
// per task — we just have to notice and record it instead of letting it
// vanish silently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::{EngineStatus, StatusCell, TradingEngine};
use crate::error::StoreError;
use crate::market_data::ExchangeAdapter;
use crate::oracle::LlmOracle;
use crate::store::Store;
use crate::types::BotStatus;

struct EngineHandle {
    cancel: watch::Sender<bool>,
    status: Arc<StatusCell>,
    join: JoinHandle<()>,
}

/// Shared dependencies every engine is constructed with. Cloning is cheap —
/// everything inside is an `Arc`.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub oracle: Arc<LlmOracle>,
    pub paper: bool,
    pub fee_rate: Decimal,
    pub paper_slippage_bps: Decimal,
    pub failure_threshold: u32,
}

pub struct Scheduler {
    deps: EngineDeps,
    engines: RwLock<HashMap<Uuid, EngineHandle>>,
}

impl Scheduler {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps, engines: RwLock::new(HashMap::new()) }
    }

    /// Spawns a new engine task for `bot_id`. No-op if one is already
    /// registered and not yet `Stopped`.
    pub async fn start_bot(&self, bot_id: Uuid) -> Result<(), StoreError> {
        if let Some(existing) = self.engines.read().get(&bot_id) {
            if existing.status.get() != EngineStatus::Stopped {
                info!(bot_id = %bot_id, "start_bot: engine already running");
                return Ok(());
            }
        }

        let bot = self.deps.store.get_bot(bot_id).await?;
        if bot.status != BotStatus::Active {
            warn!(bot_id = %bot_id, status = ?bot.status, "start_bot: refusing to start a non-active bot");
            return Ok(());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let status = Arc::new(StatusCell::default());

        let engine = TradingEngine::new(
            bot_id,
            self.deps.store.clone(),
            self.deps.adapter.clone(),
            self.deps.oracle.clone(),
            self.deps.paper,
            self.deps.fee_rate,
            self.deps.paper_slippage_bps,
            self.deps.failure_threshold,
            status.clone(),
            cancel_rx,
        );

        let join = tokio::spawn(async move {
            // `run` never panics by construction, but a bug in a future
            // revision shouldn't be able to take down the process — only
            // this bot's task dies, and the panic is logged below via
            // `JoinHandle::await`'s `Err`.
            engine.run().await;
        });

        self.engines.write().insert(bot_id, EngineHandle { cancel: cancel_tx, status, join });
        info!(bot_id = %bot_id, "engine started");
        Ok(())
    }

    /// Signals the engine to stop at its next safe suspension point and
    /// removes it from the registry once the task has exited.
    pub async fn stop_bot(&self, bot_id: Uuid) {
        let handle = self.engines.write().remove(&bot_id);
        let Some(handle) = handle else {
            return;
        };
        let _ = handle.cancel.send(true);
        if let Err(e) = handle.join.await {
            error!(bot_id = %bot_id, error = %e, "engine task panicked");
        }
        info!(bot_id = %bot_id, "engine stopped");
    }

    pub fn list_running(&self) -> Vec<Uuid> {
        self.engines.read().iter().filter(|(_, h)| h.status.get() == EngineStatus::Running || h.status.get() == EngineStatus::Starting).map(|(id, _)| *id).collect()
    }

    pub fn status_of(&self, bot_id: Uuid) -> Option<EngineStatus> {
        self.engines.read().get(&bot_id).map(|h| h.status.get())
    }

    /// Cold-start rehydration: scan persisted bots with status `active` and
    /// relaunch an engine for each. Called once at process startup.
    pub async fn rehydrate(&self) -> Result<usize, StoreError> {
        let bots = self.deps.store.list_active_bots().await?;
        let mut started = 0;
        for bot in bots {
            if let Err(e) = self.start_bot(bot.id).await {
                error!(bot_id = %bot.id, error = %e, "failed to rehydrate engine on cold start");
                continue;
            }
            started += 1;
        }
        info!(count = started, "rehydrated active bots on cold start");
        Ok(started)
    }

    /// Prunes registry entries whose task has exited (auto-paused or hit a
    /// fatal error) without an explicit `stop_bot` call, so `list_running`
    /// and future `start_bot` calls see an accurate picture.
    pub fn reap_finished(&self) {
        let finished: Vec<Uuid> = self.engines.read().iter().filter(|(_, h)| h.status.get() == EngineStatus::Stopped && h.join.is_finished()).map(|(id, _)| *id).collect();
        let mut engines = self.engines.write();
        for id in finished {
            engines.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::error::{ExchangeError, OracleError};
    use crate::oracle::{LlmProvider, OracleMeta};
    use crate::store::memory::InMemoryStore;
    use crate::types::{Bot, Candle, RiskParams};

    struct NoopAdapter;

    #[async_trait]
    impl ExchangeAdapter for NoopAdapter {
        async fn fetch_candles(&self, _s: &str, _t: &str, _n: usize) -> Result<Vec<Candle>, ExchangeError> {
            Ok(vec![])
        }
        async fn fetch_ticker(&self, _s: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }
        async fn fetch_funding(&self, _s: &str) -> Result<Option<Decimal>, ExchangeError> {
            Ok(None)
        }
        async fn fetch_open_interest(&self, _s: &str) -> Result<Option<Decimal>, ExchangeError> {
            Ok(None)
        }
        async fn place_market_order(&self, _s: &str, _side: crate::types::TradeSide, _qty: Decimal) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }
    }

    struct HoldProvider;

    #[async_trait]
    impl LlmProvider for HoldProvider {
        fn name(&self) -> &str {
            "hold"
        }
        async fn analyze(&self, _p: &str, _m: u32, _t: Decimal, _model: &str) -> Result<(String, OracleMeta), OracleError> {
            Ok((
                r#"{"signal":"hold","confidence":0,"size_pct":0.01,"invalidation_condition":"","justification":"idle"}"#.to_string(),
                OracleMeta { tokens_in: 1, tokens_out: 1, cost: Decimal::ZERO, latency_ms: 1, provider: "hold".to_string(), cache_hit: false, fallback_used: None },
            ))
        }
    }

    fn test_bot(id: Uuid) -> Bot {
        Bot {
            id,
            owner: "tester".into(),
            name: "scheduler-bot".into(),
            model: "gpt-test".into(),
            symbols: vec!["BTCUSDT".into()],
            timeframe_short: "15m".into(),
            timeframe_long: "1h".into(),
            cycle_period_secs: 3600,
            initial_capital: dec!(10000),
            capital: dec!(10000),
            risk_params: RiskParams {
                max_position_pct: dec!(20),
                max_exposure_pct: dec!(80),
                max_drawdown_pct: dec!(25),
                max_trades_per_day: 20,
                stop_loss_pct: dec!(2),
                take_profit_pct: dec!(4),
                min_rr_ratio: dec!(1.5),
            },
            status: BotStatus::Active,
            paper_trading: true,
            close_positions_on_stop: false,
            entry_confidence_threshold: None,
        }
    }

    fn test_deps(store: Arc<dyn Store>) -> EngineDeps {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![Arc::new(HoldProvider)];
        EngineDeps {
            store,
            adapter: Arc::new(NoopAdapter),
            oracle: Arc::new(LlmOracle::new(providers, 0, dec!(1000), None)),
            paper: true,
            fee_rate: dec!(0.001),
            paper_slippage_bps: Decimal::ZERO,
            failure_threshold: 100,
        }
    }

    // P6: a second start_bot call for a bot that already has a running
    // engine is a no-op — at most one engine task per bot is ever
    // registered, so two cycles for the same bot can never run concurrently.
    #[tokio::test]
    async fn starting_an_already_running_bot_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let bot_id = Uuid::new_v4();
        store.seed_bot(test_bot(bot_id));

        let scheduler = Scheduler::new(test_deps(store));
        scheduler.start_bot(bot_id).await.unwrap();
        assert_eq!(scheduler.engines.read().len(), 1);

        scheduler.start_bot(bot_id).await.unwrap();
        assert_eq!(scheduler.engines.read().len(), 1, "a second start_bot call must not spawn a duplicate engine");

        scheduler.stop_bot(bot_id).await;
        assert!(scheduler.engines.read().is_empty());
    }
}
