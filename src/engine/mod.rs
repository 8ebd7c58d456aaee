// =============================================================================
// TradingEngine — per-bot cycle orchestrator
// =============================================================================
//
// One engine instance owns exactly one bot. The Scheduler spawns `run()` as
// an independent cancellable task; cancellation is observed only at the
// inter-cycle sleep, never mid-transaction, so an in-flight entry or exit
// always completes and is recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, ExchangeError};
use crate::market_data::ExchangeAdapter;
use crate::oracle::LlmOracle;
use crate::store::Store;
use crate::types::{BotStatus, Decision, LlmDecision, Position, Signal};

const MAX_ORACLE_TOKENS: u32 = 800;
const ORACLE_TEMPERATURE: Decimal = dec!(0.2);
const CANDLE_COUNT: usize = 100;
const RETRY_BACKOFFS_SECS: [u64; 3] = [1, 2, 4];

/// Observable lifecycle state. The engine's own `Paused`/`Stopped` states are
/// distinct from `Bot.status`: the engine exits its loop whenever it finds
/// the bot row no longer `active`, whatever caused that transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStatus {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for EngineStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => EngineStatus::Starting,
            1 => EngineStatus::Running,
            2 => EngineStatus::Stopping,
            _ => EngineStatus::Stopped,
        }
    }
}

/// Shared, lock-free status cell the Scheduler can poll without touching the
/// engine's internals.
#[derive(Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn get(&self) -> EngineStatus {
        EngineStatus::from(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: EngineStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

pub struct TradingEngine {
    pub bot_id: Uuid,
    store: Arc<dyn Store>,
    adapter: Arc<dyn ExchangeAdapter>,
    oracle: Arc<LlmOracle>,
    paper: bool,
    fee_rate: Decimal,
    paper_slippage_bps: Decimal,
    failure_threshold: u32,
    status: Arc<StatusCell>,
    cancel: watch::Receiver<bool>,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_id: Uuid,
        store: Arc<dyn Store>,
        adapter: Arc<dyn ExchangeAdapter>,
        oracle: Arc<LlmOracle>,
        paper: bool,
        fee_rate: Decimal,
        paper_slippage_bps: Decimal,
        failure_threshold: u32,
        status: Arc<StatusCell>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { bot_id, store, adapter, oracle, paper, fee_rate, paper_slippage_bps, failure_threshold, status, cancel }
    }

    /// Drives the per-bot loop until the bot is no longer `active`, an
    /// invariant violation halts it, or the Scheduler cancels it.
    pub async fn run(mut self) {
        self.status.set(EngineStatus::Starting);
        let mut consecutive_failures: u32 = 0;

        loop {
            if *self.cancel.borrow() {
                break;
            }

            let bot = match self.store.get_bot(self.bot_id).await {
                Ok(bot) => bot,
                Err(e) => {
                    error!(bot_id = %self.bot_id, error = %e, "failed to reload bot, stopping engine");
                    break;
                }
            };

            if bot.status != BotStatus::Active {
                info!(bot_id = %self.bot_id, status = ?bot.status, "bot no longer active, engine exiting");
                break;
            }

            self.status.set(EngineStatus::Running);
            let cycle_period = Duration::from_secs(bot.cycle_period_secs.max(1));

            match self.run_cycle(&bot).await {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                Err(e) if e.is_fatal() => {
                    error!(bot_id = %self.bot_id, error = %e, "fatal cycle error, halting engine");
                    let _ = self.store.set_bot_status(self.bot_id, BotStatus::Paused).await;
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(bot_id = %self.bot_id, error = %e, consecutive_failures, "cycle failed");
                    if consecutive_failures >= self.failure_threshold {
                        error!(bot_id = %self.bot_id, consecutive_failures, "consecutive failure threshold reached, auto-pausing");
                        let _ = self.store.set_bot_status(self.bot_id, BotStatus::Paused).await;
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(cycle_period) => {}
                _ = self.cancel.changed() => {
                    if *self.cancel.borrow() {
                        break;
                    }
                }
            }
        }

        self.status.set(EngineStatus::Stopped);
        info!(bot_id = %self.bot_id, "engine stopped");
    }

    /// Steps 3-7 of the cycle algorithm: close triggered positions, build the
    /// multi-symbol snapshot, consult the oracle, apply risk-gated decisions.
    async fn run_cycle(&self, bot: &crate::types::Bot) -> Result<(), EngineError> {
        let now = Utc::now();
        let mut open_positions = self.store.open_positions(bot.id).await?;

        let exited_symbols = self.run_exit_checks(bot, &mut open_positions, now).await?;

        let mut snapshots = Vec::new();
        let mut current_prices: HashMap<String, Decimal> = HashMap::new();
        for symbol in &bot.symbols {
            match retry_snapshot(self.adapter.as_ref(), symbol, &bot.timeframe_short, &bot.timeframe_long, CANDLE_COUNT).await {
                Ok(snap) => {
                    current_prices.insert(symbol.clone(), snap.last_price);
                    snapshots.push(snap);
                }
                Err(e) => {
                    warn!(bot_id = %bot.id, symbol, error = %e, "market data unavailable, skipping symbol this cycle");
                }
            }
        }
        for position in &open_positions {
            current_prices.entry(position.symbol.clone()).or_insert(position.current_price);
        }

        if snapshots.is_empty() {
            return Err(EngineError::DataUnavailable { symbol: bot.symbols.join(","), reason: "no symbol produced a usable snapshot".to_string() });
        }

        let trades_today = self.store.trades_today(bot.id, now).await?;
        let current_mark: Decimal = open_positions.iter().map(|p| p.current_price * p.quantity).sum();
        let invested = crate::positions::total_exposure(&open_positions);
        let equity = bot.capital + current_mark;

        let portfolio = crate::prompt::PortfolioSummary {
            cash: bot.capital,
            invested,
            equity,
            return_pct: if bot.initial_capital.is_zero() { Decimal::ZERO } else { (equity - bot.initial_capital) / bot.initial_capital * Decimal::ONE_HUNDRED },
            sharpe: None,
            open_positions: open_positions
                .iter()
                .map(|p| crate::prompt::OpenPositionSummary {
                    symbol: p.symbol.clone(),
                    side: p.side,
                    entry_price: p.entry_price,
                    current_price: p.current_price,
                    unrealized_pnl_pct: p.pnl_pct(),
                })
                .collect(),
        };

        let prompt = crate::prompt::render(bot, &portfolio, &snapshots);
        let (reply, meta) = self.oracle.analyze(&prompt, MAX_ORACLE_TOKENS, ORACLE_TEMPERATURE, &bot.model).await;
        let decisions = crate::prompt::parse(&reply, &current_prices, bot);

        let risk_portfolio = crate::risk::Portfolio { capital: bot.capital, equity, invested, trades_today };
        let (capital_after, gated) = self.apply_decisions(bot, &decisions, &mut open_positions, &exited_symbols, &risk_portfolio, now).await?;

        let decision_row = LlmDecision {
            id: Uuid::new_v4(),
            bot_id: bot.id,
            timestamp: now,
            prompt_hash: crate::prompt::prompt_hash(&bot.model, &prompt, MAX_ORACLE_TOKENS, ORACLE_TEMPERATURE),
            raw_response: reply,
            parsed_decisions: decisions.into_values().collect::<Vec<Decision>>(),
            tokens_in: meta.tokens_in,
            tokens_out: meta.tokens_out,
            cost: meta.cost,
            latency_ms: meta.latency_ms,
            provider: meta.provider.clone(),
            model: bot.model.clone(),
            fallback_used: meta.fallback_used.clone(),
            gated,
            synthetic_hold: meta.provider == "none",
        };
        self.store.insert_llm_decision(&decision_row).await?;

        let _ = capital_after;
        Ok(())
    }

    /// Closes any position whose deterministic trigger fires this cycle and
    /// returns the set of symbols closed, so `apply_decisions` can refuse to
    /// re-open them — a symbol must never be exited and re-entered in the
    /// same cycle, even if the oracle proposes an entry for it.
    async fn run_exit_checks(&self, bot: &crate::types::Bot, open_positions: &mut Vec<Position>, now: chrono::DateTime<Utc>) -> Result<HashSet<String>, EngineError> {
        let mut remaining = Vec::with_capacity(open_positions.len());
        let mut exited = HashSet::new();
        for mut position in open_positions.drain(..) {
            let price = match retry_ticker(self.adapter.as_ref(), &position.symbol).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(bot_id = %bot.id, symbol = %position.symbol, error = %e, "price unavailable for exit check, leaving position open this cycle");
                    remaining.push(position);
                    continue;
                }
            };
            crate::positions::mark(&mut position, price);

            if let Some(reason) = crate::positions::check_exit_triggers(&position, now) {
                let fill = crate::execution::execute_exit(self.adapter.as_ref(), &mut position, reason, bot.capital, self.fee_rate, self.paper, now).await?;
                self.store.apply_exit(bot.id, fill.capital_after, &position, &fill.trade).await?;
                info!(bot_id = %bot.id, symbol = %position.symbol, reason = %reason, realized_pnl = %fill.realized_pnl, "position closed by deterministic exit trigger");
                exited.insert(position.symbol.clone());
            } else {
                self.store.update_position(&position).await?;
                remaining.push(position);
            }
        }
        *open_positions = remaining;
        Ok(exited)
    }

    async fn apply_decisions(
        &self,
        bot: &crate::types::Bot,
        decisions: &HashMap<String, Decision>,
        open_positions: &mut Vec<Position>,
        exited_symbols: &HashSet<String>,
        risk_portfolio: &crate::risk::Portfolio,
        now: chrono::DateTime<Utc>,
    ) -> Result<(Decimal, bool), EngineError> {
        let threshold = bot.entry_confidence_threshold();
        let mut capital = bot.capital;
        let mut attempted = 0u32;
        let mut rejected = 0u32;

        for decision in decisions.values() {
            if decision.signal == Signal::Hold || decision.confidence < threshold {
                continue;
            }

            match decision.signal {
                Signal::Entry => {
                    attempted += 1;
                    if open_positions.iter().any(|p| p.symbol == decision.symbol) || exited_symbols.contains(&decision.symbol) {
                        rejected += 1;
                        continue;
                    }
                    let current_price = decision.entry_price.unwrap_or(Decimal::ZERO);
                    if let Err(reason) = crate::risk::validate(bot, risk_portfolio, decision, current_price) {
                        warn!(bot_id = %bot.id, symbol = %decision.symbol, reason, "entry rejected by risk gate");
                        rejected += 1;
                        continue;
                    }
                    let side = decision.side.expect("validate() guarantees side is present on an entry");
                    let entry_price = decision.entry_price.expect("validate() guarantees entry_price is present on an entry");
                    let stop_loss = decision.stop_loss.expect("validate() guarantees stop_loss is present on an entry");
                    let profit_target = decision.profit_target.expect("validate() guarantees profit_target is present on an entry");
                    let notional = crate::risk::size_for(capital, decision.size_pct, decision.confidence);
                    let quantity = notional / entry_price;

                    match crate::execution::execute_entry(
                        self.adapter.as_ref(),
                        bot.id,
                        &decision.symbol,
                        side,
                        quantity,
                        entry_price,
                        stop_loss,
                        profit_target,
                        Decimal::ONE,
                        capital,
                        self.fee_rate,
                        self.paper_slippage_bps,
                        self.paper,
                        now,
                    )
                    .await
                    {
                        Ok(fill) => {
                            self.store.apply_entry(bot.id, fill.capital_after, &fill.position, &fill.trade).await?;
                            capital = fill.capital_after;
                            open_positions.push(fill.position);
                            info!(bot_id = %bot.id, symbol = %decision.symbol, side = %side, quantity = %quantity, "entry executed");
                        }
                        Err(EngineError::InsufficientCapital { needed, available, .. }) => {
                            warn!(bot_id = %bot.id, symbol = %decision.symbol, %needed, %available, "entry rejected: insufficient capital");
                            rejected += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Signal::Exit => {
                    if let Some(idx) = open_positions.iter().position(|p| p.symbol == decision.symbol) {
                        let mut position = open_positions.remove(idx);
                        let fill = crate::execution::execute_exit(self.adapter.as_ref(), &mut position, crate::types::ExitReason::Oracle, capital, self.fee_rate, self.paper, now).await?;
                        self.store.apply_exit(bot.id, fill.capital_after, &position, &fill.trade).await?;
                        capital = fill.capital_after;
                        info!(bot_id = %bot.id, symbol = %decision.symbol, realized_pnl = %fill.realized_pnl, "position closed on oracle exit signal");
                    }
                }
                Signal::Hold => unreachable!("filtered above"),
            }
        }

        let gated = attempted > 0 && rejected == attempted;
        Ok((capital, gated))
    }
}

async fn retry_ticker(adapter: &dyn ExchangeAdapter, symbol: &str) -> Result<Decimal, ExchangeError> {
    retry(|| adapter.fetch_ticker(symbol)).await
}

async fn retry_snapshot(
    adapter: &dyn ExchangeAdapter,
    symbol: &str,
    timeframe_short: &str,
    timeframe_long: &str,
    candle_count: usize,
) -> Result<crate::types::MarketSnapshot, ExchangeError> {
    retry(|| crate::market_data::snapshot_multi_timeframe(adapter, symbol, timeframe_short, timeframe_long, candle_count)).await
}

/// Retries a `Transient`-failing call up to 3 times with 1s/2s/4s backoff.
/// `Permanent` and `CircuitOpen` fail fast.
async fn retry<F, Fut, T>(mut f: F) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    let mut last_err = None;
    for backoff_secs in RETRY_BACKOFFS_SECS {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e @ ExchangeError::Transient(_)) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| ExchangeError::Transient("retry exhausted".to_string())))
}
