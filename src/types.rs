// =============================================================================
// Core data model: Bot, Position, Trade, LLMDecision, and supporting types
// =============================================================================
//
// All monetary and price fields are `Decimal`. Nothing in this module ever
// widens a money-bearing value to `f64`; ingress from JSON/exchange payloads
// goes through an explicit `Decimal::from_str` coercion at the adapter edge.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long or short directional exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Lifecycle status of a `Bot`. Transitions are owned by the Scheduler or an
/// explicit admin call — the engine never writes this field directly except
/// via the auto-pause path described in the cycle algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Draft,
    Active,
    Paused,
    Stopped,
}

/// Risk policy parameters attached to a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    pub max_position_pct: Decimal,
    pub max_exposure_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_trades_per_day: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub min_rr_ratio: Decimal,
}

/// Identity and configuration of one trader. `capital` is mutated only by
/// the TradeExecutor, inside a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub model: String,
    pub symbols: Vec<String>,
    pub timeframe_short: String,
    pub timeframe_long: String,
    pub cycle_period_secs: u64,
    pub initial_capital: Decimal,
    pub capital: Decimal,
    pub risk_params: RiskParams,
    pub status: BotStatus,
    pub paper_trading: bool,
    /// Declared at bot creation; honored uniformly by `stop()` (see open
    /// questions in DESIGN.md).
    pub close_positions_on_stop: bool,
    /// Overrides the default entry-confidence threshold of 0.55 when set.
    pub entry_confidence_threshold: Option<Decimal>,
}

impl Bot {
    pub fn entry_confidence_threshold(&self) -> Decimal {
        self.entry_confidence_threshold
            .unwrap_or_else(|| Decimal::new(55, 2))
    }
}

/// Status of a `Position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A deterministic, data-driven reason an open position was closed by the
/// engine's exit checker, independent of the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    LargeLoss,
    TimeoutLoss,
    Stagnation,
    /// Closed on an oracle-issued `exit` signal rather than a deterministic trigger.
    Oracle,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::LargeLoss => "large_loss",
            ExitReason::TimeoutLoss => "timeout",
            ExitReason::Stagnation => "stagnation",
            ExitReason::Oracle => "oracle",
        };
        write!(f, "{s}")
    }
}

/// An open or closed directional exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub leverage: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub status: PositionStatus,
    pub realized_pnl: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    /// `(p - entry) * qty` for long, `(entry - p) * qty` for short. (P3)
    pub fn unrealized_pnl(&self) -> Decimal {
        match self.side {
            Side::Long => (self.current_price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - self.current_price) * self.quantity,
        }
    }

    pub fn pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl() / (self.entry_price * self.quantity) * Decimal::ONE_HUNDRED
    }

    pub fn hold_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.entry_time
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

/// Account-view side of an executed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Whether a trade row opened or closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Entry,
    Exit,
}

/// Immutable ledger row for each fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fees: Decimal,
    pub kind: TradeKind,
    pub realized_pnl: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// A single symbol's decision as parsed out of an oracle reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub signal: Signal,
    pub side: Option<Side>,
    pub confidence: Decimal,
    pub size_pct: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub profit_target: Option<Decimal>,
    pub invalidation_condition: String,
    pub justification: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Entry,
    Exit,
    Hold,
}

/// Audit row of each oracle call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDecision {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub prompt_hash: String,
    pub raw_response: String,
    pub parsed_decisions: Vec<Decision>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: Decimal,
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
    pub fallback_used: Option<String>,
    pub gated: bool,
    pub synthetic_hold: bool,
}

/// A single OHLCV candle. Partial/forming last candle permitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Per-symbol indicator values + series, handed to the PromptBuilder and
/// discarded — never persisted by the core.
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub sma: Vec<Option<Decimal>>,
    pub ema_fast: Vec<Option<Decimal>>,
    pub ema_slow: Vec<Option<Decimal>>,
    pub rsi: Vec<Option<Decimal>>,
    pub macd: Vec<Option<Decimal>>,
    pub macd_signal: Vec<Option<Decimal>>,
    pub bollinger_upper: Vec<Option<Decimal>>,
    pub bollinger_lower: Vec<Option<Decimal>>,
    pub atr: Vec<Option<Decimal>>,
    pub stochastic_k: Vec<Option<Decimal>>,
    pub obv: Vec<Option<Decimal>>,
    pub vwap: Vec<Option<Decimal>>,
    pub adx: Vec<Option<Decimal>>,
}

/// Per-symbol transient snapshot handed to the PromptBuilder.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub candles_short: Vec<Candle>,
    pub candles_long: Vec<Candle>,
    pub indicators_short: IndicatorSnapshot,
    pub indicators_long: IndicatorSnapshot,
    pub open_interest: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn position(side: Side, entry: Decimal, current: Decimal, quantity: Decimal) -> Position {
        Position {
            id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side,
            quantity,
            entry_price: entry,
            current_price: current,
            stop_loss: dec!(1),
            take_profit: dec!(999999),
            leverage: dec!(1),
            entry_time: Utc::now(),
            exit_time: None,
            exit_price: None,
            status: PositionStatus::Open,
            realized_pnl: None,
            exit_reason: None,
        }
    }

    proptest! {
        // P3: unrealized_pnl sign and magnitude match the long/short formula
        // exactly for any entry/current price and quantity.
        #[test]
        fn unrealized_pnl_matches_side_formula(
            entry in 1.0f64..200_000.0,
            current in 1.0f64..200_000.0,
            quantity in 0.0001f64..100.0,
        ) {
            let entry = Decimal::try_from(entry).unwrap();
            let current = Decimal::try_from(current).unwrap();
            let quantity = Decimal::try_from(quantity).unwrap();

            let long = position(Side::Long, entry, current, quantity);
            prop_assert_eq!(long.unrealized_pnl(), (current - entry) * quantity);

            let short = position(Side::Short, entry, current, quantity);
            prop_assert_eq!(short.unrealized_pnl(), (entry - current) * quantity);
        }
    }

    // P2: closing a position freezes realized_pnl to the same value the
    // side-aware formula produces, and the position is never mutated by a
    // second read of it.
    #[test]
    fn closed_position_realized_pnl_matches_formula_and_is_frozen() {
        let mut pos = position(Side::Long, dec!(50000), dec!(50000), dec!(1));
        pos.current_price = dec!(51500);
        pos.status = PositionStatus::Closed;
        pos.exit_price = Some(dec!(51500));
        pos.exit_time = Some(Utc::now());
        pos.realized_pnl = Some((dec!(51500) - dec!(50000)) * dec!(1));
        pos.exit_reason = Some(ExitReason::TakeProfit);

        let snapshot = pos.realized_pnl;
        assert_eq!(snapshot, Some(dec!(1500)));
        // Marking a closed position (which the engine never does, but the
        // type itself doesn't forbid it) must not be confused with mutating
        // the frozen realized_pnl — they are separate fields.
        assert_eq!(pos.realized_pnl, snapshot);
    }
}
