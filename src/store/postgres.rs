// =============================================================================
// PgStore — sqlx::PgPool-backed datastore
// =============================================================================
//
// Every write path uses one transaction; capital mutation additionally takes
// a row lock on `bots` via `SELECT ... FOR UPDATE` before reading the prior
// balance, so two concurrent fills against the same bot can never race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{
    Bot, BotStatus, ExitReason, LlmDecision, Position, PositionStatus, RiskParams, Side, Trade, TradeKind, TradeSide,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bots (
    id UUID PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    model TEXT NOT NULL,
    symbols JSONB NOT NULL,
    timeframe_short TEXT NOT NULL,
    timeframe_long TEXT NOT NULL,
    cycle_period_secs BIGINT NOT NULL,
    initial_capital NUMERIC(20,2) NOT NULL,
    capital NUMERIC(20,2) NOT NULL,
    risk_params JSONB NOT NULL,
    status TEXT NOT NULL,
    paper_trading BOOLEAN NOT NULL,
    close_positions_on_stop BOOLEAN NOT NULL DEFAULT FALSE,
    entry_confidence_threshold NUMERIC(5,4)
);

CREATE TABLE IF NOT EXISTS positions (
    id UUID PRIMARY KEY,
    bot_id UUID NOT NULL REFERENCES bots(id),
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity NUMERIC(20,8) NOT NULL,
    entry_price NUMERIC(20,8) NOT NULL,
    current_price NUMERIC(20,8) NOT NULL,
    stop_loss NUMERIC(20,8) NOT NULL,
    take_profit NUMERIC(20,8) NOT NULL,
    leverage NUMERIC(10,2) NOT NULL,
    entry_time TIMESTAMPTZ NOT NULL,
    exit_time TIMESTAMPTZ,
    exit_price NUMERIC(20,8),
    status TEXT NOT NULL,
    realized_pnl NUMERIC(20,2),
    exit_reason TEXT
);

CREATE TABLE IF NOT EXISTS trades (
    id UUID PRIMARY KEY,
    bot_id UUID NOT NULL REFERENCES bots(id),
    position_id UUID NOT NULL REFERENCES positions(id),
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity NUMERIC(20,8) NOT NULL,
    price NUMERIC(20,8) NOT NULL,
    fees NUMERIC(20,2) NOT NULL,
    kind TEXT NOT NULL,
    realized_pnl NUMERIC(20,2),
    timestamp TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS llm_decisions (
    id UUID PRIMARY KEY,
    bot_id UUID NOT NULL REFERENCES bots(id),
    timestamp TIMESTAMPTZ NOT NULL,
    prompt_hash TEXT NOT NULL,
    raw_response TEXT NOT NULL,
    parsed_decisions JSONB NOT NULL,
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    cost NUMERIC(10,4) NOT NULL,
    latency_ms BIGINT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    fallback_used TEXT,
    gated BOOLEAN NOT NULL,
    synthetic_hold BOOLEAN NOT NULL
);
"#;

fn side_to_str(s: Side) -> &'static str {
    match s {
        Side::Long => "long",
        Side::Short => "short",
    }
}

fn side_from_str(s: &str) -> Side {
    if s == "short" { Side::Short } else { Side::Long }
}

fn trade_side_to_str(s: TradeSide) -> &'static str {
    match s {
        TradeSide::Buy => "buy",
        TradeSide::Sell => "sell",
    }
}

fn exit_reason_to_str(r: ExitReason) -> &'static str {
    match r {
        ExitReason::StopLoss => "stop_loss",
        ExitReason::TakeProfit => "take_profit",
        ExitReason::LargeLoss => "large_loss",
        ExitReason::TimeoutLoss => "timeout",
        ExitReason::Stagnation => "stagnation",
        ExitReason::Oracle => "oracle",
    }
}

fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position, StoreError> {
    let status_str: String = row.try_get("status").map_err(|e| StoreError::Transient(e.to_string()))?;
    let side_str: String = row.try_get("side").map_err(|e| StoreError::Transient(e.to_string()))?;
    let exit_reason: Option<String> = row.try_get("exit_reason").map_err(|e| StoreError::Transient(e.to_string()))?;

    Ok(Position {
        id: row.try_get("id").map_err(|e| StoreError::Transient(e.to_string()))?,
        bot_id: row.try_get("bot_id").map_err(|e| StoreError::Transient(e.to_string()))?,
        symbol: row.try_get("symbol").map_err(|e| StoreError::Transient(e.to_string()))?,
        side: side_from_str(&side_str),
        quantity: row.try_get("quantity").map_err(|e| StoreError::Transient(e.to_string()))?,
        entry_price: row.try_get("entry_price").map_err(|e| StoreError::Transient(e.to_string()))?,
        current_price: row.try_get("current_price").map_err(|e| StoreError::Transient(e.to_string()))?,
        stop_loss: row.try_get("stop_loss").map_err(|e| StoreError::Transient(e.to_string()))?,
        take_profit: row.try_get("take_profit").map_err(|e| StoreError::Transient(e.to_string()))?,
        leverage: row.try_get("leverage").map_err(|e| StoreError::Transient(e.to_string()))?,
        entry_time: row.try_get("entry_time").map_err(|e| StoreError::Transient(e.to_string()))?,
        exit_time: row.try_get("exit_time").map_err(|e| StoreError::Transient(e.to_string()))?,
        exit_price: row.try_get("exit_price").map_err(|e| StoreError::Transient(e.to_string()))?,
        status: if status_str == "closed" { PositionStatus::Closed } else { PositionStatus::Open },
        realized_pnl: row.try_get("realized_pnl").map_err(|e| StoreError::Transient(e.to_string()))?,
        exit_reason: exit_reason.map(|s| match s.as_str() {
            "take_profit" => ExitReason::TakeProfit,
            "large_loss" => ExitReason::LargeLoss,
            "timeout" => ExitReason::TimeoutLoss,
            "stagnation" => ExitReason::Stagnation,
            "oracle" => ExitReason::Oracle,
            _ => ExitReason::StopLoss,
        }),
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get_bot(&self, bot_id: Uuid) -> Result<Bot, StoreError> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;

        row_to_bot(&row)
    }

    async fn list_active_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query("SELECT * FROM bots WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        rows.iter().map(row_to_bot).collect()
    }

    async fn save_bot_capital(&self, bot_id: Uuid, capital: Decimal) -> Result<(), StoreError> {
        sqlx::query("UPDATE bots SET capital = $1 WHERE id = $2")
            .bind(capital)
            .bind(bot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE bots SET status = $1 WHERE id = $2")
            .bind(status_to_str(status))
            .bind(bot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn open_positions(&self, bot_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE bot_id = $1 AND status = 'open'")
            .bind(bot_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        rows.iter().map(row_to_position).collect()
    }

    async fn closed_positions_since(&self, bot_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE bot_id = $1 AND status = 'closed' AND exit_time >= $2")
            .bind(bot_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        rows.iter().map(row_to_position).collect()
    }

    async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        insert_position_query(position).execute(&self.pool).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE positions SET current_price = $1, status = $2, exit_time = $3, exit_price = $4, realized_pnl = $5, exit_reason = $6 WHERE id = $7",
        )
        .bind(position.current_price)
        .bind(if position.status == PositionStatus::Closed { "closed" } else { "open" })
        .bind(position.exit_time)
        .bind(position.exit_price)
        .bind(position.realized_pnl)
        .bind(position.exit_reason.map(exit_reason_to_str))
        .bind(position.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        insert_trade_query(trade).execute(&self.pool).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn trades_today(&self, bot_id: Uuid, today: DateTime<Utc>) -> Result<u32, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE bot_id = $1 AND timestamp::date = $2::date")
            .bind(bot_id)
            .bind(today)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let n: i64 = row.try_get("n").map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(n as u32)
    }

    async fn insert_llm_decision(&self, decision: &LlmDecision) -> Result<(), StoreError> {
        let parsed_json = serde_json::to_value(&decision.parsed_decisions).map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query(
            "INSERT INTO llm_decisions (id, bot_id, timestamp, prompt_hash, raw_response, parsed_decisions, tokens_in, tokens_out, cost, latency_ms, provider, model, fallback_used, gated, synthetic_hold)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(decision.id)
        .bind(decision.bot_id)
        .bind(decision.timestamp)
        .bind(&decision.prompt_hash)
        .bind(&decision.raw_response)
        .bind(parsed_json)
        .bind(decision.tokens_in as i32)
        .bind(decision.tokens_out as i32)
        .bind(decision.cost)
        .bind(decision.latency_ms as i64)
        .bind(&decision.provider)
        .bind(&decision.model)
        .bind(&decision.fallback_used)
        .bind(decision.gated)
        .bind(decision.synthetic_hold)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn apply_entry(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query("SELECT capital FROM bots WHERE id = $1 FOR UPDATE")
            .bind(bot_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query("UPDATE bots SET capital = $1 WHERE id = $2")
            .bind(capital_after)
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        insert_position_query(position).execute(&mut *tx).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        insert_trade_query(trade).execute(&mut *tx).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        tx.commit().await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn apply_exit(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query("SELECT capital FROM bots WHERE id = $1 FOR UPDATE")
            .bind(bot_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query("UPDATE bots SET capital = $1 WHERE id = $2")
            .bind(capital_after)
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        sqlx::query(
            "UPDATE positions SET current_price = $1, status = 'closed', exit_time = $2, exit_price = $3, realized_pnl = $4, exit_reason = $5 WHERE id = $6",
        )
        .bind(position.current_price)
        .bind(position.exit_time)
        .bind(position.exit_price)
        .bind(position.realized_pnl)
        .bind(position.exit_reason.map(exit_reason_to_str))
        .bind(position.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        insert_trade_query(trade).execute(&mut *tx).await.map_err(|e| StoreError::Transient(e.to_string()))?;
        tx.commit().await.map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }
}

fn insert_position_query(position: &Position) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO positions (id, bot_id, symbol, side, quantity, entry_price, current_price, stop_loss, take_profit, leverage, entry_time, exit_time, exit_price, status, realized_pnl, exit_reason)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
    )
    .bind(position.id)
    .bind(position.bot_id)
    .bind(&position.symbol)
    .bind(side_to_str(position.side))
    .bind(position.quantity)
    .bind(position.entry_price)
    .bind(position.current_price)
    .bind(position.stop_loss)
    .bind(position.take_profit)
    .bind(position.leverage)
    .bind(position.entry_time)
    .bind(position.exit_time)
    .bind(position.exit_price)
    .bind(if position.status == PositionStatus::Closed { "closed" } else { "open" })
    .bind(position.realized_pnl)
    .bind(position.exit_reason.map(exit_reason_to_str))
}

fn insert_trade_query(trade: &Trade) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO trades (id, bot_id, position_id, symbol, side, quantity, price, fees, kind, realized_pnl, timestamp)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(trade.id)
    .bind(trade.bot_id)
    .bind(trade.position_id)
    .bind(&trade.symbol)
    .bind(trade_side_to_str(trade.side))
    .bind(trade.quantity)
    .bind(trade.price)
    .bind(trade.fees)
    .bind(if trade.kind == TradeKind::Entry { "entry" } else { "exit" })
    .bind(trade.realized_pnl)
    .bind(trade.timestamp)
}

fn status_to_str(status: BotStatus) -> &'static str {
    match status {
        BotStatus::Draft => "draft",
        BotStatus::Active => "active",
        BotStatus::Paused => "paused",
        BotStatus::Stopped => "stopped",
    }
}

fn status_from_str(s: &str) -> BotStatus {
    match s {
        "active" => BotStatus::Active,
        "paused" => BotStatus::Paused,
        "stopped" => BotStatus::Stopped,
        _ => BotStatus::Draft,
    }
}

fn row_to_bot(row: &sqlx::postgres::PgRow) -> Result<Bot, StoreError> {
    let status_str: String = row.try_get("status").map_err(|e| StoreError::Transient(e.to_string()))?;
    let symbols_json: serde_json::Value = row.try_get("symbols").map_err(|e| StoreError::Transient(e.to_string()))?;
    let risk_params_json: serde_json::Value = row.try_get("risk_params").map_err(|e| StoreError::Transient(e.to_string()))?;

    Ok(Bot {
        id: row.try_get("id").map_err(|e| StoreError::Transient(e.to_string()))?,
        owner: row.try_get("owner").map_err(|e| StoreError::Transient(e.to_string()))?,
        name: row.try_get("name").map_err(|e| StoreError::Transient(e.to_string()))?,
        model: row.try_get("model").map_err(|e| StoreError::Transient(e.to_string()))?,
        symbols: serde_json::from_value(symbols_json).map_err(|e| StoreError::Transient(e.to_string()))?,
        timeframe_short: row.try_get("timeframe_short").map_err(|e| StoreError::Transient(e.to_string()))?,
        timeframe_long: row.try_get("timeframe_long").map_err(|e| StoreError::Transient(e.to_string()))?,
        cycle_period_secs: {
            let v: i64 = row.try_get("cycle_period_secs").map_err(|e| StoreError::Transient(e.to_string()))?;
            v as u64
        },
        initial_capital: row.try_get("initial_capital").map_err(|e| StoreError::Transient(e.to_string()))?,
        capital: row.try_get("capital").map_err(|e| StoreError::Transient(e.to_string()))?,
        risk_params: serde_json::from_value::<RiskParams>(risk_params_json).map_err(|e| StoreError::Transient(e.to_string()))?,
        status: status_from_str(&status_str),
        paper_trading: row.try_get("paper_trading").map_err(|e| StoreError::Transient(e.to_string()))?,
        close_positions_on_stop: row.try_get("close_positions_on_stop").map_err(|e| StoreError::Transient(e.to_string()))?,
        entry_confidence_threshold: row.try_get("entry_confidence_threshold").map_err(|e| StoreError::Transient(e.to_string()))?,
    })
}
