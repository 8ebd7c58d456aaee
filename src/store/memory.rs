// =============================================================================
// InMemoryStore — parking_lot-guarded process-local datastore
// =============================================================================
//
// Default for paper trading and the store used by every test in this crate.
// Mutations that the spec calls "atomic" take the single lock for their
// whole critical section, which is sufficient for an in-process map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{Bot, BotStatus, LlmDecision, Position, PositionStatus, Trade};

#[derive(Default)]
pub struct InMemoryStore {
    bots: RwLock<HashMap<Uuid, Bot>>,
    positions: RwLock<HashMap<Uuid, Position>>,
    trades: RwLock<Vec<Trade>>,
    decisions: RwLock<Vec<LlmDecision>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_bot(&self, bot: Bot) {
        self.bots.write().insert(bot.id, bot);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_bot(&self, bot_id: Uuid) -> Result<Bot, StoreError> {
        self.bots.read().get(&bot_id).cloned().ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))
    }

    async fn list_active_bots(&self) -> Result<Vec<Bot>, StoreError> {
        Ok(self.bots.read().values().filter(|b| b.status == BotStatus::Active).cloned().collect())
    }

    async fn save_bot_capital(&self, bot_id: Uuid, capital: Decimal) -> Result<(), StoreError> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(&bot_id).ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        bot.capital = capital;
        Ok(())
    }

    async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), StoreError> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(&bot_id).ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        bot.status = status;
        Ok(())
    }

    async fn open_positions(&self, bot_id: Uuid) -> Result<Vec<Position>, StoreError> {
        Ok(self.positions.read().values().filter(|p| p.bot_id == bot_id && p.status == PositionStatus::Open).cloned().collect())
    }

    async fn closed_positions_since(&self, bot_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .positions
            .read()
            .values()
            .filter(|p| p.bot_id == bot_id && p.status == PositionStatus::Closed && p.exit_time.map(|t| t >= since).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions.write().insert(position.id, position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions.write().insert(position.id, position.clone());
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.trades.write().push(trade.clone());
        Ok(())
    }

    async fn trades_today(&self, bot_id: Uuid, today: DateTime<Utc>) -> Result<u32, StoreError> {
        Ok(self
            .trades
            .read()
            .iter()
            .filter(|t| t.bot_id == bot_id && t.timestamp.date_naive() == today.date_naive())
            .count() as u32)
    }

    async fn insert_llm_decision(&self, decision: &LlmDecision) -> Result<(), StoreError> {
        self.decisions.write().push(decision.clone());
        Ok(())
    }

    async fn apply_entry(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(&bot_id).ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        bot.capital = capital_after;
        self.positions.write().insert(position.id, position.clone());
        self.trades.write().push(trade.clone());
        Ok(())
    }

    async fn apply_exit(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(&bot_id).ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        bot.capital = capital_after;
        self.positions.write().insert(position.id, position.clone());
        self.trades.write().push(trade.clone());
        Ok(())
    }
}
