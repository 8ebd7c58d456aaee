pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Bot, LlmDecision, Position, Trade};

/// The datastore surface the engine depends on. Both implementations commit
/// every mutation atomically; `PgStore` additionally takes a row lock on the
/// bot during capital mutation (`SELECT ... FOR UPDATE`-equivalent).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_bot(&self, bot_id: Uuid) -> Result<Bot, StoreError>;
    async fn list_active_bots(&self) -> Result<Vec<Bot>, StoreError>;
    async fn save_bot_capital(&self, bot_id: Uuid, capital: Decimal) -> Result<(), StoreError>;
    async fn set_bot_status(&self, bot_id: Uuid, status: crate::types::BotStatus) -> Result<(), StoreError>;

    async fn open_positions(&self, bot_id: Uuid) -> Result<Vec<Position>, StoreError>;
    async fn closed_positions_since(&self, bot_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Position>, StoreError>;
    async fn insert_position(&self, position: &Position) -> Result<(), StoreError>;
    async fn update_position(&self, position: &Position) -> Result<(), StoreError>;

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError>;
    async fn trades_today(&self, bot_id: Uuid, today: DateTime<Utc>) -> Result<u32, StoreError>;

    async fn insert_llm_decision(&self, decision: &LlmDecision) -> Result<(), StoreError>;

    /// Atomically applies an entry fill: deducts capital, inserts the
    /// position, and inserts the trade row in one transaction.
    async fn apply_entry(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError>;

    /// Atomically applies an exit fill: credits capital, updates the
    /// position to closed, and inserts the trade row in one transaction.
    async fn apply_exit(&self, bot_id: Uuid, capital_after: Decimal, position: &Position, trade: &Trade) -> Result<(), StoreError>;
}
