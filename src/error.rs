// =============================================================================
// Error taxonomy shared across the trading engine
// =============================================================================

use thiserror::Error;
use uuid::Uuid;

/// Errors an exchange adapter call can produce before they are folded into
/// the engine-level taxonomy.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("transient exchange failure: {0}")]
    Transient(String),
    #[error("permanent exchange failure: {0}")]
    Permanent(String),
    #[error("circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },
}

/// Errors an LLM provider call can produce before the oracle layer folds
/// them into a fallback decision or an engine-level error.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider authentication failed")]
    AuthFailure,
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

/// Errors from the datastore layer, folded into `EngineError::Transient` or
/// `EngineError::Permanent` at the boundary depending on recoverability.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient datastore failure: {0}")]
    Transient(String),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("datastore invariant violated: {0}")]
    Invariant(String),
}

/// The engine-level error taxonomy. Every non-adapter component that can
/// fail surfaces one of these; propagation policy is in the engine cycle.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("oracle auth failure: {0}")]
    AuthFailure(String),

    #[error("insufficient capital: need {needed}, have {available} (bot {bot_id})")]
    InsufficientCapital {
        bot_id: Uuid,
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    /// Not a failure in the usual sense — the gate declined a decision.
    /// Carries the rejection reason so callers can record it.
    #[error("risk rejected: {0}")]
    RiskRejected(String),

    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Fatal. Halts the owning engine; the scheduler does not auto-restart.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Permanent(_) | EngineError::InvariantViolation(_))
    }
}

impl From<ExchangeError> for EngineError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Transient(m) => EngineError::Transient(m),
            ExchangeError::Permanent(m) => EngineError::Permanent(m),
            ExchangeError::CircuitOpen { endpoint } => {
                EngineError::Transient(format!("circuit open: {endpoint}"))
            }
        }
    }
}

impl From<OracleError> for EngineError {
    fn from(e: OracleError) -> Self {
        match e {
            OracleError::RateLimited => EngineError::Transient("oracle rate limited".into()),
            OracleError::AuthFailure => EngineError::AuthFailure("oracle auth failure".into()),
            OracleError::Transient(m) => EngineError::Transient(m),
            OracleError::Permanent(m) => EngineError::Permanent(m),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(m) => EngineError::Transient(m),
            StoreError::NotFound(m) => EngineError::Permanent(format!("not found: {m}")),
            StoreError::Invariant(m) => EngineError::InvariantViolation(m),
        }
    }
}
