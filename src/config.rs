// =============================================================================
// Runtime Configuration — file-backed settings layered under process env vars
// =============================================================================
//
// Every field carries a serde default so a partial or empty JSON file is
// valid; `dotenvy` loads a local `.env` into the process environment before
// `RuntimeConfig::load_with_env` reads it, matching the precedence rule that
// environment variables override the file. Persistence uses an atomic
// tmp-then-rename write so a crash mid-save never corrupts the file.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Wraps a credential so `Debug`/`Display`/logging never leak it. `Serialize`
/// is intentionally not derived — secrets never round-trip into the config
/// file.
#[derive(Clone, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

fn default_llm_cache_ttl_secs() -> u64 {
    30
}

fn default_llm_batch_size() -> usize {
    5
}

fn default_db_pool_size() -> u32 {
    10
}

fn default_db_pool_timeout_secs() -> u64 {
    30
}

fn default_paper_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.0004 = 4 bps, a typical taker fee
}

fn default_paper_slippage_bps() -> Decimal {
    Decimal::ZERO
}

fn default_cycle_default_secs() -> u64 {
    300
}

fn default_llm_daily_cost_limit() -> Decimal {
    Decimal::from(20)
}

fn default_failure_threshold() -> u32 {
    5
}

/// Top-level runtime configuration. Every field has a serde default so older
/// or hand-trimmed JSON files still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_llm_daily_cost_limit")]
    pub llm_daily_cost_limit: Decimal,

    #[serde(default = "default_llm_cache_ttl_secs")]
    pub llm_cache_ttl_secs: u64,

    #[serde(default = "default_llm_batch_size")]
    pub llm_batch_size: usize,

    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,

    #[serde(default = "default_db_pool_timeout_secs")]
    pub db_pool_timeout_secs: u64,

    #[serde(default = "default_paper_fee_rate")]
    pub paper_fee_rate: Decimal,

    #[serde(default = "default_paper_slippage_bps")]
    pub paper_slippage_bps: Decimal,

    #[serde(default = "default_cycle_default_secs")]
    pub cycle_default_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub engine_failure_threshold: u32,

    /// Credentials never live in the JSON file; they are populated only from
    /// the environment by `load_with_env`.
    #[serde(skip, default)]
    pub exchange_api_key: Option<Secret>,
    #[serde(skip, default)]
    pub exchange_api_secret: Option<Secret>,
    #[serde(skip, default)]
    pub llm_api_keys: Vec<(String, Secret)>,
    #[serde(skip, default)]
    pub database_url: Option<Secret>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llm_daily_cost_limit: default_llm_daily_cost_limit(),
            llm_cache_ttl_secs: default_llm_cache_ttl_secs(),
            llm_batch_size: default_llm_batch_size(),
            db_pool_size: default_db_pool_size(),
            db_pool_timeout_secs: default_db_pool_timeout_secs(),
            paper_fee_rate: default_paper_fee_rate(),
            paper_slippage_bps: default_paper_slippage_bps(),
            cycle_default_secs: default_cycle_default_secs(),
            engine_failure_threshold: default_failure_threshold(),
            exchange_api_key: None,
            exchange_api_secret: None,
            llm_api_keys: Vec::new(),
            database_url: None,
        }
    }
}

impl RuntimeConfig {
    /// Load from `path` if present (falling back to defaults with a warning
    /// if absent or malformed), then layer environment variables — loaded
    /// from `.env` via `dotenvy` by the caller — on top.
    pub fn load_with_env(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to parse runtime config, using defaults");
                Self::default()
            }),
            Err(_) => {
                info!(path = %path.display(), "no runtime config file found, using defaults");
                Self::default()
            }
        };

        config.exchange_api_key = std::env::var("EXCHANGE_API_KEY").ok().map(Secret::from);
        config.exchange_api_secret = std::env::var("EXCHANGE_API_SECRET").ok().map(Secret::from);
        config.database_url = std::env::var("DATABASE_URL").ok().map(Secret::from);

        for (env_key, provider) in [("LLM_OPENAI_API_KEY", "openai"), ("LLM_ANTHROPIC_API_KEY", "anthropic")] {
            if let Ok(key) = std::env::var(env_key) {
                config.llm_api_keys.push((provider.to_string(), Secret::from(key)));
            }
        }

        if let Ok(v) = std::env::var("LLM_DAILY_COST_LIMIT").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.llm_daily_cost_limit = v;
        }
        if let Some(v) = std::env::var("LLM_CACHE_TTL_SECONDS").ok().and_then(|s| s.parse().ok()) {
            config.llm_cache_ttl_secs = v;
        }
        if let Some(v) = std::env::var("LLM_BATCH_SIZE").ok().and_then(|s| s.parse().ok()) {
            config.llm_batch_size = v;
        }
        if let Some(v) = std::env::var("DB_POOL_SIZE").ok().and_then(|s| s.parse().ok()) {
            config.db_pool_size = v;
        }
        if let Some(v) = std::env::var("DB_POOL_TIMEOUT").ok().and_then(|s| s.parse().ok()) {
            config.db_pool_timeout_secs = v;
        }
        if let Some(v) = std::env::var("PAPER_FEE_RATE").ok().and_then(|s| s.parse().ok()) {
            config.paper_fee_rate = v;
        }
        if let Some(v) = std::env::var("PAPER_SLIPPAGE_BPS").ok().and_then(|s| s.parse().ok()) {
            config.paper_slippage_bps = v;
        }
        if let Some(v) = std::env::var("CYCLE_DEFAULT_SECONDS").ok().and_then(|s| s.parse().ok()) {
            config.cycle_default_secs = v;
        }

        info!(
            llm_daily_cost_limit = %config.llm_daily_cost_limit,
            db_pool_size = config.db_pool_size,
            "runtime config loaded"
        );

        config
    }

    /// Persist the non-secret portion of the configuration with an atomic
    /// tmp-then-rename write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::from("super-sensitive-value".to_string());
        assert_eq!(format!("{secret:?}"), "<redacted>");
        assert_eq!(secret.expose(), "super-sensitive-value");
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.llm_cache_ttl_secs, 30);
        assert_eq!(cfg.db_pool_size, 10);
        assert!(cfg.exchange_api_key.is_none());
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "db_pool_size": 25 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.db_pool_size, 25);
        assert_eq!(cfg.llm_batch_size, 5);
    }

    #[test]
    fn roundtrip_serialization_excludes_secrets() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("exchange_api_key"));
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.db_pool_size, cfg2.db_pool_size);
    }
}
