// =============================================================================
// LLMOracle — provider fallback, three-tier caching, daily cost governor
// =============================================================================
//
// Never lets a raw provider error reach the Engine: a total failure across
// the configured provider chain synthesizes a safe-hold decision instead.

pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::OracleError;

#[derive(Debug, Clone)]
pub struct OracleMeta {
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: Decimal,
    pub latency_ms: u64,
    pub provider: String,
    pub cache_hit: bool,
    pub fallback_used: Option<String>,
}

/// One configured provider in the fallback chain.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, prompt: &str, max_tokens: u32, temperature: Decimal, model: &str) -> Result<(String, OracleMeta), OracleError>;
}

struct CacheEntry {
    text: String,
    meta: OracleMeta,
    expires_at: DateTime<Utc>,
}

/// In-process LRU-ish TTL cache. Capacity eviction is oldest-insertion-order,
/// which is sufficient at the call volumes one engine cycle produces.
struct LocalCache {
    ttl: chrono::Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    order: Mutex<Vec<String>>,
}

impl LocalCache {
    fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self { ttl: chrono::Duration::seconds(ttl_secs as i64), capacity, entries: Mutex::new(HashMap::new()), order: Mutex::new(Vec::new()) }
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<(String, OracleMeta)> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Some((entry.text.clone(), entry.meta.clone()));
            }
            entries.remove(key);
        }
        None
    }

    fn put(&self, key: String, text: String, meta: OracleMeta, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        let mut order = self.order.lock();
        if !entries.contains_key(&key) {
            order.push(key.clone());
            if order.len() > self.capacity {
                let oldest = order.remove(0);
                entries.remove(&oldest);
            }
        }
        entries.insert(key, CacheEntry { text, meta, expires_at: now + self.ttl });
    }
}

/// Tracks cumulative spend for one UTC day; resets automatically when the
/// day rolls over.
struct CostGovernor {
    daily_limit: Decimal,
    state: Mutex<(NaiveDate, Decimal)>,
}

impl CostGovernor {
    fn new(daily_limit: Decimal, today: NaiveDate) -> Self {
        Self { daily_limit, state: Mutex::new((today, Decimal::ZERO)) }
    }

    fn over_budget(&self, today: NaiveDate) -> bool {
        let mut state = self.state.lock();
        if state.0 != today {
            *state = (today, Decimal::ZERO);
        }
        state.1 >= self.daily_limit
    }

    fn record_spend(&self, today: NaiveDate, cost: Decimal) {
        let mut state = self.state.lock();
        if state.0 != today {
            *state = (today, Decimal::ZERO);
        }
        state.1 += cost;
    }
}

pub struct LlmOracle {
    providers: Vec<Arc<dyn LlmProvider>>,
    cache: LocalCache,
    governor: CostGovernor,
    shared_cache_ttl_secs: u64,
    redis: Option<redis::Client>,
}

impl LlmOracle {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, local_cache_ttl_secs: u64, daily_cost_limit: Decimal, redis_url: Option<&str>) -> Self {
        Self {
            providers,
            cache: LocalCache::new(local_cache_ttl_secs, 512),
            governor: CostGovernor::new(daily_cost_limit, Utc::now().date_naive()),
            shared_cache_ttl_secs: 300,
            redis: redis_url.and_then(|url| redis::Client::open(url).ok()),
        }
    }

    pub async fn analyze(&self, prompt: &str, max_tokens: u32, temperature: Decimal, model: &str) -> (String, OracleMeta) {
        let key = crate::prompt::prompt_hash(model, prompt, max_tokens, temperature);
        let now = Utc::now();
        let today = now.date_naive();

        if let Some((text, mut meta)) = self.cache.get(&key, now) {
            meta.cache_hit = true;
            return (text, meta);
        }

        if let Some((text, mut meta)) = self.get_shared_cache(&key).await {
            meta.cache_hit = true;
            self.cache.put(key.clone(), text.clone(), meta.clone(), now);
            return (text, meta);
        }

        if self.governor.over_budget(today) {
            warn!("daily LLM cost budget exceeded, returning synthetic hold");
            return synthetic_hold("daily cost budget exceeded");
        }

        for provider in &self.providers {
            match provider.analyze(prompt, max_tokens, temperature, model).await {
                Ok((text, meta)) => {
                    self.governor.record_spend(today, meta.cost);
                    self.cache.put(key.clone(), text.clone(), meta.clone(), now);
                    self.put_shared_cache(&key, &text, &meta).await;
                    return (text, meta);
                }
                Err(OracleError::RateLimited) | Err(OracleError::AuthFailure) => {
                    warn!(provider = provider.name(), "provider unavailable, trying next");
                    continue;
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider call failed, trying next");
                    continue;
                }
            }
        }

        synthetic_hold("oracle unavailable")
    }

    async fn get_shared_cache(&self, key: &str) -> Option<(String, OracleMeta)> {
        let client = self.redis.as_ref()?;
        let mut conn = client.get_multiplexed_async_connection().await.ok()?;
        let raw: Option<String> = redis::AsyncCommands::get(&mut conn, format!("oracle:{key}")).await.ok()?;
        let raw = raw?;
        serde_json::from_str::<SharedCacheEntry>(&raw).ok().map(|e| {
            (
                e.text,
                OracleMeta { tokens_in: e.tokens_in, tokens_out: e.tokens_out, cost: e.cost, latency_ms: e.latency_ms, provider: e.provider, cache_hit: false, fallback_used: None },
            )
        })
    }

    async fn put_shared_cache(&self, key: &str, text: &str, meta: &OracleMeta) {
        let Some(client) = self.redis.as_ref() else { return };
        let Ok(mut conn) = client.get_multiplexed_async_connection().await else { return };
        let entry = SharedCacheEntry {
            text: text.to_string(),
            tokens_in: meta.tokens_in,
            tokens_out: meta.tokens_out,
            cost: meta.cost,
            latency_ms: meta.latency_ms,
            provider: meta.provider.clone(),
        };
        if let Ok(json) = serde_json::to_string(&entry) {
            let _: Result<(), _> = redis::AsyncCommands::set_ex(&mut conn, format!("oracle:{key}"), json, self.shared_cache_ttl_secs).await;
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SharedCacheEntry {
    text: String,
    tokens_in: u32,
    tokens_out: u32,
    cost: Decimal,
    latency_ms: u64,
    provider: String,
}

fn synthetic_hold(reason: &str) -> (String, OracleMeta) {
    let text = format!(r#"{{"signal":"hold","confidence":0,"size_pct":0.01,"invalidation_condition":"","justification":"{reason}"}}"#);
    (
        text,
        // `fallback_used` records which *provider* a reply fell back to, not
        // why the oracle synthesized this hold — that's `synthetic_hold` and
        // whatever was logged by the caller.
        OracleMeta { tokens_in: 0, tokens_out: 0, cost: Decimal::ZERO, latency_ms: 0, provider: "none".to_string(), cache_hit: false, fallback_used: None },
    )
}
