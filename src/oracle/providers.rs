// =============================================================================
// Concrete LLMProvider implementations
// =============================================================================

use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use crate::error::OracleError;
use crate::oracle::{LlmProvider, OracleMeta};

/// OpenAI-compatible chat-completions provider. Works against any endpoint
/// that speaks the same wire format (OpenAI, Azure OpenAI, local proxies).
pub struct OpenAiProvider {
    name: String,
    api_key: crate::config::Secret,
    base_url: String,
    client: reqwest::Client,
    cost_per_1k_input: Decimal,
    cost_per_1k_output: Decimal,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, api_key: crate::config::Secret, base_url: impl Into<String>, cost_per_1k_input: Decimal, cost_per_1k_output: Decimal) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url: base_url.into(),
            client: reqwest::Client::builder().timeout(std::time::Duration::from_secs(30)).build().expect("failed to build reqwest client"),
            cost_per_1k_input,
            cost_per_1k_output,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, prompt: &str, max_tokens: u32, temperature: Decimal, model: &str) -> Result<(String, OracleMeta), OracleError> {
        let started = Instant::now();
        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature.to_string().parse::<f64>().unwrap_or(0.1),
            "messages": [{"role": "user", "content": prompt}],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(OracleError::AuthFailure);
        }
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimited);
        }

        let value: serde_json::Value = resp.json().await.map_err(|e| OracleError::Transient(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            return if status.is_server_error() {
                Err(OracleError::Transient(format!("{status}: {value}")))
            } else {
                Err(OracleError::Permanent(format!("{status}: {value}")))
            };
        }

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::Permanent("response missing choices[0].message.content".to_string()))?
            .to_string();

        let tokens_in = value["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let tokens_out = value["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let cost = Decimal::from(tokens_in) / Decimal::from(1000) * self.cost_per_1k_input + Decimal::from(tokens_out) / Decimal::from(1000) * self.cost_per_1k_output;

        Ok((
            text,
            OracleMeta {
                tokens_in,
                tokens_out,
                cost,
                latency_ms: started.elapsed().as_millis() as u64,
                provider: self.name.clone(),
                cache_hit: false,
                fallback_used: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_is_preserved() {
        let provider = OpenAiProvider::new("openai", crate::config::Secret::from("k".to_string()), "https://api.openai.com/v1", Decimal::ZERO, Decimal::ZERO);
        assert_eq!(provider.name(), "openai");
    }
}
