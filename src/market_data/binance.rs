// =============================================================================
// Binance USDT-M Futures adapter — REST polling, HMAC-SHA256 signed orders
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// clock drift between this process and Binance's servers.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::error::ExchangeError;
use crate::market_data::circuit_breaker::CircuitBreaker;
use crate::market_data::ExchangeAdapter;
use crate::types::{Candle, TradeSide};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

pub struct BinanceAdapter {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl fmt::Debug for BinanceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceAdapter")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl BinanceAdapter {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
            breaker: CircuitBreaker::new(5, 30),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before UNIX epoch").as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn guard(&self, endpoint: &str) -> Result<(), ExchangeError> {
        if self.breaker.allow() {
            Ok(())
        } else {
            Err(ExchangeError::CircuitOpen { endpoint: endpoint.to_string() })
        }
    }

    async fn get_json(&self, url: &str, endpoint: &str) -> Result<serde_json::Value, ExchangeError> {
        self.guard(endpoint)?;
        let result = self.client.get(url).send().await;
        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                self.breaker.record_failure();
                return Err(ExchangeError::Transient(e.to_string()));
            }
        };
        let status = resp.status();
        let body: serde_json::Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                self.breaker.record_failure();
                return Err(ExchangeError::Transient(format!("invalid JSON body: {e}")));
            }
        };
        if !status.is_success() {
            self.breaker.record_failure();
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(ExchangeError::Transient(format!("{status}: {body}")))
            } else {
                Err(ExchangeError::Permanent(format!("{status}: {body}")))
            };
        }
        self.breaker.record_success();
        Ok(body)
    }

    /// Parses a Binance numeric field that may arrive as a JSON string or
    /// number. Returns `None` on anything absent or unparseable — never a
    /// silently substituted zero.
    fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
        match value {
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    #[instrument(skip(self), name = "binance::fetch_candles")]
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, n: usize) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!("{}/fapi/v1/klines?symbol={}&interval={}&limit={}", self.base_url, symbol, timeframe, n);
        let body = self.get_json(&url, "klines").await?;
        let arr = body.as_array().ok_or_else(|| ExchangeError::Permanent("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(arr.len());
        for row in arr {
            let fields = row.as_array().ok_or_else(|| ExchangeError::Permanent("kline row is not an array".into()))?;
            if fields.len() < 7 {
                return Err(ExchangeError::Permanent("kline row has fewer than 7 fields".into()));
            }
            let open_ms = fields[0].as_i64().ok_or_else(|| ExchangeError::Permanent("kline openTime missing".into()))?;
            let close_ms = fields[6].as_i64().ok_or_else(|| ExchangeError::Permanent("kline closeTime missing".into()))?;
            let open = Self::parse_decimal(&fields[1]).ok_or_else(|| ExchangeError::Permanent("kline open missing".into()))?;
            let high = Self::parse_decimal(&fields[2]).ok_or_else(|| ExchangeError::Permanent("kline high missing".into()))?;
            let low = Self::parse_decimal(&fields[3]).ok_or_else(|| ExchangeError::Permanent("kline low missing".into()))?;
            let close = Self::parse_decimal(&fields[4]).ok_or_else(|| ExchangeError::Permanent("kline close missing".into()))?;
            let volume = Self::parse_decimal(&fields[5]).unwrap_or(Decimal::ZERO);

            candles.push(Candle {
                open_time: chrono::DateTime::from_timestamp_millis(open_ms).unwrap_or_else(chrono::Utc::now),
                close_time: chrono::DateTime::from_timestamp_millis(close_ms).unwrap_or_else(chrono::Utc::now),
                open,
                high,
                low,
                close,
                volume,
            });
        }

        debug!(symbol, timeframe, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "binance::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
        let body = self.get_json(&url, "ticker").await?;
        Self::parse_decimal(&body["price"]).ok_or_else(|| ExchangeError::Permanent("ticker price missing or unparseable".into()))
    }

    #[instrument(skip(self), name = "binance::fetch_funding")]
    async fn fetch_funding(&self, symbol: &str) -> Result<Option<Decimal>, ExchangeError> {
        let url = format!("{}/fapi/v1/fundingRate?symbol={}&limit=1", self.base_url, symbol);
        let body = self.get_json(&url, "fundingRate").await?;
        let arr = match body.as_array() {
            Some(a) => a,
            None => return Ok(None),
        };
        Ok(arr.first().and_then(|entry| Self::parse_decimal(&entry["fundingRate"])))
    }

    #[instrument(skip(self), name = "binance::fetch_open_interest")]
    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<Decimal>, ExchangeError> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.base_url, symbol);
        let body = self.get_json(&url, "openInterest").await?;
        Ok(Self::parse_decimal(&body["openInterest"]))
    }

    #[instrument(skip(self, quantity), name = "binance::place_market_order")]
    async fn place_market_order(&self, symbol: &str, side: TradeSide, quantity: Decimal) -> Result<Decimal, ExchangeError> {
        self.guard("order")?;
        let side_str = match side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        };
        let params = format!("symbol={symbol}&side={side_str}&type=MARKET&quantity={quantity}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = match self.client.post(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.breaker.record_failure();
                return Err(ExchangeError::Transient(e.to_string()));
            }
        };
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| ExchangeError::Transient(format!("invalid order response: {e}")))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            self.breaker.record_failure();
            return Err(ExchangeError::Permanent(format!("authentication rejected: {body}")));
        }
        if !status.is_success() {
            self.breaker.record_failure();
            return if status.is_server_error() {
                Err(ExchangeError::Transient(format!("{status}: {body}")))
            } else {
                Err(ExchangeError::Permanent(format!("{status}: {body}")))
            };
        }
        self.breaker.record_success();

        Self::parse_decimal(&body["avgPrice"])
            .filter(|p| !p.is_zero())
            .or_else(|| Self::parse_decimal(&body["price"]))
            .ok_or_else(|| ExchangeError::Permanent("order response missing fill price".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credentials() {
        let adapter = BinanceAdapter::new("my-api-key", "my-secret");
        let rendered = format!("{adapter:?}");
        assert!(!rendered.contains("my-api-key"));
        assert!(!rendered.contains("my-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn parse_decimal_handles_string_and_number_and_rejects_garbage() {
        assert_eq!(BinanceAdapter::parse_decimal(&serde_json::json!("1.2345")), Some(Decimal::new(12345, 4)));
        assert_eq!(BinanceAdapter::parse_decimal(&serde_json::json!(null)), None);
        assert_eq!(BinanceAdapter::parse_decimal(&serde_json::json!("not-a-number")), None);
    }
}
