pub mod binance;
pub mod circuit_breaker;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::indicators;
use crate::types::{Candle, IndicatorSnapshot, MarketSnapshot};

/// Exchange-agnostic read surface the engine depends on. Implementations own
/// their own transport, signing and circuit breaking; callers never see a raw
/// HTTP error, only the typed taxonomy in `ExchangeError`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, n: usize) -> Result<Vec<Candle>, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// `None` when the exchange reports no funding schedule for `symbol`
    /// (e.g. a spot-only symbol), never a fabricated zero.
    async fn fetch_funding(&self, symbol: &str) -> Result<Option<Decimal>, ExchangeError>;

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<Decimal>, ExchangeError>;

    /// Place a market order and return the actual fill price. In paper mode
    /// callers never reach this; it is only invoked for live execution.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: crate::types::TradeSide,
        quantity: Decimal,
    ) -> Result<Decimal, ExchangeError>;
}

/// Pulls both timeframes plus derived indicators for one symbol in a single
/// pass. This is the only thing the cycle loop calls; it never reaches for
/// candles or indicators individually.
pub async fn snapshot_multi_timeframe(
    adapter: &dyn ExchangeAdapter,
    symbol: &str,
    timeframe_short: &str,
    timeframe_long: &str,
    candle_count: usize,
) -> Result<MarketSnapshot, ExchangeError> {
    let (candles_short, candles_long, last_price, open_interest, funding_rate) = tokio::try_join!(
        adapter.fetch_candles(symbol, timeframe_short, candle_count),
        adapter.fetch_candles(symbol, timeframe_long, candle_count),
        adapter.fetch_ticker(symbol),
        adapter.fetch_open_interest(symbol),
        adapter.fetch_funding(symbol),
    )?;

    let indicators_short = build_indicator_snapshot(&candles_short);
    let indicators_long = build_indicator_snapshot(&candles_long);

    Ok(MarketSnapshot {
        symbol: symbol.to_string(),
        last_price,
        candles_short,
        candles_long,
        indicators_short,
        indicators_long,
        open_interest,
        funding_rate,
    })
}

fn build_indicator_snapshot(candles: &[Candle]) -> IndicatorSnapshot {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();

    let macd = indicators::macd::calculate_macd(&closes, 12, 26, 9);
    let bollinger = indicators::bollinger::calculate_bollinger(&closes, 20, rust_decimal_macros::dec!(2));
    let stochastic = indicators::stochastic::calculate_stochastic(candles, 14, 3);

    IndicatorSnapshot {
        sma: indicators::sma::calculate_sma(&closes, 20),
        ema_fast: indicators::ema::calculate_ema(&closes, 12),
        ema_slow: indicators::ema::calculate_ema(&closes, 26),
        rsi: indicators::rsi::calculate_rsi(&closes, 14),
        macd: macd.macd,
        macd_signal: macd.signal,
        bollinger_upper: bollinger.upper,
        bollinger_lower: bollinger.lower,
        atr: indicators::atr::calculate_atr(candles, 14),
        stochastic_k: stochastic.k,
        obv: indicators::obv::calculate_obv(candles),
        vwap: indicators::vwap::calculate_vwap(candles),
        adx: indicators::adx::calculate_adx(candles, 14),
    }
}
