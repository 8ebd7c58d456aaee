// =============================================================================
// Volume-Weighted Average Price (VWAP), session-cumulative
// =============================================================================
//
// VWAP_t = cumsum(typical_price * volume) / cumsum(volume) over the candles
// supplied, where typical_price = (H + L + C) / 3. Callers reset the
// session by passing only the candles since session open.

use rust_decimal::Decimal;

use crate::types::Candle;

pub fn calculate_vwap(candles: &[Candle]) -> Vec<Option<Decimal>> {
    let n = candles.len();
    let mut out = vec![None; n];

    let three = Decimal::from(3);
    let mut cum_pv = Decimal::ZERO;
    let mut cum_vol = Decimal::ZERO;

    for (i, c) in candles.iter().enumerate() {
        let typical = (c.high + c.low + c.close) / three;
        cum_pv += typical * c.volume;
        cum_vol += c.volume;
        out[i] = if cum_vol.is_zero() { None } else { Some(cum_pv / cum_vol) };
    }

    out
}
