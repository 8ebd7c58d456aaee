// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// Quantifies trend strength regardless of direction. ADX > 25 is commonly
// read as trending; ADX < 20 as ranging.

use rust_decimal::Decimal;

use crate::types::Candle;

pub fn calculate_adx(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if period == 0 || n < 2 * period + 1 {
        return out;
    }

    let period_dec = Decimal::from(period as u64);
    let bar_count = n - 1;

    let mut plus_dm = Vec::with_capacity(bar_count);
    let mut minus_dm = Vec::with_capacity(bar_count);
    let mut tr_vals = Vec::with_capacity(bar_count);

    for i in 1..n {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_high = candles[i - 1].high;
        let prev_low = candles[i - 1].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        let pdm = if up_move > down_move && up_move > Decimal::ZERO { up_move } else { Decimal::ZERO };
        let mdm = if down_move > up_move && down_move > Decimal::ZERO { down_move } else { Decimal::ZERO };

        plus_dm.push(pdm);
        minus_dm.push(mdm);
        tr_vals.push(tr);
    }

    let mut smooth_plus: Decimal = plus_dm[..period].iter().sum();
    let mut smooth_minus: Decimal = minus_dm[..period].iter().sum();
    let mut smooth_tr: Decimal = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(bar_count - period + 1);
    dx_values.push(compute_dx(smooth_plus, smooth_minus, smooth_tr));

    for i in period..bar_count {
        smooth_plus = smooth_plus - smooth_plus / period_dec + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_dec + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_dec + tr_vals[i];
        dx_values.push(compute_dx(smooth_plus, smooth_minus, smooth_tr));
    }

    if dx_values.len() < period || dx_values[..period].iter().any(Option::is_none) {
        return out;
    }

    let seed: Decimal =
        dx_values[..period].iter().map(|v| v.unwrap()).sum::<Decimal>() / period_dec;

    // First ADX value lands at candle index `2*period` (index `period-1`
    // in bar-space plus `period` more bars to seed the DX average, plus
    // the leading candle with no predecessor).
    let mut adx = seed;
    out[2 * period] = Some(adx);

    for (offset, dx_opt) in dx_values[period..].iter().enumerate() {
        let Some(dx) = dx_opt else { break };
        adx = (adx * (period_dec - Decimal::ONE) + dx) / period_dec;
        out[2 * period + 1 + offset] = Some(adx);
    }

    out
}

fn compute_dx(smooth_plus: Decimal, smooth_minus: Decimal, smooth_tr: Decimal) -> Option<Decimal> {
    if smooth_tr.is_zero() {
        return None;
    }
    let plus_di = smooth_plus / smooth_tr * Decimal::ONE_HUNDRED;
    let minus_di = smooth_minus / smooth_tr * Decimal::ONE_HUNDRED;
    let di_sum = plus_di + minus_di;
    if di_sum.is_zero() {
        return Some(Decimal::ZERO);
    }
    Some((plus_di - minus_di).abs() / di_sum * Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::latest_valid;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: Decimal::try_from(open).unwrap(),
            high: Decimal::try_from(high).unwrap(),
            low: Decimal::try_from(low).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: dec!(1),
        }
    }

    #[test]
    fn adx_insufficient_data() {
        let candles = vec![candle(1.0, 2.0, 0.5, 1.5); 10];
        assert!(calculate_adx(&candles, 14).iter().all(Option::is_none));
    }

    #[test]
    fn adx_strong_uptrend() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        let adx = latest_valid(&calculate_adx(&candles, 14)).unwrap();
        assert!(adx > dec!(25));
    }

    #[test]
    fn adx_flat_market_near_zero() {
        let candles = vec![candle(100.0, 101.0, 99.0, 100.0); 60];
        let adx = latest_valid(&calculate_adx(&candles, 14)).unwrap();
        assert!(adx < dec!(1));
    }
}
