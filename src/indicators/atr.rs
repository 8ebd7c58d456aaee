// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing
// =============================================================================
//
// True Range per bar: TR = max(H-L, |H-prevClose|, |L-prevClose|).
// ATR is Wilder's smoothed average of TR, seeded with the SMA of the first
// `period` TR values.

use rust_decimal::Decimal;

use crate::types::Candle;

/// Compute the ATR series for `candles` over `period`. Output is the same
/// length as `candles`; the first candle and the warmup window are `None`.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut tr_values = Vec::with_capacity(n - 1);
    for i in 1..n {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_values.push(tr);
    }

    let period_dec = Decimal::from(period as u64);
    let seed: Decimal = tr_values[..period].iter().sum::<Decimal>() / period_dec;
    out[period] = Some(seed);

    let mut atr = seed;
    for i in period..tr_values.len() {
        atr = (atr * (period_dec - Decimal::ONE) + tr_values[i]) / period_dec;
        out[i + 1] = Some(atr);
    }

    out
}

/// ATR as a percentage of the close at the same index. `None` wherever the
/// ATR is undefined or the close is zero.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let atr = calculate_atr(candles, period);
    atr.iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(atr_val) if !candles[i].close.is_zero() => {
                Some(*atr_val / candles[i].close * Decimal::ONE_HUNDRED)
            }
            _ => None,
        })
        .collect()
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
            volume: dec!(100),
        }
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&candles, 14).iter().all(Option::is_none));
    }

    #[test]
    fn atr_constant_range_converges() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = latest_valid(&calculate_atr(&candles, 14)).unwrap();
        assert!((atr - dec!(10)).abs() < dec!(1));
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0),
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = latest_valid(&calculate_atr(&candles, 3)).unwrap();
        assert!(atr > dec!(7));
    }
}
