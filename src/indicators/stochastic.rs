// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// %K = (close - lowest_low(period)) / (highest_high(period) - lowest_low(period)) * 100
// %D = SMA(%K, smoothing)

use rust_decimal::Decimal;

use super::sma::calculate_sma;
use crate::types::Candle;

pub struct StochasticResult {
    pub k: Vec<Option<Decimal>>,
    pub d: Vec<Option<Decimal>>,
}

pub fn calculate_stochastic(candles: &[Candle], period: usize, d_smoothing: usize) -> StochasticResult {
    let n = candles.len();
    let mut k = vec![None; n];
    if period == 0 || n < period {
        return StochasticResult { k, d: vec![None; n] };
    }

    for i in (period - 1)..n {
        let window = &candles[i + 1 - period..=i];
        let highest = window.iter().map(|c| c.high).fold(window[0].high, Decimal::max);
        let lowest = window.iter().map(|c| c.low).fold(window[0].low, Decimal::min);
        let range = highest - lowest;
        if range.is_zero() {
            k[i] = Some(Decimal::from(50));
        } else {
            k[i] = Some((candles[i].close - lowest) / range * Decimal::ONE_HUNDRED);
        }
    }

    let first_defined = k.iter().position(Option::is_some);
    let mut d = vec![None; n];
    if let Some(start) = first_defined {
        let defined: Vec<Decimal> = k[start..].iter().map(|v| v.unwrap()).collect();
        let sma_of_k = calculate_sma(&defined, d_smoothing);
        for (offset, v) in sma_of_k.into_iter().enumerate() {
            d[start + offset] = v;
        }
    }

    StochasticResult { k, d }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::latest_valid;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(high).unwrap(),
            low: Decimal::try_from(low).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: dec!(1),
        }
    }

    #[test]
    fn stochastic_at_high_is_100() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(110.0, 90.0, 110.0)).collect();
        let result = calculate_stochastic(&candles, 14, 3);
        assert_eq!(latest_valid(&result.k), Some(dec!(100)));
    }

    #[test]
    fn stochastic_insufficient_data() {
        let candles = vec![candle(110.0, 90.0, 100.0); 5];
        let result = calculate_stochastic(&candles, 14, 3);
        assert!(result.k.iter().all(Option::is_none));
    }
}
