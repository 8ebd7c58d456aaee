// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` closes.

use rust_decimal::Decimal;

/// Compute the EMA series for `closes` over `period`. Output is the same
/// length as `closes`; entries before the seed index are `None`.
pub fn calculate_ema(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let period_dec = Decimal::from(period as u64);
    let multiplier = Decimal::TWO / (period_dec + Decimal::ONE);

    let seed: Decimal = closes[..period].iter().sum::<Decimal>() / period_dec;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..closes.len() {
        let ema = closes[i] * multiplier + prev * (Decimal::ONE - multiplier);
        out[i] = Some(ema);
        prev = ema;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::latest_valid;
    use rust_decimal_macros::dec;

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        let closes = vec![dec!(1), dec!(2), dec!(3)];
        assert!(calculate_ema(&closes, 0).iter().all(Option::is_none));
    }

    #[test]
    fn ema_insufficient_data() {
        let closes = vec![dec!(1), dec!(2)];
        assert!(calculate_ema(&closes, 5).iter().all(Option::is_none));
    }

    #[test]
    fn ema_period_equals_length() {
        let closes = vec![dec!(2), dec!(4), dec!(6)];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema, vec![None, None, Some(dec!(4))]);
    }

    #[test]
    fn ema_warmup_is_none() {
        let closes: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let ema = calculate_ema(&closes, 5);
        assert!(ema[..4].iter().all(Option::is_none));
        assert!(latest_valid(&ema).is_some());
    }
}
