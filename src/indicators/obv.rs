// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Running total: add volume on an up close, subtract on a down close, carry
// forward unchanged on a flat close. Defined from the second candle onward.

use rust_decimal::Decimal;

use crate::types::Candle;

pub fn calculate_obv(candles: &[Candle]) -> Vec<Option<Decimal>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if n == 0 {
        return out;
    }

    out[0] = Some(Decimal::ZERO);
    let mut running = Decimal::ZERO;
    for i in 1..n {
        let delta = candles[i].close - candles[i - 1].close;
        if delta > Decimal::ZERO {
            running += candles[i].volume;
        } else if delta < Decimal::ZERO {
            running -= candles[i].volume;
        }
        out[i] = Some(running);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(close).unwrap(),
            low: Decimal::try_from(close).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: Decimal::try_from(volume).unwrap(),
        }
    }

    #[test]
    fn obv_accumulates_on_up_and_down_moves() {
        let candles = vec![candle(100.0, 10.0), candle(101.0, 5.0), candle(99.0, 3.0)];
        let obv = calculate_obv(&candles);
        assert_eq!(obv, vec![Some(Decimal::ZERO), Some(dec!(5)), Some(dec!(2))]);
    }

    #[test]
    fn obv_flat_close_unchanged() {
        let candles = vec![candle(100.0, 10.0), candle(100.0, 7.0)];
        let obv = calculate_obv(&candles);
        assert_eq!(obv, vec![Some(Decimal::ZERO), Some(Decimal::ZERO)]);
    }
}
