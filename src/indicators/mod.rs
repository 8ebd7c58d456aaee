// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free functions over candle/price series. Every public
// function returns a series the same length as its input, with leading
// `None` during warmup. Nothing in this module substitutes a default
// numeric constant for a value that is not yet available — the historical
// "RSI=50 when undefined" bug class must not recur. Callers that need a
// single current value use `latest_valid`, which walks backward for the
// last non-`None` entry and otherwise returns `None`.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod vwap;

use rust_decimal::Decimal;

/// Walk a same-length-as-input series backward for the last non-`None`
/// value. Returns `None` if the whole series is `None` (P7).
pub fn latest_valid(series: &[Option<Decimal>]) -> Option<Decimal> {
    series.iter().rev().find_map(|v| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn latest_valid_empty() {
        assert_eq!(latest_valid(&[]), None);
    }

    #[test]
    fn latest_valid_all_none() {
        assert_eq!(latest_valid(&[None, None, None]), None);
    }

    #[test]
    fn latest_valid_trailing_none() {
        let series = vec![None, Some(dec!(1.0)), Some(dec!(2.0)), None, None];
        assert_eq!(latest_valid(&series), Some(dec!(2.0)));
    }

    #[test]
    fn latest_valid_last_element() {
        let series = vec![None, Some(dec!(1.0)), Some(dec!(3.5))];
        assert_eq!(latest_valid(&series), Some(dec!(3.5)));
    }
}
