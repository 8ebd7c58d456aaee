// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow); signal line = EMA(MACD line, signal).
// Both outputs are the same length as the input; warmup is `None`.

use rust_decimal::Decimal;

use super::ema::calculate_ema;

pub struct MacdResult {
    pub macd: Vec<Option<Decimal>>,
    pub signal: Vec<Option<Decimal>>,
}

pub fn calculate_macd(
    closes: &[Decimal],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdResult {
    let n = closes.len();
    let ema_fast = calculate_ema(closes, fast_period);
    let ema_slow = calculate_ema(closes, slow_period);

    let mut macd_line = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (ema_fast[i], ema_slow[i]) {
            macd_line[i] = Some(f - s);
        }
    }

    // Signal line is the EMA of the MACD line, computed only over the
    // contiguous defined tail (EMA over a `None`-prefixed series).
    let first_defined = macd_line.iter().position(Option::is_some);
    let mut signal_line = vec![None; n];
    if let Some(start) = first_defined {
        let defined: Vec<Decimal> = macd_line[start..].iter().map(|v| v.unwrap()).collect();
        let ema_of_macd = calculate_ema(&defined, signal_period);
        for (offset, v) in ema_of_macd.into_iter().enumerate() {
            signal_line[start + offset] = v;
        }
    }

    MacdResult { macd: macd_line, signal: signal_line }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_warmup_is_none() {
        let closes: Vec<Decimal> = (1..=50).map(Decimal::from).collect();
        let result = calculate_macd(&closes, 12, 26, 9);
        assert!(result.macd[0].is_none());
        assert!(result.macd.iter().any(Option::is_some));
        assert!(result.signal.iter().any(Option::is_some));
    }

    #[test]
    fn macd_insufficient_data_all_none() {
        let closes: Vec<Decimal> = (1..=5).map(Decimal::from).collect();
        let result = calculate_macd(&closes, 12, 26, 9);
        assert!(result.macd.iter().all(Option::is_none));
        assert!(result.signal.iter().all(Option::is_none));
    }
}
