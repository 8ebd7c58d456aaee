// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first
//          `period` gains / losses.
// Step 3 — Apply Wilder's exponential smoothing.
// Step 4 — RS = avg_gain / avg_loss; RSI = 100 - 100 / (1 + RS).
//
// A symbol with no movement at all has no defined RSI; this implementation
// leaves it `None` rather than substituting the historical `rsi or 50`
// default. A series with only gains is clamped to 100.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Compute the RSI series for `closes` over `period`. Output is the same
/// length as `closes`.
pub fn calculate_rsi(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let deltas: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_dec = Decimal::from(period as u64);

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(g, l), &d| {
            if d > Decimal::ZERO {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let mut avg_gain = sum_gain / period_dec;
    let mut avg_loss = sum_loss / period_dec;

    // deltas[period - 1] corresponds to closes[period]; RSI is first
    // defined there.
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period..deltas.len() {
        let delta = deltas[i];
        let gain = if delta > Decimal::ZERO { delta } else { Decimal::ZERO };
        let loss = if delta < Decimal::ZERO { delta.abs() } else { Decimal::ZERO };

        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;

        out[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

/// If both averages are zero there has been no movement at all — the RSI
/// is genuinely undefined, not 50. Only an all-gains run is clamped.
fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Option<Decimal> {
    if avg_loss.is_zero() && avg_gain.is_zero() {
        None
    } else if avg_loss.is_zero() {
        Some(dec!(100))
    } else {
        let rs = avg_gain / avg_loss;
        Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::latest_valid;

    #[test]
    fn rsi_empty_input() {
        assert!(calculate_rsi(&[], 14).is_empty());
    }

    #[test]
    fn rsi_insufficient_data() {
        let closes: Vec<Decimal> = (1..=14).map(Decimal::from).collect();
        assert!(calculate_rsi(&closes, 14).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_all_gains() {
        let closes: Vec<Decimal> = (1..=30).map(Decimal::from).collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(latest_valid(&series), Some(dec!(100)));
    }

    #[test]
    fn rsi_all_losses() {
        let closes: Vec<Decimal> = (1..=30).rev().map(Decimal::from).collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(latest_valid(&series), Some(Decimal::ZERO));
    }

    #[test]
    fn rsi_flat_market_is_none() {
        let closes = vec![dec!(100); 30];
        let series = calculate_rsi(&closes, 14);
        assert!(series.iter().all(Option::is_none));
    }

    #[test]
    fn rsi_range_check() {
        let closes: Vec<Decimal> = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ]
        .iter()
        .map(|v| Decimal::try_from(*v).unwrap())
        .collect();
        let series = calculate_rsi(&closes, 14);
        for v in series.into_iter().flatten() {
            assert!(v >= Decimal::ZERO && v <= dec!(100));
        }
    }
}
