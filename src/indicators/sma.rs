// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================

use rust_decimal::Decimal;

/// Compute the SMA series for `closes` over `period`. Output is the same
/// length as `closes`; the first `period - 1` entries are `None`.
pub fn calculate_sma(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let period_dec = Decimal::from(period as u64);
    for i in (period - 1)..closes.len() {
        let window = &closes[i + 1 - period..=i];
        let sum: Decimal = window.iter().sum();
        out[i] = Some(sum / period_dec);
    }
    out
}
