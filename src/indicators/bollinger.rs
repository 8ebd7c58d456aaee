// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band is the SMA; upper/lower bands are `middle +/- num_std * sigma`.
// `rust_decimal` has no native sqrt, so the standard deviation is computed
// via a fixed-point Newton-Raphson iteration on the variance.

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: Vec<Option<Decimal>>,
    pub middle: Vec<Option<Decimal>>,
    pub lower: Vec<Option<Decimal>>,
}

pub fn calculate_bollinger(closes: &[Decimal], period: usize, num_std: Decimal) -> BollingerBands {
    let n = closes.len();
    let mut upper = vec![None; n];
    let mut middle = vec![None; n];
    let mut lower = vec![None; n];

    if period == 0 || n < period {
        return BollingerBands { upper, middle, lower };
    }

    let period_dec = Decimal::from(period as u64);
    for i in (period - 1)..n {
        let window = &closes[i + 1 - period..=i];
        let sum: Decimal = window.iter().sum();
        let mean = sum / period_dec;

        let variance: Decimal =
            window.iter().map(|x| (*x - mean) * (*x - mean)).sum::<Decimal>() / period_dec;
        let std_dev = decimal_sqrt(variance);

        middle[i] = Some(mean);
        upper[i] = Some(mean + num_std * std_dev);
        lower[i] = Some(mean - num_std * std_dev);
    }

    BollingerBands { upper, middle, lower }
}

/// Newton-Raphson square root for non-negative decimals.
fn decimal_sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut guess = value / Decimal::TWO;
    if guess.is_zero() {
        guess = value;
    }
    for _ in 0..40 {
        let next = (guess + value / guess) / Decimal::TWO;
        if (next - guess).abs() < Decimal::new(1, 12) {
            return next;
        }
        guess = next;
    }
    guess
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bollinger_insufficient_data() {
        let closes = vec![dec!(1), dec!(2), dec!(3)];
        let bb = calculate_bollinger(&closes, 20, dec!(2));
        assert!(bb.middle.iter().all(Option::is_none));
    }

    #[test]
    fn bollinger_flat_width_zero() {
        let closes = vec![dec!(100); 20];
        let bb = calculate_bollinger(&closes, 20, dec!(2));
        let last = bb.upper.len() - 1;
        assert_eq!(bb.upper[last], Some(dec!(100)));
        assert_eq!(bb.lower[last], Some(dec!(100)));
    }

    #[test]
    fn bollinger_ordering() {
        let closes: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        let bb = calculate_bollinger(&closes, 20, dec!(2));
        let last = bb.upper.len() - 1;
        assert!(bb.upper[last].unwrap() > bb.middle[last].unwrap());
        assert!(bb.lower[last].unwrap() < bb.middle[last].unwrap());
    }

    #[test]
    fn decimal_sqrt_matches_known_values() {
        assert!((decimal_sqrt(dec!(4)) - dec!(2)).abs() < dec!(0.0001));
        assert!((decimal_sqrt(dec!(2)) - dec!(1.41421356)).abs() < dec!(0.0001));
        assert_eq!(decimal_sqrt(Decimal::ZERO), Decimal::ZERO);
    }
}
