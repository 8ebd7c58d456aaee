// =============================================================================
// RiskGate — stateless validation and position sizing
// =============================================================================
//
// Every check is a pure function of its inputs; nothing here reads or writes
// a Store. The Engine calls `validate` after the oracle proposes an entry and
// before handing it to the TradeExecutor.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{Bot, Decision, Side, Signal};

pub struct Portfolio {
    pub capital: Decimal,
    pub equity: Decimal,
    pub invested: Decimal,
    pub trades_today: u32,
}

/// Runs the six ordered checks from the risk policy. Returns `Ok(())` if the
/// decision passes every gate, or `Err(reason)` for the first one it fails.
pub fn validate(bot: &Bot, portfolio: &Portfolio, decision: &Decision, current_price: Decimal) -> Result<(), String> {
    if decision.signal != Signal::Entry {
        return Ok(());
    }

    // 1. size_pct in (0, max_position_pct]
    let max_position_pct = bot.risk_params.max_position_pct / Decimal::ONE_HUNDRED;
    if decision.size_pct <= Decimal::ZERO || decision.size_pct > max_position_pct {
        return Err(format!("size_pct {} out of band (0, {}]", decision.size_pct, max_position_pct));
    }

    // 2. exposure ceiling
    let entry_price = decision.entry_price.unwrap_or(current_price);
    let notional = size_for(portfolio.capital, decision.size_pct, decision.confidence);
    let max_exposure = portfolio.capital * (bot.risk_params.max_exposure_pct / Decimal::ONE_HUNDRED);
    if portfolio.invested + notional > max_exposure {
        return Err(format!("exposure {} would exceed ceiling {}", portfolio.invested + notional, max_exposure));
    }

    // 3. reward/risk geometry
    let side = decision.side.ok_or("entry decision missing side")?;
    let stop_loss = decision.stop_loss.ok_or("entry decision missing stop_loss")?;
    let profit_target = decision.profit_target.ok_or("entry decision missing profit_target")?;

    let (risk, reward) = match side {
        Side::Long => (entry_price - stop_loss, profit_target - entry_price),
        Side::Short => (stop_loss - entry_price, entry_price - profit_target),
    };
    if risk <= Decimal::ZERO || reward <= Decimal::ZERO {
        return Err("stop or target on wrong side of entry".to_string());
    }
    let rr = reward / risk;
    if rr < bot.risk_params.min_rr_ratio {
        return Err(format!("reward/risk {rr} below floor {}", bot.risk_params.min_rr_ratio));
    }

    // 4. drawdown ceiling
    if !bot.initial_capital.is_zero() {
        let drawdown_pct = (portfolio.equity - bot.initial_capital) / bot.initial_capital * Decimal::ONE_HUNDRED;
        if drawdown_pct <= -bot.risk_params.max_drawdown_pct {
            return Err(format!("drawdown {drawdown_pct}% breaches ceiling -{}%", bot.risk_params.max_drawdown_pct));
        }
    }

    // 5. trade frequency
    if portfolio.trades_today >= bot.risk_params.max_trades_per_day {
        return Err(format!("trade count {} reached daily cap {}", portfolio.trades_today, bot.risk_params.max_trades_per_day));
    }

    // 6. coherence
    if entry_price.is_zero() || stop_loss == entry_price || profit_target == entry_price {
        return Err("stop/entry/target are not distinct".to_string());
    }

    Ok(())
}

/// Deterministic, bounded position-sizing "confidence kicker".
/// notional = capital * size_pct * clamp(0.5 + confidence*0.7, 0.5, 1.2)
pub fn size_for(capital: Decimal, size_pct: Decimal, confidence: Decimal) -> Decimal {
    let kicker = (dec!(0.5) + confidence * dec!(0.7)).clamp(dec!(0.5), dec!(1.2));
    capital * size_pct * kicker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskParams;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn test_bot() -> Bot {
        Bot {
            id: Uuid::new_v4(),
            owner: "tester".into(),
            name: "test-bot".into(),
            model: "gpt-test".into(),
            symbols: vec!["BTCUSDT".into()],
            timeframe_short: "15m".into(),
            timeframe_long: "1h".into(),
            cycle_period_secs: 300,
            initial_capital: dec!(10000),
            capital: dec!(10000),
            risk_params: RiskParams {
                max_position_pct: dec!(20),
                max_exposure_pct: dec!(80),
                max_drawdown_pct: dec!(25),
                max_trades_per_day: 20,
                stop_loss_pct: dec!(2),
                take_profit_pct: dec!(4),
                min_rr_ratio: dec!(1.5),
            },
            status: crate::types::BotStatus::Active,
            paper_trading: true,
            close_positions_on_stop: false,
            entry_confidence_threshold: None,
        }
    }

    fn good_decision() -> Decision {
        Decision {
            symbol: "BTCUSDT".into(),
            signal: Signal::Entry,
            side: Some(Side::Long),
            confidence: dec!(0.7),
            size_pct: dec!(0.1),
            entry_price: Some(dec!(50000)),
            stop_loss: Some(dec!(49000)),
            profit_target: Some(dec!(52000)),
            invalidation_condition: String::new(),
            justification: String::new(),
        }
    }

    fn portfolio() -> Portfolio {
        Portfolio { capital: dec!(10000), equity: dec!(10000), invested: dec!(0), trades_today: 0 }
    }

    #[test]
    fn accepts_a_sound_entry() {
        let bot = test_bot();
        assert!(validate(&bot, &portfolio(), &good_decision(), dec!(50000)).is_ok());
    }

    #[test]
    fn rejects_size_pct_above_max_position_pct() {
        let bot = test_bot();
        let mut d = good_decision();
        d.size_pct = dec!(0.5);
        assert!(validate(&bot, &portfolio(), &d, dec!(50000)).is_err());
    }

    #[test]
    fn rejects_insufficient_reward_risk_ratio() {
        let bot = test_bot();
        let mut d = good_decision();
        d.profit_target = Some(dec!(50200)); // rr well below 1.5
        assert!(validate(&bot, &portfolio(), &d, dec!(50000)).is_err());
    }

    #[test]
    fn rejects_stop_on_wrong_side_of_entry() {
        let bot = test_bot();
        let mut d = good_decision();
        d.stop_loss = Some(dec!(51000)); // above entry for a long
        assert!(validate(&bot, &portfolio(), &d, dec!(50000)).is_err());
    }

    #[test]
    fn rejects_when_drawdown_breaches_ceiling() {
        let bot = test_bot();
        let mut p = portfolio();
        p.equity = dec!(7000); // -30% vs initial_capital, ceiling is 25%
        assert!(validate(&bot, &p, &good_decision(), dec!(50000)).is_err());
    }

    #[test]
    fn rejects_when_daily_trade_cap_reached() {
        let bot = test_bot();
        let mut p = portfolio();
        p.trades_today = 20;
        assert!(validate(&bot, &p, &good_decision(), dec!(50000)).is_err());
    }

    #[test]
    fn hold_and_exit_decisions_skip_entry_checks() {
        let bot = test_bot();
        let mut d = good_decision();
        d.signal = Signal::Hold;
        d.size_pct = dec!(99); // would fail an entry check
        assert!(validate(&bot, &portfolio(), &d, dec!(50000)).is_ok());
    }

    #[test]
    fn size_for_kicker_is_bounded() {
        let low = size_for(dec!(10000), dec!(0.1), Decimal::ZERO);
        let high = size_for(dec!(10000), dec!(0.1), Decimal::ONE);
        assert_eq!(low, dec!(10000) * dec!(0.1) * dec!(0.5));
        assert_eq!(high, dec!(10000) * dec!(0.1) * dec!(1.2));
    }

    // B1: size_pct at exactly max_position_pct is accepted; one tick over is rejected.
    #[test]
    fn size_pct_at_ceiling_accepted_above_it_rejected() {
        let bot = test_bot(); // max_position_pct = 20%
        let mut at_ceiling = good_decision();
        at_ceiling.size_pct = dec!(0.20);
        assert!(validate(&bot, &portfolio(), &at_ceiling, dec!(50000)).is_ok());

        let mut over_ceiling = good_decision();
        over_ceiling.size_pct = dec!(0.2001);
        assert!(validate(&bot, &portfolio(), &over_ceiling, dec!(50000)).is_err());
    }

    // B2: a stop-loss equal to entry price is rejected (zero risk, undefined R/R).
    #[test]
    fn stop_loss_equal_to_entry_is_rejected() {
        let bot = test_bot();
        let mut d = good_decision();
        d.entry_price = Some(dec!(50000));
        d.stop_loss = Some(dec!(50000));
        assert!(validate(&bot, &portfolio(), &d, dec!(50000)).is_err());
    }

    #[test]
    fn drawdown_exactly_at_ceiling_is_rejected() {
        let bot = test_bot(); // max_drawdown_pct = 25
        let mut p = portfolio();
        p.equity = dec!(7500); // exactly -25% vs initial_capital = 10000
        assert!(validate(&bot, &p, &good_decision(), dec!(50000)).is_err());
    }

    proptest! {
        // P4: the gate never admits a decision whose notional exceeds
        // capital * max_position_pct, nor one whose reward/risk ratio sits
        // below the configured floor.
        #[test]
        fn gate_never_admits_oversized_or_sub_floor_entries(
            size_pct in 0.0001f64..2.0,
            confidence in 0.0f64..1.0,
            risk_pts in 1.0f64..5000.0,
            reward_pts in 1.0f64..5000.0,
        ) {
            let bot = test_bot();
            let entry_price = dec!(50000);
            let size_pct = Decimal::try_from(size_pct).unwrap();
            let confidence = Decimal::try_from(confidence).unwrap();
            let stop_loss = entry_price - Decimal::try_from(risk_pts).unwrap();
            let profit_target = entry_price + Decimal::try_from(reward_pts).unwrap();

            let mut d = good_decision();
            d.size_pct = size_pct;
            d.confidence = confidence;
            d.stop_loss = Some(stop_loss);
            d.profit_target = Some(profit_target);

            let result = validate(&bot, &portfolio(), &d, entry_price);

            let max_position_pct = bot.risk_params.max_position_pct / Decimal::ONE_HUNDRED;
            let rr = (profit_target - entry_price) / (entry_price - stop_loss);

            if result.is_ok() {
                prop_assert!(size_pct <= max_position_pct);
                prop_assert!(rr >= bot.risk_params.min_rr_ratio);
            }
        }
    }
}
