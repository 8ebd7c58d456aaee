// =============================================================================
// PositionStore — exit-trigger policy and position lifecycle
// =============================================================================
//
// The exit-trigger policy is authoritative and deterministic: the Engine
// evaluates it every cycle, strictly before consulting the oracle, so a
// stop-loss or take-profit is never missed waiting on an LLM round trip.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::types::{ExitReason, Position, Side};

/// Slippage buffer applied to SL/TP triggers to avoid chattering around the
/// exact stop price.
const SLIPPAGE: Decimal = dec!(0.005);

pub fn new_position(
    bot_id: Uuid,
    symbol: String,
    side: Side,
    quantity: Decimal,
    entry_price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    leverage: Decimal,
    now: DateTime<Utc>,
) -> Position {
    Position {
        id: Uuid::new_v4(),
        bot_id,
        symbol,
        side,
        quantity,
        entry_price,
        current_price: entry_price,
        stop_loss,
        take_profit,
        leverage,
        entry_time: now,
        exit_time: None,
        exit_price: None,
        status: crate::types::PositionStatus::Open,
        realized_pnl: None,
        exit_reason: None,
    }
}

pub fn mark(position: &mut Position, current_price: Decimal) {
    position.current_price = current_price;
}

/// Evaluates the five deterministic exit triggers in order and returns the
/// first that fires, or `None` if the position should stay open.
pub fn check_exit_triggers(position: &Position, now: DateTime<Utc>) -> Option<ExitReason> {
    let p = position.current_price;
    let sl = position.stop_loss;
    let tp = position.take_profit;

    let sl_hit = match position.side {
        Side::Long => p <= sl * (Decimal::ONE + SLIPPAGE),
        Side::Short => p >= sl * (Decimal::ONE - SLIPPAGE),
    };
    if sl_hit {
        return Some(ExitReason::StopLoss);
    }

    let tp_hit = match position.side {
        Side::Long => p >= tp * (Decimal::ONE - SLIPPAGE),
        Side::Short => p <= tp * (Decimal::ONE + SLIPPAGE),
    };
    if tp_hit {
        return Some(ExitReason::TakeProfit);
    }

    let pnl_pct = position.pnl_pct();

    if pnl_pct <= dec!(-2.5) {
        return Some(ExitReason::LargeLoss);
    }

    let hold = position.hold_duration(now);
    if hold > chrono::Duration::hours(24) && pnl_pct < dec!(-1.0) {
        return Some(ExitReason::TimeoutLoss);
    }

    if hold > chrono::Duration::hours(12) && pnl_pct.abs() < dec!(0.5) {
        return Some(ExitReason::Stagnation);
    }

    None
}

/// Closes a position for the given `reason` at `exit_price`, computing and
/// freezing its realized P&L. A position transitions open -> closed exactly
/// once; calling this twice on an already-closed position is a caller bug.
pub fn close(position: &mut Position, exit_price: Decimal, exit_time: DateTime<Utc>, reason: ExitReason) -> Decimal {
    let realized = match position.side {
        Side::Long => (exit_price - position.entry_price) * position.quantity,
        Side::Short => (position.entry_price - exit_price) * position.quantity,
    };
    position.status = crate::types::PositionStatus::Closed;
    position.exit_price = Some(exit_price);
    position.exit_time = Some(exit_time);
    position.realized_pnl = Some(realized);
    position.exit_reason = Some(reason);
    realized
}

pub fn total_exposure(open_positions: &[Position]) -> Decimal {
    open_positions.iter().map(Position::notional).sum()
}

pub fn realized_pnl_today(closed_positions: &[Position], today: DateTime<Utc>) -> Decimal {
    closed_positions
        .iter()
        .filter(|p| p.exit_time.map(|t| t.date_naive() == today.date_naive()).unwrap_or(false))
        .filter_map(|p| p.realized_pnl)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn long_position(entry: Decimal, sl: Decimal, tp: Decimal, current: Decimal, age: Duration) -> Position {
        let mut pos = new_position(Uuid::new_v4(), "BTCUSDT".into(), Side::Long, dec!(1), entry, sl, tp, dec!(1), Utc::now() - age);
        pos.current_price = current;
        pos
    }

    #[test]
    fn stop_loss_fires_with_slippage_buffer() {
        let pos = long_position(dec!(50000), dec!(49000), dec!(52000), dec!(49200), Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_fires_with_slippage_buffer() {
        let pos = long_position(dec!(50000), dec!(49000), dec!(52000), dec!(51800), Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn large_loss_fires_before_timeout_and_stagnation() {
        let pos = long_position(dec!(50000), dec!(40000), dec!(60000), dec!(48700), Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), Some(ExitReason::LargeLoss));
    }

    #[test]
    fn timeout_loss_requires_both_age_and_loss() {
        let stale_but_flat = long_position(dec!(50000), dec!(40000), dec!(60000), dec!(50000), Duration::hours(30));
        assert_eq!(check_exit_triggers(&stale_but_flat, Utc::now()), None);

        let stale_and_losing = long_position(dec!(50000), dec!(40000), dec!(60000), dec!(49400), Duration::hours(30));
        assert_eq!(check_exit_triggers(&stale_and_losing, Utc::now()), Some(ExitReason::TimeoutLoss));
    }

    #[test]
    fn stagnation_fires_on_long_flat_hold() {
        let pos = long_position(dec!(50000), dec!(40000), dec!(60000), dec!(50050), Duration::hours(13));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), Some(ExitReason::Stagnation));
    }

    // B3: at the stop threshold exactly (with the slippage buffer applied)
    // the trigger fires; one tick above that threshold it does not.
    #[test]
    fn stop_loss_fires_exactly_at_slippage_boundary_not_one_tick_above() {
        let sl = dec!(49000);
        let boundary = sl * (Decimal::ONE + SLIPPAGE); // 49245
        let pos = long_position(dec!(50000), sl, dec!(52000), boundary, Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), Some(ExitReason::StopLoss));

        let one_tick_above = boundary + dec!(0.01);
        let pos = long_position(dec!(50000), sl, dec!(52000), one_tick_above, Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), None);
    }

    #[test]
    fn no_trigger_fires_for_a_fresh_healthy_position() {
        let pos = long_position(dec!(50000), dec!(49000), dec!(52000), dec!(50500), Duration::minutes(5));
        assert_eq!(check_exit_triggers(&pos, Utc::now()), None);
    }

    #[test]
    fn close_is_idempotent_in_state_not_pnl() {
        let mut pos = long_position(dec!(50000), dec!(49000), dec!(52000), dec!(51000), Duration::minutes(5));
        let realized = close(&mut pos, dec!(51000), Utc::now(), ExitReason::TakeProfit);
        assert_eq!(realized, dec!(1000));
        assert_eq!(pos.status, crate::types::PositionStatus::Closed);
        assert_eq!(pos.realized_pnl, Some(dec!(1000)));
    }

    #[test]
    fn total_exposure_sums_notional() {
        let a = long_position(dec!(100), dec!(90), dec!(120), dec!(100), Duration::minutes(1));
        let b = long_position(dec!(200), dec!(190), dec!(220), dec!(200), Duration::minutes(1));
        assert_eq!(total_exposure(&[a, b]), dec!(300));
    }
}
