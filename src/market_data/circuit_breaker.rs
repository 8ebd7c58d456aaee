// =============================================================================
// Circuit breaker for exchange endpoints
// =============================================================================
//
// Closed -> Open after N consecutive failures; Open calls fail fast without
// reaching the network; after a cooldown window a single Half-Open probe is
// let through and either closes the breaker or re-opens it with a backed-off
// cooldown. Distinct from rate-limit bookkeeping, which only throttles the
// request rate and never refuses a call outright.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks failures for one named endpoint (e.g. `"ticker:BTCUSDT"`).
pub struct CircuitBreaker {
    failure_threshold: u32,
    base_cooldown_secs: u64,
    consecutive_failures: AtomicU32,
    opened_at: AtomicU64,
    cooldown_secs: AtomicU64,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, base_cooldown_secs: u64) -> Self {
        Self {
            failure_threshold,
            base_cooldown_secs,
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            cooldown_secs: AtomicU64::new(base_cooldown_secs),
            state: RwLock::new(BreakerState::Closed),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    /// Whether a call is currently permitted to reach the network. Moves
    /// Open -> HalfOpen once the cooldown window has elapsed.
    pub fn allow(&self) -> bool {
        let state = *self.state.read();
        match state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooldown = self.cooldown_secs.load(Ordering::Relaxed);
                if Self::now_secs().saturating_sub(self.opened_at.load(Ordering::Relaxed)) >= cooldown {
                    *self.state.write() = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.cooldown_secs.store(self.base_cooldown_secs, Ordering::Relaxed);
        *self.state.write() = BreakerState::Closed;
    }

    pub fn record_failure(&self) {
        let was_half_open = *self.state.read() == BreakerState::HalfOpen;
        if was_half_open {
            // Failed probe: re-open with a longer cooldown.
            let doubled = self.cooldown_secs.load(Ordering::Relaxed) * 2;
            self.cooldown_secs.store(doubled.max(self.base_cooldown_secs), Ordering::Relaxed);
            self.opened_at.store(Self::now_secs(), Ordering::Relaxed);
            *self.state.write() = BreakerState::Open;
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            self.opened_at.store(Self::now_secs(), Ordering::Relaxed);
            *self.state.write() = BreakerState::Open;
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.state.read()
    }
}
