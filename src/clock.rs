use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Extra time granted on top of the configured length when a round starts.
pub const START_GRACE: Duration = Duration::from_millis(100);

/// One player's chess clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Signed so an overdrawn clock stays visible.
    remain_ms: i64,
    started_at: Instant,
    running: bool,
}

impl Clock {
    pub fn new(length_ms: u64, now: Instant) -> Self {
        let budget = length_ms.saturating_add(millis(START_GRACE));
        Clock {
            remain_ms: i64::try_from(budget).unwrap_or(i64::MAX),
            started_at: now,
            running: false,
        }
    }

    #[cfg(test)]
    pub fn remain_ms(&self) -> i64 {
        self.remain_ms
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Time left before this clock runs out, for arming the timeout.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.remain_ms).unwrap_or(0))
    }

    /// Stops the clock, charging the time since it last resumed minus `bonus`.
    pub fn pause(&mut self, bonus_ms: u64, now: Instant) {
        let elapsed = millis(now.saturating_duration_since(self.started_at));
        self.remain_ms = self
            .remain_ms
            .saturating_sub(i64::try_from(elapsed).unwrap_or(i64::MAX))
            .saturating_add(i64::try_from(bonus_ms).unwrap_or(i64::MAX));
        self.running = false;
    }

    pub fn resume(&mut self, now: Instant) {
        self.started_at = now;
        self.running = true;
    }

    pub fn view(&self) -> ClockView {
        ClockView {
            remain_time: self.remain_ms,
            running: self.running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockView {
    pub remain_time: i64,
    pub running: bool,
}

/// Pauses the mover's clock (crediting `bonus_ms`) and starts the opponent's.
pub fn switch_timers(active: &mut Clock, other: &mut Clock, bonus_ms: u64, now: Instant) {
    active.pause(bonus_ms, now);
    other.resume(now);
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
