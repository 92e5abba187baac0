//! Locally-ticking lot countdown, re-anchored from authoritative values.
//!
//! The timer only ever counts *down* from the last value the server pushed;
//! it never extends itself. Expiry is a signal the session controller may act
//! on (show "time up", await the authoritative rotation event) — never an
//! authority to close the lot locally.

use std::time::{Duration, Instant};

/// Outcome of advancing the countdown by wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    /// At least one whole second elapsed; carries the new remaining value.
    Ticked(u32),
    /// The countdown reached zero. Emitted exactly once per anchor.
    Expired,
}

/// A drift-compensating one-shot countdown.
///
/// `tick` consumes *whole elapsed seconds* since the last observation rather
/// than assuming exactly one second passed, so a suspended or starved task
/// snaps the remaining value down correctly on resume instead of drifting.
#[derive(Debug)]
pub struct CountdownTimer {
    remaining: u32,
    /// Wall-clock position of the last consumed second. `None` = stopped.
    anchor: Option<Instant>,
}

impl CountdownTimer {
    /// A stopped timer with nothing remaining.
    pub fn stopped() -> Self {
        Self {
            remaining: 0,
            anchor: None,
        }
    }

    /// A running timer anchored at `now` with `seconds` remaining.
    pub fn anchored(seconds: u32, now: Instant) -> Self {
        Self {
            remaining: seconds,
            anchor: Some(now),
        }
    }

    /// Seconds remaining, `>= 0` by construction.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Whether the timer is currently counting down.
    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    /// Replace the remaining value outright with an authoritative one and
    /// resume ticking (also restarts a timer stopped by expiry).
    ///
    /// Never interpolates or adds: after `reset(s, now)` the next whole-second
    /// tick observes `s - 1`.
    pub fn reset(&mut self, new_seconds: u32, now: Instant) {
        self.remaining = new_seconds;
        self.anchor = Some(now);
    }

    /// Stop the countdown without emitting anything. Used on lot rotation
    /// while awaiting the next authoritative `timerReset`.
    pub fn stop(&mut self) {
        self.anchor = None;
    }

    /// Advance the countdown to `now`.
    ///
    /// Consumes every whole second elapsed since the anchor. Returns `None`
    /// when stopped or when less than a second has passed; returns
    /// [`TimerSignal::Expired`] exactly once when the value reaches zero,
    /// after which the timer stops until [`reset`](Self::reset).
    pub fn tick(&mut self, now: Instant) -> Option<TimerSignal> {
        let anchor = self.anchor?;
        let whole = now.saturating_duration_since(anchor).as_secs();
        if whole == 0 {
            return None;
        }
        // Carry the sub-second remainder forward so ticks don't drift.
        self.anchor = Some(anchor + Duration::from_secs(whole));

        let decrement = u32::try_from(whole).unwrap_or(u32::MAX);
        self.remaining = self.remaining.saturating_sub(decrement);
        if self.remaining == 0 {
            self.anchor = None;
            Some(TimerSignal::Expired)
        } else {
            Some(TimerSignal::Ticked(self.remaining))
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn ticks_once_per_whole_second() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(30, start);

        assert_eq!(timer.tick(start + Duration::from_millis(400)), None);
        assert_eq!(timer.tick(start + secs(1)), Some(TimerSignal::Ticked(29)));
        assert_eq!(timer.remaining(), 29);
    }

    #[test]
    fn snaps_down_after_suspension() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(30, start);

        // Task was suspended for 3 seconds: one observation consumes all of them.
        assert_eq!(timer.tick(start + secs(3)), Some(TimerSignal::Ticked(27)));
    }

    #[test]
    fn sub_second_remainder_carries_forward() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(10, start);

        // 1.7s elapsed: consume 1s, keep 0.7s of credit.
        assert_eq!(
            timer.tick(start + Duration::from_millis(1_700)),
            Some(TimerSignal::Ticked(9))
        );
        // 0.4s later (2.1s total): the carried remainder crosses the boundary.
        assert_eq!(
            timer.tick(start + Duration::from_millis(2_100)),
            Some(TimerSignal::Ticked(8))
        );
    }

    #[test]
    fn expires_exactly_once_and_stops() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(2, start);

        assert_eq!(timer.tick(start + secs(1)), Some(TimerSignal::Ticked(1)));
        assert_eq!(timer.tick(start + secs(2)), Some(TimerSignal::Expired));
        assert!(!timer.is_running());
        // Stopped: further observations emit nothing.
        assert_eq!(timer.tick(start + secs(60)), None);
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn overshoot_expires_without_underflow() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(5, start);

        assert_eq!(timer.tick(start + secs(120)), Some(TimerSignal::Expired));
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn reset_replaces_outright_mid_tick() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(30, start);
        assert_eq!(timer.tick(start + secs(1)), Some(TimerSignal::Ticked(29)));

        // Authoritative reset to 60 arrives mid-tick.
        let reset_at = start + Duration::from_millis(1_500);
        timer.reset(60, reset_at);
        assert_eq!(timer.remaining(), 60);

        // The very next tick yields 59 — not 29, not 61.
        assert_eq!(
            timer.tick(reset_at + secs(1)),
            Some(TimerSignal::Ticked(59))
        );
    }

    #[test]
    fn reset_resumes_after_expiry() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(1, start);
        assert_eq!(timer.tick(start + secs(1)), Some(TimerSignal::Expired));

        let resumed = start + secs(10);
        timer.reset(15, resumed);
        assert!(timer.is_running());
        assert_eq!(timer.tick(resumed + secs(1)), Some(TimerSignal::Ticked(14)));
    }

    #[test]
    fn stop_silences_the_timer() {
        let start = Instant::now();
        let mut timer = CountdownTimer::anchored(30, start);
        timer.stop();
        assert_eq!(timer.tick(start + secs(5)), None);
        assert_eq!(timer.remaining(), 30);
    }
}
