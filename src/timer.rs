//! Countdown for the counting phase.
//!
//! [`SurveyTimer`] is plain state: it only changes when told to tick. The
//! one-second cadence comes from a [`Ticker`], a tokio task that is aborted
//! as soon as the handle is stopped or dropped, so no tick outlives the
//! survey that started it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// Upper bound on a declared duration so `minutes * 60` cannot overflow.
const MAX_DURATION_MINUTES: i64 = (u32::MAX / 60) as i64;

/// Clamp a requested duration to at least one minute.
pub fn clamp_duration(minutes: i64) -> u32 {
    minutes.clamp(1, MAX_DURATION_MINUTES) as u32
}

/// Countdown bounding one counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurveyTimer {
    duration_minutes: u32,
    remaining_secs: u32,
    expired: bool,
}

impl SurveyTimer {
    /// Start a countdown of `duration_minutes` (clamped to at least 1).
    pub fn start(duration_minutes: i64) -> Self {
        let duration_minutes = clamp_duration(duration_minutes);
        Self {
            duration_minutes,
            remaining_secs: duration_minutes * 60,
            expired: false,
        }
    }

    /// Advance by one second.
    ///
    /// Returns `true` on the tick that reaches zero and never again.
    pub fn tick(&mut self) -> bool {
        if self.expired {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.expired = true;
            return true;
        }
        false
    }

    /// Force the countdown to zero.
    ///
    /// Returns `true` if this call fired expiry; `false` if it had already
    /// expired.
    pub fn finish_early(&mut self) -> bool {
        if self.expired {
            return false;
        }
        self.remaining_secs = 0;
        self.expired = true;
        true
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Remaining time as `MM:SS`.
    pub fn format_remaining(&self) -> String {
        format_clock(self.remaining_secs)
    }
}

/// Format seconds as `MM:SS`; minutes are not wrapped at 60.
pub fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Repeating task that invokes a callback once per period.
///
/// The first call happens one full period after spawning. The task ends when
/// the callback returns `false`, when [`Ticker::stop`] is called, or when the
/// handle is dropped.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !on_tick() {
                    debug!("Ticker receiver gone, stopping");
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        // Drop aborts the task
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_start_sets_remaining() {
        let timer = SurveyTimer::start(3);
        assert_eq!(timer.remaining_secs(), 180);
        assert_eq!(timer.duration_minutes(), 3);
        assert!(!timer.is_expired());
    }

    #[test]
    fn test_start_clamps_invalid_duration() {
        assert_eq!(SurveyTimer::start(0).remaining_secs(), 60);
        assert_eq!(SurveyTimer::start(-5).duration_minutes(), 1);
    }

    #[test]
    fn test_expiry_fires_exactly_once() {
        let mut timer = SurveyTimer::start(3);
        let mut fired = 0;
        for _ in 0..180 {
            if timer.tick() {
                fired += 1;
            }
        }
        assert_eq!(timer.remaining_secs(), 0);
        assert_eq!(fired, 1);

        // Further ticks are inert
        for _ in 0..10 {
            assert!(!timer.tick());
        }
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn test_finish_early_is_idempotent() {
        let mut timer = SurveyTimer::start(2);
        timer.tick();

        assert!(timer.finish_early());
        assert_eq!(timer.remaining_secs(), 0);
        assert!(!timer.finish_early());
        assert!(!timer.tick());
    }

    #[test]
    fn test_finish_early_after_natural_expiry() {
        let mut timer = SurveyTimer::start(1);
        for _ in 0..60 {
            timer.tick();
        }
        assert!(timer.is_expired());
        assert!(!timer.finish_early());
    }

    #[test]
    fn test_format_remaining() {
        let mut timer = SurveyTimer::start(2);
        assert_eq!(timer.format_remaining(), "02:00");
        timer.tick();
        assert_eq!(timer.format_remaining(), "01:59");
        assert_eq!(format_clock(3 * 3600), "180:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_once_per_period() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        let ticker = Ticker::spawn(Duration::from_secs(1), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        ticker.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_ends_when_callback_declines() {
        let ticker = Ticker::spawn(Duration::from_secs(1), || false);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokio::task::yield_now().await;
        assert!(ticker.is_finished());
    }
}
