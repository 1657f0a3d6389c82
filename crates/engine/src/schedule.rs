//! Cancellable timing primitives for the producer and rotation loops
//!
//! Loops sleep on a [`CancellationToken`] instead of the thread clock, so a
//! stop request wakes them immediately rather than at the next poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Shared stop signal.
///
/// Clones observe the same signal. Once cancelled, a token stays cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancellationToken {
    /// Create an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep for `timeout` or until cancelled.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self.inner.cond.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            self.inner.cond.wait(&mut cancelled);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Rejected `HH:MM` trigger time.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected HH:MM (00:00-23:59), got '{0}'")]
pub struct InvalidTriggerTime(pub String);

/// Once-a-day calendar trigger at a local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    at: NaiveTime,
}

impl DailyTrigger {
    /// Trigger at `at` every day.
    pub fn new(at: NaiveTime) -> Self {
        DailyTrigger { at }
    }

    /// Parse an `HH:MM` time.
    pub fn parse(text: &str) -> Result<Self, InvalidTriggerTime> {
        let text = text.trim();
        let (hours, minutes) = text
            .split_once(':')
            .ok_or_else(|| InvalidTriggerTime(text.to_string()))?;
        if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
            return Err(InvalidTriggerTime(text.to_string()));
        }
        let hours: u32 = hours
            .parse()
            .map_err(|_| InvalidTriggerTime(text.to_string()))?;
        let minutes: u32 = minutes
            .parse()
            .map_err(|_| InvalidTriggerTime(text.to_string()))?;
        NaiveTime::from_hms_opt(hours, minutes, 0)
            .map(DailyTrigger::new)
            .ok_or_else(|| InvalidTriggerTime(text.to_string()))
    }

    /// Configured time of day
    pub fn time(&self) -> NaiveTime {
        self.at
    }

    /// First firing strictly after `now`: today at the trigger time, or
    /// tomorrow if that has already passed.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.at);
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }
}

impl std::fmt::Display for DailyTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.at.format("%H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::thread;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parse_accepts_hh_mm() {
        assert_eq!(DailyTrigger::parse("00:00").unwrap().time(), NaiveTime::MIN);
        assert_eq!(
            DailyTrigger::parse("7:05").unwrap().time(),
            NaiveTime::from_hms_opt(7, 5, 0).unwrap()
        );
        assert_eq!(DailyTrigger::parse(" 23:59 ").unwrap().to_string(), "23:59");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "24:00", "12:60", "12", "12:5", "ab:cd", "12:00:00"] {
            assert!(DailyTrigger::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn next_after_today_when_still_ahead() {
        let trigger = DailyTrigger::parse("03:00").unwrap();
        assert_eq!(trigger.next_after(at(1, 0)), at(3, 0));
    }

    #[test]
    fn next_after_tomorrow_when_passed_or_equal() {
        let trigger = DailyTrigger::parse("03:00").unwrap();
        let tomorrow = at(3, 0) + ChronoDuration::days(1);
        assert_eq!(trigger.next_after(at(3, 0)), tomorrow);
        assert_eq!(trigger.next_after(at(22, 15)), tomorrow);
    }

    #[test]
    fn wait_timeout_elapses_without_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(30)));
        token.wait();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
