//! Time source used for lifecycle timestamps and shutdown timing.
//!
//! Production code uses [`SystemClock`]. Tests use [`FakeClock`], which only
//! moves when told to, so the shutdown escalation path can be exercised
//! without real delays.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration` of this clock's time.
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct FakeClockState {
    now: DateTime<Utc>,
    // Deadlines of sleepers not yet released by `advance`.
    pending: Vec<(u64, DateTime<Utc>)>,
    next_sleeper: u64,
    auto_advance: bool,
    total_slept: Duration,
}

/// Manually advanced clock.
///
/// In the default mode `sleep` blocks until another thread calls
/// [`FakeClock::advance`] far enough. In auto-advance mode `sleep` moves the
/// clock forward itself and returns at once, which suits single-threaded
/// tests.
#[derive(Debug)]
pub struct FakeClock {
    state: Mutex<FakeClockState>,
    cond: Condvar,
}

impl FakeClock {
    /// Create a blocking fake clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(FakeClockState {
                now: start,
                pending: Vec::new(),
                next_sleeper: 0,
                auto_advance: false,
                total_slept: Duration::ZERO,
            }),
            cond: Condvar::new(),
        }
    }

    /// Create a fake clock whose `sleep` advances time by itself.
    pub fn auto_advancing(start: DateTime<Utc>) -> Self {
        let clock = Self::new(start);
        clock.state.lock().auto_advance = true;
        clock
    }

    /// Move the clock forward, waking sleepers whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now += to_chrono(duration);
        let now = state.now;
        state.pending.retain(|(_, deadline)| *deadline > now);
        self.cond.notify_all();
    }

    /// Wait until at least `count` threads are blocked in `sleep`.
    ///
    /// A sleeper stops counting as soon as an `advance` passes its deadline,
    /// even before its thread has resumed.
    pub fn block_until(&self, count: usize) {
        let mut state = self.state.lock();
        while state.pending.len() < count {
            self.cond.wait(&mut state);
        }
    }

    /// Sum of all durations passed to `sleep`.
    pub fn total_slept(&self) -> Duration {
        self.state.lock().total_slept
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.total_slept += duration;
        if state.auto_advance {
            state.now += to_chrono(duration);
            return;
        }

        let deadline = state.now + to_chrono(duration);
        if deadline <= state.now {
            return;
        }
        let id = state.next_sleeper;
        state.next_sleeper += 1;
        state.pending.push((id, deadline));
        self.cond.notify_all();
        while state.pending.iter().any(|(pending, _)| *pending == id) {
            self.cond.wait(&mut state);
        }
    }
}

/// Convert a std duration, saturating at chrono's range.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Elapsed time between two instants of the same clock, zero if negative.
pub(crate) fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 5, 30, 20, 19, 0).unwrap()
    }

    #[test]
    fn test_advance_moves_now() {
        let clock = FakeClock::new(start());
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_auto_advance_sleep() {
        let clock = FakeClock::auto_advancing(start());
        clock.sleep(Duration::from_secs(5));
        clock.sleep(Duration::from_secs(5));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(10));
        assert_eq!(clock.total_slept(), Duration::from_secs(10));
    }

    #[test]
    fn test_blocking_sleep_wakes_on_advance() {
        let clock = Arc::new(FakeClock::new(start()));
        let sleeper = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                clock.sleep(Duration::from_secs(5));
                clock.now()
            })
        };

        clock.block_until(1);
        clock.advance(Duration::from_secs(3));
        clock.advance(Duration::from_secs(3));

        let woke_at = sleeper.join().unwrap();
        assert_eq!(woke_at, start() + chrono::Duration::seconds(6));
    }

    #[test]
    fn test_block_until_ignores_released_sleepers() {
        let clock = Arc::new(FakeClock::new(start()));
        let sleeper = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                let mut woke = Vec::new();
                for _ in 0..2 {
                    clock.sleep(Duration::from_secs(5));
                    woke.push(clock.now());
                }
                woke
            })
        };

        // Each round must wait for the next sleep, not the one just released.
        for _ in 0..2 {
            clock.block_until(1);
            clock.advance(Duration::from_secs(5));
        }

        let woke = sleeper.join().unwrap();
        assert_eq!(
            woke,
            vec![
                start() + chrono::Duration::seconds(5),
                start() + chrono::Duration::seconds(10)
            ]
        );
    }

    #[test]
    fn test_zero_sleep_returns_immediately() {
        let clock = FakeClock::new(start());
        clock.sleep(Duration::ZERO);
        assert_eq!(clock.now(), start());
    }

    #[test]
    fn test_elapsed_between_clamps_negative() {
        let later = start() + chrono::Duration::seconds(2);
        assert_eq!(elapsed_between(later, start()), Duration::ZERO);
        assert_eq!(elapsed_between(start(), later), Duration::from_secs(2));
    }
}
