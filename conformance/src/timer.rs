//! Guard timers, wait constants and cancellation.
//!
//! A role checks its guard timer at the top of every wait loop. In the
//! process backend the timer is `setitimer(2)` raising `SIGALRM`, whose
//! handler only sets a flag (the signal also knocks `poll(2)` out with
//! `EINTR`). In the thread backend it is a deadline compared against the
//! clock, and waits are sliced so the check happens often enough.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use libc::c_int;

// ============================================================================
// Waits
// ============================================================================

pub const INFINITE_WAIT: i32 = -1;
pub const SHORT_WAIT: i32 = 20;
pub const NORMAL_WAIT: i32 = 100;
pub const LONG_WAIT: i32 = 500;
pub const LONGER_WAIT: i32 = 1000;
pub const LONGEST_WAIT: i32 = 5000;
pub const TEST_DURATION: u64 = 20000;

/// Default divisor for `--fast` without a value.
pub const DEFAULT_SCALE: u64 = 50;

/// Divides a duration by `scale`, rounding up.
pub fn scaled(ms: u64, scale: u64) -> u64 {
    ms.div_ceil(scale.max(1))
}

/// [`scaled`] for poll-style waits, where negative means forever.
pub fn scaled_wait(ms: i32, scale: u64) -> i32 {
    if ms < 0 {
        return ms;
    }
    i32::try_from(scaled(ms as u64, scale)).unwrap_or(i32::MAX)
}

// ============================================================================
// Guard timers
// ============================================================================

/// Per-role guard timer.
pub trait GuardTimer: Send {
    /// Arms the timer `ms` milliseconds from now and clears any earlier expiry.
    fn start(&mut self, ms: u64) -> io::Result<()>;

    /// Disarms the timer.
    fn stop(&mut self) -> io::Result<()>;

    /// The timer expired and has not been cleared since.
    fn fired(&self) -> bool;

    fn clear(&mut self);

    /// Longest a single poll may block and still notice expiry promptly.
    fn clamp(&self, wait_ms: i32) -> i32 {
        wait_ms
    }
}

static ALARM: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_signum: c_int) {
    ALARM.store(true, Ordering::SeqCst);
}

/// `ITIMER_REAL` plus a `SIGALRM` flag. One per process.
#[derive(Debug, Default)]
pub struct SignalTimer;

impl SignalTimer {
    pub fn new() -> Self {
        SignalTimer
    }

    fn set(ms: u64) -> io::Result<()> {
        let value = libc::timeval {
            tv_sec: (ms / 1000) as libc::time_t,
            tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
        };
        let setting = libc::itimerval {
            it_interval: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            it_value: value,
        };
        // SAFETY: setting is a valid itimerval; the old value is not wanted.
        if unsafe { libc::setitimer(libc::ITIMER_REAL, &setting, std::ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn handle(handler: libc::sighandler_t) -> io::Result<()> {
        // SAFETY: a zeroed sigaction is a valid "no flags, empty mask" value;
        // the handler only touches an atomic.
        let ret = unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handler;
            libc::sigemptyset(&mut sa.sa_mask);
            // No SA_RESTART: poll(2) must return EINTR when the alarm goes off.
            libc::sigaction(libc::SIGALRM, &sa, std::ptr::null_mut())
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl GuardTimer for SignalTimer {
    fn start(&mut self, ms: u64) -> io::Result<()> {
        Self::handle(on_alarm as extern "C" fn(c_int) as libc::sighandler_t)?;
        ALARM.store(false, Ordering::SeqCst);
        Self::set(ms.max(1))
    }

    fn stop(&mut self) -> io::Result<()> {
        let out = Self::set(0).and(Self::handle(libc::SIG_DFL));
        ALARM.store(false, Ordering::SeqCst);
        out
    }

    fn fired(&self) -> bool {
        ALARM.load(Ordering::SeqCst)
    }

    fn clear(&mut self) {
        ALARM.store(false, Ordering::SeqCst);
    }
}

/// Deadline checked against the monotonic clock.
#[derive(Debug, Default, Clone)]
pub struct DeadlineTimer {
    deadline: Option<Instant>,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GuardTimer for DeadlineTimer {
    fn start(&mut self, ms: u64) -> io::Result<()> {
        self.deadline = Some(Instant::now() + Duration::from_millis(ms));
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.deadline = None;
        Ok(())
    }

    fn fired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    fn clear(&mut self) {
        self.deadline = None;
    }

    fn clamp(&self, wait_ms: i32) -> i32 {
        let Some(at) = self.deadline else {
            return wait_ms;
        };
        let left = at.saturating_duration_since(Instant::now());
        let left = i32::try_from(left.as_millis() + 1).unwrap_or(i32::MAX);
        if wait_ms < 0 { left } else { wait_ms.min(left) }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Asks a role thread to wind down. Checked wherever a role may block.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_rounds_up() {
        assert_eq!(scaled(100, 50), 2);
        assert_eq!(scaled(101, 50), 3);
        assert_eq!(scaled(20, 1), 20);
        assert_eq!(scaled(5, 0), 5);
        assert_eq!(scaled_wait(INFINITE_WAIT, 10), INFINITE_WAIT);
        assert_eq!(scaled_wait(SHORT_WAIT, 10), 2);
    }

    #[test]
    fn test_deadline_timer_fires_and_clears() {
        let mut timer = DeadlineTimer::new();
        assert!(!timer.fired());
        timer.start(0).unwrap();
        assert!(timer.fired());
        timer.clear();
        assert!(!timer.fired());
    }

    #[test]
    fn test_deadline_clamps_waits() {
        let mut timer = DeadlineTimer::new();
        assert_eq!(timer.clamp(INFINITE_WAIT), INFINITE_WAIT);
        timer.start(50).unwrap();
        assert!(timer.clamp(INFINITE_WAIT) <= 51);
        assert_eq!(timer.clamp(5), 5);
        timer.stop().unwrap();
        assert_eq!(timer.clamp(500), 500);
    }

    #[test]
    fn test_signal_timer_sets_flag() {
        let mut timer = SignalTimer::new();
        timer.start(10).unwrap();
        let until = Instant::now() + Duration::from_secs(5);
        while !timer.fired() && Instant::now() < until {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(timer.fired());
        timer.clear();
        assert!(!timer.fired());
        timer.stop().unwrap();
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
