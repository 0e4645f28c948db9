//! Injectable time source.
//!
//! Everything in this crate that reads wall-clock time for a timestamp,
//! a timeout, or a heartbeat goes through [`Clock`] rather than calling
//! `SystemTime::now()` directly, so tests can freeze or fast-forward time
//! instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of timestamps, in nanoseconds since the UNIX epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_ns(&self) -> i64;
}

/// The default clock, backed by `quanta` for cheap monotonic reads that
/// still track wall-clock time (anchored to `SystemTime` at construction).
#[derive(Debug, Clone)]
pub struct SystemClock {
    clock: quanta::Clock,
    start_wall_ns: i64,
    start_instant: quanta::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        let start_wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_nanos() as i64;
        Self {
            clock,
            start_wall_ns,
            start_instant,
        }
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_ns + delta.as_nanos() as i64
    }
}

/// A clock that tests can move forward explicitly, instead of racing
/// real sleeps against timeout logic.
#[derive(Debug, Default)]
pub struct TestClock {
    now_ns: AtomicI64,
}

impl TestClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    pub fn set_ns(&self, value_ns: i64) {
        self.now_ns.store(value_ns, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}
