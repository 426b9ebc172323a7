//! Monotonic time source for the MAC engine.
//!
//! The engine expects a free-running hardware counter. On the host this is an
//! epoch captured once at startup; every query reports the time elapsed since
//! that epoch, truncated to a wrapping `u32`.
//!
//! Callers must compare times by subtraction ([`elapsed_since`], [`is_due`]),
//! never by ordering absolute values, so results stay correct across
//! wrap-around for spans up to half the `u32` range (~24 days in
//! milliseconds, ~35 minutes in microseconds).
//!
//! # Example
//!
//! ```
//! use lmic_raspi::clock::{self, elapsed_since};
//!
//! clock::init_epoch();
//! let start = clock::now_millis();
//! std::thread::sleep(std::time::Duration::from_millis(2));
//! assert!(elapsed_since(clock::now_millis(), start) >= 2);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Epoch> = OnceLock::new();

/// Reference point for all elapsed-time queries.
#[derive(Debug, Clone, Copy)]
pub struct Epoch {
    origin: Instant,
}

impl Epoch {
    fn capture() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since the epoch, wrapping at `u32::MAX`.
    pub fn millis(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }

    /// Microseconds since the epoch, wrapping at `u32::MAX`.
    pub fn micros(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

/// Capture the process epoch.
///
/// Only the first call captures; later calls return the same epoch.
pub fn init_epoch() -> &'static Epoch {
    EPOCH.get_or_init(Epoch::capture)
}

/// Milliseconds since process start (wrapping).
pub fn now_millis() -> u32 {
    init_epoch().millis()
}

/// Microseconds since process start (wrapping).
pub fn now_micros() -> u32 {
    init_epoch().micros()
}

/// Wrap-safe time elapsed from `earlier` to `now`.
pub fn elapsed_since(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

/// Whether `deadline` has been reached at `now`, wrap-safe.
pub fn is_due(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}

/// A source of elapsed time.
pub trait Clock: Send {
    /// Milliseconds since the clock's epoch (wrapping).
    fn now_millis(&self) -> u32;

    /// Microseconds since the clock's epoch (wrapping).
    fn now_micros(&self) -> u32;
}

/// Clock backed by the process epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostClock;

impl HostClock {
    /// Create a host clock, capturing the epoch if it was not captured yet.
    pub fn new() -> Self {
        init_epoch();
        Self
    }
}

impl Clock for HostClock {
    fn now_millis(&self) -> u32 {
        now_millis()
    }

    fn now_micros(&self) -> u32 {
        now_micros()
    }
}

/// Manually advanced clock for tests and simulation.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at the given millisecond count.
    pub fn starting_at_millis(millis: u64) -> Self {
        let clock = Self::new();
        clock.micros.store(millis * 1000, Ordering::SeqCst);
        clock
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Total elapsed time as a `Duration` (not truncated).
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u32 {
        (self.micros.load(Ordering::SeqCst) / 1000) as u32
    }

    fn now_micros(&self) -> u32 {
        self.micros.load(Ordering::SeqCst) as u32
    }
}

/// Bounded pause between polling iterations.
pub trait Sleeper: Send {
    /// Yield the CPU for roughly `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeper that parks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that advances a [`ManualClock`] instead of waiting.
#[derive(Debug, Clone)]
pub struct ManualSleeper {
    clock: ManualClock,
    total: Duration,
    calls: usize,
}

impl ManualSleeper {
    /// Create a sleeper driving `clock`.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            total: Duration::ZERO,
            calls: 0,
        }
    }

    /// Total simulated time slept.
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Number of sleep calls.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.clock.advance(duration);
        self.total += duration;
        self.calls += 1;
    }
}
