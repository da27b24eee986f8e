//! Monotonic time sources for the attribution engine
//!
//! All engine timestamps are milliseconds as `f64`, matching the resolution
//! of host performance timers. `ManualClock` drives replay sessions and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic milliseconds
pub trait Clock: Send + Sync {
    /// Current monotonic time in milliseconds
    fn now_ms(&self) -> f64;
}

/// Wall-independent clock backed by `Instant`
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Externally driven clock
///
/// Cloning shares the underlying time cell, so a replay driver can keep one
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start_ms.to_bits())),
        }
    }

    /// Jump to an absolute time. Going backwards is ignored.
    pub fn set(&self, ms: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        if ms >= current {
            self.bits.store(ms.to_bits(), Ordering::SeqCst);
        }
    }

    pub fn advance(&self, delta_ms: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        self.set(current + delta_ms.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
