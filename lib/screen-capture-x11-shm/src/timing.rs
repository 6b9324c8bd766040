use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

static LAST_CAPTURE_US: AtomicU64 = AtomicU64::new(0);

/// Microseconds taken by the most recent successful capture in this process.
///
/// Returns 0 until a capture has completed.
pub fn last_capture_time_us() -> u64 {
    LAST_CAPTURE_US.load(Ordering::Relaxed)
}

pub(crate) fn record_capture_time(elapsed: Duration) {
    let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    LAST_CAPTURE_US.store(us, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_us(&self) -> u64 {
        u64::try_from(self.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}
