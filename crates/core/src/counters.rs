//! Diagnostic counters
//!
//! Relaxed atomics only; nothing here gates delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

const NEVER: u64 = u64::MAX;

#[derive(Debug)]
pub struct FrameCounters {
    epoch: Instant,
    frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    messages_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    errors: AtomicU64,
    /// Microseconds since `epoch` of the last delivered frame
    last_frame_us: AtomicU64,
}

impl FrameCounters {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            frames_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_frame_us: AtomicU64::new(NEVER),
        }
    }

    /// Count a delivered frame; returns the new total
    pub fn record_frame(&self, bytes: usize) -> u64 {
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
        let elapsed = self.epoch.elapsed().as_micros() as u64;
        self.last_frame_us.store(elapsed, Ordering::Relaxed);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_message(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error; `dropped` also counts a lost frame
    pub fn record_error(&self, dropped: bool) {
        if dropped {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Time since the last delivered frame, `None` before the first one
    pub fn since_last_frame(&self) -> Option<Duration> {
        match self.last_frame_us.load(Ordering::Relaxed) {
            NEVER => None,
            at => {
                let now = self.epoch.elapsed().as_micros() as u64;
                Some(Duration::from_micros(now.saturating_sub(at)))
            }
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            since_last_frame_ms: self.since_last_frame().map(|d| d.as_millis() as u64),
        }
    }
}

impl Default for FrameCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub messages_delivered: u64,
    pub frames_dropped: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_last_frame_ms: Option<u64>,
}
