use std::time::{Duration, Instant};

use crate::hls::events::ProgressSnapshot;

/// Transfer counters of a running session.
#[derive(Debug)]
pub(crate) struct DownloadState {
    received_bytes: u64,
    started: Instant,
    avg_speed: f64,
    completed: usize,
    total: usize,
}

impl DownloadState {
    pub(crate) fn new(total: usize) -> Self {
        Self::started_at(total, Instant::now())
    }

    /// Counters whose clock runs from `started`, typically the start of the session.
    pub(crate) fn started_at(total: usize, started: Instant) -> Self {
        Self {
            received_bytes: 0,
            started,
            avg_speed: 0.0,
            completed: 0,
            total,
        }
    }

    pub(crate) fn reset(&mut self, total: usize) {
        *self = Self::new(total);
    }

    /// Account for `len` freshly received bytes.
    pub(crate) fn record_bytes(&mut self, len: usize) -> ProgressSnapshot {
        self.received_bytes += len as u64;
        self.snapshot()
    }

    pub(crate) fn record_completed(&mut self) -> ProgressSnapshot {
        self.completed += 1;
        self.snapshot()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn snapshot(&mut self) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.avg_speed = self.received_bytes as f64 / secs;
        }
        ProgressSnapshot {
            received_bytes: self.received_bytes,
            avg_speed: self.avg_speed,
            elapsed,
            completed: self.completed,
            total: self.total,
        }
    }
}
