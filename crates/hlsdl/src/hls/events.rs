use std::time::Duration;

use bytes::Bytes;

/// Point-in-time view of a session's transfer counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Raw bytes received across all segments
    pub received_bytes: u64,
    /// Average throughput since session start, in bytes per second
    pub avg_speed: f64,
    pub elapsed: Duration,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub enum HlsEvent {
    /// The manifest was fetched and parsed.
    ManifestReady { segments: usize },
    SegmentCompleted { index: usize, bytes: Bytes },
    /// A segment failed; the rest of the batch carries on.
    SegmentFailed { index: usize, error: String },
    Progress(ProgressSnapshot),
    SessionFinished { elapsed: Duration },
}
