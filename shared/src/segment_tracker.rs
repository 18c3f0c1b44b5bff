/// Completion tracking shared by every segment fetch of a run.
///
/// One mutex-protected table is the single aggregation point the fetch units
/// report into; readers (progress reporter, coordinator) take snapshots.
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::ByteRange;

/// Lifecycle of one tracked segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Running,
    Done,
    Failed,
}

/// Per-segment tracking record.
#[derive(Debug, Clone)]
pub struct TrackedSegment {
    pub range: ByteRange,
    pub state: SegmentState,
    /// Bytes written by the current attempt.
    pub bytes_written: u64,
    pub attempts: u32,
}

impl TrackedSegment {
    fn new(range: ByteRange) -> Self {
        Self {
            range,
            state: SegmentState::Pending,
            bytes_written: 0,
            attempts: 0,
        }
    }
}

/// Shared segment table. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct SegmentTracker {
    segments: Arc<Mutex<BTreeMap<u32, TrackedSegment>>>,
}

impl SegmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked set with the given ranges, all pending.
    pub async fn register(&self, ranges: &[ByteRange]) {
        let mut segments = self.segments.lock().await;
        segments.clear();
        for range in ranges {
            segments.insert(range.index, TrackedSegment::new(*range));
        }
        debug!("Tracking {} segments", segments.len());
    }

    /// Mark a segment running and count a new attempt.
    pub async fn start(&self, index: u32) {
        if let Some(seg) = self.segments.lock().await.get_mut(&index) {
            seg.state = SegmentState::Running;
            seg.attempts += 1;
            seg.bytes_written = 0;
        } else {
            warn!("Segment {} is not tracked", index);
        }
    }

    /// Record bytes written for a running segment.
    pub async fn add_bytes(&self, index: u32, bytes: u64) {
        if let Some(seg) = self.segments.lock().await.get_mut(&index) {
            seg.bytes_written += bytes;
        }
    }

    pub async fn complete(&self, index: u32) {
        if let Some(seg) = self.segments.lock().await.get_mut(&index) {
            seg.state = SegmentState::Done;
        }
    }

    pub async fn fail(&self, index: u32) {
        if let Some(seg) = self.segments.lock().await.get_mut(&index) {
            seg.state = SegmentState::Failed;
        }
    }

    /// Snapshot of one segment.
    pub async fn get(&self, index: u32) -> Option<TrackedSegment> {
        self.segments.lock().await.get(&index).cloned()
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> TrackerStats {
        let segments = self.segments.lock().await;
        let count = |state: SegmentState| segments.values().filter(|s| s.state == state).count();
        TrackerStats {
            total_segments: segments.len(),
            pending: count(SegmentState::Pending),
            running: count(SegmentState::Running),
            done: count(SegmentState::Done),
            failed: count(SegmentState::Failed),
            bytes_written: segments.values().map(|s| s.bytes_written).sum(),
            total_bytes: segments.values().map(|s| s.range.len()).sum(),
            retries: segments
                .values()
                .map(|s| s.attempts.saturating_sub(1))
                .sum(),
        }
    }
}

/// Tracker statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TrackerStats {
    pub total_segments: usize,
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub bytes_written: u64,
    pub total_bytes: u64,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> Vec<ByteRange> {
        vec![
            ByteRange::new(0, 0, 49),
            ByteRange::new(1, 50, 99),
            ByteRange::new(2, 100, 199),
        ]
    }

    #[tokio::test]
    async fn test_register_and_stats() {
        let tracker = SegmentTracker::new();
        tracker.register(&ranges()).await;

        let stats = tracker.stats().await;
        assert_eq!(stats.total_segments, 3);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.total_bytes, 200);
        assert_eq!(stats.bytes_written, 0);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let tracker = SegmentTracker::new();
        tracker.register(&ranges()).await;

        tracker.start(0).await;
        tracker.add_bytes(0, 50).await;
        tracker.complete(0).await;
        tracker.start(1).await;
        tracker.add_bytes(1, 20).await;
        tracker.fail(1).await;

        let stats = tracker.stats().await;
        assert_eq!(stats.done, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.bytes_written, 70);

        let seg = tracker.get(0).await.unwrap();
        assert_eq!(seg.state, SegmentState::Done);
        assert_eq!(tracker.get(1).await.unwrap().state, SegmentState::Failed);
    }

    #[tokio::test]
    async fn test_restart_resets_bytes_and_counts_retry() {
        let tracker = SegmentTracker::new();
        tracker.register(&ranges()).await;

        tracker.start(2).await;
        tracker.add_bytes(2, 40).await;
        tracker.start(2).await;

        let seg = tracker.get(2).await.unwrap();
        assert_eq!(seg.attempts, 2);
        assert_eq!(seg.bytes_written, 0);
        assert_eq!(tracker.stats().await.retries, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let tracker = SegmentTracker::new();
        let observer = tracker.clone();
        tracker.register(&ranges()).await;
        for i in 0..3 {
            tracker.start(i).await;
            tracker.complete(i).await;
        }
        assert_eq!(observer.stats().await.done, 3);
    }
}
