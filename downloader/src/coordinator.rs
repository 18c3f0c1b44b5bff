/// Fetch coordinator: fork one task per range, join them all.
///
/// Every launched fetch runs to its own completion or failure; a failure does
/// not cancel siblings. Results are ordered by range index, never by
/// completion order.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use hermes_shared::{ByteRange, FetchError, JoinFailure, Segment, SegmentTracker};

use crate::fetcher::SegmentFetcher;
use crate::source::RangeSource;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, saturating.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

/// Temporary slot for a range inside a run directory.
pub fn slot_path(run_dir: &Path, range: &ByteRange) -> PathBuf {
    run_dir.join(format!("part-{}.tmp", range.index))
}

/// Retry policy applied per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Aborts still-running fetch tasks if the join is abandoned (e.g. a caller
/// deadline fires). Aborting a finished task is a no-op.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Runs all segment fetches of a download concurrently.
pub struct FetchCoordinator<S> {
    source: Arc<S>,
    tracker: SegmentTracker,
    run_dir: PathBuf,
    max_connections: Option<usize>,
    retry: RetryPolicy,
}

impl<S: RangeSource + 'static> FetchCoordinator<S> {
    /// Create a coordinator writing slots under `run_dir`.
    pub fn new(source: Arc<S>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            tracker: SegmentTracker::new(),
            run_dir: run_dir.into(),
            max_connections: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Report into an existing tracker (shared with a progress reporter).
    pub fn with_tracker(mut self, tracker: SegmentTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Cap concurrent range requests. Defaults to one per range.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections.max(1));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tracker(&self) -> SegmentTracker {
        self.tracker.clone()
    }

    /// Fetch every range of `url` and return the populated segments in index order.
    ///
    /// Waits for all fetches. If any failed, returns a [`JoinFailure`] holding
    /// every failure and the slots left on disk.
    pub async fn fetch_all(&self, url: &str, ranges: &[ByteRange]) -> Result<Vec<Segment>, JoinFailure> {
        self.tracker.register(ranges).await;

        let limit = self.max_connections.unwrap_or(ranges.len()).max(1);
        let permits = Arc::new(Semaphore::new(limit));
        info!(
            "Fetching {} segments ({} concurrent, {} retries)",
            ranges.len(),
            limit,
            self.retry.max_retries
        );

        let url: Arc<str> = Arc::from(url);
        let mut handles = Vec::with_capacity(ranges.len());
        for range in ranges.iter().copied() {
            let fetcher = SegmentFetcher::new(self.source.clone(), self.tracker.clone());
            let tracker = self.tracker.clone();
            let permits = permits.clone();
            let url = url.clone();
            let destination = slot_path(&self.run_dir, &range);
            let retry = self.retry;

            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquiring cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                let result = fetch_with_retry(&fetcher, &tracker, &url, range, &destination, retry).await;
                match &result {
                    Ok(_) => tracker.complete(range.index).await,
                    Err(e) => {
                        tracker.fail(range.index).await;
                        warn!("Segment {} failed: {}", range, e);
                    }
                }
                result
            }));
        }

        let guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
        let joined = join_all(handles).await;
        drop(guard);

        let mut segments = Vec::with_capacity(ranges.len());
        let mut failures = Vec::new();
        for (range, outcome) in ranges.iter().zip(joined) {
            match outcome {
                Ok(Ok(segment)) => segments.push(segment),
                Ok(Err(e)) => failures.push(e),
                Err(join_err) => {
                    self.tracker.fail(range.index).await;
                    warn!("Segment {} task aborted: {}", range, join_err);
                    failures.push(FetchError::Aborted {
                        range: *range,
                        message: join_err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            let leftovers = self.existing_slots(ranges).await;
            return Err(JoinFailure::new(ranges.len(), failures, leftovers));
        }

        segments.sort_by_key(|s| s.range.index);
        info!("All {} segments fetched", segments.len());
        Ok(segments)
    }

    async fn existing_slots(&self, ranges: &[ByteRange]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for range in ranges {
            let path = slot_path(&self.run_dir, range);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                paths.push(path);
            }
        }
        paths
    }
}

async fn fetch_with_retry<S: RangeSource>(
    fetcher: &SegmentFetcher<S>,
    tracker: &SegmentTracker,
    url: &str,
    range: ByteRange,
    destination: &Path,
    retry: RetryPolicy,
) -> Result<Segment, FetchError> {
    let mut attempt = 0;
    loop {
        tracker.start(range.index).await;
        debug!("Fetching segment {} (attempt {})", range, attempt + 1);

        match fetcher.fetch(url, range, destination).await {
            Ok(segment) => return Ok(segment),
            Err(e) if attempt < retry.max_retries => {
                let delay = retry_delay(attempt, retry.backoff);
                warn!("Segment {} failed ({}), retrying in {:?}", range, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
