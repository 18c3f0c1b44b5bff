/// In-memory collaborators for unit tests.
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use hermes_shared::{ByteRange, SourceError, ToolError};

use crate::source::{ProbeResponse, RangeResponse, RangeSource};
use crate::tools::{Resolved, Resolver, Transcoder};

/// Deterministic, non-repeating-looking test payload.
pub(crate) fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

/// Misbehaviour injected for one range index.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    /// The request itself fails.
    Refuse,
    /// The request fails for the first `n` attempts, then succeeds.
    FailTimes(u32),
    /// Respond with this status and an empty body.
    Status(u16),
    /// Respond `200 OK` with the whole resource.
    IgnoreRange,
    /// End the body cleanly after `n` bytes.
    Truncate(usize),
    /// Error the body after `n` bytes.
    BreakBody(usize),
    /// Report a Content-Range shifted by one byte.
    WrongContentRange,
}

/// Range source serving a byte buffer from memory.
pub(crate) struct MemorySource {
    data: Arc<Vec<u8>>,
    chunk_size: usize,
    report_length: bool,
    accept_ranges: bool,
    probe_status: u16,
    faults: HashMap<u32, Fault>,
    delays: HashMap<u32, Duration>,
    attempts: Mutex<HashMap<u32, u32>>,
}

impl MemorySource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            chunk_size: 16,
            report_length: true,
            accept_ranges: true,
            probe_status: 200,
            faults: HashMap::new(),
            delays: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    pub(crate) fn without_accept_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    pub(crate) fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    pub(crate) fn with_fault(mut self, index: u32, fault: Fault) -> Self {
        self.faults.insert(index, fault);
        self
    }

    pub(crate) fn with_delay(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Number of range requests seen for `index`.
    pub(crate) fn attempts(&self, index: u32) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    fn record_attempt(&self, index: u32) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(index).or_insert(0);
        *count += 1;
        *count
    }

    fn chunked(&self, bytes: &[u8]) -> Vec<Result<Bytes, SourceError>> {
        bytes
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }
}

impl RangeSource for MemorySource {
    async fn probe(&self, _url: &str) -> Result<ProbeResponse, SourceError> {
        Ok(ProbeResponse {
            status: self.probe_status,
            content_length: self.report_length.then(|| self.data.len() as u64),
            accept_ranges: self.accept_ranges.then(|| "bytes".to_string()),
        })
    }

    async fn fetch_range(&self, _url: &str, range: &ByteRange) -> Result<RangeResponse, SourceError> {
        let attempt = self.record_attempt(range.index);
        if let Some(delay) = self.delays.get(&range.index) {
            tokio::time::sleep(*delay).await;
        }

        let total = self.data.len();
        let start = (range.start as usize).min(total);
        let end = (range.end as usize).min(total.saturating_sub(1));
        let slice = &self.data[start..=end];
        let content_range = Some(format!("bytes {}-{}/{}", start, end, total));

        let (status, content_range, items) = match self.faults.get(&range.index) {
            Some(Fault::Refuse) => {
                return Err(SourceError::Request("connection refused".into()));
            }
            Some(Fault::FailTimes(n)) if attempt <= *n => {
                return Err(SourceError::Request(format!("connection reset (attempt {})", attempt)));
            }
            Some(Fault::Status(status)) => (*status, None, Vec::new()),
            Some(Fault::IgnoreRange) => (200, None, self.chunked(&self.data)),
            Some(Fault::Truncate(n)) => (206, content_range, self.chunked(&slice[..(*n).min(slice.len())])),
            Some(Fault::BreakBody(n)) => {
                let mut items = self.chunked(&slice[..(*n).min(slice.len())]);
                items.push(Err(SourceError::Body("connection reset by peer".into())));
                (206, content_range, items)
            }
            Some(Fault::WrongContentRange) => (
                206,
                Some(format!("bytes {}-{}/{}", start + 1, end + 1, total)),
                self.chunked(slice),
            ),
            Some(Fault::FailTimes(_)) | None => (206, content_range, self.chunked(slice)),
        };

        Ok(RangeResponse {
            status,
            content_range,
            body: Box::pin(futures_util::stream::iter(items)),
        })
    }
}

/// Resolver returning a fixed locator and title.
pub(crate) struct StaticResolver {
    pub(crate) url: String,
    pub(crate) title: String,
}

impl Resolver for StaticResolver {
    async fn resolve(&self, _reference: &str) -> Result<Resolved, ToolError> {
        Ok(Resolved {
            url: self.url.clone(),
            title: self.title.clone(),
        })
    }
}

/// Resolver that always fails.
pub(crate) struct FailingResolver;

impl Resolver for FailingResolver {
    async fn resolve(&self, reference: &str) -> Result<Resolved, ToolError> {
        Err(ToolError::Exited {
            tool: "yt-dlp".into(),
            code: Some(1),
            stderr: format!("ERROR: unable to resolve {}", reference),
        })
    }
}

/// Transcoder that copies its input, counting invocations.
#[derive(Default)]
pub(crate) struct CopyTranscoder {
    pub(crate) calls: AtomicUsize,
    pub(crate) fail: bool,
}

impl CopyTranscoder {
    pub(crate) fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcoder for CopyTranscoder {
    fn target_extension(&self) -> Option<&str> {
        Some("mp3")
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ToolError::Exited {
                tool: "ffmpeg".into(),
                code: Some(1),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|e| ToolError::SpawnFailed {
                tool: "ffmpeg".into(),
                message: e.to_string(),
            })
    }
}
