/// Unified error types for the Hermes downloader.
///
/// Every pipeline stage has its own error enum; `HermesError` wraps them so the
/// caller can tell which stage failed.
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::ByteRange;

/// Top-level error type for a download run.
#[derive(Debug, Error)]
pub enum HermesError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolve failed: {0}")]
    Resolve(#[source] ToolError),

    #[error("Size probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] JoinFailure),

    #[error("Fetch stage timed out after {0:?}")]
    Timeout(Duration),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Transcode failed: {0}")]
    Transcode(#[source] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HermesError {
    /// Name of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            HermesError::Config(_) => "config",
            HermesError::Resolve(_) => "resolve",
            HermesError::Probe(_) => "probe",
            HermesError::Plan(_) => "plan",
            HermesError::Fetch(_) | HermesError::Timeout(_) => "fetch",
            HermesError::Merge(_) => "merge",
            HermesError::Transcode(_) => "transcode",
            HermesError::Io(_) => "io",
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },

    #[error("{key} must be at least {min}")]
    TooSmall { key: String, min: u64 },
}

/// Range planning rejected its inputs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("resource size must be positive, got {0}")]
    InvalidSize(u64),

    #[error("worker count must be positive, got {0}")]
    InvalidWorkerCount(usize),

    #[error("{workers} workers cannot split a {size}-byte resource")]
    TooManyWorkers { workers: usize, size: u64 },
}

/// Size discovery failed before planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("HEAD request failed: {0}")]
    Request(String),

    #[error("HEAD request returned status {0}")]
    Status(u16),

    #[error("server did not report a Content-Length")]
    MissingLength,

    #[error("server reported an empty resource")]
    EmptyResource,
}

/// Transport-level failure reported by a range source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("response body interrupted: {0}")]
    Body(String),
}

/// A single segment fetch failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("range {range}: {source}")]
    Transport {
        range: ByteRange,
        #[source]
        source: SourceError,
    },

    #[error("range {range}: server returned status {status}")]
    Status { range: ByteRange, status: u16 },

    #[error("range {range}: server ignored the range request (status {status})")]
    RangeIgnored { range: ByteRange, status: u16 },

    #[error("range {range}: unexpected Content-Range {header:?}")]
    ContentRange { range: ByteRange, header: String },

    #[error("range {range}: expected {expected} bytes, received {received}")]
    Length {
        range: ByteRange,
        expected: u64,
        received: u64,
    },

    #[error("range {range}: writing {} failed: {source}", .path.display())]
    Write {
        range: ByteRange,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("range {range}: fetch task aborted: {message}")]
    Aborted { range: ByteRange, message: String },
}

impl FetchError {
    /// The range whose fetch failed.
    pub fn range(&self) -> &ByteRange {
        match self {
            FetchError::Transport { range, .. }
            | FetchError::Status { range, .. }
            | FetchError::RangeIgnored { range, .. }
            | FetchError::ContentRange { range, .. }
            | FetchError::Length { range, .. }
            | FetchError::Write { range, .. }
            | FetchError::Aborted { range, .. } => range,
        }
    }
}

/// Aggregate failure of the fetch join: one or more segments failed.
///
/// Failures are ordered by range index. `segment_paths` lists the temporary
/// slots that exist on disk after the join, so the caller can reclaim them.
#[derive(Debug)]
pub struct JoinFailure {
    pub total: usize,
    pub failures: Vec<FetchError>,
    pub segment_paths: Vec<PathBuf>,
}

impl JoinFailure {
    pub fn new(total: usize, mut failures: Vec<FetchError>, segment_paths: Vec<PathBuf>) -> Self {
        failures.sort_by_key(|f| f.range().index);
        Self {
            total,
            failures,
            segment_paths,
        }
    }

    /// The lowest-index failure.
    pub fn first(&self) -> Option<&FetchError> {
        self.failures.first()
    }

    /// Indices of the ranges that failed.
    pub fn failed_indices(&self) -> Vec<u32> {
        self.failures.iter().map(|f| f.range().index).collect()
    }
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} segments failed", self.failures.len(), self.total)?;
        if let Some(first) = self.first() {
            write!(f, "; first: {}", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Reassembly failed; identifies the offending segment where there is one.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no segments to merge")]
    Empty,

    #[error("segment #{found} arrived at position {expected}")]
    OutOfOrder { expected: u32, found: u32 },

    #[error("failed to create {}: {source}", .path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment #{index}: failed to read {}: {source}", .path.display())]
    ReadSegment {
        index: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment #{index}: {} holds {actual} bytes, expected {expected}", .path.display())]
    SegmentSize {
        index: u32,
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("segment #{index}: copying into output failed: {source}")]
    Copy {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to finalize {}: {source}", .path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    /// Index of the segment that caused the failure, if any.
    pub fn segment_index(&self) -> Option<u32> {
        match self {
            MergeError::OutOfOrder { found, .. } => Some(*found),
            MergeError::ReadSegment { index, .. }
            | MergeError::SegmentSize { index, .. }
            | MergeError::Copy { index, .. } => Some(*index),
            MergeError::Empty | MergeError::CreateOutput { .. } | MergeError::Finalize { .. } => {
                None
            }
        }
    }
}

/// Failure of an external collaborator (yt-dlp, ffmpeg).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Failed to spawn {tool}: {message}")]
    SpawnFailed { tool: String, message: String },

    #[error("{tool} exited with code {code:?}: {stderr}")]
    Exited {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} produced no output")]
    EmptyOutput { tool: String },

    #[error("Unsupported source {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },
}

/// Result type alias for Hermes operations.
pub type HermesResult<T> = Result<T, HermesError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn range(index: u32) -> ByteRange {
        ByteRange::new(index, u64::from(index) * 10, u64::from(index) * 10 + 9)
    }

    #[test]
    fn test_join_failure_orders_by_index() {
        let failure = JoinFailure::new(
            8,
            vec![
                FetchError::Status { range: range(5), status: 500 },
                FetchError::Status { range: range(3), status: 404 },
            ],
            Vec::new(),
        );
        assert_eq!(failure.failed_indices(), vec![3, 5]);
        assert_eq!(failure.first().map(|f| f.range().index), Some(3));
        let text = failure.to_string();
        assert!(text.starts_with("2 of 8 segments failed"));
        assert!(text.contains("404"));
    }

    #[test]
    fn test_join_failure_exposes_source() {
        use std::error::Error;
        let failure = JoinFailure::new(
            2,
            vec![FetchError::Status { range: range(1), status: 503 }],
            Vec::new(),
        );
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(HermesError::Plan(PlanError::InvalidSize(0)).stage(), "plan");
        assert_eq!(HermesError::Timeout(Duration::from_secs(30)).stage(), "fetch");
        assert_eq!(HermesError::Merge(MergeError::Empty).stage(), "merge");
    }

    #[test]
    fn test_merge_error_segment_index() {
        let err = MergeError::Copy {
            index: 4,
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.segment_index(), Some(4));
        assert_eq!(MergeError::Empty.segment_index(), None);
    }
}
