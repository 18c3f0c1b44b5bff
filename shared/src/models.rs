/// Data model shared by the downloader crates.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ProbeError;

/// An inclusive `[start, end]` byte interval of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Ordinal position in the plan, `0..workers`.
    pub index: u32,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    pub const fn new(index: u32, start: u64, end: u64) -> Self {
        Self { index, start, end }
    }

    /// Number of bytes covered by this range.
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}-{}]", self.index, self.start, self.end)
    }
}

/// A direct, range-capable resource with a known length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub url: String,
    pub length: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
}

impl ResourceDescriptor {
    /// Build a descriptor, rejecting an empty resource.
    pub fn new(
        url: impl Into<String>,
        length: u64,
        accepts_ranges: bool,
    ) -> Result<Self, ProbeError> {
        if length == 0 {
            return Err(ProbeError::EmptyResource);
        }
        Ok(Self {
            url: url.into(),
            length,
            accepts_ranges,
        })
    }
}

/// A populated temporary store holding exactly the bytes of one range.
///
/// Only a successful fetch produces a `Segment`, so a failed fetch can never
/// reach the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: ByteRange,
    pub path: PathBuf,
}

impl Segment {
    pub fn new(range: ByteRange, path: impl Into<PathBuf>) -> Self {
        Self {
            range,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes this segment is expected to hold.
    pub fn expected_len(&self) -> u64 {
        self.range.len()
    }
}

/// Outcome of a completed download run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub run_id: String,
    pub title: String,
    pub source_url: String,
    pub file_path: String,
    pub file_size: u64,
    pub filename: String,
    pub segments: u32,
    pub elapsed_ms: u64,
    pub transcoded: bool,
}
