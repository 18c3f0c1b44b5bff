/// Segment fetcher: download one byte range into its temporary slot.
///
/// The body is streamed chunk by chunk through a bounded write buffer, never
/// collected in memory. The response is validated against the requested range:
/// a server that ignores `Range` and sends the full body is an error, as is a
/// short or overlong body.
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use hermes_shared::{ByteRange, FetchError, Segment, SegmentTracker};

use crate::source::RangeSource;

/// Write buffer per segment slot.
const WRITE_BUFFER: usize = 64 * 1024;

/// Fetches single ranges from a [`RangeSource`].
pub struct SegmentFetcher<S> {
    source: Arc<S>,
    tracker: SegmentTracker,
}

impl<S> Clone for SegmentFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<S: RangeSource> SegmentFetcher<S> {
    pub fn new(source: Arc<S>, tracker: SegmentTracker) -> Self {
        Self { source, tracker }
    }

    /// Fetch `range` of `url` into `destination`, creating or truncating it.
    ///
    /// Succeeds only when exactly `range.len()` bytes were written and synced.
    /// No retry happens here.
    pub async fn fetch(
        &self,
        url: &str,
        range: ByteRange,
        destination: &Path,
    ) -> Result<Segment, FetchError> {
        let response = self
            .source
            .fetch_range(url, &range)
            .await
            .map_err(|source| FetchError::Transport { range, source })?;

        check_status(&range, response.status)?;
        if let Some(header) = response.content_range.as_deref() {
            check_content_range(&range, header)?;
        }

        let write_err = |source: std::io::Error| FetchError::Write {
            range,
            path: destination.to_path_buf(),
            source,
        };

        let file = File::create(destination).await.map_err(write_err)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);

        let expected = range.len();
        let mut received = 0u64;
        let mut body = response.body;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| FetchError::Transport { range, source })?;
            received += chunk.len() as u64;
            if received > expected {
                return Err(FetchError::Length {
                    range,
                    expected,
                    received,
                });
            }
            writer.write_all(&chunk).await.map_err(write_err)?;
            self.tracker.add_bytes(range.index, chunk.len() as u64).await;
        }

        if received != expected {
            return Err(FetchError::Length {
                range,
                expected,
                received,
            });
        }

        writer.flush().await.map_err(write_err)?;
        writer.into_inner().sync_all().await.map_err(write_err)?;

        debug!("Segment {} written to {}", range, destination.display());
        Ok(Segment::new(range, destination))
    }
}

/// Accept `206 Partial Content`, or `200 OK` only for a range starting at byte
/// zero (a one-range plan; the body length check catches a longer full body).
fn check_status(range: &ByteRange, status: u16) -> Result<(), FetchError> {
    match status {
        206 => Ok(()),
        200 if range.start == 0 => Ok(()),
        200..=299 => Err(FetchError::RangeIgnored {
            range: *range,
            status,
        }),
        _ => Err(FetchError::Status {
            range: *range,
            status,
        }),
    }
}

/// Validate a `Content-Range: bytes <start>-<end>/<total>` header.
fn check_content_range(range: &ByteRange, header: &str) -> Result<(), FetchError> {
    match parse_content_range(header) {
        Some((start, end)) if start == range.start && end == range.end => Ok(()),
        _ => Err(FetchError::ContentRange {
            range: *range,
            header: header.to_string(),
        }),
    }
}

/// Parse the bounds out of a `Content-Range` value. The total may be `*`.
fn parse_content_range(header: &str) -> Option<(u64, u64)> {
    let rest = header.trim().strip_prefix("bytes")?.trim_start();
    let (bounds, _total) = rest.split_once('/')?;
    let (start, end) = bounds.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
