/// Reassembler: concatenate populated segments, in index order, into the output.
///
/// Segments are streamed one at a time into `<output>.part`, which is synced
/// and renamed into place at the end, so a failed merge never leaves a file at
/// the output path. Temporary slots are deleted only once the output is in
/// place; on any failure every slot stays on disk.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use hermes_shared::{MergeError, Segment};

const COPY_BUFFER: usize = 256 * 1024;

/// Staging path used while the output is being assembled.
pub fn staging_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".part");
    output.with_file_name(name)
}

/// Merge `segments` into `output`, returning the number of bytes written.
///
/// `segments` must be ordered by range index starting at zero.
pub async fn merge(output: &Path, segments: Vec<Segment>) -> Result<u64, MergeError> {
    if segments.is_empty() {
        return Err(MergeError::Empty);
    }

    let staging = staging_path(output);
    let count = segments.len();
    let slots: Vec<PathBuf> = segments.iter().map(|s| s.path.clone()).collect();

    let finalized = match merge_into(&staging, segments).await {
        Ok(written) => fs::rename(&staging, output)
            .await
            .map(|_| written)
            .map_err(|source| MergeError::Finalize {
                path: output.to_path_buf(),
                source,
            }),
        Err(e) => Err(e),
    };

    let written = match finalized {
        Ok(written) => written,
        Err(e) => {
            remove_staging(&staging).await;
            return Err(e);
        }
    };

    for slot in &slots {
        if let Err(e) = fs::remove_file(slot).await {
            warn!("Failed to remove segment {}: {}", slot.display(), e);
        }
    }

    info!("Merged {} segments ({} bytes) into {}", count, written, output.display());
    Ok(written)
}

async fn remove_staging(staging: &Path) {
    if let Err(rm) = fs::remove_file(staging).await {
        if rm.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", staging.display(), rm);
        }
    }
}

async fn merge_into(staging: &Path, segments: Vec<Segment>) -> Result<u64, MergeError> {
    let file = File::create(staging)
        .await
        .map_err(|source| MergeError::CreateOutput {
            path: staging.to_path_buf(),
            source,
        })?;
    let mut out = BufWriter::with_capacity(COPY_BUFFER, file);
    let mut written = 0u64;

    for (position, segment) in segments.into_iter().enumerate() {
        let index = segment.range.index;
        if index as usize != position {
            return Err(MergeError::OutOfOrder {
                expected: position as u32,
                found: index,
            });
        }

        let read_err = |source: std::io::Error| MergeError::ReadSegment {
            index,
            path: segment.path.clone(),
            source,
        };

        let expected = segment.expected_len();
        let actual = fs::metadata(segment.path()).await.map_err(read_err)?.len();
        if actual != expected {
            return Err(MergeError::SegmentSize {
                index,
                path: segment.path.clone(),
                expected,
                actual,
            });
        }

        let mut input = File::open(segment.path()).await.map_err(read_err)?;
        let copied = tokio::io::copy(&mut input, &mut out)
            .await
            .map_err(|source| MergeError::Copy { index, source })?;
        if copied != expected {
            return Err(MergeError::SegmentSize {
                index,
                path: segment.path.clone(),
                expected,
                actual: copied,
            });
        }
        written += copied;
        debug!("Merged segment {} ({} bytes)", segment.range, copied);
    }

    let finalize_err = |source: std::io::Error| MergeError::Finalize {
        path: staging.to_path_buf(),
        source,
    };
    out.flush().await.map_err(finalize_err)?;
    out.into_inner().sync_all().await.map_err(finalize_err)?;

    Ok(written)
}
