/// End-to-end download run: resolve, probe, plan, fetch, merge, transcode.
///
/// Any stage failure aborts the later stages. Cleanup policy:
/// - failed fetch: the run directory is removed unless `keep_temp` is set
/// - failed merge: unmerged slots stay in the run directory
/// - failed transcode: the merged artifact stays in the output directory
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hermes_shared::{DownloadResult, HermesError, SegmentTracker};

use crate::config::DownloaderConfig;
use crate::coordinator::FetchCoordinator;
use crate::naming::{artifact_path, deliverable_path, sanitize_title, source_extension};
use crate::planner::{effective_workers, plan};
use crate::probe::discover;
use crate::reassembler::merge;
use crate::source::RangeSource;
use crate::tools::{Resolver, Transcoder};

/// Pause before retrying a failed run directory removal. Aborted fetch tasks
/// may still be finishing a blocking file operation inside it.
const CLEANUP_RETRY_PAUSE: Duration = Duration::from_millis(200);

pub struct Downloader<S, R, T> {
    source: Arc<S>,
    resolver: R,
    transcoder: T,
    config: DownloaderConfig,
    tracker: SegmentTracker,
}

impl<S, R, T> Downloader<S, R, T>
where
    S: RangeSource + 'static,
    R: Resolver,
    T: Transcoder,
{
    pub fn new(source: Arc<S>, resolver: R, transcoder: T, config: DownloaderConfig) -> Self {
        Self {
            source,
            resolver,
            transcoder,
            config,
            tracker: SegmentTracker::new(),
        }
    }

    /// Tracker fed by the fetch stage, for progress reporting.
    pub fn tracker(&self) -> SegmentTracker {
        self.tracker.clone()
    }

    /// Download `reference` and produce the deliverable in the output directory.
    pub async fn run(&self, reference: &str) -> Result<DownloadResult, HermesError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let short_id = &run_id[..8];

        info!("[{}] Resolving {}", short_id, reference);
        let resolved = self
            .resolver
            .resolve(reference)
            .await
            .map_err(HermesError::Resolve)?;
        let title = sanitize_title(&resolved.title);
        info!("[{}] Title: {}", short_id, title);

        let descriptor = discover(self.source.as_ref(), &resolved.url).await?;
        let workers = effective_workers(descriptor.length, self.config.workers);
        if workers != self.config.workers {
            warn!(
                "[{}] Resource has only {} bytes, using {} workers instead of {}",
                short_id, descriptor.length, workers, self.config.workers
            );
        }
        let ranges = plan(descriptor.length, workers)?;
        info!(
            "[{}] {} bytes in {} segments (ranges advertised: {})",
            short_id,
            descriptor.length,
            ranges.len(),
            descriptor.accepts_ranges
        );

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let run_dir = self.config.temp_root.join(format!("hermes-{}", run_id));
        tokio::fs::create_dir_all(&run_dir).await?;

        let mut coordinator = FetchCoordinator::new(self.source.clone(), &run_dir)
            .with_tracker(self.tracker.clone())
            .with_retry(self.config.retry_policy());
        if let Some(max) = self.config.max_connections {
            coordinator = coordinator.with_max_connections(max);
        }

        let fetched = match self.config.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, coordinator.fetch_all(&descriptor.url, &ranges)).await {
                Ok(result) => result.map_err(HermesError::from),
                Err(_) => Err(HermesError::Timeout(limit)),
            },
            None => coordinator
                .fetch_all(&descriptor.url, &ranges)
                .await
                .map_err(HermesError::from),
        };
        let segments = match fetched {
            Ok(segments) => segments,
            Err(e) => {
                error!("[{}] {}", short_id, e);
                let slots: &[PathBuf] = match &e {
                    HermesError::Fetch(failure) => failure.segment_paths.as_slice(),
                    _ => &[],
                };
                if self.config.keep_temp {
                    warn!(
                        "[{}] Keeping {} segment files in {}",
                        short_id,
                        slots.len(),
                        run_dir.display()
                    );
                } else {
                    remove_slots(slots).await;
                    if let Err(rm) = remove_run_dir(&run_dir).await {
                        warn!("[{}] Failed to remove {}: {}", short_id, run_dir.display(), rm);
                    }
                }
                return Err(e);
            }
        };

        let source_ext = source_extension(&descriptor.url);
        let target_ext = self.transcoder.target_extension();
        let artifact = artifact_path(&self.config.output_dir, &title, &source_ext, target_ext);

        let merged = match merge(&artifact, segments).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    "[{}] Merge failed, remaining segments kept in {}",
                    short_id,
                    run_dir.display()
                );
                return Err(e.into());
            }
        };
        if let Err(e) = remove_run_dir(&run_dir).await {
            warn!("[{}] Failed to remove {}: {}", short_id, run_dir.display(), e);
        }

        let (file_path, transcoded) = match target_ext {
            Some(ext) => {
                let deliverable = deliverable_path(&self.config.output_dir, &title, ext);
                self.transcoder
                    .transcode(&artifact, &deliverable)
                    .await
                    .map_err(HermesError::Transcode)?;
                if !self.config.keep_source {
                    if let Err(e) = tokio::fs::remove_file(&artifact).await {
                        warn!("[{}] Failed to remove {}: {}", short_id, artifact.display(), e);
                    }
                }
                (deliverable, true)
            }
            None => (artifact, false),
        };

        let file_size = match tokio::fs::metadata(&file_path).await {
            Ok(meta) => meta.len(),
            Err(_) => merged,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "[{}] Done: {} ({} bytes, {}ms)",
            short_id,
            file_path.display(),
            file_size,
            elapsed_ms
        );

        Ok(DownloadResult {
            run_id,
            title,
            source_url: descriptor.url,
            filename: file_name(&file_path),
            file_path: file_path.display().to_string(),
            file_size,
            segments: ranges.len() as u32,
            elapsed_ms,
            transcoded,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_slots(slots: &[PathBuf]) {
    for slot in slots {
        if let Err(e) = tokio::fs::remove_file(slot).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", slot.display(), e);
            }
        }
    }
}

/// Remove the run directory, trying a second time after a short pause.
async fn remove_run_dir(run_dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(run_dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            debug!("Retrying removal of {}: {}", run_dir.display(), e);
            tokio::time::sleep(CLEANUP_RETRY_PAUSE).await;
            match tokio::fs::remove_dir_all(run_dir).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
        _ => Ok(()),
    }
}
