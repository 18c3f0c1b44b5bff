/// Terminal progress bar for the fetch stage, fed from the segment tracker.
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;

use hermes_shared::{SegmentTracker, TrackerStats};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Copy tracker totals onto `bar`.
pub fn apply_stats(bar: &ProgressBar, stats: &TrackerStats) {
    if bar.length() != Some(stats.total_bytes) {
        bar.set_length(stats.total_bytes);
    }
    bar.set_position(stats.bytes_written.min(stats.total_bytes));

    let mut msg = format!("{}/{} segments", stats.done, stats.total_segments);
    if stats.failed > 0 {
        msg.push_str(&format!(", {} failed", stats.failed));
    }
    if stats.retries > 0 {
        msg.push_str(&format!(", {} retries", stats.retries));
    }
    bar.set_message(msg);
}

/// Background task that polls the tracker and redraws a progress bar on stderr.
pub struct ProgressReporter {
    bar: ProgressBar,
    handle: JoinHandle<()>,
    tracker: SegmentTracker,
}

impl ProgressReporter {
    pub fn spawn(tracker: SegmentTracker, every: Duration) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(bar_style());

        let watched = tracker.clone();
        let drawn = bar.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let stats = watched.stats().await;
                if stats.total_segments > 0 {
                    apply_stats(&drawn, &stats);
                }
            }
        });

        Self {
            bar,
            handle,
            tracker,
        }
    }

    /// Stop polling and leave the final state on screen.
    pub async fn finish(self) {
        self.handle.abort();
        let stats = self.tracker.stats().await;
        if stats.total_segments == 0 {
            self.bar.finish_and_clear();
            return;
        }
        apply_stats(&self.bar, &stats);
        if stats.failed > 0 || stats.done < stats.total_segments {
            self.bar.abandon();
        } else {
            self.bar.finish();
        }
    }
}
