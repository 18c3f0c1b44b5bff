/// Hermes segmented downloader.
///
/// A resource of known length is split into contiguous byte ranges, the ranges
/// are fetched concurrently into per-range temporary slots, and the slots are
/// concatenated in index order into a byte-exact copy. Resolution (yt-dlp) and
/// transcoding (ffmpeg) run as external tools around that core.
pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod naming;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod reassembler;
pub mod source;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::DownloaderConfig;
pub use coordinator::{FetchCoordinator, RetryPolicy};
pub use fetcher::SegmentFetcher;
pub use pipeline::Downloader;
pub use planner::{effective_workers, plan};
pub use probe::discover;
pub use reassembler::merge;
pub use source::{RangeSource, ReqwestSource};
pub use tools::{
    DirectResolver, FfmpegTranscoder, NoopTranscoder, Resolved, Resolver, Transcoder, YtDlpResolver,
};
