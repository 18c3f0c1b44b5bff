/// Shared types, error taxonomy and segment tracking for Hermes.
pub mod errors;
pub mod models;
pub mod segment_tracker;

pub use errors::{
    ConfigError, FetchError, HermesError, HermesResult, JoinFailure, MergeError, PlanError,
    ProbeError, SourceError, ToolError,
};
pub use models::{ByteRange, DownloadResult, ResourceDescriptor, Segment};
pub use segment_tracker::{SegmentState, SegmentTracker, TrackedSegment, TrackerStats};
