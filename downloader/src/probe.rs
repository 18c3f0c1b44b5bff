/// Size discovery: a header-only probe that must report a positive length.
use tracing::{debug, warn};

use hermes_shared::{ProbeError, ResourceDescriptor};

use crate::source::RangeSource;

/// Probe `url` and build its resource descriptor.
pub async fn discover<S: RangeSource>(source: &S, url: &str) -> Result<ResourceDescriptor, ProbeError> {
    let response = source
        .probe(url)
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    if !(200..300).contains(&response.status) {
        return Err(ProbeError::Status(response.status));
    }

    let length = response.content_length.ok_or(ProbeError::MissingLength)?;

    let accepts_ranges = response
        .accept_ranges
        .as_deref()
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);
    if !accepts_ranges {
        warn!(
            "Server does not advertise byte ranges (Accept-Ranges: {:?}); segment responses will be validated",
            response.accept_ranges
        );
    }

    debug!("Probed {} bytes (ranges: {})", length, accepts_ranges);
    ResourceDescriptor::new(url, length, accepts_ranges)
}
