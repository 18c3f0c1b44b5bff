/// HTTP range source abstraction.
///
/// The fetch engine only needs two calls: a header-only probe and a ranged GET
/// whose body arrives as a byte stream. `ReqwestSource` is the production
/// implementation; tests plug in an in-memory source.
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use hermes_shared::{ByteRange, SourceError};

/// A boxed response body stream.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Response to a header-only probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
}

/// Response to a ranged GET, body not yet consumed.
pub struct RangeResponse {
    pub status: u16,
    pub content_range: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, SourceError>>,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_range", &self.content_range)
            .field("body", &"{ ... }")
            .finish()
    }
}

/// Minimal async HTTP interface used by the fetch engine.
pub trait RangeSource: Send + Sync {
    /// Issue a header-only request and report the advertised length.
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbeResponse, SourceError>> + Send;

    /// Issue a GET restricted to `range` (`Range: bytes=start-end`).
    ///
    /// Implementations return whatever status the server sent; validating
    /// partial-content semantics is the caller's job.
    fn fetch_range(
        &self,
        url: &str,
        range: &ByteRange,
    ) -> impl Future<Output = Result<RangeResponse, SourceError>> + Send;
}

/// Production range source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestSource {
    client: reqwest::Client,
}

impl ReqwestSource {
    /// Create a source with a default client.
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hermes-downloader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

fn header_str(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

impl RangeSource for ReqwestSource {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, SourceError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        // Read the header directly: the body of a HEAD response is always empty.
        let headers = response.headers();
        let content_length = header_str(headers, CONTENT_LENGTH).and_then(|s| s.parse::<u64>().ok());

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            content_length,
            accept_ranges: header_str(headers, ACCEPT_RANGES),
        })
    }

    async fn fetch_range(&self, url: &str, range: &ByteRange) -> Result<RangeResponse, SourceError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let content_range = header_str(response.headers(), CONTENT_RANGE);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SourceError::Body(e.to_string())));

        Ok(RangeResponse {
            status,
            content_range,
            body: Box::pin(body),
        })
    }
}
