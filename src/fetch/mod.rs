//! Fetch capability for Pictor
//!
//! One contract hides the choice between a raw HTTP GET and a rendered-DOM
//! fetch in a headless browser. Page tasks prefer the rendered variant and
//! fall back to HTTP; resource tasks always use HTTP.

mod http;
mod rendered;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::FetchError;

pub use http::HttpFetcher;
pub use rendered::RenderedFetcher;

/// A fetched document
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// Content-Type header (or a rendered-origin marker)
    pub content_type: String,
    /// Response body, capped by the fetcher
    pub body: Vec<u8>,
    /// True when the body is DOM-rendered HTML rather than raw bytes
    pub rendered: bool,
}

/// The fetch capability.
///
/// `deadline` is the root crawl deadline; implementations must not block past
/// it. Fetchers are shared across workers, so implementations are `Send +
/// Sync` and internally synchronized.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, deadline: Instant) -> Result<FetchedPage, FetchError>;

    /// Releases underlying transports. Default is a no-op.
    async fn close(&self) {}
}

pub(crate) async fn with_deadline<T, F>(
    deadline: Instant,
    url: &str,
    fut: F,
) -> Result<T, FetchError>
where
    F: std::future::Future<Output = Result<T, FetchError>> + Send,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
        }),
    }
}
