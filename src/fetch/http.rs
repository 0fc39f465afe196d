use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use crate::fetch::{with_deadline, FetchedPage, Fetcher};
use crate::FetchError;

/// Page/resource body cap. Images go through the image downloader, which has
/// its own (larger) cap.
const MAX_BODY_BYTES: usize = 10 << 20;

/// Plain HTTP fetcher.
///
/// Follows redirects, applies a 30 second per-request timeout, and reads at
/// most 10 MiB of body. The final URL after redirection is reported so scope
/// decisions use the page actually served.
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Http {
                url: String::new(),
                source: e,
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, deadline: Instant) -> Result<FetchedPage, FetchError> {
        with_deadline(deadline, url, async {
            let mut req = self
                .client
                .get(url)
                .header(
                    reqwest::header::ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                );
            if !self.user_agent.is_empty() {
                req = req.header(reqwest::header::USER_AGENT, &self.user_agent);
            }

            let mut resp = req.send().await.map_err(|e| FetchError::Http {
                url: url.to_string(),
                source: e,
            })?;

            let final_url = resp.url().to_string();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let mut body = Vec::new();
            while let Some(chunk) = resp.chunk().await.map_err(|e| FetchError::Http {
                url: url.to_string(),
                source: e,
            })? {
                let remaining = MAX_BODY_BYTES - body.len();
                if chunk.len() >= remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    break;
                }
                body.extend_from_slice(&chunk);
            }

            Ok(FetchedPage {
                final_url,
                content_type,
                body,
                rendered: false,
            })
        })
        .await
    }
}
