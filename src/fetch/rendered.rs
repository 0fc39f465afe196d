use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fetch::{with_deadline, FetchedPage, Fetcher};
use crate::FetchError;

/// Rendered-DOM fetcher backed by a shared headless browser.
///
/// One browser process is launched up front; each fetch opens a tab,
/// navigates, waits for the document plus a fixed settle delay, and returns
/// the rendered outer HTML. The content type carries a rendered-origin
/// marker so downstream sniffing treats the body as HTML.
pub struct RenderedFetcher {
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    settle: Duration,
}

impl RenderedFetcher {
    /// Launches the shared browser. The configured user agent is applied via
    /// a launch argument, so it covers every navigation.
    pub async fn launch(user_agent: &str) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");
        if !user_agent.is_empty() {
            builder = builder.arg(format!("--user-agent={user_agent}"));
        }
        let config = builder.build().map_err(FetchError::BrowserUnavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::BrowserUnavailable(e.to_string()))?;

        // The handler drives the CDP websocket; it must be polled for the
        // lifetime of the browser.
        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
            settle: Duration::from_millis(1500),
        })
    }
}

#[async_trait]
impl Fetcher for RenderedFetcher {
    async fn fetch(&self, url: &str, deadline: Instant) -> Result<FetchedPage, FetchError> {
        with_deadline(deadline, url, async {
            let browser_err = |message: String| FetchError::Browser {
                url: url.to_string(),
                message,
            };

            let page = {
                let guard = self.browser.lock().await;
                let browser = guard
                    .as_ref()
                    .ok_or_else(|| FetchError::BrowserUnavailable("browser closed".to_string()))?;
                browser
                    .new_page(url)
                    .await
                    .map_err(|e| browser_err(e.to_string()))?
            };

            let result = async {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| browser_err(e.to_string()))?;
                tokio::time::sleep(self.settle).await;

                let final_url = page
                    .url()
                    .await
                    .map_err(|e| browser_err(e.to_string()))?
                    .unwrap_or_else(|| url.to_string());
                let html = page
                    .content()
                    .await
                    .map_err(|e| browser_err(e.to_string()))?;

                Ok(FetchedPage {
                    final_url,
                    content_type: "text/html; rendered=cdp".to_string(),
                    body: html.into_bytes(),
                    rendered: true,
                })
            }
            .await;

            if let Err(e) = page.close().await {
                tracing::debug!("failed to close tab for {url}: {e}");
            }
            result
        })
        .await
    }

    async fn close(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                tracing::debug!("browser close failed: {e}");
            }
        }
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
    }
}
