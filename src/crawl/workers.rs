use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};

use crate::crawl::{ImageOutcome, PageData, PageOutcome, TaskKind, UrlTask};
use crate::extract::{extract_css, extract_html, ImageRef, ResourceKind, ResourceRef};
use crate::fetch::Fetcher;
use crate::images::Downloader;
use crate::storage::{ImageInsert, ImageStore};
use crate::url::{filename_from_url, resolve_url, strip_query};
use crate::{FetchError, StorageError};

/// Per-image child deadline derived from the root deadline.
const IMAGE_TASK_TIMEOUT: Duration = Duration::from_secs(45);

/// Per-insert child deadline for the DB writer.
const DB_INSERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns the page/resource worker pool.
///
/// Page-kind tasks prefer the DOM fetcher and fall back to plain HTTP when it
/// fails; resource-kind tasks always use HTTP. Every channel operation is
/// raced against the root deadline so no worker outlives cancellation.
pub(crate) fn spawn_page_workers(
    set: &mut JoinSet<()>,
    n: usize,
    jobs: async_channel::Receiver<UrlTask>,
    results: mpsc::Sender<PageOutcome>,
    dom_fetcher: Arc<dyn Fetcher>,
    http_fetcher: Arc<dyn Fetcher>,
    dom_is_http: bool,
    deadline: Instant,
) {
    for _ in 0..n {
        let jobs = jobs.clone();
        let results = results.clone();
        let dom_fetcher = dom_fetcher.clone();
        let http_fetcher = http_fetcher.clone();
        set.spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = sleep_until(deadline) => return,
                    t = jobs.recv() => match t {
                        Ok(t) => t,
                        Err(_) => return,
                    },
                };

                let result = process_task(
                    &task,
                    dom_fetcher.as_ref(),
                    http_fetcher.as_ref(),
                    dom_is_http,
                    deadline,
                )
                .await;

                let outcome = PageOutcome { task, result };
                let sent = tokio::select! {
                    _ = sleep_until(deadline) => return,
                    r = results.send(outcome) => r,
                };
                if sent.is_err() {
                    return;
                }
            }
        });
    }
}

async fn process_task(
    task: &UrlTask,
    dom_fetcher: &dyn Fetcher,
    http_fetcher: &dyn Fetcher,
    dom_is_http: bool,
    deadline: Instant,
) -> Result<PageData, FetchError> {
    let fetched = match task.kind {
        TaskKind::Page => match dom_fetcher.fetch(&task.url, deadline).await {
            Ok(page) => page,
            Err(e) if !dom_is_http => {
                tracing::debug!("rendered fetch failed for {} ({e}), retrying over http", task.url);
                http_fetcher.fetch(&task.url, deadline).await?
            }
            Err(e) => return Err(e),
        },
        TaskKind::Resource => http_fetcher.fetch(&task.url, deadline).await?,
    };

    let final_url = if fetched.final_url.is_empty() {
        task.url.clone()
    } else {
        fetched.final_url.clone()
    };

    if looks_like_html(&fetched.content_type, &fetched.body) {
        let ext = extract_html(&final_url, &fetched.body);
        return Ok(PageData {
            final_url,
            links: ext.links,
            resources: ext.resources,
            images: ext.images,
        });
    }

    if looks_like_css(&fetched.content_type, &final_url) {
        let css = String::from_utf8_lossy(&fetched.body);
        let (imports, image_urls) = extract_css(&css);

        let resources = imports
            .iter()
            .map(|imp| resolve_url(&final_url, imp))
            .filter(|u| !u.is_empty())
            .map(|url| ResourceRef {
                url,
                kind: ResourceKind::Css,
                page_url: final_url.clone(),
            })
            .collect();
        let images = image_urls
            .iter()
            .map(|u| resolve_url(&final_url, u))
            .filter(|u| !u.is_empty())
            .map(|url| ImageRef {
                filename: filename_from_url(&url),
                page_url: final_url.clone(),
                url,
                ..Default::default()
            })
            .collect();

        return Ok(PageData {
            final_url,
            links: Vec::new(),
            resources,
            images,
        });
    }

    // JS and other resources: nothing to extract
    Ok(PageData {
        final_url,
        ..Default::default()
    })
}

/// Spawns the image worker pool.
///
/// With zero workers a single drain task still consumes the queue so senders
/// never wedge; downloaded images are dropped.
pub(crate) fn spawn_image_workers(
    set: &mut JoinSet<()>,
    n: usize,
    jobs: async_channel::Receiver<ImageRef>,
    results: mpsc::Sender<ImageOutcome>,
    downloader: Arc<Downloader>,
    deadline: Instant,
) {
    if n == 0 {
        set.spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => return,
                    r = jobs.recv() => if r.is_err() { return },
                }
            }
        });
        return;
    }

    for _ in 0..n {
        let jobs = jobs.clone();
        let results = results.clone();
        let downloader = downloader.clone();
        set.spawn(async move {
            loop {
                let reference = tokio::select! {
                    _ = sleep_until(deadline) => return,
                    r = jobs.recv() => match r {
                        Ok(r) => r,
                        Err(_) => return,
                    },
                };

                let child_deadline = deadline.min(Instant::now() + IMAGE_TASK_TIMEOUT);
                let result = downloader
                    .download_and_thumbnail(&reference.url, child_deadline)
                    .await;

                let outcome = ImageOutcome { reference, result };
                let sent = tokio::select! {
                    _ = sleep_until(deadline) => return,
                    r = results.send(outcome) => r,
                };
                if sent.is_err() {
                    return;
                }
            }
        });
    }
}

/// Spawns the single DB writer.
///
/// Reads every insert until the channel closes; each upsert gets a short
/// child deadline so a stuck database cannot hold shutdown hostage. Errors
/// are logged and swallowed.
pub(crate) fn spawn_db_writer(
    store: Arc<dyn ImageStore>,
    mut inserts: mpsc::Receiver<ImageInsert>,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = inserts.recv().await {
            let insert_deadline = deadline.min(Instant::now() + DB_INSERT_TIMEOUT);
            let url = record.url.clone();
            match tokio::time::timeout_at(insert_deadline, store.insert_image(record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("db insert error: {e}"),
                Err(_) => {
                    let e = StorageError::Timeout { url };
                    tracing::warn!("db insert error: {e}");
                }
            }
        }
    })
}

pub(crate) fn looks_like_html(content_type: &str, body: &[u8]) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("text/html") || ct.contains("application/xhtml") {
        return true;
    }
    let sniff = String::from_utf8_lossy(&body[..body.len().min(256)]).to_ascii_lowercase();
    sniff.contains("<html") || sniff.contains("<!doctype html")
}

pub(crate) fn looks_like_css(content_type: &str, url: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("text/css") {
        return true;
    }
    strip_query(url).to_ascii_lowercase().ends_with(".css")
}
