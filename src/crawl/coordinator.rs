use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::crawl::workers::{spawn_db_writer, spawn_image_workers, spawn_page_workers};
use crate::crawl::{CrawlConfig, CrawlSummary, ImageOutcome, PageOutcome, TaskKind, UrlTask};
use crate::extract::ImageRef;
use crate::fetch::{Fetcher, HttpFetcher, RenderedFetcher};
use crate::images::Downloader;
use crate::storage::{ImageInsert, ImageStore};
use crate::url::{allowed_domains, canonicalize, filename_from_url, image_key, is_external};
use crate::{ConfigError, CrawlError};

/// Runs a crawl over the given seeds and returns its summary.
///
/// The coordinator is the single owner of the visited sets and counters. It
/// exits when every outstanding task and image has completed, or when the
/// deadline fires; either way the queues are closed, the pools are joined,
/// and the DB writer drains before this function returns.
pub async fn run(
    seeds: &[String],
    store: Arc<dyn ImageStore>,
    config: CrawlConfig,
) -> Result<CrawlSummary, CrawlError> {
    if seeds.is_empty() {
        return Err(ConfigError::NoSeeds.into());
    }
    let cfg = config.normalized();
    let deadline = Instant::now() + cfg.timeout;

    let allowed = allowed_domains(seeds);

    let http_fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&cfg.user_agent)?);
    let (dom_fetcher, dom_is_http): (Arc<dyn Fetcher>, bool) = if cfg.render {
        match RenderedFetcher::launch(&cfg.user_agent).await {
            Ok(rendered) => (Arc::new(rendered), false),
            Err(e) => {
                tracing::warn!("headless browser unavailable ({e}), falling back to HTTP fetcher");
                (http_fetcher.clone(), true)
            }
        }
    } else {
        (http_fetcher.clone(), true)
    };

    let downloader = Arc::new(Downloader::new(&cfg.user_agent, &cfg.thumb_dir)?);

    // Queue capacities scale with the pools; bounded backpressure is wanted.
    let (jobs_tx, jobs_rx) = async_channel::bounded::<UrlTask>(cfg.workers * 4);
    let (page_tx, mut page_rx) = mpsc::channel::<PageOutcome>(cfg.workers * 4);
    let (img_jobs_tx, img_jobs_rx) =
        async_channel::bounded::<ImageRef>(cfg.image_workers.max(1) * 8);
    let (img_tx, mut img_rx) = mpsc::channel::<ImageOutcome>(cfg.image_workers.max(1) * 8);
    let (db_tx, db_rx) = mpsc::channel::<ImageInsert>(256);

    let mut pools = JoinSet::new();
    spawn_page_workers(
        &mut pools,
        cfg.workers,
        jobs_rx.clone(),
        page_tx,
        dom_fetcher.clone(),
        http_fetcher.clone(),
        dom_is_http,
        deadline,
    );
    spawn_image_workers(
        &mut pools,
        cfg.image_workers,
        img_jobs_rx.clone(),
        img_tx,
        downloader,
        deadline,
    );
    let db_writer = spawn_db_writer(store, db_rx, deadline);

    // With no image pool the drain task discards queued images and no result
    // ever comes back, so enqueued images must not count as outstanding work.
    let images_enabled = cfg.image_workers > 0;

    // All crawl state lives here, owned by this task alone.
    let mut visited: HashSet<String> = HashSet::new();
    let mut visited_images: HashSet<String> = HashSet::new();
    let mut active_tasks: usize = 0;
    let mut active_images: usize = 0;
    let mut processed_tasks: usize = 0;

    for seed in seeds {
        let url = canonicalize(seed);
        if url.is_empty() {
            tracing::warn!("skipping invalid seed: {seed}");
            continue;
        }
        if !visited.insert(url.clone()) {
            continue;
        }
        let task = UrlTask {
            url,
            depth: 0,
            kind: TaskKind::Page,
        };
        if send_job(&jobs_tx, task, deadline).await {
            active_tasks += 1;
        }
    }

    tracing::info!(
        "crawl start: workers={} image_workers={} follow_external={} render={} timeout={:?}",
        cfg.workers,
        cfg.image_workers,
        cfg.follow_external,
        cfg.render,
        cfg.timeout
    );

    let mut cancelled = false;
    loop {
        if active_tasks == 0 && active_images == 0 {
            break;
        }

        tokio::select! {
            _ = sleep_until(deadline) => {
                tracing::info!("crawl deadline reached");
                cancelled = true;
                break;
            }
            Some(outcome) = page_rx.recv() => {
                active_tasks -= 1;
                processed_tasks += 1;

                let data = match outcome.result {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!("fetch error: {}: {e}", outcome.task.url);
                        continue;
                    }
                };
                if processed_tasks >= cfg.max_pages {
                    continue;
                }

                let scope_base = if data.final_url.is_empty() {
                    outcome.task.url.clone()
                } else {
                    data.final_url.clone()
                };

                // Page links: subject to depth and external scope.
                if outcome.task.kind == TaskKind::Page && outcome.task.depth < cfg.max_depth {
                    for link in &data.links {
                        let url = canonicalize(link);
                        if url.is_empty() || visited.contains(&url) {
                            continue;
                        }
                        if !cfg.follow_external && is_external(&scope_base, &url, &allowed) {
                            continue;
                        }
                        visited.insert(url.clone());
                        let task = UrlTask {
                            url,
                            depth: outcome.task.depth + 1,
                            kind: TaskKind::Page,
                        };
                        if send_job(&jobs_tx, task, deadline).await {
                            active_tasks += 1;
                        }
                    }
                }

                // Resources (CSS/JS): scope filtering does not apply, CDNs
                // are expected.
                for resource in &data.resources {
                    let url = canonicalize(&resource.url);
                    if url.is_empty() || visited.contains(&url) {
                        continue;
                    }
                    visited.insert(url.clone());
                    let task = UrlTask {
                        url,
                        depth: outcome.task.depth,
                        kind: TaskKind::Resource,
                    };
                    if send_job(&jobs_tx, task, deadline).await {
                        active_tasks += 1;
                    }
                }

                // Images: dedup by key, no scope filtering.
                for image in data.images {
                    let key = image_key(&image.url);
                    if key.is_empty() || visited_images.contains(&key) {
                        continue;
                    }
                    visited_images.insert(key);
                    if send_job(&img_jobs_tx, image, deadline).await && images_enabled {
                        active_images += 1;
                    }
                }
            }
            Some(outcome) = img_rx.recv() => {
                active_images -= 1;
                match outcome.result {
                    Err(e) => {
                        tracing::warn!("image error: {}: {e}", short_url(&outcome.reference.url));
                    }
                    Ok(processed) => {
                        let filename = if outcome.reference.filename.trim().is_empty() {
                            filename_from_url(&outcome.reference.url)
                        } else {
                            outcome.reference.filename.clone()
                        };
                        let record = ImageInsert {
                            url: outcome.reference.url,
                            page_url: outcome.reference.page_url,
                            filename,
                            alt: outcome.reference.alt,
                            title: outcome.reference.title,
                            width: processed.width,
                            height: processed.height,
                            format: processed.format,
                            thumb_path: processed.thumb_path.to_string_lossy().into_owned(),
                            thumb_mime: processed.thumb_mime,
                            thumb_blob: processed.thumb_bytes,
                        };
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = db_tx.send(record) => {}
                        }
                    }
                }
            }
            else => break,
        }
    }

    // Shutdown order matters: close the job queues so workers return, join
    // the pools, then close the insert channel and wait for the writer.
    jobs_tx.close();
    img_jobs_tx.close();
    while pools.join_next().await.is_some() {}

    drop(db_tx);
    let _ = db_writer.await;

    dom_fetcher.close().await;
    http_fetcher.close().await;

    tracing::info!(
        "crawl finished: tasks_processed={} visited_urls={} unique_images={}",
        processed_tasks,
        visited.len(),
        visited_images.len()
    );

    Ok(CrawlSummary {
        tasks_processed: processed_tasks,
        urls_visited: visited.len(),
        unique_images: visited_images.len(),
        cancelled,
    })
}

/// Sends a job unless the deadline fires first. Returns whether the job was
/// actually enqueued, so the caller only counts successful sends.
async fn send_job<T>(tx: &async_channel::Sender<T>, value: T, deadline: Instant) -> bool {
    tokio::select! {
        _ = sleep_until(deadline) => false,
        r = tx.send(value) => r.is_ok(),
    }
}

/// Data URLs can be megabytes; keep log lines bounded.
fn short_url(url: &str) -> &str {
    match url.char_indices().nth(96) {
        Some((i, _)) => &url[..i],
        None => url,
    }
}
