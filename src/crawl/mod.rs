//! Crawl coordination for Pictor
//!
//! Two bounded worker pools (pages/resources and images) communicate with a
//! single-owner coordinator over typed channels. The coordinator owns every
//! visited set and counter, so no locks guard crawl state; workers contribute
//! messages, not mutations.

mod coordinator;
mod workers;

use std::path::PathBuf;
use std::time::Duration;

pub use coordinator::run;

use crate::extract::ImageRef;
use crate::images::ProcessedImage;
use crate::{FetchError, ImageError};

/// Default cap on tasks spawned by a crawl (pools plus overhead).
pub const DEFAULT_MAX_TASKS: usize = 64;

/// Runtime tasks beyond the worker pools (coordinator, DB writer, browser
/// handler and friends) reserved out of the task budget.
const TASK_OVERHEAD: usize = 8;

/// Crawl configuration.
///
/// Zero values mean "use the default"; [`CrawlConfig::normalized`] applies
/// defaults and shrinks the pools to respect the task budget (image workers
/// shrink first, then page workers).
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Page/resource worker pool size
    pub workers: usize,
    /// Image worker pool size; defaults to `workers`
    pub image_workers: usize,
    /// Follow page links whose effective domain is outside the seed set
    pub follow_external: bool,
    /// Overall crawl deadline
    pub timeout: Duration,
    /// Hard cap on processed page/resource tasks
    pub max_pages: usize,
    /// Page tasks beyond this depth do not enqueue link children
    pub max_depth: u32,
    /// Best-effort cap on tasks spawned by the crawl
    pub max_tasks: usize,
    /// Render pages in a headless browser before extraction
    pub render: bool,
    pub user_agent: String,
    pub thumb_dir: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            image_workers: 8,
            follow_external: false,
            timeout: Duration::from_secs(120),
            max_pages: 1000,
            max_depth: 10,
            max_tasks: DEFAULT_MAX_TASKS,
            render: true,
            user_agent: String::new(),
            thumb_dir: PathBuf::from("./thumbnails"),
        }
    }
}

impl CrawlConfig {
    pub(crate) fn normalized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = 8;
        }
        if self.image_workers == 0 {
            self.image_workers = self.workers;
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(120);
        }
        if self.max_pages == 0 {
            self.max_pages = 1000;
        }
        if self.max_depth == 0 {
            self.max_depth = 10;
        }
        if self.max_tasks == 0 {
            self.max_tasks = DEFAULT_MAX_TASKS;
        }
        if self.thumb_dir.as_os_str().is_empty() {
            self.thumb_dir = PathBuf::from("./thumbnails");
        }

        let budget = self.max_tasks.saturating_sub(TASK_OVERHEAD).max(1);
        if self.workers + self.image_workers > budget {
            if self.workers > budget {
                self.workers = budget;
                self.image_workers = 0;
            } else {
                self.image_workers = budget - self.workers;
            }
            tracing::warn!(
                "adjusted pools to respect max-tasks: workers={} image_workers={}",
                self.workers,
                self.image_workers
            );
        }
        self
    }
}

/// What a crawl accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Page/resource results observed
    pub tasks_processed: usize,
    /// Distinct page/resource URLs ever enqueued
    pub urls_visited: usize,
    /// Distinct images ever enqueued
    pub unique_images: usize,
    /// True when the deadline fired before natural exhaustion
    pub cancelled: bool,
}

/// Kind of a fetch task; only page tasks yield page links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Page,
    Resource,
}

/// A unit of fetch work
#[derive(Debug, Clone)]
pub struct UrlTask {
    /// Canonical absolute URL
    pub url: String,
    pub depth: u32,
    pub kind: TaskKind,
}

/// Extraction output of a successfully fetched task
#[derive(Debug, Default)]
pub(crate) struct PageData {
    pub final_url: String,
    pub links: Vec<String>,
    pub resources: Vec<crate::extract::ResourceRef>,
    pub images: Vec<ImageRef>,
}

pub(crate) struct PageOutcome {
    pub task: UrlTask,
    pub result: std::result::Result<PageData, FetchError>,
}

pub(crate) struct ImageOutcome {
    pub reference: ImageRef,
    pub result: std::result::Result<ProcessedImage, ImageError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let cfg = CrawlConfig {
            workers: 0,
            image_workers: 0,
            timeout: Duration::ZERO,
            max_pages: 0,
            max_depth: 0,
            max_tasks: 0,
            thumb_dir: PathBuf::new(),
            ..Default::default()
        }
        .normalized();

        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.image_workers, 8);
        assert_eq!(cfg.timeout, Duration::from_secs(120));
        assert_eq!(cfg.max_pages, 1000);
        assert_eq!(cfg.max_depth, 10);
        assert_eq!(cfg.max_tasks, DEFAULT_MAX_TASKS);
        assert_eq!(cfg.thumb_dir, PathBuf::from("./thumbnails"));
    }

    #[test]
    fn test_image_workers_default_to_workers() {
        let cfg = CrawlConfig {
            workers: 3,
            image_workers: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.image_workers, 3);
    }

    #[test]
    fn test_budget_shrinks_image_workers_first() {
        let cfg = CrawlConfig {
            workers: 40,
            image_workers: 40,
            max_tasks: 64,
            ..Default::default()
        }
        .normalized();
        // budget = 64 - 8 = 56; workers keep 40, images get the rest
        assert_eq!(cfg.workers, 40);
        assert_eq!(cfg.image_workers, 16);
    }

    #[test]
    fn test_budget_shrinks_workers_when_needed() {
        let cfg = CrawlConfig {
            workers: 100,
            image_workers: 10,
            max_tasks: 64,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.workers, 56);
        assert_eq!(cfg.image_workers, 0);
    }

    #[test]
    fn test_budget_floor_of_one_worker() {
        let cfg = CrawlConfig {
            workers: 4,
            image_workers: 4,
            max_tasks: 2,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.image_workers, 0);
    }
}
