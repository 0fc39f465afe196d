//! Image persistence for Pictor
//!
//! The crawl talks to an [`ImageStore`] capability; the production
//! implementation is [`MySqlRepository`], and [`MemoryStore`] backs tests and
//! dry runs. Records are keyed by (url, page_url) and upserts are idempotent.

mod memory;
mod mysql;
mod traits;

pub use memory::MemoryStore;
pub use mysql::MySqlRepository;
pub use traits::ImageStore;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything needed to persist one discovered image.
///
/// Empty strings and zero dimensions map to absent (NULL) values at the
/// store boundary.
#[derive(Debug, Clone, Default)]
pub struct ImageInsert {
    pub url: String,
    pub page_url: String,
    pub filename: String,
    pub alt: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub thumb_path: String,
    pub thumb_mime: String,
    pub thumb_blob: Vec<u8>,
}

/// A persisted image row.
///
/// The thumbnail blob is intentionally omitted from list/search reads (it can
/// be large); [`ImageStore::get_thumb`] serves it separately.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ImageRecord {
    pub id: u64,
    pub url: String,
    pub page_url: String,
    pub filename: Option<String>,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub thumb_path: Option<String>,
    pub thumb_mime: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters for the read-side search contract
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub url_contains: String,
    pub page_url_contains: String,
    pub filename_contains: String,
    pub alt_contains: String,
    pub title_contains: String,
    pub format_equals: String,
    pub min_width: Option<u32>,
    pub max_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_height: Option<u32>,
    /// 1-based page number
    pub page: u32,
    /// Defaults to 40, clamped to [1, 200]
    pub page_size: u32,
}

impl SearchParams {
    pub(crate) fn normalized(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.page_size == 0 || self.page_size > 200 {
            self.page_size = 40;
        }
        self
    }
}

/// One page of search results plus the unpaged total
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub records: Vec<ImageRecord>,
    pub total: i64,
}
