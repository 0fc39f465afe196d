use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::storage::{ImageInsert, ImageRecord, ImageStore, SearchParams, SearchResults};
use crate::StorageError;

/// In-memory image store.
///
/// Applies the same (url, page_url) upsert-and-fill semantics as the MySQL
/// repository. Used by the integration tests and handy for dry runs.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredImage>>,
}

struct StoredImage {
    record: ImageRecord,
    thumb_blob: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (tests)
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn insert_image(&self, record: ImageInsert) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;

        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.record.url == record.url && r.record.page_url == record.page_url)
        {
            let rec = &mut existing.record;
            fill_str(&mut rec.filename, &record.filename);
            fill_str(&mut rec.alt, &record.alt);
            fill_str(&mut rec.title, &record.title);
            fill_str(&mut rec.format, &record.format);
            fill_str(&mut rec.thumb_path, &record.thumb_path);
            fill_str(&mut rec.thumb_mime, &record.thumb_mime);
            fill_dim(&mut rec.width, record.width);
            fill_dim(&mut rec.height, record.height);
            if existing.thumb_blob.is_none() && !record.thumb_blob.is_empty() {
                existing.thumb_blob = Some(record.thumb_blob);
            }
            return Ok(());
        }

        let id = rows.len() as u64 + 1;
        rows.push(StoredImage {
            record: ImageRecord {
                id,
                url: record.url,
                page_url: record.page_url,
                filename: some_if_not_empty(&record.filename),
                alt: some_if_not_empty(&record.alt),
                title: some_if_not_empty(&record.title),
                width: some_if_not_zero(record.width),
                height: some_if_not_zero(record.height),
                format: some_if_not_empty(&record.format),
                thumb_path: some_if_not_empty(&record.thumb_path),
                thumb_mime: some_if_not_empty(&record.thumb_mime),
                created_at: Utc::now(),
            },
            thumb_blob: if record.thumb_blob.is_empty() {
                None
            } else {
                Some(record.thumb_blob)
            },
        });
        Ok(())
    }

    async fn get_image(&self, id: u64) -> Result<Option<ImageRecord>, StorageError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|r| r.record.id == id)
            .map(|r| r.record.clone()))
    }

    async fn get_thumb(&self, id: u64) -> Result<Option<(String, Vec<u8>)>, StorageError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|r| r.record.id == id).map(|r| {
            (
                r.record
                    .thumb_mime
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                r.thumb_blob.clone().unwrap_or_default(),
            )
        }))
    }

    async fn search(&self, params: SearchParams) -> Result<SearchResults, StorageError> {
        let p = params.normalized();
        let rows = self.rows.lock().await;

        let mut matched: Vec<&ImageRecord> = rows
            .iter()
            .map(|r| &r.record)
            .filter(|r| matches(r, &p))
            .collect();
        // newest first, like the SQL read side
        matched.sort_by(|a, b| b.id.cmp(&a.id));

        let total = matched.len() as i64;
        let offset = ((p.page - 1) * p.page_size) as usize;
        let records = matched
            .into_iter()
            .skip(offset)
            .take(p.page_size as usize)
            .cloned()
            .collect();

        Ok(SearchResults { records, total })
    }
}

fn matches(r: &ImageRecord, p: &SearchParams) -> bool {
    fn contains(field: &Option<String>, needle: &str) -> bool {
        needle.is_empty()
            || field
                .as_deref()
                .map(|v| v.contains(needle))
                .unwrap_or(false)
    }
    if !p.url_contains.is_empty() && !r.url.contains(&p.url_contains) {
        return false;
    }
    if !p.page_url_contains.is_empty() && !r.page_url.contains(&p.page_url_contains) {
        return false;
    }
    if !contains(&r.filename, &p.filename_contains) {
        return false;
    }
    if !contains(&r.alt, &p.alt_contains) {
        return false;
    }
    if !contains(&r.title, &p.title_contains) {
        return false;
    }
    if !p.format_equals.is_empty() && r.format.as_deref() != Some(p.format_equals.as_str()) {
        return false;
    }
    let in_range = |value: Option<u32>, min: Option<u32>, max: Option<u32>| {
        let v = match value {
            Some(v) => v,
            None => return min.is_none() && max.is_none(),
        };
        min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
    };
    in_range(r.width, p.min_width, p.max_width) && in_range(r.height, p.min_height, p.max_height)
}

fn some_if_not_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn some_if_not_zero(n: u32) -> Option<u32> {
    if n == 0 {
        None
    } else {
        Some(n)
    }
}

fn fill_str(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn fill_dim(slot: &mut Option<u32>, value: u32) {
    if slot.is_none() && value != 0 {
        *slot = Some(value);
    }
}
