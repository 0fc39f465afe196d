use async_trait::async_trait;

use crate::storage::{ImageInsert, ImageRecord, SearchParams, SearchResults};
use crate::StorageError;

/// The image repository capability.
///
/// `insert_image` must be an idempotent upsert keyed by (url, page_url):
/// first-seen text fields and dimensions win, but previously-absent values
/// are filled from later inserts (never overwrite present with absent). The
/// read side serves the browsing UI.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn insert_image(&self, record: ImageInsert) -> Result<(), StorageError>;

    async fn get_image(&self, id: u64) -> Result<Option<ImageRecord>, StorageError>;

    /// Returns (mime, blob); the mime defaults to `application/octet-stream`
    /// when the stored value is absent.
    async fn get_thumb(&self, id: u64) -> Result<Option<(String, Vec<u8>)>, StorageError>;

    async fn search(&self, params: SearchParams) -> Result<SearchResults, StorageError>;
}
