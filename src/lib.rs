//! Pictor: a concurrent image crawler
//!
//! This crate implements a web crawler that discovers images on user-provided
//! seed pages, downloads them, produces bounded-width thumbnails, and persists
//! the metadata and thumbnails to a relational store for later browsing.

pub mod crawl;
pub mod extract;
pub mod fetch;
pub mod images;
pub mod storage;
pub mod url;

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Pictor operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("image error: {0}")]
    Image(#[from] ImageError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crawl deadline expired")]
    Cancelled,
}

/// Startup-fatal configuration errors
///
/// These are the only errors that abort a crawl before it starts; everything
/// else is reported per URL and suppressed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no seed URLs provided")]
    NoSeeds,

    #[error("database open failed: {0}")]
    DatabaseOpen(String),
}

/// Per-URL fetch failures (network, HTTP status, timeout, browser)
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("fetch timed out for {url}")]
    Timeout { url: String },

    #[error("browser error for {url}: {message}")]
    Browser { url: String, message: String },

    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),
}

/// Per-image download/decode/thumbnail failures
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid data url")]
    InvalidDataUrl,

    #[error("data url payload decode failed: {0}")]
    DataDecode(String),

    #[error("image download failed for {url}: {source}")]
    Download { url: String, source: reqwest::Error },

    #[error("image download timed out for {url}")]
    Timeout { url: String },

    // The sniff makes mis-served HTML error pages diagnosable.
    #[error("image decode failed (content-type={content_type}, sniff={sniff:?}): {source}")]
    Decode {
        content_type: String,
        sniff: String,
        source: image::ImageError,
    },

    #[error("thumbnail encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("thumbnail write failed at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Per-record persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("insert timed out for {url}")]
    Timeout { url: String },
}

/// Result type alias for Pictor operations
pub type Result<T> = std::result::Result<T, CrawlError>;

// Re-export commonly used types
pub use crawl::{run, CrawlConfig, CrawlSummary};
pub use storage::{ImageInsert, ImageRecord, ImageStore, SearchParams};
