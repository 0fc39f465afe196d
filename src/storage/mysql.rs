use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::storage::{ImageInsert, ImageRecord, ImageStore, SearchParams, SearchResults};
use crate::StorageError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id          BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    url         TEXT NOT NULL,
    page_url    TEXT NOT NULL,
    filename    VARCHAR(255) NULL,
    alt         TEXT NULL,
    title       TEXT NULL,
    width       INT UNSIGNED NULL,
    height      INT UNSIGNED NULL,
    format      VARCHAR(16) NULL,
    thumb_path  VARCHAR(512) NULL,
    thumb_mime  VARCHAR(64) NULL,
    thumb_blob  MEDIUMBLOB NULL,
    created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE KEY uq_images_url_page (url(400), page_url(300))
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
"#;

/// MySQL-backed image repository.
///
/// Connects a bounded pool, verifies connectivity, and creates the `images`
/// table when it does not exist. The (url, page_url) unique key is the
/// serialization point for concurrent inserts.
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    pub async fn connect(dsn: &str) -> Result<Self, StorageError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ImageStore for MySqlRepository {
    async fn insert_image(&self, record: ImageInsert) -> Result<(), StorageError> {
        // Keep first-seen metadata; only fill columns that are still NULL.
        let q = r#"
INSERT INTO images
    (url, page_url, filename, alt, title, width, height, format, thumb_path, thumb_mime, thumb_blob)
VALUES
    (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    thumb_blob = COALESCE(images.thumb_blob, VALUES(thumb_blob)),
    thumb_path = COALESCE(images.thumb_path, VALUES(thumb_path)),
    thumb_mime = COALESCE(images.thumb_mime, VALUES(thumb_mime)),
    width      = COALESCE(images.width, VALUES(width)),
    height     = COALESCE(images.height, VALUES(height)),
    format     = COALESCE(images.format, VALUES(format)),
    filename   = COALESCE(images.filename, VALUES(filename)),
    alt        = COALESCE(images.alt, VALUES(alt)),
    title      = COALESCE(images.title, VALUES(title))
"#;
        sqlx::query(q)
            .bind(&record.url)
            .bind(&record.page_url)
            .bind(null_if_empty(&record.filename))
            .bind(null_if_empty(&record.alt))
            .bind(null_if_empty(&record.title))
            .bind(null_if_zero(record.width))
            .bind(null_if_zero(record.height))
            .bind(null_if_empty(&record.format))
            .bind(null_if_empty(&record.thumb_path))
            .bind(null_if_empty(&record.thumb_mime))
            .bind(&record.thumb_blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_image(&self, id: u64) -> Result<Option<ImageRecord>, StorageError> {
        let rec = sqlx::query_as::<_, ImageRecord>(
            "SELECT id, url, page_url, filename, alt, title, width, height, format, \
             thumb_path, thumb_mime, created_at FROM images WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn get_thumb(&self, id: u64) -> Result<Option<(String, Vec<u8>)>, StorageError> {
        let row = sqlx::query_as::<_, (Option<String>, Option<Vec<u8>>)>(
            "SELECT thumb_mime, thumb_blob FROM images WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(mime, blob)| {
            (
                mime.unwrap_or_else(|| "application/octet-stream".to_string()),
                blob.unwrap_or_default(),
            )
        }))
    }

    async fn search(&self, params: SearchParams) -> Result<SearchResults, StorageError> {
        let p = params.normalized();

        let mut count_qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM images WHERE 1=1");
        push_filters(&mut count_qb, &p);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<MySql>::new(
            "SELECT id, url, page_url, filename, alt, title, width, height, format, \
             thumb_path, thumb_mime, created_at FROM images WHERE 1=1",
        );
        push_filters(&mut qb, &p);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(p.page_size);
        qb.push(" OFFSET ");
        qb.push_bind((p.page - 1) * p.page_size);

        let records = qb
            .build_query_as::<ImageRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(SearchResults { records, total })
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, MySql>, p: &SearchParams) {
    fn like(qb: &mut QueryBuilder<'_, MySql>, field: &str, value: &str) {
        if !value.is_empty() {
            qb.push(format!(" AND {field} LIKE "));
            qb.push_bind(format!("%{value}%"));
        }
    }
    like(qb, "url", &p.url_contains);
    like(qb, "page_url", &p.page_url_contains);
    like(qb, "filename", &p.filename_contains);
    like(qb, "alt", &p.alt_contains);
    like(qb, "title", &p.title_contains);

    if !p.format_equals.is_empty() {
        qb.push(" AND format = ");
        qb.push_bind(p.format_equals.clone());
    }
    if let Some(v) = p.min_width {
        qb.push(" AND width >= ");
        qb.push_bind(v);
    }
    if let Some(v) = p.max_width {
        qb.push(" AND width <= ");
        qb.push_bind(v);
    }
    if let Some(v) = p.min_height {
        qb.push(" AND height >= ");
        qb.push_bind(v);
    }
    if let Some(v) = p.max_height {
        qb.push(" AND height <= ");
        qb.push_bind(v);
    }
}

fn null_if_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn null_if_zero(n: u32) -> Option<u32> {
    if n == 0 {
        None
    } else {
        Some(n)
    }
}
