//! Image download and thumbnailing for Pictor
//!
//! Downloads raster, SVG and `data:` images, decodes them, produces a
//! bounded-width thumbnail, writes it to the thumbnail directory and returns
//! the metadata needed for persistence.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::url::{filename_from_url, strip_query};
use crate::ImageError;

/// Thumbnails never exceed this width; aspect ratio is preserved.
pub const THUMB_MAX_WIDTH: u32 = 200;

const JPEG_QUALITY: u8 = 85;
const MAX_IMAGE_BYTES: usize = 30 << 20;

/// A downloaded and thumbnailed image
#[derive(Debug, Clone, Default)]
pub struct ProcessedImage {
    pub original_url: String,
    /// Filename hint from the URL path, empty when absent
    pub filename: String,
    /// Detected format, lowercased ("png", "jpeg", "svg", ...)
    pub format: String,
    /// Source width; 0 when unknown (e.g. headerless SVG)
    pub width: u32,
    /// Source height; 0 when unknown
    pub height: u32,
    /// Where the thumbnail was written
    pub thumb_path: PathBuf,
    pub thumb_mime: String,
    pub thumb_bytes: Vec<u8>,
}

/// Downloads images and produces thumbnails.
///
/// Shared across the image worker pool; holds one HTTP client.
pub struct Downloader {
    client: Client,
    user_agent: String,
    thumb_dir: PathBuf,
    max_bytes: usize,
}

impl Downloader {
    pub fn new(user_agent: &str, thumb_dir: &Path) -> Result<Self, ImageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(40))
            .build()
            .map_err(|e| ImageError::Download {
                url: String::new(),
                source: e,
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            thumb_dir: thumb_dir.to_path_buf(),
            max_bytes: MAX_IMAGE_BYTES,
        })
    }

    /// Downloads `url` (http(s) or `data:`), decodes it, writes a thumbnail
    /// to the thumbnail directory and returns the metadata.
    ///
    /// Raster inputs are scaled to at most [`THUMB_MAX_WIDTH`] with an
    /// approximate-bilinear filter (never upscaled) and re-encoded as JPEG.
    /// SVG inputs are persisted as-is, with a width attribute injected when
    /// the root tag lacks one. The thumbnail filename is the sha256 of the
    /// source URL, so identical inputs land on identical paths.
    pub async fn download_and_thumbnail(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<ProcessedImage, ImageError> {
        tokio::fs::create_dir_all(&self.thumb_dir)
            .await
            .map_err(|e| ImageError::Write {
                path: self.thumb_dir.clone(),
                source: e,
            })?;

        if url.to_ascii_lowercase().starts_with("data:") {
            let (bytes, mime) = parse_data_url(url)?;
            return self.process_bytes(url, &bytes, &mime).await;
        }

        let (bytes, content_type) = tokio::time::timeout_at(deadline, self.download(url))
            .await
            .map_err(|_| ImageError::Timeout {
                url: url.to_string(),
            })??;

        self.process_bytes(url, &bytes, &content_type).await
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, String), ImageError> {
        let download_err = |source: reqwest::Error| ImageError::Download {
            url: url.to_string(),
            source,
        };

        let mut req = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "image/*,*/*;q=0.8");
        if !self.user_agent.is_empty() {
            req = req.header(reqwest::header::USER_AGENT, &self.user_agent);
        }

        let mut resp = req.send().await.map_err(download_err)?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(download_err)? {
            let remaining = self.max_bytes - bytes.len();
            if chunk.len() >= remaining {
                bytes.extend_from_slice(&chunk[..remaining]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }

    async fn process_bytes(
        &self,
        src_url: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ProcessedImage, ImageError> {
        let lct = content_type.to_ascii_lowercase();
        let stripped = strip_query(src_url).to_ascii_lowercase();
        let head = &bytes[..bytes.len().min(256)];
        if lct.contains("image/svg")
            || stripped.ends_with(".svg")
            || head.windows(4).any(|w| w == b"<svg")
        {
            return self.process_svg(src_url, bytes).await;
        }
        self.process_raster(src_url, bytes, content_type).await
    }

    async fn process_raster(
        &self,
        src_url: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ProcessedImage, ImageError> {
        let img = image::load_from_memory(bytes).map_err(|e| {
            let ct = if content_type.trim().is_empty() {
                "(unknown content-type)".to_string()
            } else {
                content_type.trim().to_string()
            };
            let sniff = String::from_utf8_lossy(&bytes[..bytes.len().min(96)])
                .trim()
                .to_string();
            ImageError::Decode {
                content_type: ct,
                sniff,
                source: e,
            }
        })?;
        let (width, height) = img.dimensions();

        let thumb = resize_max_width(&img, THUMB_MAX_WIDTH);
        let mut thumb_bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut thumb_bytes), JPEG_QUALITY);
        DynamicImage::ImageRgb8(thumb.to_rgb8())
            .write_with_encoder(encoder)
            .map_err(ImageError::Encode)?;

        let path = self.thumb_path(src_url, "jpg");
        tokio::fs::write(&path, &thumb_bytes)
            .await
            .map_err(|e| ImageError::Write {
                path: path.clone(),
                source: e,
            })?;

        Ok(ProcessedImage {
            original_url: src_url.to_string(),
            filename: filename_from_url(src_url),
            format: format_name(bytes),
            width,
            height,
            thumb_path: path,
            thumb_mime: "image/jpeg".to_string(),
            thumb_bytes,
        })
    }

    async fn process_svg(&self, src_url: &str, bytes: &[u8]) -> Result<ProcessedImage, ImageError> {
        let (width, height) = svg_size(bytes);

        // SVG thumbnails keep the vector bytes; when the root tag has no
        // width the viewer gets one injected so it renders bounded.
        let thumb_bytes = if width == 0 {
            inject_svg_width(bytes, THUMB_MAX_WIDTH)
        } else {
            bytes.to_vec()
        };

        let path = self.thumb_path(src_url, "svg");
        tokio::fs::write(&path, &thumb_bytes)
            .await
            .map_err(|e| ImageError::Write {
                path: path.clone(),
                source: e,
            })?;

        Ok(ProcessedImage {
            original_url: src_url.to_string(),
            filename: filename_from_url(src_url),
            format: "svg".to_string(),
            width,
            height,
            thumb_path: path,
            thumb_mime: "image/svg+xml".to_string(),
            thumb_bytes,
        })
    }

    fn thumb_path(&self, src_url: &str, ext: &str) -> PathBuf {
        let digest = Sha256::digest(src_url.as_bytes());
        self.thumb_dir.join(format!("{}.{ext}", hex::encode(digest)))
    }
}

/// Splits a `data:<mediatype>[;base64],<payload>` URL into payload bytes and
/// declared media type.
fn parse_data_url(url: &str) -> Result<(Vec<u8>, String), ImageError> {
    let comma = url.find(',').ok_or(ImageError::InvalidDataUrl)?;
    let meta = &url[..comma];
    let raw = &url[comma + 1..];

    let mut mime = if meta.starts_with("data:") && meta.len() > 5 {
        meta[5..].to_string()
    } else {
        "text/plain".to_string()
    };
    let is_base64 = meta.contains(";base64");
    if let Some(i) = mime.find(';') {
        mime.truncate(i);
    }
    if mime.is_empty() {
        mime = "text/plain".to_string();
    }

    let bytes = if is_base64 {
        BASE64
            .decode(raw.trim())
            .map_err(|e| ImageError::DataDecode(e.to_string()))?
    } else {
        urlencoding::decode_binary(raw.as_bytes()).into_owned()
    };

    Ok((bytes, mime))
}

fn format_name(bytes: &[u8]) -> String {
    let Ok(format) = image::guess_format(bytes) else {
        return "unknown".to_string();
    };
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Avif => "avif",
        _ => "unknown",
    }
    .to_string()
}

/// Scales an image down so its width is at most `max_width`, preserving
/// aspect ratio. Images at or below the limit pass through unchanged.
fn resize_max_width(img: &DynamicImage, max_width: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || w <= max_width {
        return img.clone();
    }
    let new_w = max_width;
    let new_h = ((h as u64 * new_w as u64) / w as u64).max(1) as u32;
    img.resize_exact(new_w, new_h, FilterType::Triangle)
}

static SVG_WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bwidth\s*=\s*["']\s*([0-9]+(?:\.[0-9]+)?)"#).expect("svg width regex")
});
static SVG_HEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bheight\s*=\s*["']\s*([0-9]+(?:\.[0-9]+)?)"#).expect("svg height regex")
});
static SVG_VIEWBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bviewBox\s*=\s*["']\s*([0-9\s\.\-]+)\s*["']"#).expect("svg viewbox regex")
});

/// Reads SVG dimensions from width/height attributes, falling back to the
/// third/fourth viewBox numbers. Unknown dimensions stay 0.
fn svg_size(bytes: &[u8]) -> (u32, u32) {
    let s = String::from_utf8_lossy(bytes);
    let mut w = SVG_WIDTH_RE
        .captures(&s)
        .and_then(|c| c.get(1))
        .map(|m| parse_dimension(m.as_str()))
        .unwrap_or(0);
    let mut h = SVG_HEIGHT_RE
        .captures(&s)
        .and_then(|c| c.get(1))
        .map(|m| parse_dimension(m.as_str()))
        .unwrap_or(0);
    if w == 0 || h == 0 {
        if let Some(m) = SVG_VIEWBOX_RE.captures(&s).and_then(|c| c.get(1)) {
            let fields: Vec<&str> = m.as_str().split_whitespace().collect();
            if fields.len() == 4 {
                if w == 0 {
                    w = parse_dimension(fields[2]);
                }
                if h == 0 {
                    h = parse_dimension(fields[3]);
                }
            }
        }
    }
    (w, h)
}

fn parse_dimension(s: &str) -> u32 {
    match s.trim().parse::<f64>() {
        Ok(f) if f > 0.0 => (f + 0.5) as u32,
        _ => 0,
    }
}

/// Injects `width="..."` into the root `<svg ...>` tag when absent.
///
/// Returns the input unchanged when the bytes are not valid UTF-8 or the tag
/// cannot be located.
fn inject_svg_width(bytes: &[u8], width: u32) -> Vec<u8> {
    let Ok(s) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };
    let lower = s.to_ascii_lowercase();
    let Some(start) = lower.find("<svg") else {
        return bytes.to_vec();
    };
    let Some(end_rel) = s[start..].find('>') else {
        return bytes.to_vec();
    };
    let end = start + end_rel;
    if lower[start..end].contains("width=") {
        return bytes.to_vec();
    }
    let mut out = String::with_capacity(s.len() + 16);
    out.push_str(&s[..end]);
    out.push_str(&format!(" width=\"{width}\""));
    out.push_str(&s[end..]);
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 30, 200]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_svg_size_from_attributes() {
        let svg = br#"<svg width="120" height="48" xmlns="http://www.w3.org/2000/svg"></svg>"#;
        assert_eq!(svg_size(svg), (120, 48));
    }

    #[test]
    fn test_svg_size_from_viewbox() {
        let svg = br#"<svg viewBox="0 0 64 32"></svg>"#;
        assert_eq!(svg_size(svg), (64, 32));
    }

    #[test]
    fn test_svg_size_unknown() {
        assert_eq!(svg_size(b"<svg></svg>"), (0, 0));
    }

    #[test]
    fn test_svg_size_fractional_rounds() {
        let svg = br#"<svg width="99.6" height="10.2"></svg>"#;
        assert_eq!(svg_size(svg), (100, 10));
    }

    #[test]
    fn test_inject_svg_width_when_absent() {
        let out = inject_svg_width(b"<svg viewBox=\"0 0 10 10\"><rect/></svg>", 200);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("width=\"200\""));
        assert!(s.starts_with("<svg"));
    }

    #[test]
    fn test_inject_svg_width_skipped_when_present() {
        let svg = b"<svg width=\"10\"></svg>".to_vec();
        assert_eq!(inject_svg_width(&svg, 200), svg);
    }

    #[test]
    fn test_parse_data_url_base64() {
        let payload = BASE64.encode(b"hello");
        let (bytes, mime) = parse_data_url(&format!("data:image/png;base64,{payload}")).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_parse_data_url_percent_encoded() {
        let (bytes, mime) = parse_data_url("data:text/plain,a%20b").unwrap();
        assert_eq!(bytes, b"a b");
        assert_eq!(mime, "text/plain");
    }

    #[test]
    fn test_parse_data_url_no_comma() {
        assert!(matches!(
            parse_data_url("data:image/png;base64"),
            Err(ImageError::InvalidDataUrl)
        ));
    }

    #[test]
    fn test_resize_never_upscales() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(50, 50));
        let out = resize_max_width(&img, THUMB_MAX_WIDTH);
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn test_resize_preserves_aspect() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(400, 100));
        let out = resize_max_width(&img, THUMB_MAX_WIDTH);
        assert_eq!(out.dimensions(), (200, 50));
    }

    #[tokio::test]
    async fn test_data_url_png_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("TestAgent/1.0", dir.path()).unwrap();

        let data_url = format!("data:image/png;base64,{}", BASE64.encode(png_bytes(4, 4)));
        let proc = dl
            .download_and_thumbnail(&data_url, far_deadline())
            .await
            .unwrap();

        assert_eq!(proc.width, 4);
        assert_eq!(proc.height, 4);
        assert_eq!(proc.format, "png");
        assert_eq!(proc.thumb_mime, "image/jpeg");
        let expected_name = format!("{}.jpg", hex::encode(Sha256::digest(data_url.as_bytes())));
        assert_eq!(
            proc.thumb_path.file_name().unwrap().to_str().unwrap(),
            expected_name
        );
        assert!(proc.thumb_path.exists());
        // the written file matches the returned blob
        assert_eq!(std::fs::read(&proc.thumb_path).unwrap(), proc.thumb_bytes);
    }

    #[tokio::test]
    async fn test_http_png_downscaled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wide.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(png_bytes(400, 100))
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("", dir.path()).unwrap();
        let url = format!("{}/wide.png", server.uri());
        let proc = dl.download_and_thumbnail(&url, far_deadline()).await.unwrap();

        assert_eq!((proc.width, proc.height), (400, 100));
        let thumb = image::load_from_memory(&proc.thumb_bytes).unwrap();
        assert_eq!(thumb.dimensions(), (200, 50));
    }

    #[tokio::test]
    async fn test_svg_passthrough_viewbox_width() {
        let server = MockServer::start().await;
        let svg = r#"<svg viewBox="0 0 10 20"><rect/></svg>"#;
        Mock::given(method("GET"))
            .and(path("/icon.svg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(svg)
                    .insert_header("content-type", "image/svg+xml"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("", dir.path()).unwrap();
        let url = format!("{}/icon.svg", server.uri());
        let proc = dl.download_and_thumbnail(&url, far_deadline()).await.unwrap();

        assert_eq!(proc.format, "svg");
        assert_eq!(proc.thumb_mime, "image/svg+xml");
        // width came from the viewBox, so the bytes pass through unchanged
        assert_eq!((proc.width, proc.height), (10, 20));
        assert!(proc
            .thumb_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with(".svg"));
        assert_eq!(proc.thumb_bytes, svg.as_bytes());
    }

    #[tokio::test]
    async fn test_headerless_data_url_svg_gets_width_injected() {
        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("", dir.path()).unwrap();

        let svg = "<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>";
        let data_url = format!("data:image/svg+xml,{}", urlencoding::encode(svg));
        let proc = dl
            .download_and_thumbnail(&data_url, far_deadline())
            .await
            .unwrap();

        assert_eq!((proc.width, proc.height), (0, 0));
        let written = String::from_utf8(proc.thumb_bytes).unwrap();
        assert!(written.contains("width=\"200\""));
    }

    #[tokio::test]
    async fn test_downloaded_headerless_svg_gets_width_injected() {
        let server = MockServer::start().await;
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><circle r="4"/></svg>"#;
        Mock::given(method("GET"))
            .and(path("/bare.svg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(svg)
                    .insert_header("content-type", "image/svg+xml"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("", dir.path()).unwrap();
        let url = format!("{}/bare.svg", server.uri());
        let proc = dl.download_and_thumbnail(&url, far_deadline()).await.unwrap();

        // no width/height attributes and no viewBox, so one gets injected
        assert_eq!((proc.width, proc.height), (0, 0));
        let written = String::from_utf8(proc.thumb_bytes.clone()).unwrap();
        assert!(written.contains(" width=\"200\""));
        assert!(written.starts_with("<svg"));
        // the injected bytes are what landed on disk
        assert_eq!(std::fs::read(&proc.thumb_path).unwrap(), proc.thumb_bytes);
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces_content_type_and_sniff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>403 Forbidden</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dl = Downloader::new("", dir.path()).unwrap();
        let url = format!("{}/broken.png", server.uri());
        let err = dl
            .download_and_thumbnail(&url, far_deadline())
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("text/html"), "missing content-type: {msg}");
        assert!(msg.contains("403 Forbidden"), "missing sniff: {msg}");
    }
}
