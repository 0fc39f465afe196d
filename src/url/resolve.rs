use sha2::{Digest, Sha256};
use url::Url;

use crate::url::canonicalize;

/// Resolves a reference found in a document against its base URL.
///
/// Rules:
/// - empty references resolve to empty
/// - `javascript:`, `mailto:` and `tel:` references resolve to empty
/// - `data:` references pass through untouched (CSS and `<img>` may embed them)
/// - protocol-relative references (`//host/...`) inherit the base's scheme,
///   defaulting to `https` when the base does not parse
/// - everything else is RFC 3986 reference resolution with the fragment dropped
pub fn resolve_url(base: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.is_empty() {
        return String::new();
    }
    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:")
    {
        return String::new();
    }
    if lower.starts_with("data:") {
        return reference.to_string();
    }
    if reference.starts_with("//") {
        let scheme = Url::parse(base)
            .map(|b| b.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        return format!("{scheme}:{reference}");
    }
    let b = match Url::parse(base) {
        Ok(b) => b,
        Err(_) => return reference.to_string(),
    };
    match b.join(reference) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => String::new(),
    }
}

/// Computes the dedup key for an image URL.
///
/// `data:` URLs can be megabytes long, so they are keyed by a sha256 of the
/// full URL instead of the URL itself. http(s) URLs key by canonical form.
/// Returns an empty string for anything else.
pub fn image_key(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.to_ascii_lowercase().starts_with("data:") {
        let digest = Sha256::digest(raw.as_bytes());
        return format!("data:{}", hex::encode(digest));
    }
    canonicalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/dir/page.html";

    #[test]
    fn test_empty_reference() {
        assert_eq!(resolve_url(BASE, ""), "");
        assert_eq!(resolve_url(BASE, "   "), "");
    }

    #[test]
    fn test_script_schemes_dropped() {
        assert_eq!(resolve_url(BASE, "javascript:void(0)"), "");
        assert_eq!(resolve_url(BASE, "mailto:a@b.c"), "");
        assert_eq!(resolve_url(BASE, "tel:+123"), "");
        assert_eq!(resolve_url(BASE, "JavaScript:alert(1)"), "");
    }

    #[test]
    fn test_data_url_passthrough() {
        let d = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(resolve_url(BASE, d), d);
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            resolve_url(BASE, "img/cat.png"),
            "https://example.com/dir/img/cat.png"
        );
    }

    #[test]
    fn test_root_relative_path() {
        assert_eq!(resolve_url(BASE, "/cat.png"), "https://example.com/cat.png");
    }

    #[test]
    fn test_absolute_reference() {
        assert_eq!(
            resolve_url(BASE, "https://other.net/x"),
            "https://other.net/x"
        );
    }

    #[test]
    fn test_fragment_dropped() {
        assert_eq!(
            resolve_url(BASE, "/page#section"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_protocol_relative_inherits_scheme() {
        assert_eq!(
            resolve_url("http://example.com/", "//cdn.net/x.png"),
            "http://cdn.net/x.png"
        );
        assert_eq!(
            resolve_url(BASE, "//cdn.net/x.png"),
            "https://cdn.net/x.png"
        );
    }

    #[test]
    fn test_protocol_relative_defaults_to_https() {
        assert_eq!(
            resolve_url("not a url", "//cdn.net/x.png"),
            "https://cdn.net/x.png"
        );
    }

    #[test]
    fn test_dot_segments_normalized() {
        assert_eq!(
            resolve_url(BASE, "../up.png"),
            "https://example.com/up.png"
        );
    }

    #[test]
    fn test_image_key_http_is_canonical() {
        assert_eq!(
            image_key("http://example.com:80/a.png#f"),
            "http://example.com/a.png"
        );
    }

    #[test]
    fn test_image_key_data_url_is_hash() {
        let d = "data:image/png;base64,iVBORw0KGgo=";
        let key = image_key(d);
        assert!(key.starts_with("data:"));
        // sha256 hex is 64 chars
        assert_eq!(key.len(), "data:".len() + 64);
        let digest = Sha256::digest(d.as_bytes());
        assert_eq!(key, format!("data:{}", hex::encode(digest)));
    }

    #[test]
    fn test_image_key_rejects_other_schemes() {
        assert_eq!(image_key("ftp://example.com/a.png"), "");
        assert_eq!(image_key(""), "");
    }
}
