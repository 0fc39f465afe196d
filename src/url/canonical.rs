use url::Url;

/// Canonicalizes an http(s) URL into the form used for visited-set lookups.
///
/// # Canonicalization Steps
///
/// 1. Trim surrounding whitespace
/// 2. Parse; reject anything that is not http or https
/// 3. Drop the fragment
/// 4. Drop default ports (`:80` for http, `:443` for https)
/// 5. Set the path to `/` when empty
///
/// Returns an empty string when the input is rejected. The function is
/// idempotent: canonicalizing a canonical URL yields the same string.
///
/// # Examples
///
/// ```
/// use pictor::url::canonicalize;
///
/// assert_eq!(canonicalize("http://example.com:80/a#frag"), "http://example.com/a");
/// assert_eq!(canonicalize("https://example.com"), "https://example.com/");
/// assert_eq!(canonicalize("ftp://example.com/"), "");
/// ```
pub fn canonicalize(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let mut u = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    if u.scheme() != "http" && u.scheme() != "https" {
        return String::new();
    }
    // The url crate already strips default ports and normalizes an empty
    // path to "/" for http(s) URLs.
    u.set_fragment(None);
    u.to_string()
}

/// Returns the URL with query and fragment removed.
///
/// Used when deciding whether a resource path "ends in .css" and when
/// guessing an image extension.
pub fn strip_query(raw: &str) -> String {
    let mut u = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Derives a filename hint from the last non-empty path segment of a URL.
///
/// Returns an empty string for the root path, opaque URLs (`data:`), and
/// unparsable input.
pub fn filename_from_url(raw: &str) -> String {
    let u = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    if u.cannot_be_a_base() {
        return String::new();
    }
    u.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("")
        .to_string()
}
