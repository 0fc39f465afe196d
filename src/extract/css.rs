use std::sync::LazyLock;

use regex::Regex;

static CSS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"url\(([^)]+)\)").expect("css url regex"));

static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:url\()?\s*["']?([^"')\s;]+)"#).expect("css import regex")
});

const IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp", ".svg", ".ico", ".avif",
];

const FONT_EXTENSIONS: &[&str] = &[".woff", ".ttf", ".eot", ".otf"];

/// Extracts `@import`ed stylesheets and image URLs from CSS text.
///
/// Best effort, regex based; recognizes `@import "a.css"`, `@import url(a.css)`
/// and `url(...)` tokens. Targets that look like fonts are skipped. Returned
/// URLs are unresolved (relative to the stylesheet).
pub fn extract_css(css: &str) -> (Vec<String>, Vec<String>) {
    let mut imports = Vec::new();
    for cap in CSS_IMPORT_RE.captures_iter(css) {
        if let Some(m) = cap.get(1) {
            let u = m.as_str().trim();
            if !u.is_empty() {
                imports.push(u.to_string());
            }
        }
    }

    let images = parse_css_urls(css)
        .into_iter()
        .filter(|u| is_likely_image_url(u))
        .collect();

    (imports, images)
}

/// Collects the targets of all `url(...)` tokens in a CSS fragment.
///
/// Surrounding quotes and whitespace are stripped. Used both for stylesheet
/// bodies and for inline `style` attributes/elements.
pub fn parse_css_urls(css: &str) -> Vec<String> {
    let mut out = Vec::new();
    for cap in CSS_URL_RE.captures_iter(css) {
        if let Some(m) = cap.get(1) {
            let u = m.as_str().trim().trim_matches(|c| c == '"' || c == '\'');
            if !u.is_empty() {
                out.push(u.to_string());
            }
        }
    }
    out
}

fn is_likely_image_url(u: &str) -> bool {
    let lu = u.to_ascii_lowercase();
    if lu.starts_with("data:image/") {
        return true;
    }
    if FONT_EXTENSIONS.iter().any(|ext| lu.contains(ext)) {
        return false;
    }
    IMAGE_EXTENSIONS.iter().any(|ext| lu.contains(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_with_quotes() {
        let (imports, _) = extract_css(r#"@import "reset.css";"#);
        assert_eq!(imports, vec!["reset.css"]);
    }

    #[test]
    fn test_import_with_url_form() {
        let (imports, _) = extract_css("@import url(theme.css);");
        assert_eq!(imports, vec!["theme.css"]);
    }

    #[test]
    fn test_import_case_insensitive() {
        let (imports, _) = extract_css(r#"@IMPORT url("More.CSS");"#);
        assert_eq!(imports, vec!["More.CSS"]);
    }

    #[test]
    fn test_url_image_extracted() {
        let (_, images) = extract_css("body { background: url(bg.jpg); }");
        assert_eq!(images, vec!["bg.jpg"]);
    }

    #[test]
    fn test_url_with_quotes() {
        let (_, images) = extract_css(r#".a { background-image: url("img/x.png"); }"#);
        assert_eq!(images, vec!["img/x.png"]);
        let (_, images) = extract_css(".a { background-image: url('y.webp'); }");
        assert_eq!(images, vec!["y.webp"]);
    }

    #[test]
    fn test_fonts_excluded() {
        let css = "@font-face { src: url(font.woff2), url(font.ttf), url(font.eot); }";
        let (_, images) = extract_css(css);
        assert!(images.is_empty());
    }

    #[test]
    fn test_data_image_url_included() {
        let (_, images) = extract_css("div { background: url(data:image/png;base64,AAAA); }");
        assert_eq!(images, vec!["data:image/png;base64,AAAA"]);
    }

    #[test]
    fn test_non_image_url_excluded() {
        let (_, images) = extract_css("div { behavior: url(script.htc); }");
        assert!(images.is_empty());
    }

    #[test]
    fn test_mixed_stylesheet() {
        let css = r#"
            @import "base.css";
            @import url(layout.css);
            .hero { background: url('hero.avif'); }
            .icon { background: url(sprite.svg#frag); }
        "#;
        let (imports, images) = extract_css(css);
        assert_eq!(imports, vec!["base.css", "layout.css"]);
        assert_eq!(images, vec!["hero.avif", "sprite.svg#frag"]);
    }

    #[test]
    fn test_parse_css_urls_plain() {
        assert_eq!(
            parse_css_urls("a { background: url( spaced.png ); }"),
            vec!["spaced.png"]
        );
    }
}
