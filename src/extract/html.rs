use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::extract::css::parse_css_urls;
use crate::extract::{Extracted, ImageRef, ResourceKind, ResourceRef};
use crate::url::{filename_from_url, resolve_url};

/// Parses an HTML body and extracts page links, sub-resources and images.
///
/// The parser is tag-soup tolerant, so extraction never fails; a hopeless
/// body just yields an empty result. All references are resolved against the
/// page URL (or a `<base href>` override when present) and deduplicated
/// within the page.
///
/// Per-element emission:
/// - `<a href>`, `<iframe src>`, `<frame src>` → page links
/// - `<script src>` → js resource
/// - `<link rel~=stylesheet>` / `<link as=style>` → css resource
/// - `<link rel~=icon|apple-touch-icon|shortcut>` → image
/// - `<style>` text and any element's `style` attribute → `url(...)` images
/// - `<img>` (src plus common lazy-load attributes, srcset) → images
/// - `<source srcset>` → images
/// - `<meta property|name=og:image>` → image
/// - SVG `<image href|xlink:href>` → image
pub fn extract_html(page_url: &str, body: &[u8]) -> Extracted {
    let text = String::from_utf8_lossy(body);
    let doc = Html::parse_document(&text);

    let mut base = page_url.to_string();
    if let Ok(sel) = Selector::parse("base[href]") {
        if let Some(el) = doc.select(&sel).next() {
            let resolved = resolve_url(page_url, attr(el, "href"));
            if !resolved.is_empty() {
                base = resolved;
            }
        }
    }

    let mut c = Collector {
        out: Extracted::default(),
        seen_links: HashSet::new(),
        seen_resources: HashSet::new(),
        seen_images: HashSet::new(),
        page_url: page_url.to_string(),
    };

    if let Ok(sel) = Selector::parse("a[href]") {
        for el in doc.select(&sel) {
            c.add_link(resolve_url(&base, attr(el, "href")));
        }
    }
    if let Ok(sel) = Selector::parse("iframe[src], frame[src]") {
        for el in doc.select(&sel) {
            c.add_link(resolve_url(&base, attr(el, "src")));
        }
    }
    if let Ok(sel) = Selector::parse("script[src]") {
        for el in doc.select(&sel) {
            c.add_resource(resolve_url(&base, attr(el, "src")), ResourceKind::Js);
        }
    }
    if let Ok(sel) = Selector::parse("link[href]") {
        for el in doc.select(&sel) {
            let rel = attr(el, "rel").to_ascii_lowercase();
            let as_attr = attr(el, "as").to_ascii_lowercase();
            let href = attr(el, "href");
            if href.is_empty() {
                continue;
            }
            if rel.contains("stylesheet") || as_attr == "style" {
                c.add_resource(resolve_url(&base, href), ResourceKind::Css);
            }
            if rel.contains("icon") || rel.contains("apple-touch-icon") || rel.contains("shortcut")
            {
                c.add_image(resolve_url(&base, href), "", "");
            }
        }
    }
    if let Ok(sel) = Selector::parse("style") {
        for el in doc.select(&sel) {
            let css: String = el.text().collect();
            for u in parse_css_urls(&css) {
                c.add_image(resolve_url(&base, &u), "", "");
            }
        }
    }
    if let Ok(sel) = Selector::parse("img") {
        for el in doc.select(&sel) {
            let alt = attr(el, "alt");
            let title = attr(el, "title");
            let src = first_non_empty(&[
                attr(el, "src"),
                attr(el, "data-src"),
                attr(el, "data-original"),
                attr(el, "data-lazy-src"),
            ]);
            if !src.is_empty() {
                c.add_image(resolve_url(&base, src), alt, title);
            }
            for u in parse_srcset(attr(el, "srcset")) {
                c.add_image(resolve_url(&base, &u), alt, title);
            }
        }
    }
    if let Ok(sel) = Selector::parse("source[srcset]") {
        for el in doc.select(&sel) {
            for u in parse_srcset(attr(el, "srcset")) {
                c.add_image(resolve_url(&base, &u), "", "");
            }
        }
    }
    if let Ok(sel) = Selector::parse("meta[content]") {
        for el in doc.select(&sel) {
            let property = attr(el, "property");
            let name = attr(el, "name");
            if property.eq_ignore_ascii_case("og:image") || name.eq_ignore_ascii_case("og:image") {
                c.add_image(resolve_url(&base, attr(el, "content")), "", "");
            }
        }
    }
    // SVG <image href> (html5ever keeps <image> only inside foreign content)
    if let Ok(sel) = Selector::parse("image") {
        for el in doc.select(&sel) {
            let href = first_non_empty(&[attr(el, "href"), attr(el, "xlink:href")]);
            if !href.is_empty() {
                c.add_image(resolve_url(&base, href), "", "");
            }
        }
    }
    // background-image and friends on any element
    if let Ok(sel) = Selector::parse("[style]") {
        for el in doc.select(&sel) {
            for u in parse_css_urls(attr(el, "style")) {
                c.add_image(resolve_url(&base, &u), "", "");
            }
        }
    }

    c.out
}

/// Splits a `srcset` attribute into its candidate URLs (first field of each
/// comma-separated candidate; descriptors are dropped).
pub(crate) fn parse_srcset(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            candidate
                .split_whitespace()
                .next()
                .filter(|u| !u.is_empty())
                .map(str::to_string)
        })
        .collect()
}

struct Collector {
    out: Extracted,
    seen_links: HashSet<String>,
    seen_resources: HashSet<String>,
    seen_images: HashSet<String>,
    page_url: String,
}

impl Collector {
    fn add_link(&mut self, url: String) {
        if url.is_empty() || !is_http(&url) {
            return;
        }
        if self.seen_links.insert(url.clone()) {
            self.out.links.push(url);
        }
    }

    fn add_resource(&mut self, url: String, kind: ResourceKind) {
        if url.is_empty() {
            return;
        }
        if !is_http(&url) && !url.to_ascii_lowercase().starts_with("data:") {
            return;
        }
        if self.seen_resources.insert(url.clone()) {
            self.out.resources.push(ResourceRef {
                url,
                kind,
                page_url: self.page_url.clone(),
            });
        }
    }

    fn add_image(&mut self, url: String, alt: &str, title: &str) {
        if url.is_empty() {
            return;
        }
        if self.seen_images.insert(url.clone()) {
            let filename = filename_from_url(&url);
            self.out.images.push(ImageRef {
                url,
                alt: alt.to_string(),
                title: title.to_string(),
                page_url: self.page_url.clone(),
                filename,
            });
        }
    }
}

fn attr<'a>(el: ElementRef<'a>, name: &str) -> &'a str {
    el.value().attr(name).map(str::trim).unwrap_or("")
}

fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values.iter().copied().find(|v| !v.is_empty()).unwrap_or("")
}

fn is_http(u: &str) -> bool {
    Url::parse(u)
        .map(|p| p.scheme() == "http" || p.scheme() == "https")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/dir/page.html";

    fn extract(html: &str) -> Extracted {
        extract_html(PAGE, html.as_bytes())
    }

    fn image_urls(ext: &Extracted) -> Vec<&str> {
        ext.images.iter().map(|i| i.url.as_str()).collect()
    }

    #[test]
    fn test_anchor_links_resolved() {
        let ext = extract(r#"<a href="/one">1</a><a href="two.html">2</a>"#);
        assert_eq!(
            ext.links,
            vec![
                "https://example.com/one",
                "https://example.com/dir/two.html"
            ]
        );
    }

    #[test]
    fn test_iframe_and_frame_are_links() {
        let ext = extract(r#"<iframe src="/embed"></iframe><frame src="/f">"#);
        assert_eq!(
            ext.links,
            vec!["https://example.com/embed", "https://example.com/f"]
        );
    }

    #[test]
    fn test_javascript_and_mailto_dropped() {
        let ext = extract(r#"<a href="javascript:void(0)">x</a><a href="mailto:a@b.c">m</a>"#);
        assert!(ext.links.is_empty());
    }

    #[test]
    fn test_non_http_links_dropped() {
        let ext = extract(r#"<a href="ftp://example.com/file">f</a>"#);
        assert!(ext.links.is_empty());
    }

    #[test]
    fn test_script_src_is_js_resource() {
        let ext = extract(r#"<script src="/app.js"></script>"#);
        assert_eq!(ext.resources.len(), 1);
        assert_eq!(ext.resources[0].url, "https://example.com/app.js");
        assert_eq!(ext.resources[0].kind, ResourceKind::Js);
        assert_eq!(ext.resources[0].page_url, PAGE);
    }

    #[test]
    fn test_stylesheet_link_is_css_resource() {
        let ext = extract(r#"<link rel="stylesheet" href="/styles.css">"#);
        assert_eq!(ext.resources.len(), 1);
        assert_eq!(ext.resources[0].kind, ResourceKind::Css);
        assert_eq!(ext.resources[0].url, "https://example.com/styles.css");
    }

    #[test]
    fn test_preload_style_is_css_resource() {
        let ext = extract(r#"<link rel="preload" as="style" href="/late.css">"#);
        assert_eq!(ext.resources.len(), 1);
        assert_eq!(ext.resources[0].kind, ResourceKind::Css);
    }

    #[test]
    fn test_icon_links_are_images() {
        let ext = extract(
            r#"<link rel="icon" href="/favicon.ico">
               <link rel="apple-touch-icon" href="/touch.png">
               <link rel="shortcut icon" href="/short.ico">"#,
        );
        let urls = image_urls(&ext);
        assert!(urls.contains(&"https://example.com/favicon.ico"));
        assert!(urls.contains(&"https://example.com/touch.png"));
        // "shortcut icon" matched once, deduplicated against plain icon rule
        assert_eq!(ext.images.len(), 3);
    }

    #[test]
    fn test_inline_style_element_urls() {
        let ext = extract(r#"<style>body { background: url("/bg.png"); }</style>"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/bg.png"]);
    }

    #[test]
    fn test_img_src_with_alt_and_title() {
        let ext = extract(r#"<img src="cat.png" alt="a cat" title="Cat">"#);
        assert_eq!(ext.images.len(), 1);
        let img = &ext.images[0];
        assert_eq!(img.url, "https://example.com/dir/cat.png");
        assert_eq!(img.alt, "a cat");
        assert_eq!(img.title, "Cat");
        assert_eq!(img.filename, "cat.png");
        assert_eq!(img.page_url, PAGE);
    }

    #[test]
    fn test_img_lazy_attributes_first_non_empty_wins() {
        let ext = extract(r#"<img data-src="/lazy.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/lazy.png"]);

        let ext = extract(r#"<img src="/eager.png" data-src="/lazy.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/eager.png"]);

        let ext = extract(r#"<img data-original="/orig.png" data-lazy-src="/l.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/orig.png"]);
    }

    #[test]
    fn test_img_srcset_candidates() {
        let ext = extract(r#"<img srcset="/a-1x.png 1x, /a-2x.png 2x, /a-640.png 640w">"#);
        assert_eq!(
            image_urls(&ext),
            vec![
                "https://example.com/a-1x.png",
                "https://example.com/a-2x.png",
                "https://example.com/a-640.png"
            ]
        );
    }

    #[test]
    fn test_source_srcset() {
        let ext = extract(r#"<picture><source srcset="/hero.webp 1x"></picture>"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/hero.webp"]);
    }

    #[test]
    fn test_og_image_meta() {
        let ext = extract(r#"<meta property="og:image" content="/og.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/og.png"]);

        let ext = extract(r#"<meta name="OG:IMAGE" content="/og2.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/og2.png"]);
    }

    #[test]
    fn test_svg_image_href() {
        let ext = extract(r#"<svg><image href="/vec.svg"></image></svg>"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/vec.svg"]);
    }

    #[test]
    fn test_style_attribute_on_any_element() {
        let ext = extract(r#"<div style="background-image: url('deco.gif')"></div>"#);
        assert_eq!(image_urls(&ext), vec!["https://example.com/dir/deco.gif"]);
    }

    #[test]
    fn test_base_href_overrides_resolution() {
        let ext = extract(
            r#"<base href="https://cdn.example.net/assets/">
               <img src="logo.png"><a href="about.html">a</a>"#,
        );
        assert_eq!(
            image_urls(&ext),
            vec!["https://cdn.example.net/assets/logo.png"]
        );
        assert_eq!(ext.links, vec!["https://cdn.example.net/assets/about.html"]);
    }

    #[test]
    fn test_data_url_image_kept() {
        let d = "data:image/png;base64,iVBORw0KGgo=";
        let ext = extract(&format!(r#"<img src="{d}">"#));
        assert_eq!(image_urls(&ext), vec![d]);
        assert_eq!(ext.images[0].filename, "");
    }

    #[test]
    fn test_dedup_within_page() {
        let ext = extract(
            r#"<img src="/x.png"><img src="/x.png">
               <a href="/p">1</a><a href="/p">2</a>"#,
        );
        assert_eq!(ext.images.len(), 1);
        assert_eq!(ext.links.len(), 1);
    }

    #[test]
    fn test_protocol_relative_image() {
        let ext = extract(r#"<img src="//cdn.example.net/i.png">"#);
        assert_eq!(image_urls(&ext), vec!["https://cdn.example.net/i.png"]);
    }

    #[test]
    fn test_tag_soup_tolerated() {
        let ext = extract("<html><body><img src=/broken.png<p>whatever");
        // Parsing never fails; lenient recovery may or may not keep the img.
        assert!(ext.links.is_empty());
    }

    #[test]
    fn test_parse_srcset() {
        assert_eq!(
            parse_srcset("a.png 1x, b.png 2x"),
            vec!["a.png", "b.png"]
        );
        assert_eq!(parse_srcset(""), Vec::<String>::new());
        assert_eq!(parse_srcset("only.png"), vec!["only.png"]);
        assert_eq!(parse_srcset(" spaced.png  480w ,"), vec!["spaced.png"]);
    }
}
