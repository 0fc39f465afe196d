//! Resource extraction for Pictor
//!
//! Parses fetched bodies and emits the three kinds of references a crawl
//! cares about: page links to traverse, sub-resources (CSS/JS) to crawl, and
//! image references to download.

mod css;
mod html;

pub use css::{extract_css, parse_css_urls};
pub use html::extract_html;

/// A reference to an image discovered on a page or stylesheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRef {
    /// Image URL; http(s) or a `data:` URL
    pub url: String,
    /// Alt text, empty when absent
    pub alt: String,
    /// Title text, empty when absent
    pub title: String,
    /// URL of the page that referenced the image
    pub page_url: String,
    /// Filename hint derived from the URL path, empty when absent
    pub filename: String,
}

/// Kind of a non-page sub-resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Css,
    Js,
    Other,
}

/// A reference to a sub-resource (stylesheet, script) discovered on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub url: String,
    pub kind: ResourceKind,
    pub page_url: String,
}

/// Everything extracted from a single fetched body
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Page links to traverse (http(s) only, deduplicated within the page)
    pub links: Vec<String>,
    /// Sub-resources to crawl (http(s) or `data:`)
    pub resources: Vec<ResourceRef>,
    /// Image references to download
    pub images: Vec<ImageRef>,
}
