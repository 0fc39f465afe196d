//! URL handling for Pictor
//!
//! This module provides URL canonicalization, effective-domain scope
//! classification, RFC 3986 reference resolution, and image dedup keying.

mod canonical;
mod domain;
mod resolve;

pub use canonical::{canonicalize, filename_from_url, strip_query};
pub use domain::{allowed_domains, effective_domain, is_external};
pub use resolve::{image_key, resolve_url};
