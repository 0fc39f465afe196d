use std::collections::HashSet;

use url::Url;

/// Reduces a URL's hostname to its registrable domain (eTLD+1).
///
/// Uses the public-suffix rules, so `a.b.co.uk` becomes `b.co.uk`. Falls back
/// to the raw hostname when the suffix lookup fails (IP addresses, intranet
/// hosts). Returns an empty string for unparsable input.
///
/// # Examples
///
/// ```
/// use pictor::url::effective_domain;
///
/// assert_eq!(effective_domain("https://blog.example.com/post"), "example.com");
/// assert_eq!(effective_domain("https://a.b.co.uk/"), "b.co.uk");
/// assert_eq!(effective_domain("http://127.0.0.1:8080/"), "127.0.0.1");
/// ```
pub fn effective_domain(raw: &str) -> String {
    let u = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    match u.host() {
        // IP literals have no registrable domain; the address is the scope.
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        Some(url::Host::Domain(host)) => match psl::domain_str(host) {
            Some(d) => d.to_string(),
            None => host.to_string(),
        },
        None => String::new(),
    }
}

/// Builds the set of effective domains for the seed URLs.
///
/// Read-only after startup; consulted by [`is_external`] when external link
/// following is disabled.
pub fn allowed_domains(seeds: &[String]) -> HashSet<String> {
    let mut out = HashSet::new();
    for seed in seeds {
        let d = effective_domain(seed);
        if !d.is_empty() {
            out.insert(d);
        }
    }
    out
}

/// Decides whether `link` is out of crawl scope.
///
/// With a non-empty allowed set, a link is external iff its effective domain
/// is not in the set. With an empty set, a link is external iff its effective
/// domain differs from the base URL's. Links whose domain cannot be
/// determined count as external.
pub fn is_external(base: &str, link: &str, allowed: &HashSet<String>) -> bool {
    let link_domain = effective_domain(link);
    if link_domain.is_empty() {
        return true;
    }
    if !allowed.is_empty() {
        return !allowed.contains(&link_domain);
    }
    let base_domain = effective_domain(base);
    !base_domain.is_empty() && link_domain != base_domain
}
