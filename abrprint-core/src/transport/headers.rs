use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER};
use reqwest::Request;
use url::Url;

// Best-effort browser-like headers to mitigate bot detection.
const NAV_DEFAULTS: [(&str, &str); 6] = [
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
         (KHTML, like Gecko) Version/16.6.1 Safari/605.1.15",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("accept-language", "en-gb"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
];

const CORS_DEFAULTS: [(&str, &str); 3] = [
    ("accept", "*/*"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
];

/// Fill in the header set a browser would send. Requests carrying an
/// `Origin` (or `Referer`) get CORS-style defaults with a computed
/// `Sec-Fetch-Site`; everything else gets navigation defaults. Headers the
/// caller already set are left untouched.
pub(crate) fn apply_defaults(request: &mut Request) {
    let initiator = header_url(request.headers(), &ORIGIN)
        .or_else(|| header_url(request.headers(), &REFERER));

    let target = request.url().clone();
    let headers = request.headers_mut();

    if let Some(origin) = initiator {
        for (name, value) in CORS_DEFAULTS {
            set_if_empty(headers, name, value);
        }
        set_if_empty(headers, "sec-fetch-site", fetch_site(&target, &origin));
    }

    for (name, value) in NAV_DEFAULTS {
        set_if_empty(headers, name, value);
    }
}

fn header_url(headers: &HeaderMap, name: &HeaderName) -> Option<Url> {
    let value = headers.get(name)?.to_str().ok()?;
    let url = Url::parse(value).ok()?;
    url.host_str()?;
    Some(url)
}

fn set_if_empty(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    if !headers.contains_key(&name) {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}

fn fetch_site(target: &Url, origin: &Url) -> &'static str {
    if same_origin(target, origin) {
        "same-origin"
    } else if same_site(target, origin) {
        "same-site"
    } else {
        "cross-site"
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port() == b.port()
}

/// Registered-domain equality under the public-suffix list.
fn same_site(a: &Url, b: &Url) -> bool {
    let (Some(a), Some(b)) = (a.host_str(), b.host_str()) else {
        return false;
    };
    match (psl::domain_str(a), psl::domain_str(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
