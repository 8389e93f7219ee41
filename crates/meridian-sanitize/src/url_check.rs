use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;
use url::{Host, Url};

/// Validate that a URL is safe to fetch or publish.
///
/// Accepts http/https with a public host; rejects anything pointing at
/// loopback, unspecified, or RFC1918 private address space.
pub fn validate_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(scheme, "rejected url scheme");
            return false;
        }
    }

    match url.host() {
        None => false,
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                warn!(url = raw, "rejected localhost url");
                return false;
            }
            true
        }
        Some(Host::Ipv4(addr)) => {
            if blocked_v4(addr) {
                warn!(url = raw, "rejected private or loopback url");
                return false;
            }
            true
        }
        Some(Host::Ipv6(addr)) => {
            if blocked_v6(addr) {
                warn!(url = raw, "rejected private or loopback url");
                return false;
            }
            true
        }
    }
}

fn blocked_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_private() || addr.is_unspecified() || addr.is_link_local()
}

fn blocked_v6(addr: Ipv6Addr) -> bool {
    addr.is_loopback() || addr.is_unspecified()
}
