//! Endpoint URL helpers shared by config validation and output setup

use std::net::IpAddr;

use url::Url;

/// Host used when a URL leaves the host empty (`srt://:9000`)
pub const UNSPECIFIED_HOST: &str = "0.0.0.0";

/// Parse an endpoint URL, accepting an empty host before the port
pub fn parse_endpoint_url(raw: &str) -> Result<Url, url::ParseError> {
    match raw.split_once("://") {
        Some((scheme, rest)) if rest.starts_with(':') => {
            Url::parse(&format!("{scheme}://{UNSPECIFIED_HOST}{rest}"))
        }
        Some((scheme, rest)) if rest.starts_with("@:") => {
            Url::parse(&format!("{scheme}://@{UNSPECIFIED_HOST}{}", &rest[1..]))
        }
        _ => Url::parse(raw),
    }
}

/// Host without IPv6 brackets, empty when absent
pub fn endpoint_host(url: &Url) -> &str {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .unwrap_or("")
}

/// Host as an IP address, if it is one
pub fn endpoint_ip(url: &Url) -> Option<IpAddr> {
    endpoint_host(url).parse().ok()
}

/// Empty or wildcard host
pub fn is_unspecified_host(url: &Url) -> bool {
    let host = endpoint_host(url);
    host.is_empty() || host == UNSPECIFIED_HOST || host == "::"
}

/// Value of a query parameter
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Boolean query flag: present without value, `1` or `true`
pub fn query_flag(url: &Url, key: &str) -> bool {
    match query_param(url, key) {
        Some(v) => v.is_empty() || v == "1" || v.eq_ignore_ascii_case("true"),
        None => false,
    }
}
