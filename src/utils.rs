//! Utility functions for reading proxy lists.

use crate::proxy::{Address, Proxy, ProxyKind};

/// Banner prefixes some public lists put above their entries.
const BANNER_PREFIXES: &[&str] = &["Support", "BTC", "ETH", "LTC", "Doge", "Format", "Website"];

/// Parse the text content of a proxy list.
///
/// Entries without a scheme get `default_kind`. Lines that do not describe a
/// proxy are skipped.
pub(crate) fn parse_proxy_list(
    content: &str,
    default_kind: ProxyKind,
    anonymous: bool,
) -> Vec<Proxy> {
    content
        .lines()
        .filter_map(|line| parse_proxy_line(line, default_kind))
        .map(|proxy| proxy.with_anonymous(anonymous))
        .collect()
}

/// Parse one line. Accepted shapes:
///
/// - `host:port`
/// - `scheme://host:port`
/// - `<flag> host:port 370ms CC [ISP]`
pub(crate) fn parse_proxy_line(line: &str, default_kind: ProxyKind) -> Option<Proxy> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if BANNER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [single] => {
            parse_endpoint(single, default_kind).map(|(address, kind)| Proxy::new(address, kind))
        }
        // annotated: flag, address, latency, ...
        [_, endpoint, latency, ..] if line.contains(']') => {
            let (address, kind) = parse_endpoint(endpoint, default_kind)?;
            let latency_ms = latency.trim_end_matches("ms").parse().unwrap_or(0);
            Some(Proxy::new(address, kind).with_latency(latency_ms))
        }
        _ => None,
    }
}

fn parse_endpoint(text: &str, default_kind: ProxyKind) -> Option<(Address, ProxyKind)> {
    let (kind, rest) = match text.split_once("://") {
        Some((scheme, rest)) => (scheme.parse().ok()?, rest),
        None => (default_kind, text),
    };
    let address = rest.trim_end_matches('/').parse().ok()?;
    Some((address, kind))
}
