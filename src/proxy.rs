//! Proxy endpoint record, its identity key and score bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest score a record can hold. Freshly crawled records start here.
pub const MAX_SCORE: u8 = 100;

/// Probes strictly faster than this raise the score on recheck, slower ones lower it.
pub const FAST_LATENCY_MS: u64 = 1000;

/// Relay protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProxyKind {
    /// Plain forward HTTP proxy.
    Http,
    /// HTTP proxy supporting CONNECT tunnels.
    Https,
    /// SOCKS version 4.
    Socks4,
    /// SOCKS version 5.
    Socks5,
}

impl ProxyKind {
    /// URL scheme reqwest expects when routing through this kind of proxy.
    pub fn scheme(self) -> &'static str {
        match self {
            // Both HTTP flavours are reached over plain TCP; reqwest issues CONNECT
            // on its own for https targets.
            ProxyKind::Http | ProxyKind::Https => "http",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
        }
    }

    /// Returns true for the SOCKS family.
    pub fn is_socks(self) -> bool {
        matches!(self, ProxyKind::Socks4 | ProxyKind::Socks5)
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyKind::Http => "http",
            ProxyKind::Https => "https",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Socks5 => "socks5",
        };
        f.write_str(name)
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyKind::Http),
            "https" => Ok(ProxyKind::Https),
            "socks4" => Ok(ProxyKind::Socks4),
            "socks5" => Ok(ProxyKind::Socks5),
            other => Err(format!("unknown proxy kind `{other}`")),
        }
    }
}

impl TryFrom<String> for ProxyKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProxyKind> for String {
    fn from(kind: ProxyKind) -> Self {
        kind.to_string()
    }
}

/// Network location of a proxy. This alone is the identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Address {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("`{s}` is missing a port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(format!("`{s}` has an invalid host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("`{s}` has an invalid port"))?;
        if port == 0 {
            return Err(format!("`{s}` has port 0"));
        }
        Ok(Address::new(host, port))
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// A proxy endpoint as kept in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    /// Identity key, serialized as `host:port`.
    pub address: Address,
    /// Protocol used to reach the target through this proxy.
    pub kind: ProxyKind,
    /// Whether the provider advertises the proxy as high-anonymity.
    pub anonymous: bool,
    /// Round-trip time of the last successful probe, in milliseconds.
    pub latency_ms: u64,
    /// Reliability score, always within `0..=MAX_SCORE`.
    pub score: u8,
    /// When the proxy was last validated.
    pub last_checked_at: DateTime<Utc>,
}

impl Proxy {
    /// Create an unverified candidate with a full score.
    pub fn new(address: Address, kind: ProxyKind) -> Self {
        Self {
            address,
            kind,
            anonymous: false,
            latency_ms: 0,
            score: MAX_SCORE,
            last_checked_at: Utc::now(),
        }
    }

    /// Set the anonymity flag.
    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Set the last known latency.
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set the score, clamped into range.
    pub fn with_score(mut self, score: i64) -> Self {
        self.set_score(score);
        self
    }

    /// Store key of this record.
    pub fn key(&self) -> String {
        self.address.to_string()
    }

    /// Overwrite the score, clamping into `0..=MAX_SCORE`.
    pub fn set_score(&mut self, score: i64) {
        self.score = clamp_score(score);
    }

    /// Record a successful crawl-time probe: the record is reset to a full score.
    pub fn mark_verified(&mut self, latency_ms: u64) {
        self.latency_ms = latency_ms;
        self.score = MAX_SCORE;
        self.last_checked_at = Utc::now();
    }

    /// Record a successful recheck: fast probes earn a point, slow ones lose one.
    pub fn mark_rechecked(&mut self, latency_ms: u64) {
        self.latency_ms = latency_ms;
        self.last_checked_at = Utc::now();
        let delta = if latency_ms < FAST_LATENCY_MS { 1 } else { -1 };
        self.set_score(i64::from(self.score) + delta);
    }

    /// Convert the proxy into a reqwest proxy routing every scheme through it.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.url())
    }

    /// Proxy URL such as `socks5://127.0.0.1:1080`.
    pub fn url(&self) -> String {
        format!("{}://{}", self.kind.scheme(), self.address)
    }
}

/// Clamp an arbitrary score into `0..=MAX_SCORE`.
pub fn clamp_score(score: i64) -> u8 {
    score.clamp(0, i64::from(MAX_SCORE)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(score: i64) -> Proxy {
        Proxy::new(Address::new("10.0.0.1", 8080), ProxyKind::Http).with_score(score)
    }

    #[test]
    fn address_round_trips_through_display() {
        let address: Address = "192.168.1.10:3128".parse().unwrap();
        assert_eq!(address, Address::new("192.168.1.10", 3128));
        assert_eq!(address.to_string(), "192.168.1.10:3128");
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        let address: Address = "[::1]:1080".parse().unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.to_string(), "[::1]:1080");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!("10.0.0.1".parse::<Address>().is_err());
        assert!(":8080".parse::<Address>().is_err());
        assert!("10.0.0.1:port".parse::<Address>().is_err());
        assert!("10.0.0.1:0".parse::<Address>().is_err());
        assert!("10.0.0.1:70000".parse::<Address>().is_err());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("SOCKS5".parse::<ProxyKind>().unwrap(), ProxyKind::Socks5);
        assert_eq!(" https ".parse::<ProxyKind>().unwrap(), ProxyKind::Https);
        assert!("ftp".parse::<ProxyKind>().is_err());
    }

    #[test]
    fn kind_deserializes_case_insensitively() {
        let kind: ProxyKind = serde_json::from_str("\"SOCKS5\"").unwrap();
        assert_eq!(kind, ProxyKind::Socks5);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"socks5\"");
        assert!(serde_json::from_str::<ProxyKind>("\"ftp\"").is_err());
    }

    #[test]
    fn url_uses_kind_scheme() {
        let mut p = proxy(100);
        assert_eq!(p.url(), "http://10.0.0.1:8080");
        p.kind = ProxyKind::Https;
        assert_eq!(p.url(), "http://10.0.0.1:8080");
        p.kind = ProxyKind::Socks4;
        assert_eq!(p.url(), "socks4://10.0.0.1:8080");
        p.kind = ProxyKind::Socks5;
        assert_eq!(p.url(), "socks5://10.0.0.1:8080");
        assert!(p.to_reqwest_proxy().is_ok());
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(proxy(250).score, MAX_SCORE);
        assert_eq!(proxy(-3).score, 0);
        assert_eq!(clamp_score(42), 42);
    }

    #[test]
    fn recheck_moves_score_by_one() {
        let mut p = proxy(50);
        p.mark_rechecked(2000);
        assert_eq!(p.score, 49);
        assert_eq!(p.latency_ms, 2000);

        p.mark_rechecked(999);
        assert_eq!(p.score, 50);

        p.mark_rechecked(FAST_LATENCY_MS);
        assert_eq!(p.score, 49);
    }

    #[test]
    fn recheck_never_leaves_bounds() {
        let mut top = proxy(100);
        top.mark_rechecked(10);
        assert_eq!(top.score, MAX_SCORE);

        let mut bottom = proxy(0);
        bottom.mark_rechecked(5000);
        assert_eq!(bottom.score, 0);
    }

    #[test]
    fn verified_resets_score() {
        let mut p = proxy(3);
        p.mark_verified(150);
        assert_eq!(p.score, MAX_SCORE);
        assert_eq!(p.latency_ms, 150);
    }

    #[test]
    fn record_serializes_address_as_string() {
        let p = proxy(77).with_anonymous(true).with_latency(120);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["address"], "10.0.0.1:8080");
        assert_eq!(json["kind"], "http");
        assert_eq!(json["score"], 77);

        let back: Proxy = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
