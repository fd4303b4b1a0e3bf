//! Liveness probing through a single proxy.

use crate::config::PoolConfig;
use crate::proxy::Proxy;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Whether the proxy relayed the probe and the identity endpoint answered sensibly.
    pub ok: bool,
    /// Time spent before the answer or the failure, in milliseconds.
    pub latency_ms: u64,
}

impl ProbeOutcome {
    /// A passing probe.
    pub fn passed(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms,
        }
    }

    /// A failing probe.
    pub fn failed(latency_ms: u64) -> Self {
        Self {
            ok: false,
            latency_ms,
        }
    }
}

/// Checks whether a proxy currently works.
///
/// Implementations make exactly one attempt per call. A failing proxy is a
/// normal outcome, not an error.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Probe the target through `proxy`.
    async fn validate(&self, proxy: &Proxy) -> ProbeOutcome;
}

/// Shape of the identity endpoint's answer. Only `ip` matters.
#[derive(Debug, Deserialize)]
struct IpInfo {
    #[serde(default)]
    ip: String,
}

#[derive(Debug, Error)]
enum ProbeFailure {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("body unreadable: {0}")]
    Body(#[source] reqwest::Error),
    #[error("body is not an identity object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("identity object has an empty ip")]
    MissingIp,
}

/// Validator issuing one GET to an identity endpoint through the proxy.
#[derive(Debug, Clone)]
pub struct ProbeValidator {
    probe_url: String,
    timeout: Duration,
}

impl ProbeValidator {
    /// Create a validator probing `probe_url`, each probe bounded by `timeout`.
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }

    /// Create a validator from the pool configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.probe_url.clone(), config.probe_timeout)
    }

    /// Build a short-lived client routed through `proxy`.
    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .proxy(proxy.to_reqwest_proxy()?)
            .timeout(self.timeout)
            .build()
    }

    async fn probe(
        client: &reqwest::Client,
        url: &str,
        start: Instant,
    ) -> (Result<String, ProbeFailure>, u64) {
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return (Err(ProbeFailure::Request(e)), elapsed_ms(start)),
        };
        let latency_ms = elapsed_ms(start);

        let status = response.status();
        if !status.is_success() {
            return (Err(ProbeFailure::Status(status.as_u16())), latency_ms);
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return (Err(ProbeFailure::Body(e)), latency_ms),
        };

        let verdict = serde_json::from_slice::<IpInfo>(&body)
            .map_err(ProbeFailure::from)
            .and_then(|info| {
                if info.ip.trim().is_empty() {
                    Err(ProbeFailure::MissingIp)
                } else {
                    Ok(info.ip)
                }
            });
        (verdict, latency_ms)
    }
}

#[async_trait]
impl Validator for ProbeValidator {
    async fn validate(&self, proxy: &Proxy) -> ProbeOutcome {
        debug!("Validating proxy {} ({})", proxy.address, proxy.kind);

        let client = match self.client_for(proxy) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build client for proxy {}: {}", proxy.url(), e);
                return ProbeOutcome::failed(0);
            }
        };

        let start = Instant::now();
        let (verdict, latency_ms) = Self::probe(&client, &self.probe_url, start).await;
        match verdict {
            Ok(ip) => {
                debug!("Proxy {} passed in {}ms, exit ip {}", proxy.address, latency_ms, ip);
                ProbeOutcome::passed(latency_ms)
            }
            Err(reason) => {
                debug!("Proxy {} failed after {}ms: {}", proxy.address, latency_ms, reason);
                ProbeOutcome::failed(latency_ms)
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
