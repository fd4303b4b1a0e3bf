//! Configuration for the proxy pool.

use crate::error::ConfigError;
use crate::proxy::ProxyKind;

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Identity endpoint used when none is configured.
pub const DEFAULT_PROBE_URL: &str = "http://ipinfo.io/json";

/// A plain-text proxy list provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceSpec {
    /// Name used in logs and reports.
    pub name: String,
    /// Kind assigned to entries that do not carry a scheme.
    pub kind: ProxyKind,
    /// URLs or local file paths, fetched in order.
    pub locations: Vec<String>,
    /// Whether the provider advertises its proxies as high-anonymity.
    #[serde(default)]
    pub anonymous: bool,
}

impl SourceSpec {
    /// Describe a provider.
    pub fn new(
        name: impl Into<String>,
        kind: ProxyKind,
        locations: Vec<impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            locations: locations.into_iter().map(Into::into).collect(),
            anonymous: false,
        }
    }

    /// Mark the provider's proxies as high-anonymity.
    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Providers to crawl.
    pub sources: Vec<SourceSpec>,
    /// URL probed through each proxy; must answer with a JSON object carrying `ip`.
    pub probe_url: String,
    /// Bound on a single probe, connection included.
    pub probe_timeout: Duration,
    /// Interval between crawl runs.
    pub crawl_interval: Duration,
    /// Interval between recheck runs.
    pub check_interval: Duration,
    /// Delay before the first recheck run.
    pub initial_check_delay: Duration,
    /// Lifetime of a stored record without a renewing write.
    pub record_ttl: Duration,
    /// Reserved. Accepted for compatibility with existing config files and not consumed.
    pub batch_size: usize,
}

impl PoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Parse a TOML document. Durations are given in seconds.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content)?;
        let config = file.into_builder().build();
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.probe_url)
            .map_err(|e| ConfigError::Invalid(format!("probe_url `{}`: {e}", self.probe_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "probe_url must be http or https, got `{}`",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("probe_timeout", self.probe_timeout),
            ("crawl_interval", self.crawl_interval),
            ("check_interval", self.check_interval),
            ("record_ttl", self.record_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        for source in &self.sources {
            if source.locations.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source `{}` has no locations",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfigBuilder::new().build()
    }
}

/// Builder for `PoolConfig`.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    sources: Vec<SourceSpec>,
    probe_url: Option<String>,
    probe_timeout: Option<Duration>,
    crawl_interval: Option<Duration>,
    check_interval: Option<Duration>,
    initial_check_delay: Option<Duration>,
    record_ttl: Option<Duration>,
    batch_size: Option<usize>,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the providers to crawl.
    pub fn sources(mut self, sources: Vec<SourceSpec>) -> Self {
        self.sources = sources;
        self
    }

    /// Add one provider.
    pub fn source(mut self, source: SourceSpec) -> Self {
        self.sources.push(source);
        self
    }

    /// Set the identity probe URL.
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Set the per-probe timeout.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the interval between crawl runs.
    pub fn crawl_interval(mut self, interval: Duration) -> Self {
        self.crawl_interval = Some(interval);
        self
    }

    /// Set the interval between recheck runs.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Set the delay before the first recheck.
    pub fn initial_check_delay(mut self, delay: Duration) -> Self {
        self.initial_check_delay = Some(delay);
        self
    }

    /// Set the record time-to-live.
    pub fn record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = Some(ttl);
        self
    }

    /// Set the reserved batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        PoolConfig {
            sources: self.sources,
            probe_url: self.probe_url.unwrap_or_else(|| DEFAULT_PROBE_URL.to_string()),
            probe_timeout: self.probe_timeout.unwrap_or(Duration::from_secs(10)),
            crawl_interval: self.crawl_interval.unwrap_or(Duration::from_secs(30 * 60)),
            check_interval: self.check_interval.unwrap_or(Duration::from_secs(10 * 60)),
            initial_check_delay: self.initial_check_delay.unwrap_or(Duration::from_secs(30)),
            record_ttl: self.record_ttl.unwrap_or(Duration::from_secs(24 * 60 * 60)),
            batch_size: self.batch_size.unwrap_or(50),
        }
    }
}

/// On-disk shape of the configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    sources: Vec<SourceSpec>,
    probe_url: Option<String>,
    probe_timeout_secs: Option<u64>,
    crawl_interval_secs: Option<u64>,
    check_interval_secs: Option<u64>,
    initial_check_delay_secs: Option<u64>,
    record_ttl_secs: Option<u64>,
    batch_size: Option<usize>,
}

impl FileConfig {
    fn into_builder(self) -> PoolConfigBuilder {
        PoolConfigBuilder {
            sources: self.sources,
            probe_url: self.probe_url,
            probe_timeout: self.probe_timeout_secs.map(Duration::from_secs),
            crawl_interval: self.crawl_interval_secs.map(Duration::from_secs),
            check_interval: self.check_interval_secs.map(Duration::from_secs),
            initial_check_delay: self.initial_check_delay_secs.map(Duration::from_secs),
            record_ttl: self.record_ttl_secs.map(Duration::from_secs),
            batch_size: self.batch_size,
        }
    }
}
