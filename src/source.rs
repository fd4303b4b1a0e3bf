//! Providers of unverified proxy candidates.

use crate::config::SourceSpec;
use crate::error::SourceError;
use crate::proxy::{Proxy, ProxyKind};
use crate::utils;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use std::time::Duration;

/// A pluggable supplier of candidates.
///
/// `fetch` should return whatever it managed to collect: a failing page must
/// not discard candidates already parsed, and a malformed entry is skipped
/// rather than failing the whole batch.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Collect a batch of candidates.
    async fn fetch(&self) -> Result<Vec<Proxy>, SourceError>;
}

/// Source reading plain-text proxy lists from URLs or local files.
#[derive(Debug, Clone)]
pub struct ListSource {
    spec: SourceSpec,
    client: Client,
}

impl ListSource {
    /// Timeout applied to each list download.
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a source from its description.
    pub fn new(spec: SourceSpec) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(Self::FETCH_TIMEOUT).build()?;
        Ok(Self { spec, client })
    }

    /// Kind given to entries without a scheme.
    pub fn default_kind(&self) -> ProxyKind {
        self.spec.kind
    }

    async fn fetch_location(&self, location: &str) -> Result<Vec<Proxy>, SourceError> {
        let content = if location.starts_with("http://") || location.starts_with("https://") {
            let response = self.client.get(location).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status {
                    url: location.to_string(),
                    status: status.as_u16(),
                });
            }
            response.text().await?
        } else {
            tokio::fs::read_to_string(location)
                .await
                .map_err(|error| SourceError::Io {
                    path: location.to_string(),
                    error,
                })?
        };
        Ok(utils::parse_proxy_list(&content, self.spec.kind, self.spec.anonymous))
    }
}

#[async_trait]
impl Source for ListSource {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn fetch(&self) -> Result<Vec<Proxy>, SourceError> {
        info!("Fetching proxies from source {}", self.spec.name);

        let mut proxies = Vec::new();
        let mut failures = 0;
        let mut last_error = None;
        for location in &self.spec.locations {
            match self.fetch_location(location).await {
                Ok(batch) => {
                    debug!("Fetched {} proxies from {}", batch.len(), location);
                    proxies.extend(batch);
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", location, e);
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Only a source that produced nothing at all counts as failed.
        if proxies.is_empty() && failures > 0 {
            return Err(match (failures, last_error) {
                (1, Some(e)) => e,
                _ => SourceError::Exhausted(failures),
            });
        }

        info!("Source {} yielded {} candidates", self.spec.name, proxies.len());
        Ok(proxies)
    }
}

/// Fixed in-memory source, handy for seeding a pool with known proxies.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    proxies: Vec<Proxy>,
}

impl StaticSource {
    /// Create a source that always yields `proxies`.
    pub fn new(name: impl Into<String>, proxies: Vec<Proxy>) -> Self {
        Self {
            name: name.into(),
            proxies,
        }
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Proxy>, SourceError> {
        Ok(self.proxies.clone())
    }
}

/// Build one boxed source per configured provider.
pub fn sources_from_specs(specs: &[SourceSpec]) -> Result<Vec<Box<dyn Source>>, SourceError> {
    specs
        .iter()
        .map(|spec| ListSource::new(spec.clone()).map(|s| Box::new(s) as Box<dyn Source>))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Address;
    use std::io::Write;

    fn list_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn reads_local_list() {
        let file = list_file("1.1.1.1:80\nsocks5://2.2.2.2:1080\n");
        let location = file.path().display().to_string();
        let spec = SourceSpec::new("local", ProxyKind::Http, vec![location]);
        let source = ListSource::new(spec).unwrap();

        let proxies = source.fetch().await.unwrap();
        assert_eq!(source.name(), "local");
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[1].kind, ProxyKind::Socks5);
    }

    #[tokio::test]
    async fn keeps_partial_results_when_a_location_fails() {
        let file = list_file("1.1.1.1:80\n");
        let spec = SourceSpec::new(
            "mixed",
            ProxyKind::Http,
            vec!["/nonexistent/list.txt".to_string(), file.path().display().to_string()],
        );
        let proxies = ListSource::new(spec).unwrap().fetch().await.unwrap();
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0].address, Address::new("1.1.1.1", 80));
    }

    #[tokio::test]
    async fn fails_when_every_location_fails() {
        let locations = vec!["/nonexistent/a.txt", "/nonexistent/b.txt"];
        let spec = SourceSpec::new("gone", ProxyKind::Http, locations);
        let err = ListSource::new(spec).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Exhausted(2)));

        let spec = SourceSpec::new("gone", ProxyKind::Http, vec!["/nonexistent/a.txt"]);
        let err = ListSource::new(spec).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[tokio::test]
    async fn empty_list_is_not_an_error() {
        let file = list_file("# nothing today\n");
        let location = file.path().display().to_string();
        let spec = SourceSpec::new("quiet", ProxyKind::Http, vec![location]);
        assert!(ListSource::new(spec).unwrap().fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn static_source_yields_its_proxies() {
        let proxy = Proxy::new(Address::new("3.3.3.3", 3128), ProxyKind::Https);
        let source = StaticSource::new("seed", vec![proxy.clone()]);
        assert_eq!(source.fetch().await.unwrap(), vec![proxy]);
    }

    #[tokio::test]
    async fn builds_sources_from_specs() {
        let specs = vec![
            SourceSpec::new("a", ProxyKind::Http, vec!["a.txt"]),
            SourceSpec::new("b", ProxyKind::Socks5, vec!["b.txt"]),
        ];
        let sources = sources_from_specs(&specs).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
