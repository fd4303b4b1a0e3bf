//! Crawl pass: pull candidates from every source, validate them, and update the pool.

use crate::error::PoolError;
use crate::proxy::Proxy;
use crate::source::Source;
use crate::store::PoolStore;
use crate::validator::Validator;

use futures::future;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of crawling one source.
#[derive(Debug)]
pub struct SourceReport {
    /// Name of the source.
    pub source: String,
    /// Candidates returned by the source.
    pub fetched: usize,
    /// Candidates that passed validation and were saved.
    pub accepted: usize,
    /// Candidates that failed validation.
    pub rejected: usize,
    /// Whether the remaining candidates were abandoned on cancellation.
    pub cancelled: bool,
    /// Fetch and store errors, in the order they happened.
    pub errors: Vec<PoolError>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            fetched: 0,
            accepted: 0,
            rejected: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }
}

/// Per-source outcomes of one crawl pass, in completion order.
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// One entry per source that finished.
    pub sources: Vec<SourceReport>,
}

impl CrawlReport {
    /// Total candidates saved.
    pub fn accepted(&self) -> usize {
        self.sources.iter().map(|r| r.accepted).sum()
    }

    /// Total candidates rejected.
    pub fn rejected(&self) -> usize {
        self.sources.iter().map(|r| r.rejected).sum()
    }

    /// Every error, attributed to its source.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &PoolError)> {
        self.sources
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| (r.source.as_str(), e)))
    }

    /// Report for the named source.
    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|r| r.source == name)
    }

    /// Remove and return the earliest recorded error.
    pub fn take_first_error(&mut self) -> Option<PoolError> {
        self.sources
            .iter_mut()
            .find(|r| !r.errors.is_empty())
            .map(|r| r.errors.remove(0))
    }
}

/// Fans out over all sources, one task per source, and keeps the pool in sync
/// with what the sources report.
pub struct CrawlOrchestrator {
    sources: Vec<Arc<dyn Source>>,
    store: Arc<dyn PoolStore>,
    validator: Arc<dyn Validator>,
}

impl CrawlOrchestrator {
    /// Create an orchestrator over `sources`.
    pub fn new(
        sources: Vec<Box<dyn Source>>,
        store: Arc<dyn PoolStore>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::<dyn Source>::from).collect(),
            store,
            validator,
        }
    }

    /// Names of the configured sources.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Run one pass and return the first fetch or store error, if any.
    ///
    /// Other errors are logged; `crawl` keeps all of them.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CrawlReport, PoolError> {
        let mut report = self.crawl(cancel).await;
        match report.take_first_error() {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Run one pass and return the outcome of every source.
    pub async fn crawl(&self, cancel: &CancellationToken) -> CrawlReport {
        info!("Starting crawl over {} sources", self.sources.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let source = Arc::clone(source);
            let store = Arc::clone(&self.store);
            let validator = Arc::clone(&self.validator);
            let cancel = cancel.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let report =
                    crawl_source(source.as_ref(), store.as_ref(), validator.as_ref(), &cancel)
                        .await;
                // The receiver outlives every task.
                let _ = tx.send(report);
            }));
        }
        drop(tx);

        let mut report = CrawlReport::default();
        while let Some(source_report) = rx.recv().await {
            for e in &source_report.errors {
                warn!("Crawl error from source {}: {}", source_report.source, e);
            }
            report.sources.push(source_report);
        }

        for joined in future::join_all(handles).await {
            if let Err(e) = joined {
                error!("Crawl task aborted: {}", e);
            }
        }

        info!(
            "Crawl finished: {} accepted, {} rejected, {} errors",
            report.accepted(),
            report.rejected(),
            report.errors().count()
        );
        report
    }
}

async fn crawl_source(
    source: &dyn Source,
    store: &dyn PoolStore,
    validator: &dyn Validator,
    cancel: &CancellationToken,
) -> SourceReport {
    let mut report = SourceReport::new(source.name());

    let candidates = match source.fetch().await {
        Ok(candidates) => candidates,
        Err(error) => {
            report.errors.push(PoolError::Fetch {
                name: source.name().to_string(),
                error,
            });
            return report;
        }
    };
    report.fetched = candidates.len();
    info!("Validating {} candidates from {}", candidates.len(), source.name());

    // One candidate at a time keeps the load on unverified hosts and the probe endpoint low.
    for candidate in candidates {
        if cancel.is_cancelled() {
            info!("Crawl of {} cancelled, abandoning remaining candidates", source.name());
            report.cancelled = true;
            break;
        }
        process_candidate(candidate, store, validator, &mut report).await;
    }

    report
}

async fn process_candidate(
    mut candidate: Proxy,
    store: &dyn PoolStore,
    validator: &dyn Validator,
    report: &mut SourceReport,
) {
    let outcome = validator.validate(&candidate).await;
    if outcome.ok {
        candidate.mark_verified(outcome.latency_ms);
        report.accepted += 1;
        debug!("Accepted {} ({}ms)", candidate.address, outcome.latency_ms);
        if let Err(error) = store.save(&candidate).await {
            report.errors.push(PoolError::StoreWrite {
                key: candidate.key(),
                error,
            });
        }
    } else {
        report.rejected += 1;
        debug!("Rejected {}", candidate.address);
        // The source may be re-reporting a record that has since died.
        if let Err(error) = store.remove(&candidate.address).await {
            report.errors.push(PoolError::StoreWrite {
                key: candidate.key(),
                error,
            });
        }
    }
}
