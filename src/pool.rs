//! Proxy pool service: wires the pipelines together and drives them on timers.

use crate::checker::{RecheckReport, RecheckScheduler};
use crate::config::PoolConfig;
use crate::crawler::{CrawlOrchestrator, CrawlReport};
use crate::error::{ConfigError, PoolError, StoreError};
use crate::proxy::Proxy;
use crate::source::{self, Source};
use crate::store::{MemoryStore, PoolStore};
use crate::validator::{ProbeValidator, Validator};

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Snapshot of the pool contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    /// Live records.
    pub total: usize,
    /// Mean score over live records, 0 when empty.
    pub average_score: f64,
    /// Mean last latency over live records, 0 when empty.
    pub average_latency_ms: f64,
}

/// A self-refreshing pool of validated proxies.
pub struct ProxyPool {
    /// Configuration for the pool.
    pub config: PoolConfig,
    store: Arc<dyn PoolStore>,
    crawler: Arc<CrawlOrchestrator>,
    checker: Arc<RecheckScheduler>,
}

impl ProxyPool {
    /// Create a pool with an in-memory store, the probe validator and one list
    /// source per configured provider.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sources = source::sources_from_specs(&config.sources)
            .map_err(|e| ConfigError::Invalid(format!("cannot build sources: {e}")))?;
        let store = Arc::new(MemoryStore::with_ttl(config.record_ttl));
        let validator = Arc::new(ProbeValidator::from_config(&config));
        Ok(Self::with_parts(config, sources, store, validator))
    }

    /// Create a pool from explicit collaborators.
    pub fn with_parts(
        config: PoolConfig,
        sources: Vec<Box<dyn Source>>,
        store: Arc<dyn PoolStore>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let crawler = Arc::new(CrawlOrchestrator::new(
            sources,
            Arc::clone(&store),
            Arc::clone(&validator),
        ));
        let checker = Arc::new(RecheckScheduler::new(Arc::clone(&store), validator));
        Self {
            config,
            store,
            crawler,
            checker,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn PoolStore> {
        Arc::clone(&self.store)
    }

    /// Run one crawl pass now.
    pub async fn crawl_once(&self, cancel: &CancellationToken) -> Result<CrawlReport, PoolError> {
        self.crawler.run(cancel).await
    }

    /// Run one recheck pass now.
    pub async fn recheck_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RecheckReport, PoolError> {
        self.checker.run(cancel).await
    }

    /// Start the crawl and recheck loops in the background.
    ///
    /// The first crawl starts immediately, the first recheck after
    /// `initial_check_delay`.
    pub fn start(&self) -> PoolHandle {
        let shutdown = CancellationToken::new();
        let crawl_cancel = shutdown.child_token();
        let check_cancel = shutdown.child_token();

        let crawl_task = spawn_crawl_loop(
            Arc::clone(&self.crawler),
            self.config.crawl_interval,
            crawl_cancel.clone(),
        );
        let check_task = spawn_recheck_loop(
            Arc::clone(&self.checker),
            self.config.initial_check_delay,
            self.config.check_interval,
            check_cancel.clone(),
        );

        PoolHandle {
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            crawl_cancel,
            check_cancel,
            crawl_task,
            check_task,
        }
    }

    /// Get a random live proxy.
    pub async fn get_proxy(&self) -> Result<Proxy, StoreError> {
        self.store.get_random().await
    }

    /// Get statistics about the proxy pool.
    pub async fn get_stats(&self) -> Result<PoolStats, StoreError> {
        let proxies = self.store.get_all().await?;
        let total = proxies.len();
        if total == 0 {
            return Ok(PoolStats {
                total,
                average_score: 0.0,
                average_latency_ms: 0.0,
            });
        }
        let score: u64 = proxies.iter().map(|p| u64::from(p.score)).sum();
        let latency: u64 = proxies.iter().map(|p| p.latency_ms).sum();
        Ok(PoolStats {
            total,
            average_score: score as f64 / total as f64,
            average_latency_ms: latency as f64 / total as f64,
        })
    }
}

/// Control over the background loops started by [`ProxyPool::start`].
///
/// Dropping the handle cancels both loops without waiting for them; use
/// [`PoolHandle::shutdown`] to wait.
#[derive(Debug)]
pub struct PoolHandle {
    _stop_on_drop: DropGuard,
    shutdown: CancellationToken,
    crawl_cancel: CancellationToken,
    check_cancel: CancellationToken,
    crawl_task: JoinHandle<()>,
    check_task: JoinHandle<()>,
}

impl PoolHandle {
    /// Stop only the crawl loop.
    pub fn stop_crawling(&self) {
        self.crawl_cancel.cancel();
    }

    /// Stop only the recheck loop.
    pub fn stop_rechecking(&self) {
        self.check_cancel.cancel();
    }

    /// Token cancelling both loops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop both loops and wait for them to finish their current item.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, task) in [("crawl", self.crawl_task), ("recheck", self.check_task)] {
            if let Err(e) = task.await {
                error!("The {} loop ended abnormally: {}", name, e);
            }
        }
    }
}

/// Crawl immediately, then every `interval`, until `cancel` fires.
pub fn spawn_crawl_loop(
    crawler: Arc<CrawlOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Crawl loop started, interval {:?}", interval);
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = crawler.run(&cancel).await {
                error!("Scheduled crawl failed: {}", e);
            }
        }
        info!("Crawl loop stopped");
    })
}

/// Recheck after `initial_delay`, then every `interval`, until `cancel` fires.
pub fn spawn_recheck_loop(
    checker: Arc<RecheckScheduler>,
    initial_delay: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Recheck loop waiting {:?} before the first pass", initial_delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Recheck loop stopped");
                return;
            }
            _ = time::sleep(initial_delay) => {}
        }

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match checker.run(&cancel).await {
                Ok(_) => {}
                Err(PoolError::Cancelled) => warn!("Recheck pass interrupted by shutdown"),
                Err(e) => error!("Scheduled recheck failed: {}", e),
            }
        }
        info!("Recheck loop stopped");
    })
}
