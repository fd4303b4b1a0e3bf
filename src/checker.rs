//! Recheck pass: re-validate every pooled proxy, rescore survivors, evict failures.

use crate::error::PoolError;
use crate::store::PoolStore;
use crate::validator::Validator;

use log::{debug, error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Counts from one completed recheck pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecheckReport {
    /// Records loaded at the start of the pass.
    pub checked: usize,
    /// Records that passed and were rescored.
    pub passed: usize,
    /// Records removed after a failed probe.
    pub evicted: usize,
    /// Per-record store errors that were logged and skipped.
    pub store_errors: usize,
}

/// Re-validates the whole pool one record at a time.
///
/// Records are processed sequentially so the pass never races itself on the
/// same keys and the outbound probe rate stays bounded.
pub struct RecheckScheduler {
    store: Arc<dyn PoolStore>,
    validator: Arc<dyn Validator>,
}

impl RecheckScheduler {
    /// Create a scheduler over `store`.
    pub fn new(store: Arc<dyn PoolStore>, validator: Arc<dyn Validator>) -> Self {
        Self { store, validator }
    }

    /// Run one pass over the current pool.
    ///
    /// Returns `PoolError::Cancelled` as soon as `cancel` is observed between
    /// records; records not yet visited keep their values.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RecheckReport, PoolError> {
        let proxies = self.store.get_all().await.map_err(PoolError::StoreRead)?;
        info!("Rechecking {} pooled proxies", proxies.len());

        let mut report = RecheckReport {
            checked: proxies.len(),
            ..RecheckReport::default()
        };

        for mut proxy in proxies {
            if cancel.is_cancelled() {
                info!(
                    "Recheck cancelled after {} of {} proxies",
                    report.passed + report.evicted,
                    report.checked
                );
                return Err(PoolError::Cancelled);
            }

            let outcome = self.validator.validate(&proxy).await;
            if outcome.ok {
                proxy.mark_rechecked(outcome.latency_ms);
                report.passed += 1;
                debug!(
                    "Proxy {} passed recheck in {}ms, score {}",
                    proxy.address, outcome.latency_ms, proxy.score
                );
                if let Err(e) = self.store.save(&proxy).await {
                    error!("Failed to update proxy {}: {}", proxy.address, e);
                    report.store_errors += 1;
                }
            } else {
                report.evicted += 1;
                info!("Removing dead proxy {}", proxy.address);
                if let Err(e) = self.store.remove(&proxy.address).await {
                    error!("Failed to remove dead proxy {}: {}", proxy.address, e);
                    report.store_errors += 1;
                }
            }
        }

        info!(
            "Recheck finished: {} passed, {} evicted",
            report.passed, report.evicted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::proxy::{Address, Proxy, ProxyKind};
    use crate::store::MemoryStore;
    use crate::validator::ProbeOutcome;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Validator returning a fixed outcome and remembering what it probed.
    struct FixedValidator {
        outcome: ProbeOutcome,
        probed: Mutex<Vec<Address>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl FixedValidator {
        fn new(outcome: ProbeOutcome) -> Self {
            Self {
                outcome,
                probed: Mutex::new(Vec::new()),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl Validator for FixedValidator {
        async fn validate(&self, proxy: &Proxy) -> ProbeOutcome {
            self.probed.lock().push(proxy.address.clone());
            if let Some(cancel) = &self.cancel_after_first {
                cancel.cancel();
            }
            self.outcome
        }
    }

    fn record(port: u16, score: i64) -> Proxy {
        Proxy::new(Address::new("10.0.0.1", port), ProxyKind::Socks5).with_score(score)
    }

    async fn seeded(records: &[Proxy]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for r in records {
            store.save(r).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn slow_pass_lowers_score() {
        let store = seeded(&[record(1, 50)]).await;
        let validator = Arc::new(FixedValidator::new(ProbeOutcome::passed(2000)));
        let checker = RecheckScheduler::new(store.clone(), validator);

        let report = checker.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.passed, 1);

        let stored = store.get_all().await.unwrap();
        assert_eq!(stored[0].score, 49);
        assert_eq!(stored[0].latency_ms, 2000);
    }

    #[tokio::test]
    async fn fast_pass_raises_score_up_to_the_cap() {
        let store = seeded(&[record(1, 70), record(2, 100)]).await;
        let validator = Arc::new(FixedValidator::new(ProbeOutcome::passed(300)));
        let checker = RecheckScheduler::new(store.clone(), validator);

        checker.run(&CancellationToken::new()).await.unwrap();
        let mut scores: Vec<u8> = store.get_all().await.unwrap().iter().map(|p| p.score).collect();
        scores.sort_unstable();
        assert_eq!(scores, [71, 100]);
    }

    #[tokio::test]
    async fn failed_probe_evicts() {
        let store = seeded(&[record(1, 100)]).await;
        let validator = Arc::new(FixedValidator::new(ProbeOutcome::failed(0)));
        let checker = RecheckScheduler::new(store.clone(), validator);

        let report = checker.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cancellation_leaves_unvisited_records_untouched() {
        let originals = [record(1, 50), record(2, 50), record(3, 50)];
        let store = seeded(&originals).await;
        let cancel = CancellationToken::new();
        let mut validator = FixedValidator::new(ProbeOutcome::passed(10));
        validator.cancel_after_first = Some(cancel.clone());
        let validator = Arc::new(validator);
        let checker = RecheckScheduler::new(store.clone(), validator.clone());

        let err = checker.run(&cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(validator.probed.lock().len(), 1);

        let probed = validator.probed.lock()[0].clone();
        for proxy in store.get_all().await.unwrap() {
            if proxy.address == probed {
                assert_eq!(proxy.score, 51);
            } else {
                let original = originals.iter().find(|o| o.address == proxy.address).unwrap();
                assert_eq!(&proxy, original);
            }
        }
    }

    #[tokio::test]
    async fn empty_pool_is_a_clean_pass() {
        let checker = RecheckScheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedValidator::new(ProbeOutcome::passed(1))),
        );
        assert_eq!(checker.run(&CancellationToken::new()).await.unwrap(), RecheckReport::default());
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl PoolStore for ReadOnlyStore {
        async fn save(&self, proxy: &Proxy) -> Result<(), StoreError> {
            Err(StoreError::NotFound(proxy.key()))
        }
        async fn get_all(&self) -> Result<Vec<Proxy>, StoreError> {
            self.0.get_all().await
        }
        async fn get_random(&self) -> Result<Proxy, StoreError> {
            self.0.get_random().await
        }
        async fn remove(&self, address: &Address) -> Result<(), StoreError> {
            Err(StoreError::NotFound(address.to_string()))
        }
        async fn update_score(&self, address: &Address, _score: i64) -> Result<(), StoreError> {
            Err(StoreError::NotFound(address.to_string()))
        }
    }

    #[tokio::test]
    async fn store_errors_do_not_abort_the_pass() {
        let inner = MemoryStore::new();
        inner.save(&record(1, 50)).await.unwrap();
        inner.save(&record(2, 50)).await.unwrap();
        let checker = RecheckScheduler::new(
            Arc::new(ReadOnlyStore(inner)),
            Arc::new(FixedValidator::new(ProbeOutcome::passed(5))),
        );

        let report = checker.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.passed, 2);
        assert_eq!(report.store_errors, 2);
    }
}
