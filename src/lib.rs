//! # proxypool
//!
//! A self-refreshing pool of HTTP and SOCKS proxies.
//!
//! Candidates are pulled from pluggable [`Source`]s, probed once each through
//! the proxy against an identity endpoint, and saved to a [`PoolStore`] with a
//! full score. A separate recheck pass re-probes every pooled proxy, nudges its
//! score up or down by latency, and evicts it on the first failure.

pub mod checker;
pub mod config;
pub mod crawler;
pub mod error;
pub mod pool;
pub mod proxy;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod source;
pub mod store;
mod utils;
pub mod validator;

pub use checker::{RecheckReport, RecheckScheduler};
pub use config::{PoolConfig, PoolConfigBuilder, SourceSpec};
pub use crawler::{CrawlOrchestrator, CrawlReport, SourceReport};
pub use error::{ConfigError, NoProxyAvailable, PoolError, SourceError, StoreError};
pub use pool::{PoolHandle, PoolStats, ProxyPool};
pub use proxy::{Address, Proxy, ProxyKind};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use source::{ListSource, Source, StaticSource};
pub use store::{MemoryStore, PoolStore};
pub use tokio_util::sync::CancellationToken;
pub use validator::{ProbeOutcome, ProbeValidator, Validator};
