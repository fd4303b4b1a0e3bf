//! Simple example of running a proxypool.
//!
//! Pass a TOML config path as the first argument, or run without one to crawl
//! two public lists.

use proxypool::{PoolConfig, ProxyKind, ProxyPool, SourceSpec};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::builder()
            .source(
                SourceSpec::new(
                    "openproxylist",
                    ProxyKind::Socks5,
                    vec!["https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS5.txt"],
                )
                .anonymous(true),
            )
            .source(SourceSpec::new(
                "proxifly",
                ProxyKind::Http,
                vec!["https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/http/data.txt"],
            ))
            .probe_timeout(Duration::from_secs(5))
            .crawl_interval(Duration::from_secs(15 * 60))
            .check_interval(Duration::from_secs(5 * 60))
            .build(),
    };

    println!("Starting proxy pool with {} sources...", config.sources.len());
    let pool = ProxyPool::new(config)?;
    let handle = pool.start();

    let mut report = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let stats = pool.get_stats().await?;
                println!(
                    "{} proxies, average score {:.1}, average latency {:.0}ms",
                    stats.total, stats.average_score, stats.average_latency_ms
                );
                if let Ok(proxy) = pool.get_proxy().await {
                    println!("Random pick: {}", proxy.url());
                }
            }
        }
    }

    println!("Shutting down...");
    handle.shutdown().await;
    Ok(())
}
