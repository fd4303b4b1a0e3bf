//! Redis-backed pool store.

use crate::error::{NoProxyAvailable, StoreError};
use crate::proxy::{Address, Proxy};
use crate::store::{PoolStore, RECORD_TTL};

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::fmt;
use std::time::Duration;

const KEY_PREFIX: &str = "proxy:";

/// Store keeping each record as JSON under `proxy:<host>:<port>` with a Redis expiry.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to Redis pool store at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ttl: RECORD_TTL,
        })
    }

    /// Override the record TTL. Redis expiries have one-second granularity.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(address: &Address) -> String {
        format!("{KEY_PREFIX}{address}")
    }

    async fn read(&self, key: &str) -> Result<Option<Proxy>, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(key).await?;
        data.as_deref().map(decode).transpose()
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{KEY_PREFIX}*")).await?;
        Ok(keys)
    }
}

fn encode(proxy: &Proxy) -> Result<String, StoreError> {
    Ok(serde_json::to_string(proxy)?)
}

fn decode(json: &str) -> Result<Proxy, StoreError> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl PoolStore for RedisStore {
    async fn save(&self, proxy: &Proxy) -> Result<(), StoreError> {
        let key = Self::key(&proxy.address);
        debug!("Saving proxy to Redis under {}", key);
        let json = encode(proxy)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, json, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Proxy>, StoreError> {
        let keys = self.keys().await?;
        let mut proxies = Vec::with_capacity(keys.len());
        for key in keys {
            // A key may expire between KEYS and GET; undecodable entries are skipped.
            match self.read(&key).await {
                Ok(Some(proxy)) => proxies.push(proxy),
                Ok(None) => {}
                Err(StoreError::Codec(e)) => warn!("Skipping undecodable record {}: {}", key, e),
                Err(e) => return Err(e),
            }
        }
        Ok(proxies)
    }

    async fn get_random(&self) -> Result<Proxy, StoreError> {
        let mut keys = self.keys().await?;
        // Keys that expired after KEYS are dropped and another one is drawn.
        while !keys.is_empty() {
            let idx = rand::rng().random_range(0..keys.len());
            let key = keys.swap_remove(idx);
            match self.read(&key).await {
                Ok(Some(proxy)) => return Ok(proxy),
                Ok(None) => debug!("Key {} expired before it was read", key),
                Err(StoreError::Codec(e)) => warn!("Skipping undecodable record {}: {}", key, e),
                Err(e) => return Err(e),
            }
        }
        Err(NoProxyAvailable.into())
    }

    async fn remove(&self, address: &Address) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(address)).await?;
        Ok(())
    }

    async fn update_score(&self, address: &Address, score: i64) -> Result<(), StoreError> {
        let key = Self::key(address);
        let mut proxy = self
            .read(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        proxy.set_score(score);
        self.save(&proxy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;

    #[test]
    fn keys_carry_prefix_and_address() {
        assert_eq!(RedisStore::key(&Address::new("10.0.0.1", 1080)), "proxy:10.0.0.1:1080");
        assert_eq!(RedisStore::key(&Address::new("::1", 80)), "proxy:[::1]:80");
    }

    #[test]
    fn records_survive_the_json_encoding() {
        let proxy = Proxy::new(Address::new("10.0.0.1", 1080), ProxyKind::Socks4)
            .with_anonymous(true)
            .with_latency(320)
            .with_score(57);
        let json = encode(&proxy).unwrap();
        assert!(json.contains(r#""address":"10.0.0.1:1080""#));
        assert!(json.contains(r#""kind":"socks4""#));
        assert_eq!(decode(&json).unwrap(), proxy);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(decode("not json"), Err(StoreError::Codec(_))));
        assert!(matches!(
            decode(r#"{"address":"10.0.0.1","kind":"http"}"#),
            Err(StoreError::Codec(_))
        ));
    }
}
