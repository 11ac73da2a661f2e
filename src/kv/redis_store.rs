//! Redis-backed [`KvStore`] for single-node and cluster deployments.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use tracing::debug;
use url::Url;

use super::KvStore;
use crate::config::StoreConfig;
use crate::{Error, Result};

/// Redis store over any multiplexed async connection.
///
/// `C` is either a [`MultiplexedConnection`] (single node) or a
/// [`ClusterConnection`]; both are cheap to clone and safe to share.
pub struct RedisKvStore<C> {
    conn: C,
    timeout: Duration,
}

impl RedisKvStore<MultiplexedConnection> {
    /// Connect to a single node at `addr` (`host:port`).
    pub async fn single(addr: &str, config: &StoreConfig) -> Result<Self> {
        let url = connection_url(addr, config.password.as_deref(), config.db)?;
        let client = redis::Client::open(url.as_str())?;
        let conn = with_timeout(
            config.timeout,
            "store connect",
            client.get_multiplexed_async_connection(),
        )
        .await?;
        Ok(Self {
            conn,
            timeout: config.timeout,
        })
    }
}

impl RedisKvStore<ClusterConnection> {
    /// Connect to a cluster seeded by `addrs`.
    pub async fn cluster(addrs: &[String], config: &StoreConfig) -> Result<Self> {
        let nodes = addrs
            .iter()
            .map(|addr| connection_url(addr, None, 0).map(String::from))
            .collect::<Result<Vec<_>>>()?;

        let mut builder = ClusterClientBuilder::new(nodes);
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.password(password.to_string());
        }
        let client = builder.build()?;
        let conn = with_timeout(config.timeout, "store connect", client.get_async_connection()).await?;
        Ok(Self {
            conn,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl<C> KvStore for RedisKvStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        with_timeout(self.timeout, "HGET", conn.hget(key, field)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = with_timeout(self.timeout, "HSET", conn.hset(key, field, value)).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = with_timeout(self.timeout, "HDEL", conn.hdel(key, field)).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        with_timeout(self.timeout, "HGETALL", conn.hgetall(key)).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count);
        let (next, keys): (u64, Vec<String>) =
            with_timeout(self.timeout, "SCAN", cmd.query_async(&mut conn)).await?;
        debug!(cursor, next, found = keys.len(), "Scanned store keys");
        Ok((next, keys))
    }
}

/// Run a store future under `timeout`, mapping both failure modes to [`Error`].
async fn with_timeout<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(format!("{op} exceeded {}ms", timeout.as_millis()))),
    }
}

/// Build `redis://[:password@]host:port/db` for an address.
fn connection_url(addr: &str, password: Option<&str>, db: i64) -> Result<Url> {
    let mut url = Url::parse(&format!("redis://{addr}/{db}"))
        .map_err(|e| Error::Config(format!("Invalid store address '{addr}': {e}")))?;
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| Error::Config(format!("Cannot set password on '{addr}'")))?;
    }
    Ok(url)
}
