//! Redis-backed counter store.
//!
//! Counters are plain decimal strings written with `SET key value EX ttl`,
//! so they can be inspected and edited with `redis-cli`:
//!
//! ```text
//! > GET anon_quota:2025-03:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! "4"
//! > TTL anon_quota:2025-03:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! (integer) 2677811
//! ```
//!
//! ## Connection handling
//!
//! [`RedisCounterStore::open`] only parses the URL. The first call connects
//! through a `redis::aio::ConnectionManager`, which then reconnects on its
//! own after drops. If that first connect fails, the next call tries again,
//! so a service started before Redis is up still begins counting once Redis
//! appears. [`RedisCounterStore::connect`] connects eagerly instead.
//!
//! The manager makes a single connection attempt per call, bounded by the
//! store timeout, and each command is bounded the same way. Nothing is
//! retried: a refused connection comes back as
//! [`StoreError::Unreachable`] and the ledger admits.
//!
//! ## Example
//!
//! ```rust,no_run
//! use anon_quota::{Admission, RedisCounterStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisCounterStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let admission = Admission::builder(Arc::new(store)).build().unwrap();
//! }
//! ```

use crate::application::error::StoreError;
use crate::application::ledger::DEFAULT_STORE_TIMEOUT;
use crate::application::ports::CounterStore;
use crate::domain::window::UsageKey;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Counter store shared by every instance pointing at the same Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    timeout: Duration,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("addr", &self.client.get_connection_info().addr)
            .field("connected", &self.connection.initialized())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisCounterStore {
    /// Create a store for `url` without connecting.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://redis:6379/")
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
            timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Bound connection attempts and command responses by `timeout`.
    ///
    /// Only affects connections made after the call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a store for `url`, connect and verify it answers `PING`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or Redis is not reachable.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let store = Self::open(url)?;
        let mut conn = store.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        tracing::debug!(url, "connected to redis counter store");
        Ok(store)
    }

    /// True once a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        self.connection
            .get_or_try_init(|| {
                ConnectionManager::new_with_config(self.client.clone(), self.manager_config())
            })
            .await
            .cloned()
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(self.timeout)
            .set_response_timeout(self.timeout)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let reply = redis::cmd("PING").query_async::<String>(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!(
                "unexpected PING reply: {}",
                reply
            )))
        }
    }

    async fn get(&self, key: &UsageKey) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key.to_string()).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &UsageKey,
        value: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // EX 0 is rejected by Redis
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key.to_string(), value.to_string(), ttl_secs)
            .await?;
        Ok(())
    }
}
