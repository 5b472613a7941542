//! Ergonomic entry point over [`Pool`].
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    batch::Batch,
    common::ByteStr,
    error::{Error, Result},
    pool::{Deadline, Pool, PoolConfig},
    rows::Rows,
    signal::ClientQuery,
};

/// A pooled client speaking the protocol's user-facing operations: ping,
/// query, exec, and batch insert.
///
/// Cheaply cloneable; every clone shares the same underlying [`Pool`].
#[derive(Clone)]
pub struct Client {
    pool: Pool,
    next_query_id: std::sync::Arc<AtomicU64>,
}

impl Client {
    /// Builds a client straight from a DSN.
    pub fn connect(dsn: &str) -> Result<Self> {
        Ok(Self::from_pool(Pool::connect(dsn)?))
    }

    /// Builds a client from already-built pool configuration.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        Ok(Self::from_pool(Pool::new(config)?))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool, next_query_id: std::sync::Arc::new(AtomicU64::new(0)) }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn query_id(&self) -> ByteStr {
        let id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        ByteStr::copy_from_str(&format!("q-{id}"))
    }

    fn client_query(&self, query: &str) -> ClientQuery {
        let config = self.pool.config();
        ClientQuery {
            query: ByteStr::copy_from_str(query),
            query_id: self.query_id(),
            database: ByteStr::copy_from_str(&config.database),
            user: ByteStr::copy_from_str(&config.user),
            password: ByteStr::copy_from_str(&config.password),
        }
    }

    /// Acquire → ping turn → release.
    pub async fn ping(&self) -> Result<()> {
        self.ping_with_deadline(&Deadline::none()).await
    }

    /// Same as [`ping`][Client::ping], but `deadline` governs both the
    /// acquire and the turn's read/write.
    pub async fn ping_with_deadline(&self, deadline: &Deadline) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as i64).unwrap_or(0);
        self.pool.ping(deadline, timestamp).await
    }

    /// Acquire → query turn → a streaming [`Rows`] handle that owns the
    /// session until closed.
    pub async fn query(&self, query: &str) -> Result<Rows> {
        self.query_with_deadline(&Deadline::none(), query).await
    }

    /// Same as [`query`][Client::query], but `deadline` governs both the
    /// acquire and the turn's read/write.
    pub async fn query_with_deadline(&self, deadline: &Deadline, query: &str) -> Result<Rows> {
        let request = self.client_query(query);
        let (checkout, result) = self.pool.query(deadline, request).await?;
        Ok(Rows::new(checkout, result))
    }

    /// Acquire → exec turn → release.
    pub async fn exec(&self, query: &str) -> Result<()> {
        self.exec_with_deadline(&Deadline::none(), query).await
    }

    /// Same as [`exec`][Client::exec], but `deadline` governs both the
    /// acquire and the turn's read/write.
    pub async fn exec_with_deadline(&self, deadline: &Deadline, query: &str) -> Result<()> {
        let request = self.client_query(query);
        let result = self.pool.exec(deadline, request).await?;
        match result.exception {
            Some(exception) => Err(exception.into()),
            None => Ok(()),
        }
    }

    /// Runs `query`, takes the first row or errors with "no rows", then
    /// closes.
    pub async fn query_row(&self, query: &str) -> Result<Rows> {
        let mut rows = self.query(query).await?;
        if !rows.next() {
            if let Some(exception) = rows.err().cloned() {
                return Err(Error::Server(exception));
            }
            return Err(Error::NoRows);
        }
        Ok(rows)
    }

    /// Parses the leading `INSERT INTO table (cols…)` clause of `query` and
    /// returns a [`Batch`] that defers all network work until `send`/`close`.
    pub fn prepare_batch(&self, query: &str) -> Result<Batch> {
        Batch::prepare(self.pool.clone(), query)
    }
}

impl std::str::FromStr for Client {
    type Err = Error;

    fn from_str(dsn: &str) -> Result<Self> {
        Client::connect(dsn)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn query_ids_are_monotonically_distinct() {
        let pool = Pool::new(PoolConfig::from_dsn("tcp://localhost:2849/db").unwrap()).unwrap();
        let client = Client::from_pool(pool);
        let a = client.query_id();
        let b = client.query_id();
        assert_ne!(a, b);
    }
}
