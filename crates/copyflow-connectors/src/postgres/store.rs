//! Store abstraction and its `PostgreSQL` implementation.
//!
//! The loader only needs three things from the store: a connection held
//! exclusively for the session, plain statements for the durability
//! toggle, and a COPY channel. [`BulkStore`], [`StoreSession`] and
//! [`CopyChannel`] capture exactly that, so the loader can be driven by
//! [`PgStore`] in production and by the mocks in [`crate::testing`].
//!
//! A session is released by dropping it. For [`PgSession`] that returns
//! the connection to the `deadpool-postgres` pool.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::{CopyInSink, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::config::StoreConfig;
use crate::error::StoreError;

/// Hands out sessions, each owning one connection.
#[async_trait]
pub trait BulkStore: Send + Sync {
    /// Session type.
    type Session: StoreSession;

    /// Acquires a connection.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the store is unreachable or
    /// rejects the credentials.
    async fn connect(&self) -> Result<Self::Session, StoreError>;
}

/// One exclusively owned connection.
#[async_trait]
pub trait StoreSession: Send + Sync + 'static {
    /// COPY channel type.
    type Copy: CopyChannel;

    /// Executes a single statement, returning affected rows.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement is rejected or the
    /// connection is lost.
    async fn execute(&self, sql: &str) -> Result<u64, StoreError>;

    /// Executes one or more semicolon-separated statements.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if any statement is rejected.
    async fn batch_execute(&self, sql: &str) -> Result<(), StoreError>;

    /// Runs a query and returns the first column of the first row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query is rejected.
    async fn query_scalar(&self, sql: &str) -> Result<Option<String>, StoreError>;

    /// Starts a `COPY ... FROM STDIN`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store refuses the COPY statement.
    async fn copy_in(&self, sql: &str) -> Result<Self::Copy, StoreError>;
}

/// Store side of a running COPY.
///
/// Either `finish` is called and the whole stream is committed, or the
/// channel is aborted (explicitly or by dropping it) and nothing is.
#[async_trait]
pub trait CopyChannel: Send {
    /// Sends one chunk. Resolves only once the channel can accept more,
    /// which is how the store's flow control reaches the producer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store failed the COPY.
    async fn send(&mut self, chunk: Bytes) -> Result<(), StoreError>;

    /// Signals end of input and waits for the store's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store rejects the COPY.
    async fn finish(&mut self) -> Result<u64, StoreError>;

    /// Abandons the COPY. Nothing sent so far is committed.
    fn abort(&mut self);
}

/// `PostgreSQL` store backed by a `deadpool-postgres` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Creates the pool. Does not connect until the first session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the pool cannot be built.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.pg_config(), NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| StoreError::Connection(format!("pool creation failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Closes the pool; sessions still checked out are dropped on return.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgStore")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

#[async_trait]
impl BulkStore for PgStore {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("pool get failed: {e}")))?;
        debug!("acquired PostgreSQL connection");
        Ok(PgSession { client })
    }
}

/// A pooled `PostgreSQL` connection.
pub struct PgSession {
    client: Object,
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

#[async_trait]
impl StoreSession for PgSession {
    type Copy = PgCopyChannel;

    async fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), StoreError> {
        Ok(self.client.batch_execute(sql).await?)
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<String>, StoreError> {
        let messages = self.client.simple_query(sql).await?;
        for msg in &messages {
            if let SimpleQueryMessage::Row(row) = msg {
                return Ok(row.get(0).map(str::to_string));
            }
        }
        Ok(None)
    }

    async fn copy_in(&self, sql: &str) -> Result<PgCopyChannel, StoreError> {
        let sink = self.client.copy_in::<_, Bytes>(sql).await?;
        Ok(PgCopyChannel {
            sink: Some(Box::pin(sink)),
        })
    }
}

/// COPY channel over a `tokio-postgres` `CopyInSink`.
///
/// Dropping the sink without finishing it makes `tokio-postgres` send
/// `CopyFail`, which rolls the whole COPY back on the server.
pub struct PgCopyChannel {
    sink: Option<Pin<Box<CopyInSink<Bytes>>>>,
}

impl std::fmt::Debug for PgCopyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCopyChannel")
            .field("open", &self.sink.is_some())
            .finish()
    }
}

#[async_trait]
impl CopyChannel for PgCopyChannel {
    async fn send(&mut self, chunk: Bytes) -> Result<(), StoreError> {
        let sink = self.sink.as_mut().ok_or(StoreError::Closed)?;
        Ok(sink.send(chunk).await?)
    }

    async fn finish(&mut self) -> Result<u64, StoreError> {
        let mut sink = self.sink.take().ok_or(StoreError::Closed)?;
        Ok(sink.as_mut().finish().await?)
    }

    fn abort(&mut self) {
        self.sink = None;
    }
}
