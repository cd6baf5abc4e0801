//! Streaming COPY sink adapter.
//!
//! Moves a fallible byte stream into a [`CopyChannel`] with bounded
//! memory. A spawned forwarding task pulls from the source and pushes
//! into a bounded `mpsc` channel; the consumer awaits each COPY send.
//! When the store is slow the channel fills, the forwarder blocks on
//! `send`, and the source stops being polled.
//!
//! The transfer is all-or-nothing: any failure aborts the COPY so the
//! store commits none of it.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use copyflow_core::channel::ChannelConfig;
use copyflow_core::record::COLUMNS;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::TableName;
use super::store::CopyChannel;
use crate::error::TransferError;
use crate::metrics::LoadMetrics;

/// Builds the `COPY ... FROM STDIN` statement for the record columns.
#[must_use]
pub fn build_copy_sql(table: &TableName) -> String {
    format!(
        "COPY {table} ({}) FROM STDIN WITH (FORMAT text)",
        COLUMNS.join(", ")
    )
}

/// Streams bytes into a COPY channel with backpressure.
#[derive(Debug, Clone)]
pub struct CopySink {
    channel: ChannelConfig,
    metrics: Arc<LoadMetrics>,
}

impl CopySink {
    /// Creates a sink with the given channel sizing.
    #[must_use]
    pub fn new(channel: ChannelConfig, metrics: Arc<LoadMetrics>) -> Self {
        Self { channel, metrics }
    }

    /// Streams `source` into `copy` and finishes the COPY.
    ///
    /// Returns the row count the store acknowledged. On error or
    /// cancellation the COPY is aborted before returning. Cancellation is
    /// observed until `finish` is issued; after that the store decides.
    ///
    /// # Errors
    ///
    /// Returns `TransferError` if the source, the store or the forwarding
    /// task fails, or if `cancel` fires first.
    pub async fn transfer<St, C>(
        &self,
        source: St,
        copy: &mut C,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>
    where
        St: Stream<Item = io::Result<Bytes>> + Send + 'static,
        C: CopyChannel,
    {
        let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(self.channel.capacity);
        let metrics = Arc::clone(&self.metrics);

        let forwarder = tokio::spawn(async move {
            futures::pin_mut!(source);
            while let Some(item) = source.next().await {
                let failed = item.is_err();
                if !failed {
                    metrics.record_forward();
                }
                // Receiver gone means the consumer already bailed out.
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        let outcome = match self.pump(&mut rx, copy, cancel).await {
            Ok(chunks) => match forwarder.await {
                Ok(()) => Ok(chunks),
                Err(e) => Err(TransferError::Forwarder(e.to_string())),
            },
            Err(e) => {
                forwarder.abort();
                Err(e)
            }
        };

        let chunks = match outcome {
            Ok(chunks) => chunks,
            Err(e) => {
                copy.abort();
                self.metrics.record_abort();
                if !matches!(e, TransferError::Cancelled) {
                    self.metrics.record_error();
                }
                warn!(error = %e, "COPY aborted");
                return Err(e);
            }
        };

        match copy.finish().await {
            Ok(rows) => {
                self.metrics.record_copy(rows);
                info!(chunks, rows, "COPY completed");
                Ok(rows)
            }
            Err(e) => {
                self.metrics.record_abort();
                self.metrics.record_error();
                let err = TransferError::Finish(e);
                warn!(error = %err, "COPY rejected");
                Err(err)
            }
        }
    }

    /// Drains the channel into the COPY. Returns the chunks sent.
    async fn pump<C: CopyChannel>(
        &self,
        rx: &mut mpsc::Receiver<io::Result<Bytes>>,
        copy: &mut C,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let mut chunks = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = rx.recv() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(TransferError::Source(e)),
                None => return Ok(chunks),
            };

            let len = chunk.len() as u64;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransferError::Cancelled),
                sent = copy.send(chunk) => {
                    sent.map_err(|source| TransferError::Send { chunks, source })?;
                }
            }
            chunks += 1;
            self.metrics.record_send(len);
            debug!(chunks, bytes = len, "chunk sent");
        }
    }
}
