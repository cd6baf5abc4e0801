//! Lazy record producer.
//!
//! [`RecordProducer`] is a pull-based iterator over `[0, count)`. Between
//! calls it keeps only the next index and the clock, so producing a
//! hundred million records costs the same memory as producing ten.
//!
//! Downstream stages want buffers rather than single lines. [`LineChunker`]
//! packs consecutive lines into `Bytes` chunks of roughly `chunk_bytes`,
//! never splitting a line across chunks.
//!
//! ```text
//! RecordProducer ──lines──▶ LineChunker ──Bytes──▶ byte stream ──▶ COPY sink
//! ```

use std::fmt::Write as _;
use std::io;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};

use crate::clock::{Clock, SystemClock};
use crate::record::Record;

/// Produces `count` records stamped with the system clock.
#[must_use]
pub fn produce(count: u64) -> RecordProducer<SystemClock> {
    RecordProducer::new(count, SystemClock)
}

/// Produces `count` records stamped by `clock`.
#[must_use]
pub fn produce_with_clock<C: Clock>(count: u64, clock: C) -> RecordProducer<C> {
    RecordProducer::new(count, clock)
}

/// Iterator over the deterministic record sequence.
#[derive(Debug, Clone)]
pub struct RecordProducer<C> {
    next: u64,
    count: u64,
    clock: C,
}

impl<C: Clock> RecordProducer<C> {
    /// Creates a producer for indices `[0, count)`.
    #[must_use]
    pub fn new(count: u64, clock: C) -> Self {
        Self {
            next: 0,
            count,
            clock,
        }
    }

    /// Total records this producer yields from the start.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Adapts the producer into delimited lines.
    pub fn lines(self) -> impl Iterator<Item = String> {
        self.map(|record| record.to_line())
    }

    /// Adapts the producer into `Bytes` chunks of roughly `chunk_bytes`.
    #[must_use]
    pub fn chunked(self, chunk_bytes: usize) -> LineChunker<Self> {
        LineChunker::new(self, chunk_bytes)
    }

    /// Adapts the producer into a fallible byte stream for the COPY sink.
    ///
    /// The stream never yields an error; the `io::Result` item type lets it
    /// share a sink with file-backed sources.
    pub fn into_byte_stream(
        self,
        chunk_bytes: usize,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
    where
        C: 'static,
    {
        stream::iter(self.chunked(chunk_bytes).map(Ok))
    }
}

impl<C: Clock> Iterator for RecordProducer<C> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.next >= self.count {
            return None;
        }
        let record = Record::at(self.next, self.clock.now());
        self.next += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.count - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<C: Clock> ExactSizeIterator for RecordProducer<C> {}

/// Packs delimited lines into `Bytes` chunks.
#[derive(Debug)]
pub struct LineChunker<I> {
    records: I,
    chunk_bytes: usize,
    buf: BytesMut,
}

impl<I: Iterator<Item = Record>> LineChunker<I> {
    /// Creates a chunker flushing once a chunk reaches `chunk_bytes`.
    ///
    /// A `chunk_bytes` of zero yields one line per chunk.
    #[must_use]
    pub fn new(records: I, chunk_bytes: usize) -> Self {
        Self {
            records,
            chunk_bytes,
            buf: BytesMut::with_capacity(chunk_bytes),
        }
    }
}

impl<I: Iterator<Item = Record>> Iterator for LineChunker<I> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        for record in self.records.by_ref() {
            // Writing into BytesMut cannot fail.
            let _ = writeln!(self.buf, "{record}");
            if self.buf.len() >= self.chunk_bytes {
                return Some(self.buf.split().freeze());
            }
        }
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}
