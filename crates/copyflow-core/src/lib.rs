//! # `copyflow` Core
//!
//! Pure building blocks of the ingestion pipeline. Nothing in this crate
//! talks to a database.
//!
//! This crate provides:
//! - **Records**: The synthetic row model and its tab-delimited wire form
//! - **Producer**: A lazy, deterministic record iterator and byte chunker
//! - **Dataset**: Streaming writer for the generated dataset file
//! - **Throughput**: Elapsed-time and records/second reporting
//!
//! ## Example
//!
//! ```rust,ignore
//! use copyflow_core::producer::produce;
//!
//! for line in produce(3).lines() {
//!     print!("{line}");
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )
)]

pub mod channel;
pub mod clock;
pub mod dataset;
pub mod producer;
pub mod record;
pub mod throughput;

pub use channel::ChannelConfig;
pub use clock::{Clock, FixedClock, SystemClock};
pub use producer::{produce, produce_with_clock, LineChunker, RecordProducer};
pub use record::Record;
pub use throughput::{Rate, ThroughputReport};

/// Result type for copyflow-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for copyflow-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading or writing the dataset failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
