//! # `copyflow` Connectors
//!
//! The `PostgreSQL` side of the ingestion pipeline.
//!
//! - [`postgres`] - Store abstraction, durability toggle, COPY sink and
//!   the load orchestrator
//! - [`error`] - Error hierarchy of a load session
//! - [`stage`] - Session lifecycle stages
//! - [`metrics`] - Lock-free session counters
//! - [`testing`] - In-memory store with failure injection
//!
//! ## Session Lifecycle
//!
//! ```text
//! connect -> SET UNLOGGED -> COPY FROM STDIN -> SET LOGGED -> release
//!                 |                |               ^
//!                 +----- failure --+---------------+
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::cast_possible_truncation,
        clippy::unreadable_literal
    )
)]

/// Load session error types.
pub mod error;

/// Load session metrics.
pub mod metrics;

/// `PostgreSQL` store, durability toggle, sink and loader.
pub mod postgres;

/// Load session stages.
pub mod stage;

/// Testing utilities (mock store, failure injection).
pub mod testing;

pub use error::{AdminError, ConfigError, LoadError, LoadErrorKind, StoreError, TransferError};
pub use metrics::{LoadMetrics, LoadMetricsSnapshot};
pub use stage::LoadStage;
