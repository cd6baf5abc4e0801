//! `PostgreSQL` COPY ingestion.
//!
//! Streams delimited records into a table with `COPY ... FROM STDIN`,
//! with the table switched to `UNLOGGED` for the duration of the load.
//!
//! # Module Structure
//!
//! - [`config`] - Store and load configuration from the environment
//! - [`store`] - Store, session and COPY channel traits plus the pooled
//!   `PostgreSQL` implementation
//! - [`durability`] - `SET UNLOGGED` / `SET LOGGED` toggle with confirmation
//! - [`sink`] - Backpressured stream-to-COPY adapter
//! - [`loader`] - Session orchestrator and cleanup guard
//! - [`schema`] - Applies the table DDL
//!
//! # Usage
//!
//! ```rust,ignore
//! use copyflow_connectors::postgres::{BulkLoader, LoadConfig, PgStore, StoreConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = PgStore::new(&StoreConfig::from_env()?)?;
//! let loader = BulkLoader::new(store, LoadConfig::from_env()?);
//! let report = loader.run_file(&CancellationToken::new()).await?;
//! println!("{}", report.throughput);
//! ```

pub mod config;
pub mod durability;
pub mod loader;
pub mod schema;
pub mod sink;
pub mod store;

// Re-export primary types at module level.
pub use config::{LoadConfig, StoreConfig, TableName};
pub use durability::{DurabilityMode, DurabilityToggle};
pub use loader::{BulkLoader, CleanupGuard, LoadReport};
pub use schema::apply_schema;
pub use sink::{build_copy_sql, CopySink};
pub use store::{BulkStore, CopyChannel, PgCopyChannel, PgSession, PgStore, StoreSession};
