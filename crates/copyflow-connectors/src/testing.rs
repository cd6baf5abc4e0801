//! Testing utilities for the load pipeline.
//!
//! [`MockStore`] stands in for `PostgreSQL`. Every session, statement and
//! COPY it sees is written to a shared [`Journal`], and a [`FailurePlan`]
//! injects failures at each stage. Rows become visible in the journal
//! only when a COPY finishes, which is how tests check that a failed
//! transfer commits nothing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::StoreError;
use crate::postgres::durability::DurabilityMode;
use crate::postgres::store::{BulkStore, CopyChannel, StoreSession};

/// Failures to inject into a [`MockStore`].
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// `connect` fails.
    pub fail_connect: bool,
    /// `SET UNLOGGED` is rejected.
    pub fail_relax: bool,
    /// A rejected relax still switches the table before reporting failure.
    pub relax_applies_before_failing: bool,
    /// `COPY ... FROM STDIN` is refused.
    pub fail_copy_in: bool,
    /// The send after this many accepted chunks fails.
    pub fail_send_after: Option<u64>,
    /// The store rejects the COPY at completion.
    pub fail_finish: bool,
    /// Number of leading `SET LOGGED` attempts that fail.
    pub restore_failures: u32,
    /// `SET LOGGED` succeeds but the table stays unlogged.
    pub restore_ignored: bool,
    /// The first session's connection drops on `SET LOGGED`; later
    /// sessions restore normally.
    pub lose_first_session_on_restore: bool,
    /// `batch_execute` is rejected.
    pub fail_batch: bool,
}

#[derive(Debug)]
struct JournalState {
    mode: DurabilityMode,
    statements: Vec<String>,
    connects: u64,
    releases: u64,
    relax_calls: u32,
    restore_calls: u32,
    copies_started: u64,
    copies_finished: u64,
    copies_aborted: u64,
    committed: Vec<String>,
}

impl Default for JournalState {
    fn default() -> Self {
        Self {
            mode: DurabilityMode::Durable,
            statements: Vec::new(),
            connects: 0,
            releases: 0,
            relax_calls: 0,
            restore_calls: 0,
            copies_started: 0,
            copies_finished: 0,
            copies_aborted: 0,
            committed: Vec::new(),
        }
    }
}

/// Shared record of everything a [`MockStore`] observed.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    /// Current durability mode of the mock table.
    #[must_use]
    pub fn mode(&self) -> DurabilityMode {
        self.state.lock().mode
    }

    /// Every statement executed, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Sessions handed out.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    /// Sessions dropped.
    #[must_use]
    pub fn releases(&self) -> u64 {
        self.state.lock().releases
    }

    /// `SET UNLOGGED` statements seen.
    #[must_use]
    pub fn relax_calls(&self) -> u32 {
        self.state.lock().relax_calls
    }

    /// `SET LOGGED` statements seen.
    #[must_use]
    pub fn restore_calls(&self) -> u32 {
        self.state.lock().restore_calls
    }

    /// COPY operations opened.
    #[must_use]
    pub fn copies_started(&self) -> u64 {
        self.state.lock().copies_started
    }

    /// COPY operations committed.
    #[must_use]
    pub fn copies_finished(&self) -> u64 {
        self.state.lock().copies_finished
    }

    /// COPY operations aborted or dropped unfinished.
    #[must_use]
    pub fn copies_aborted(&self) -> u64 {
        self.state.lock().copies_aborted
    }

    /// Number of committed rows.
    #[must_use]
    pub fn committed_rows(&self) -> u64 {
        self.state.lock().committed.len() as u64
    }

    /// Committed rows as raw text lines, without the trailing newline.
    #[must_use]
    pub fn committed_lines(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }
}

/// In-memory [`BulkStore`] with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    journal: Journal,
    plan: Arc<FailurePlan>,
    gate: Option<Arc<Semaphore>>,
}

impl MockStore {
    /// Creates a store that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that fails according to `plan`.
    #[must_use]
    pub fn with_plan(plan: FailurePlan) -> Self {
        Self {
            plan: Arc::new(plan),
            ..Self::default()
        }
    }

    /// Makes every COPY send wait for a permit from `gate`.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The shared journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

#[async_trait]
impl BulkStore for MockStore {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, StoreError> {
        if self.plan.fail_connect {
            return Err(StoreError::Connection("mock: connection refused".into()));
        }
        let id = {
            let mut state = self.journal.state.lock();
            state.connects += 1;
            state.connects
        };
        Ok(MockSession {
            id,
            journal: self.journal.clone(),
            plan: Arc::clone(&self.plan),
            gate: self.gate.clone(),
        })
    }
}

/// Session handed out by [`MockStore`]. Dropping it counts as a release.
#[derive(Debug)]
pub struct MockSession {
    id: u64,
    journal: Journal,
    plan: Arc<FailurePlan>,
    gate: Option<Arc<Semaphore>>,
}

impl MockSession {
    /// 1-based order in which the store handed this session out.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.journal.state.lock().releases += 1;
    }
}

#[async_trait]
impl StoreSession for MockSession {
    type Copy = MockCopyChannel;

    async fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        let mut state = self.journal.state.lock();
        state.statements.push(sql.to_string());

        if sql.ends_with("SET UNLOGGED") {
            state.relax_calls += 1;
            if self.plan.fail_relax {
                if self.plan.relax_applies_before_failing {
                    state.mode = DurabilityMode::Relaxed;
                }
                return Err(StoreError::Rejected("mock: relax rejected".into()));
            }
            state.mode = DurabilityMode::Relaxed;
        } else if sql.ends_with("SET LOGGED") {
            state.restore_calls += 1;
            if self.plan.lose_first_session_on_restore && self.id == 1 {
                return Err(StoreError::Connection("mock: server closed the connection".into()));
            }
            if state.restore_calls <= self.plan.restore_failures {
                return Err(StoreError::Rejected("mock: restore rejected".into()));
            }
            if !self.plan.restore_ignored {
                state.mode = DurabilityMode::Durable;
            }
        }
        Ok(0)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), StoreError> {
        self.journal.state.lock().statements.push(sql.to_string());
        if self.plan.fail_batch {
            return Err(StoreError::Rejected("mock: syntax error".into()));
        }
        Ok(())
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<String>, StoreError> {
        if !sql.contains("relpersistence") {
            return Ok(None);
        }
        let value = match self.journal.mode() {
            DurabilityMode::Durable => "p",
            DurabilityMode::Relaxed => "u",
        };
        Ok(Some(value.to_string()))
    }

    async fn copy_in(&self, sql: &str) -> Result<MockCopyChannel, StoreError> {
        let mut state = self.journal.state.lock();
        state.statements.push(sql.to_string());
        if self.plan.fail_copy_in {
            return Err(StoreError::Rejected("mock: copy refused".into()));
        }
        state.copies_started += 1;
        Ok(MockCopyChannel {
            journal: self.journal.clone(),
            plan: Arc::clone(&self.plan),
            gate: self.gate.clone(),
            buffer: Vec::new(),
            sent: 0,
            done: false,
        })
    }
}

/// COPY channel handed out by [`MockSession`].
///
/// Buffers everything it is sent and commits the parsed rows on
/// `finish`. An abort or drop before that discards the buffer.
#[derive(Debug)]
pub struct MockCopyChannel {
    journal: Journal,
    plan: Arc<FailurePlan>,
    gate: Option<Arc<Semaphore>>,
    buffer: Vec<u8>,
    sent: u64,
    done: bool,
}

impl MockCopyChannel {
    fn discard(&mut self) {
        if !self.done {
            self.done = true;
            self.buffer.clear();
            self.journal.state.lock().copies_aborted += 1;
        }
    }
}

#[async_trait]
impl CopyChannel for MockCopyChannel {
    async fn send(&mut self, chunk: Bytes) -> Result<(), StoreError> {
        if self.done {
            return Err(StoreError::Closed);
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| StoreError::Closed)?.forget();
        }
        if self.plan.fail_send_after == Some(self.sent) {
            return Err(StoreError::Rejected("mock: connection reset during COPY".into()));
        }
        self.buffer.extend_from_slice(&chunk);
        self.sent += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, StoreError> {
        if self.done {
            return Err(StoreError::Closed);
        }
        if self.plan.fail_finish {
            self.discard();
            return Err(StoreError::Rejected("mock: invalid input syntax".into()));
        }
        self.done = true;
        let text = String::from_utf8_lossy(&self.buffer);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let rows = lines.len() as u64;

        let mut state = self.journal.state.lock();
        state.committed.extend(lines);
        state.copies_finished += 1;
        Ok(rows)
    }

    fn abort(&mut self) {
        self.discard();
    }
}

impl Drop for MockCopyChannel {
    fn drop(&mut self) {
        self.discard();
    }
}
