//! SQLite persistence for completed cycles.
//!
//! # Storage layout
//!
//! A single table `cycles` is created (if it does not already exist):
//!
//! | column         | type    | description                                 |
//! |----------------|---------|---------------------------------------------|
//! | run_id         | TEXT    | Identifier of the run (UUID v4)             |
//! | cycle_index    | INTEGER | Position of the cycle within its run        |
//! | timestamp      | TEXT    | RFC-3339 completion time (UTC)              |
//! | subenvironment | TEXT    | Raw sub-environment id of the action        |
//! | outcome        | TEXT    | Outcome label (`executed`, `rejected`, …)   |
//! | total_tokens   | INTEGER | Cumulative tokens after this cycle          |
//! | payload        | TEXT    | The full cycle as JSON                      |
//!
//! `(run_id, cycle_index)` is the primary key and rows are only ever
//! inserted, so recording the same cycle twice is an error.
//!
//! # Example
//!
//! ```rust
//! use aixi_memory::CycleStore;
//!
//! let store = CycleStore::open_in_memory().unwrap();
//! let run = CycleStore::new_run_id();
//! assert!(store.cycles(&run).unwrap().is_empty());
//! ```

use std::path::Path;

use aixi_types::{Cycle, CycleOutcome};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CycleStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cycle payload could not be (de)serialised: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("cycle {index} of run {run_id} is already recorded")]
    Duplicate { run_id: String, index: u64 },
}

impl From<CycleStoreError> for aixi_types::AixiError {
    fn from(e: CycleStoreError) -> Self {
        aixi_types::AixiError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CycleStore
// ─────────────────────────────────────────────────────────────────────────────

/// Insert-only SQLite store of [`Cycle`]s, grouped by run id.
pub struct CycleStore {
    conn: Connection,
}

impl CycleStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CycleStoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, CycleStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Fresh identifier for a run.
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn init_schema(&self) -> Result<(), CycleStoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cycles (
                run_id         TEXT    NOT NULL,
                cycle_index    INTEGER NOT NULL,
                timestamp      TEXT    NOT NULL,
                subenvironment TEXT    NOT NULL,
                outcome        TEXT    NOT NULL,
                total_tokens   INTEGER NOT NULL,
                payload        TEXT    NOT NULL,
                PRIMARY KEY (run_id, cycle_index)
            );",
        )?;
        Ok(())
    }

    /// Persist one completed cycle.
    pub fn record(&self, run_id: &str, cycle: &Cycle) -> Result<(), CycleStoreError> {
        let payload = serde_json::to_string(cycle)?;
        let result = self.conn.execute(
            "INSERT INTO cycles
                 (run_id, cycle_index, timestamp, subenvironment, outcome, total_tokens, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                cycle.index() as i64,
                cycle.timestamp().to_rfc3339(),
                cycle.action().subenvironment,
                outcome_label(cycle.outcome()),
                cycle.totals_after().total_tokens() as i64,
                payload,
            ],
        );
        match result {
            Ok(_) => {
                debug!(run_id, index = cycle.index(), "cycle recorded");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CycleStoreError::Duplicate {
                    run_id: run_id.to_string(),
                    index: cycle.index(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every recorded cycle of `run_id`, in index order.
    pub fn cycles(&self, run_id: &str) -> Result<Vec<Cycle>, CycleStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM cycles
             WHERE run_id = ?1
             ORDER BY cycle_index ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;

        let mut cycles = Vec::new();
        for row in rows {
            cycles.push(serde_json::from_str(&row?)?);
        }
        Ok(cycles)
    }

    /// Distinct run ids, oldest first.
    pub fn runs(&self) -> Result<Vec<String>, CycleStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id FROM cycles
             GROUP BY run_id
             ORDER BY MIN(timestamp) ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Executed => "executed",
        CycleOutcome::ToolFailed => "tool_failed",
        CycleOutcome::TimedOut => "timed_out",
        CycleOutcome::Rejected => "rejected",
        CycleOutcome::Malformed { .. } => "malformed",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
