//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine and notifier call store methods; they never execute SQL directly.
//! Every multi-statement operation runs in one explicit transaction: commit on
//! success, rollback when the transaction is dropped on an error path.

use crate::{error::ReconResult, types::RunId};
use rusqlite::{params, Connection};

mod contact;
mod ledger;
mod shortage;

/// Upper bound on rows per multi-row INSERT, keeping bound parameters well
/// under SQLite's variable limit whatever batch size is configured.
const MAX_ROWS_PER_STATEMENT: usize = 2_000;

#[derive(Debug)]
pub struct ShortageStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ShortageStore {
    pub fn open(path: &str) -> ReconResult<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_short_delivery.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, business_date: &str) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_run (run_id, business_date, status, started_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![run_id, business_date, now_stamp()],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: &str, detail: &str) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE pipeline_run SET status = ?1, detail = ?2, finished_at = ?3
             WHERE run_id = ?4",
            params![status, detail, now_stamp(), run_id],
        )?;
        Ok(())
    }

    pub fn run_status(&self, run_id: &str) -> ReconResult<Option<String>> {
        use rusqlite::OptionalExtension;
        let status = self
            .conn
            .query_row(
                "SELECT status FROM pipeline_run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_event (run_id, stage, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.stage,
                entry.event_type,
                entry.payload,
                now_stamp(),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> ReconResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM pipeline_event WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    stage: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Timestamp format for created/updated columns.
pub(crate) fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage: String,
    pub event_type: String,
    pub payload: String,
}

/// One shortage-file line, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortageFileRow {
    pub settlement_no: String,
    pub security_symbol: String,
    pub isin: Option<String>,
    pub short_quantity: Option<i64>,
}

/// One delivery-file line. Key fields stay optional so the store can skip
/// and count rows that lack them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryFileRow {
    pub settlement_no: Option<String>,
    pub security_symbol: Option<String>,
    /// Already de-tagged.
    pub client_id: Option<String>,
    pub isin: Option<String>,
    pub quantity_received: Option<i64>,
}

/// A persisted `short_delivery` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortageRecord {
    pub id: i64,
    pub business_date: String,
    pub settlement_no: String,
    pub client_id: Option<String>,
    pub security_symbol: String,
    pub isin: Option<String>,
    pub short_quantity: Option<i64>,
    pub quantity_received_t1: Option<i64>,
    pub total_quantity: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl ShortageRecord {
    /// Positive reported or derived shortage. A ledger total that equals the
    /// received quantity settles the row whatever the file reported.
    pub fn is_shortaged(&self) -> bool {
        if let (Some(received), Some(total)) = (self.quantity_received_t1, self.total_quantity) {
            if received == total {
                return false;
            }
        }
        self.short_quantity.is_some_and(|q| q > 0)
    }
}

/// A row whose received quantity disagreed with the ledger total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchEntry {
    pub settlement_no: String,
    pub client_id: Option<String>,
    pub security_symbol: String,
    pub quantity_received_t1: i64,
    pub total_quantity: i64,
    /// `total_quantity - quantity_received_t1`; negative means over-delivery.
    pub short_quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub batches: usize,
    /// Rows of an earlier run for the same business date that were replaced.
    pub replaced: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub rows_seen: usize,
    pub rows_updated: usize,
    pub unmatched: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolReconciliation {
    pub security_symbol: String,
    /// The symbol's rows as they were before any correction.
    pub rows: Vec<ShortageRecord>,
    pub mismatches: Vec<MismatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub party_cd: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
}
