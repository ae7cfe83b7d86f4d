//! The reconciliation engine: one business day's run.
//!
//! EXECUTION ORDER (fixed):
//!   1. AcquireShortageFile   locate + retrieve the shortage export
//!   2. ParseAndInsert        insert the day's cohort
//!   3. AcquireDeliveryFile   locate + retrieve the delivery export
//!   4. ParseAndUpdate        apply received quantity, ISIN, client id
//!   5. RecomputeTotals       overwrite total_quantity from the ledger
//!   6. ReconcileMismatches   short_quantity = total - received where they differ
//!
//! RULES:
//!   - Each stage's success is the precondition for the next.
//!   - A file that has not landed ends the run as SkippedMissingFile, not Failed.
//!   - Any other error ends the run as Failed, naming the stage; that stage's
//!     transaction is rolled back, earlier stages stay committed.
//!   - Every transition is recorded in the event log.

use crate::{
    config::{IngestConfig, PipelineConfig},
    error::{ErrorKind, ReconError, ReconResult},
    event::PipelineEvent,
    locator::{FilePattern, RemoteFileLocator, RemoteSource},
    reader::{
        DelimitedRecordReader, Row, COL_CLIENT, COL_DELIVERY_QTY, COL_ISIN, COL_SETTLEMENT,
        COL_SHORT_QTY, COL_SYMBOL, DELIVERY_SCHEMA, SHORTAGE_SCHEMA,
    },
    store::{DeliveryFileRow, EventLogEntry, MismatchEntry, ShortageFileRow, ShortageStore},
    types::{date_key, detag_client_id, BusinessDate, RunId},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AcquireShortageFile,
    ParseAndInsert,
    AcquireDeliveryFile,
    ParseAndUpdate,
    RecomputeTotals,
    ReconcileMismatches,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AcquireShortageFile => "acquire_shortage_file",
            Stage::ParseAndInsert => "parse_and_insert",
            Stage::AcquireDeliveryFile => "acquire_delivery_file",
            Stage::ParseAndUpdate => "parse_and_update",
            Stage::RecomputeTotals => "recompute_totals",
            Stage::ReconcileMismatches => "reconcile_mismatches",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    SkippedMissingFile { stage: Stage },
    Failed { stage: Stage, cause: String },
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Done => "done",
            RunStatus::SkippedMissingFile { .. } => "skipped_missing_file",
            RunStatus::Failed { .. } => "failed",
        }
    }
}

/// One status line per stage reached, for the triggering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub business_date: BusinessDate,
    pub status: RunStatus,
    pub outcomes: Vec<StageOutcome>,
    pub mismatches: Vec<MismatchEntry>,
}

impl RunReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed { .. })
    }

    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }
}

/// An error tagged with the stage it halted.
#[derive(Debug)]
struct StageError {
    stage: Stage,
    source: ReconError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for ReconResult<T> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

struct RunContext {
    run_id: RunId,
    date_key: String,
    outcomes: Vec<StageOutcome>,
    mismatches: Vec<MismatchEntry>,
}

#[derive(Debug)]
pub struct ReconciliationEngine<'a, S: RemoteSource> {
    store: &'a ShortageStore,
    locator: RemoteFileLocator<S>,
    shortage_pattern: FilePattern,
    delivery_pattern: FilePattern,
    ingest: IngestConfig,
}

impl<'a, S: RemoteSource> ReconciliationEngine<'a, S> {
    pub fn new(store: &'a ShortageStore, source: S, config: &PipelineConfig) -> ReconResult<Self> {
        if config.ingest.batch_size == 0 {
            return Err(ReconError::Config("ingest.batch_size must be positive".into()));
        }
        config.remote.validate()?;
        Ok(Self {
            store,
            locator: RemoteFileLocator::new(source, config.remote.clone()),
            shortage_pattern: FilePattern::new(&config.remote.shortage_pattern)?,
            delivery_pattern: FilePattern::new(&config.remote.delivery_pattern)?,
            ingest: config.ingest.clone(),
        })
    }

    /// Run every stage for `business_date` and report how far it got.
    pub fn run(&self, business_date: BusinessDate) -> RunReport {
        let mut ctx = RunContext {
            run_id: uuid::Uuid::new_v4().to_string(),
            date_key: date_key(business_date),
            outcomes: Vec::new(),
            mismatches: Vec::new(),
        };
        log::info!("Run {} started for business date {}", ctx.run_id, ctx.date_key);
        if let Err(e) = self.store.insert_run(&ctx.run_id, &ctx.date_key) {
            log::error!("Cannot record run {}: {e}", ctx.run_id);
        }
        self.emit(
            &ctx.run_id,
            "engine",
            &PipelineEvent::RunStarted {
                run_id: ctx.run_id.clone(),
                business_date: ctx.date_key.clone(),
            },
        );

        let status = match self.execute(business_date, &mut ctx) {
            Ok(()) => RunStatus::Done,
            Err(StageError { stage, source }) if source.kind() == ErrorKind::NotFound => {
                let (dir, pattern) = match &source {
                    ReconError::NotFound { dir, pattern } => (dir.clone(), pattern.clone()),
                    _ => (String::new(), String::new()),
                };
                log::warn!("Run {} skipped at {stage}: {source}", ctx.run_id);
                ctx.outcomes.push(StageOutcome {
                    stage,
                    message: format!("File not found in {dir} (pattern '{pattern}')"),
                });
                self.emit(&ctx.run_id, stage.as_str(), &PipelineEvent::FileMissing {
                    stage,
                    dir,
                    pattern,
                });
                RunStatus::SkippedMissingFile { stage }
            }
            Err(StageError { stage, source }) => {
                log::error!("Run {} failed at {stage}: {source}", ctx.run_id);
                let cause = source.to_string();
                ctx.outcomes.push(StageOutcome {
                    stage,
                    message: format!("Error: {cause}"),
                });
                self.emit(&ctx.run_id, stage.as_str(), &PipelineEvent::StageFailed {
                    stage,
                    error: cause.clone(),
                });
                RunStatus::Failed { stage, cause }
            }
        };

        self.emit(
            &ctx.run_id,
            "engine",
            &PipelineEvent::RunCompleted {
                status: status.as_str().to_string(),
            },
        );
        let detail = ctx
            .outcomes
            .last()
            .map(|o| o.message.clone())
            .unwrap_or_default();
        if let Err(e) = self.store.finish_run(&ctx.run_id, status.as_str(), &detail) {
            log::error!("Cannot record completion of run {}: {e}", ctx.run_id);
        }
        log::info!("Run {} finished: {}", ctx.run_id, status.as_str());

        RunReport {
            run_id: ctx.run_id,
            business_date,
            status,
            outcomes: ctx.outcomes,
            mismatches: ctx.mismatches,
        }
    }

    fn execute(&self, business_date: BusinessDate, ctx: &mut RunContext) -> Result<(), StageError> {
        // 1 + 2: shortage cohort
        let shortage_bytes = self.acquire(
            Stage::AcquireShortageFile,
            business_date,
            &self.shortage_pattern,
            ctx,
        )?;
        self.parse_and_insert(shortage_bytes, ctx)
            .at(Stage::ParseAndInsert)?;

        // 3 + 4: delivery receipts
        let delivery_bytes = self.acquire(
            Stage::AcquireDeliveryFile,
            business_date,
            &self.delivery_pattern,
            ctx,
        )?;
        self.parse_and_update(delivery_bytes, ctx)
            .at(Stage::ParseAndUpdate)?;

        // 5: ledger totals
        let updated = self
            .store
            .recompute_total_quantity(self.ingest.client_tag)
            .at(Stage::RecomputeTotals)?;
        self.record(
            ctx,
            Stage::RecomputeTotals,
            format!("Updated total_quantity for {updated} rows"),
            PipelineEvent::TotalsRecomputed { rows_updated: updated },
        );

        // 6: mismatches
        let results = self
            .store
            .reconcile_cohort(&ctx.date_key)
            .at(Stage::ReconcileMismatches)?;
        let mut examined = 0;
        for result in results {
            examined += result.rows.len();
            for m in result.mismatches {
                self.emit(
                    &ctx.run_id,
                    Stage::ReconcileMismatches.as_str(),
                    &PipelineEvent::MismatchRecorded {
                        settlement_no: m.settlement_no.clone(),
                        client_id: m.client_id.clone(),
                        security_symbol: m.security_symbol.clone(),
                        quantity_received_t1: m.quantity_received_t1,
                        total_quantity: m.total_quantity,
                        short_quantity: m.short_quantity,
                    },
                );
                ctx.mismatches.push(m);
            }
        }
        ctx.outcomes.push(StageOutcome {
            stage: Stage::ReconcileMismatches,
            message: format!(
                "Compared {examined} rows, {} mismatches",
                ctx.mismatches.len()
            ),
        });
        Ok(())
    }

    fn acquire(
        &self,
        stage: Stage,
        business_date: BusinessDate,
        pattern: &FilePattern,
        ctx: &mut RunContext,
    ) -> Result<Vec<u8>, StageError> {
        let path = self.locator.locate(business_date, pattern).at(stage)?;
        let bytes = self.locator.retrieve(&path).at(stage)?;
        self.record(
            ctx,
            stage,
            format!("Found {path} ({} bytes)", bytes.len()),
            PipelineEvent::FileLocated { stage, path },
        );
        Ok(bytes)
    }

    fn parse_and_insert(&self, bytes: Vec<u8>, ctx: &mut RunContext) -> ReconResult<()> {
        let mut reader =
            DelimitedRecordReader::open(Cursor::new(bytes), self.ingest.compressed, &SHORTAGE_SCHEMA)?;
        let mut skipped = 0usize;
        let rows = reader.by_ref().filter_map(|row| match row {
            Ok(row) => match shortage_row(&row) {
                Some(r) => Some(Ok(r)),
                None => {
                    log::warn!("Shortage file line {}: missing settlement or symbol", row.line);
                    skipped += 1;
                    None
                }
            },
            Err(e) => Some(Err(e)),
        });
        let summary =
            self.store
                .insert_shortage_cohort(&ctx.date_key, rows, self.ingest.batch_size)?;
        let soft_failures = reader.soft_failures();

        self.record(
            ctx,
            Stage::ParseAndInsert,
            format!(
                "Inserted {} rows in {} batches ({skipped} skipped, {soft_failures} unparseable values, {} replaced)",
                summary.inserted, summary.batches, summary.replaced
            ),
            PipelineEvent::CohortInserted {
                inserted: summary.inserted,
                batches: summary.batches,
                replaced: summary.replaced,
                skipped_rows: skipped,
                soft_failures,
            },
        );
        Ok(())
    }

    fn parse_and_update(&self, bytes: Vec<u8>, ctx: &mut RunContext) -> ReconResult<()> {
        let mut reader =
            DelimitedRecordReader::open(Cursor::new(bytes), self.ingest.compressed, &DELIVERY_SCHEMA)?;
        let tag = self.ingest.client_tag;
        let rows = reader
            .by_ref()
            .map(|row| row.map(|row| delivery_row(&row, tag)));
        let summary = self.store.apply_delivery_updates(&ctx.date_key, rows)?;
        let soft_failures = reader.soft_failures();

        self.record(
            ctx,
            Stage::ParseAndUpdate,
            format!(
                "Updated {} rows from {} delivery lines ({} unmatched, {} skipped, {soft_failures} unparseable values)",
                summary.rows_updated, summary.rows_seen, summary.unmatched, summary.skipped
            ),
            PipelineEvent::DeliveryApplied {
                rows_seen: summary.rows_seen,
                rows_updated: summary.rows_updated,
                unmatched: summary.unmatched,
                skipped_rows: summary.skipped,
                soft_failures,
            },
        );
        Ok(())
    }

    fn record(&self, ctx: &mut RunContext, stage: Stage, message: String, event: PipelineEvent) {
        log::info!("[{stage}] {message}");
        self.emit(&ctx.run_id, stage.as_str(), &event);
        ctx.outcomes.push(StageOutcome { stage, message });
    }

    /// Persist an event. The event log is outside stage transactions, so a
    /// failure here is logged and the run carries on.
    fn emit(&self, run_id: &str, stage: &str, event: &PipelineEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                log::error!("Cannot serialize {} event: {e}", event.type_name());
                return;
            }
        };
        let entry = EventLogEntry {
            id: None,
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            event_type: event.type_name().to_string(),
            payload,
        };
        if let Err(e) = self.store.append_event(&entry) {
            log::error!("Cannot append {} event for run {run_id}: {e}", event.type_name());
        }
    }
}

fn shortage_row(row: &Row) -> Option<ShortageFileRow> {
    Some(ShortageFileRow {
        settlement_no: row.text(COL_SETTLEMENT)?.to_string(),
        security_symbol: row.text(COL_SYMBOL)?.to_string(),
        isin: row.text(COL_ISIN).map(str::to_string),
        short_quantity: row.integer(COL_SHORT_QTY),
    })
}

fn delivery_row(row: &Row, client_tag: char) -> DeliveryFileRow {
    DeliveryFileRow {
        settlement_no: row.text(COL_SETTLEMENT).map(str::to_string),
        security_symbol: row.text(COL_SYMBOL).map(str::to_string),
        client_id: row.text(COL_CLIENT).map(|c| detag_client_id(c, client_tag)),
        isin: row.text(COL_ISIN).map(str::to_string),
        quantity_received: row.integer(COL_DELIVERY_QTY),
    }
}
