//! Pipeline events: the run's audit trail.
//!
//! Every stage transition emits one or more events; the engine persists each
//! to `pipeline_event` as tagged JSON.

use crate::{engine::Stage, types::RunId};
use serde::{Deserialize, Serialize};

/// Variants are only ever added, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        business_date: String,
    },
    FileLocated {
        stage: Stage,
        path: String,
    },
    FileMissing {
        stage: Stage,
        dir: String,
        pattern: String,
    },
    CohortInserted {
        inserted: usize,
        batches: usize,
        replaced: usize,
        skipped_rows: usize,
        soft_failures: usize,
    },
    DeliveryApplied {
        rows_seen: usize,
        rows_updated: usize,
        unmatched: usize,
        skipped_rows: usize,
        soft_failures: usize,
    },
    TotalsRecomputed {
        rows_updated: usize,
    },
    MismatchRecorded {
        settlement_no: String,
        client_id: Option<String>,
        security_symbol: String,
        quantity_received_t1: i64,
        total_quantity: i64,
        short_quantity: i64,
    },
    StageFailed {
        stage: Stage,
        error: String,
    },
    RunCompleted {
        status: String,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::FileLocated { .. } => "file_located",
            PipelineEvent::FileMissing { .. } => "file_missing",
            PipelineEvent::CohortInserted { .. } => "cohort_inserted",
            PipelineEvent::DeliveryApplied { .. } => "delivery_applied",
            PipelineEvent::TotalsRecomputed { .. } => "totals_recomputed",
            PipelineEvent::MismatchRecorded { .. } => "mismatch_recorded",
            PipelineEvent::StageFailed { .. } => "stage_failed",
            PipelineEvent::RunCompleted { .. } => "run_completed",
        }
    }
}
