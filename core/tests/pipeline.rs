//! End-to-end tests for one business day's run.
//!
//! A temp directory plays the remote export tree; files are gzip-compressed
//! exactly as the depository ships them.

use chrono::NaiveDate;
use flate2::{write::GzEncoder, Compression};
use shortage_core::{
    config::PipelineConfig,
    engine::{ReconciliationEngine, RunReport, RunStatus, Stage},
    error::{ReconError, ReconResult},
    locator::LocalDirSource,
    notify::{NotificationMessage, NotificationTransport, ShortageNotifier},
    store::{ContactRecord, ShortageFileRow, ShortageStore},
    types::date_key,
};
use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};

const SHORTAGE_NAME: &str = "SHRT_NCL_CM_20261016.csv.gz";
const DELIVERY_NAME: &str = "DeliveryDpo_NCL_CM_EquityT1_CM_08756_20261016.csv.gz";

fn business_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

struct Fixture {
    _root: tempfile::TempDir,
    stocks: PathBuf,
    config: PipelineConfig,
    store: ShortageStore,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = tempfile::tempdir().expect("tempdir");
        let stocks = root.path().join("16-October-2026").join("stocks");
        std::fs::create_dir_all(&stocks).unwrap();

        let mut config = PipelineConfig::default_test();
        config.remote.base_path = root.path().to_string_lossy().into_owned();

        let store = ShortageStore::in_memory().unwrap();
        store.migrate().unwrap();
        Self {
            _root: root,
            stocks,
            config,
            store,
        }
    }

    fn write_gz(&self, name: &str, text: &str) {
        write_gz(&self.stocks.join(name), text);
    }

    fn run(&self) -> RunReport {
        ReconciliationEngine::new(&self.store, LocalDirSource, &self.config)
            .unwrap()
            .run(business_date())
    }

    fn seed_scenario(&self) {
        self.write_gz(SHORTAGE_NAME, "SctiesSttlmTxId,TckrSymb,ISIN,ShrtQty\nS1,ABC,,\n");
        self.write_gz(
            DELIVERY_NAME,
            "SctiesSttlmTxId,ClntId,QtyORShrtQty,TckrSymb,ISIN\nS1,C1,90,ABC,IN001\n",
        );
        self.store.insert_ledger_entry("S1", "IN001", "C1", 100).unwrap();
        self.store.insert_ledger_entry("S1", "IN001", "C1", 30).unwrap();
        self.store
            .upsert_contact(&ContactRecord {
                party_cd: "C1".into(),
                email: Some("c1@example.com".into()),
                mobile: Some("9800000001".into()),
            })
            .unwrap();
    }
}

fn write_gz(path: &Path, text: &str) {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    std::fs::write(path, enc.finish().unwrap()).unwrap();
}

#[derive(Default)]
struct RecordingTransport {
    sent: RefCell<Vec<(String, NotificationMessage)>>,
}

impl NotificationTransport for RecordingTransport {
    fn send(&self, route: &str, message: &NotificationMessage) -> ReconResult<()> {
        self.sent
            .borrow_mut()
            .push((route.to_string(), message.clone()));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Full run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn full_run_reconciles_and_notifies() {
    let fx = Fixture::new();
    fx.seed_scenario();

    let report = fx.run();
    assert_eq!(report.status, RunStatus::Done, "outcomes: {:?}", report.outcomes);
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.mismatches.len(), 1);

    let day = date_key(business_date());
    let records = fx.store.records_for_date(&day).unwrap();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.client_id.as_deref(), Some("1"));
    assert_eq!(rec.isin.as_deref(), Some("IN001"));
    assert_eq!(rec.quantity_received_t1, Some(90));
    assert_eq!(rec.total_quantity, Some(130));
    assert_eq!(rec.short_quantity, Some(40));

    let rows = fx.store.find_positive_shortages(&day).unwrap();
    let notifier = ShortageNotifier::new(
        &fx.store,
        RecordingTransport::default(),
        fx.config.notification.clone(),
        fx.config.ingest.client_tag,
    );
    assert_eq!(notifier.dispatch(&rows).unwrap(), 1);

    let sent = notifier.transport().sent.borrow();
    assert_eq!(sent.len(), 2, "one email and one sms");
    assert_eq!(sent[0].0, fx.config.notification.email_route);
    assert_eq!(sent[0].1.receivers, vec!["c1@example.com".to_string()]);
    assert_eq!(sent[1].0, fx.config.notification.sms_route);
    for (_, msg) in sent.iter() {
        assert_eq!(msg.template_data_json.client, "C1");
        assert_eq!(msg.template_data_json.symbol, "ABC");
        assert_eq!(msg.template_data_json.quantity, 40);
    }
}

#[test]
fn run_is_recorded_in_the_event_log() {
    let fx = Fixture::new();
    fx.seed_scenario();

    let report = fx.run();
    assert_eq!(fx.store.run_status(&report.run_id).unwrap().as_deref(), Some("done"));

    let types: Vec<String> = fx
        .store
        .events_for_run(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            "run_started",
            "file_located",
            "cohort_inserted",
            "file_located",
            "delivery_applied",
            "totals_recomputed",
            "mismatch_recorded",
            "run_completed",
        ]
    );
}

#[test]
fn rerunning_a_day_overwrites_instead_of_duplicating() {
    let fx = Fixture::new();
    fx.seed_scenario();

    assert!(fx.run().is_done());
    let first = fx.store.records_for_date(&date_key(business_date())).unwrap();
    assert!(fx.run().is_done());
    let second = fx.store.records_for_date(&date_key(business_date())).unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(second[0].short_quantity, Some(40));
    assert_eq!(second[0].total_quantity, Some(130));
}

// ─────────────────────────────────────────────────────────────────────────────
// Missing files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn missing_shortage_file_skips_and_leaves_prior_data() {
    let fx = Fixture::new();
    let day = date_key(business_date());
    let prior = vec![Ok(ShortageFileRow {
        settlement_no: "S0".into(),
        security_symbol: "OLD".into(),
        isin: None,
        short_quantity: Some(3),
    })];
    fx.store.insert_shortage_cohort(&day, prior, 500).unwrap();

    let report = fx.run();
    assert_eq!(
        report.status,
        RunStatus::SkippedMissingFile {
            stage: Stage::AcquireShortageFile
        }
    );
    assert!(!report.is_failed());
    let outcome = report.outcome(Stage::AcquireShortageFile).unwrap();
    assert!(outcome.message.contains("not found"), "{}", outcome.message);

    let records = fx.store.records_for_date(&day).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].security_symbol, "OLD");
}

#[test]
fn missing_dated_folder_is_a_skip_not_a_failure() {
    let mut fx = Fixture::new();
    fx.config.remote.base_path = fx.stocks.join("nowhere").to_string_lossy().into_owned();
    let report = fx.run();
    assert!(matches!(report.status, RunStatus::SkippedMissingFile { .. }));
}

#[test]
fn missing_delivery_file_keeps_the_committed_cohort() {
    let fx = Fixture::new();
    fx.write_gz(SHORTAGE_NAME, "SctiesSttlmTxId,TckrSymb,ShrtQty\nS1,ABC,5\nS2,XYZ,0\n");

    let report = fx.run();
    assert_eq!(
        report.status,
        RunStatus::SkippedMissingFile {
            stage: Stage::AcquireDeliveryFile
        }
    );
    assert_eq!(fx.store.record_count(&date_key(business_date())).unwrap(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn delivery_schema_error_fails_that_stage_only() {
    let fx = Fixture::new();
    fx.write_gz(SHORTAGE_NAME, "SctiesSttlmTxId,TckrSymb\nS1,ABC\n");
    fx.write_gz(DELIVERY_NAME, "SctiesSttlmTxId,TckrSymb,ISIN\nS1,ABC,IN001\n");

    let report = fx.run();
    match &report.status {
        RunStatus::Failed { stage, cause } => {
            assert_eq!(*stage, Stage::ParseAndUpdate);
            assert!(cause.contains("qtyorshrtqty"), "{cause}");
            assert!(cause.contains("clntid"), "{cause}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(report.is_failed());
    assert_eq!(fx.store.run_status(&report.run_id).unwrap().as_deref(), Some("failed"));

    let records = fx.store.records_for_date(&date_key(business_date())).unwrap();
    assert_eq!(records.len(), 1, "the shortage cohort stays committed");
    assert_eq!(records[0].quantity_received_t1, None);

    let events = fx.store.events_for_run(&report.run_id).unwrap();
    assert!(events.iter().any(|e| e.event_type == "stage_failed"
        && e.stage == "parse_and_update"));
}

#[test]
fn shortage_schema_error_writes_nothing() {
    let fx = Fixture::new();
    fx.write_gz(SHORTAGE_NAME, "Settlement,Symbol\nS1,ABC\n");

    let report = fx.run();
    assert!(matches!(
        report.status,
        RunStatus::Failed {
            stage: Stage::ParseAndInsert,
            ..
        }
    ));
    assert_eq!(fx.store.record_count(&date_key(business_date())).unwrap(), 0);
}

#[test]
fn rows_without_keys_are_skipped_not_fatal() {
    let fx = Fixture::new();
    fx.write_gz(
        SHORTAGE_NAME,
        "SctiesSttlmTxId,TckrSymb,ShrtQty\nS1,ABC,oops\n,XYZ,4\nS3,PQR,2\n",
    );
    fx.write_gz(
        DELIVERY_NAME,
        "SctiesSttlmTxId,ClntId,QtyORShrtQty,TckrSymb,ISIN\nS1,C1,n/a,ABC,IN001\nS3,C3,2,PQR,IN003\n",
    );

    let report = fx.run();
    assert!(report.is_done(), "{:?}", report.status);

    let insert = report.outcome(Stage::ParseAndInsert).unwrap();
    assert!(insert.message.contains("Inserted 2 rows"), "{}", insert.message);
    assert!(insert.message.contains("1 skipped"), "{}", insert.message);
    assert!(insert.message.contains("1 unparseable"), "{}", insert.message);

    let update = report.outcome(Stage::ParseAndUpdate).unwrap();
    assert!(update.message.contains("Updated 1 rows"), "{}", update.message);
    assert!(update.message.contains("1 skipped"), "{}", update.message);
}

#[test]
fn bad_date_folder_format_is_rejected_up_front() {
    let mut fx = Fixture::new();
    fx.config.remote.date_folder_format = "%d-%Q-%Y".into();
    let err = ReconciliationEngine::new(&fx.store, LocalDirSource, &fx.config).unwrap_err();
    assert!(matches!(err, ReconError::Config(_)), "got {err:?}");
}
