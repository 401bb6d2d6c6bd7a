//! End-to-end tests against a real SQLite store: group recomputation, run
//! aggregation, corpus enumeration, and the job queue state machine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use forecast_engine::db::init_sqlite;
use forecast_engine::queue::ClaimedJob;
use forecast_engine::{Db, corpus, forecast, group, job, queue, run};
use forecast_types::{JOB_KIND_RECOMPUTE_CASE, JOB_KIND_RECOMPUTE_CORPUS, STATUS_UNTESTED};
use rusqlite::params;

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_db(name: &str) -> Db {
    let counter = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "forecast-engine-test-{}-{name}-{counter}.sqlite",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    let db = Db::new(path);
    init_sqlite(&db).unwrap();
    db
}

fn insert_case(db: &Db, case_id: i64, source: &str) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO cases (case_id, source) VALUES (?1, ?2)",
            params![case_id, source],
        )
        .unwrap();
}

fn insert_archived_case(db: &Db, case_id: i64, source: &str, deleted: bool, archived: bool) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO cases (case_id, source, is_deleted, is_archived) VALUES (?1, ?2, ?3, ?4)",
            params![case_id, source, deleted, archived],
        )
        .unwrap();
}

fn insert_link(db: &Db, from_case_id: i64, to_case_id: i64, kind: &str, deleted: bool) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO case_links (from_case_id, to_case_id, link_kind, is_deleted)
             VALUES (?1, ?2, ?3, ?4)",
            params![from_case_id, to_case_id, kind, deleted],
        )
        .unwrap();
}

fn insert_run(db: &Db, run_id: i64, completed: bool) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO runs (run_id, is_completed) VALUES (?1, ?2)",
            params![run_id, completed],
        )
        .unwrap();
}

fn insert_run_case(db: &Db, run_case_id: i64, run_id: i64, case_id: i64, status: Option<i64>) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO run_cases (run_case_id, run_id, case_id, status) VALUES (?1, ?2, ?3, ?4)",
            params![run_case_id, run_id, case_id, status],
        )
        .unwrap();
}

fn insert_manual_result(db: &Db, run_case_id: i64, elapsed_secs: i64, deleted: bool) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO manual_results (run_case_id, elapsed_secs, is_deleted) VALUES (?1, ?2, ?3)",
            params![run_case_id, elapsed_secs, deleted],
        )
        .unwrap();
}

fn insert_automated_result(db: &Db, case_id: i64, elapsed_secs: f64, deleted: bool) {
    db.open()
        .unwrap()
        .execute(
            "INSERT INTO automated_results (case_id, elapsed_secs, is_deleted) VALUES (?1, ?2, ?3)",
            params![case_id, elapsed_secs, deleted],
        )
        .unwrap();
}

fn set_case_forecasts(db: &Db, case_id: i64, manual: Option<i64>, automated: Option<f64>) {
    db.open()
        .unwrap()
        .execute(
            "UPDATE cases SET forecast_manual = ?1, forecast_automated = ?2 WHERE case_id = ?3",
            params![manual, automated, case_id],
        )
        .unwrap();
}

fn case_forecasts(db: &Db, case_id: i64) -> (Option<i64>, Option<f64>) {
    db.open()
        .unwrap()
        .query_row(
            "SELECT forecast_manual, forecast_automated FROM cases WHERE case_id = ?1",
            params![case_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
}

fn run_forecasts(db: &Db, run_id: i64) -> (Option<i64>, Option<f64>) {
    db.open()
        .unwrap()
        .query_row(
            "SELECT forecast_manual, forecast_automated FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
}

fn set_run_forecasts(db: &Db, run_id: i64, manual: Option<i64>, automated: Option<f64>) {
    db.open()
        .unwrap()
        .execute(
            "UPDATE runs SET forecast_manual = ?1, forecast_automated = ?2 WHERE run_id = ?3",
            params![manual, automated, run_id],
        )
        .unwrap();
}

/// Group {C1 manual, C2 automated}, manual samples [30, 50], automated
/// samples [1.2, 1.8]: both cases end up with 40 / 1.500.
#[tokio::test]
async fn linked_group_gets_identical_two_source_forecasts() {
    let db = test_db("linked-group");
    insert_case(&db, 1, "manual");
    insert_case(&db, 2, "automated");
    insert_link(&db, 1, 2, "same-test", false);

    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 1, Some(5));
    insert_manual_result(&db, 100, 30, false);
    insert_manual_result(&db, 100, 50, false);
    insert_automated_result(&db, 2, 1.2, false);
    insert_automated_result(&db, 2, 1.8, false);

    let touched = forecast::recompute_group(&db, 1).await.unwrap();
    assert_eq!(touched, BTreeSet::from([1, 2]));
    assert_eq!(case_forecasts(&db, 1), (Some(40), Some(1.5)));
    assert_eq!(case_forecasts(&db, 2), (Some(40), Some(1.5)));

    // Resolving from the other endpoint honors the reverse link direction.
    let reverse = group::resolve_group(&db, 2).await.unwrap();
    assert_eq!(reverse, BTreeSet::from([1, 2]));
}

#[tokio::test]
async fn deleted_links_and_other_link_kinds_do_not_group() {
    let db = test_db("link-filter");
    insert_case(&db, 1, "manual");
    insert_case(&db, 2, "automated");
    insert_case(&db, 3, "automated");
    insert_link(&db, 1, 2, "same-test", true);
    insert_link(&db, 1, 3, "duplicate-of", false);

    let resolved = group::resolve_group(&db, 1).await.unwrap();
    assert_eq!(resolved, BTreeSet::from([1]));
}

#[tokio::test]
async fn missing_case_resolves_to_empty_group_and_writes_nothing() {
    let db = test_db("missing-case");
    assert!(group::resolve_group(&db, 999).await.unwrap().is_empty());
    assert!(forecast::recompute_group(&db, 999).await.unwrap().is_empty());
}

/// Zero qualifying samples yield NULL, never 0, and actively clear stale
/// forecasts. Running twice produces the same rows (idempotence).
#[tokio::test]
async fn no_samples_clears_stale_forecasts_to_null() {
    let db = test_db("absence");
    insert_case(&db, 1, "manual");
    set_case_forecasts(&db, 1, Some(90), Some(4.5));

    // One soft-deleted and one zero-elapsed result: neither qualifies.
    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 1, Some(5));
    insert_manual_result(&db, 100, 45, true);
    insert_manual_result(&db, 100, 0, false);

    forecast::recompute_group(&db, 1).await.unwrap();
    assert_eq!(case_forecasts(&db, 1), (None, None));

    forecast::recompute_group(&db, 1).await.unwrap();
    assert_eq!(case_forecasts(&db, 1), (None, None));
}

/// Pending cases with null contributors on one channel still sum the other:
/// C1 (manual 40), C3 (automated 2.0 only) -> run forecast 40 / 2.0.
#[tokio::test]
async fn run_aggregation_sums_pending_cases_per_channel() {
    let db = test_db("run-sum");
    insert_case(&db, 1, "manual");
    insert_case(&db, 3, "automated");

    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 1, None);
    insert_run_case(&db, 101, 10, 3, Some(STATUS_UNTESTED));
    // Executed run-case in another run supplies the manual samples.
    insert_run(&db, 11, true);
    insert_run_case(&db, 110, 11, 1, Some(5));
    insert_manual_result(&db, 110, 30, false);
    insert_manual_result(&db, 110, 50, false);
    insert_automated_result(&db, 3, 2.0, false);

    let mut refreshed = BTreeSet::new();
    run::recompute_run(&db, 10, &mut refreshed).await.unwrap();
    assert_eq!(run_forecasts(&db, 10), (Some(40), Some(2.0)));
    assert!(refreshed.contains(&1) && refreshed.contains(&3));

    // Back-to-back aggregation with no data change is a fixpoint.
    run::recompute_run(&db, 10, &mut refreshed).await.unwrap();
    assert_eq!(run_forecasts(&db, 10), (Some(40), Some(2.0)));
}

#[tokio::test]
async fn fully_executed_run_resets_forecasts_to_null() {
    let db = test_db("completion-reset");
    insert_case(&db, 1, "manual");
    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 1, Some(5));
    set_run_forecasts(&db, 10, Some(120), Some(3.25));

    let mut refreshed = BTreeSet::new();
    run::recompute_run(&db, 10, &mut refreshed).await.unwrap();
    assert_eq!(run_forecasts(&db, 10), (None, None));
}

#[tokio::test]
async fn run_with_zero_cases_behaves_like_empty_pending_set() {
    let db = test_db("empty-run");
    insert_run(&db, 10, false);
    set_run_forecasts(&db, 10, Some(60), None);

    let mut refreshed = BTreeSet::new();
    run::recompute_run(&db, 10, &mut refreshed).await.unwrap();
    assert_eq!(run_forecasts(&db, 10), (None, None));
}

/// Expanding every representative's group covers each active case exactly
/// once; deleted and archived cases are excluded from the scan.
#[tokio::test]
async fn corpus_representatives_cover_active_population_once() {
    let db = test_db("corpus");
    for case_id in 1..=5 {
        insert_case(&db, case_id, if case_id % 2 == 0 { "automated" } else { "manual" });
    }
    insert_archived_case(&db, 6, "manual", true, false);
    insert_archived_case(&db, 7, "manual", false, true);
    insert_link(&db, 1, 2, "same-test", false);
    insert_link(&db, 4, 3, "same-test", false);

    let representatives = corpus::enumerate_group_representatives(&db).await.unwrap();
    assert_eq!(representatives, vec![1, 3, 5]);

    let mut covered = Vec::new();
    for case_id in &representatives {
        covered.extend(group::resolve_group(&db, *case_id).await.unwrap());
    }
    covered.sort();
    assert_eq!(covered, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn queue_walks_the_job_state_machine() {
    let db = test_db("queue");
    let job_id = queue::enqueue(&db, JOB_KIND_RECOMPUTE_CORPUS, "{}").await.unwrap();
    let status = queue::job_status(&db, job_id).await.unwrap().unwrap();
    assert_eq!(status.status, "queued");
    assert_eq!(status.attempts, 0);

    let claimed = queue::claim_next(&db).await.unwrap().unwrap();
    assert_eq!(claimed.job_id, job_id);
    assert_eq!(claimed.attempts, 1);
    let status = queue::job_status(&db, job_id).await.unwrap().unwrap();
    assert_eq!(status.status, "running");

    // Nothing else is queued while this one runs.
    assert!(queue::claim_next(&db).await.unwrap().is_none());

    queue::mark_completed(&db, job_id, r#"{"cases_ok":0}"#).await.unwrap();
    let status = queue::job_status(&db, job_id).await.unwrap().unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.report_json.as_deref(), Some(r#"{"cases_ok":0}"#));
}

#[tokio::test]
async fn retryable_failures_requeue_until_the_attempt_cap() {
    let db = test_db("retry");
    let job_id = queue::enqueue(&db, JOB_KIND_RECOMPUTE_CORPUS, "{}").await.unwrap();

    for attempt in 1..=queue::MAX_ATTEMPTS {
        let claimed = queue::claim_next(&db).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, attempt);
        queue::mark_failed(&db, job_id, "store unavailable", true).await.unwrap();
    }
    let status = queue::job_status(&db, job_id).await.unwrap().unwrap();
    assert_eq!(status.status, "failed");
    assert_eq!(status.error.as_deref(), Some("store unavailable"));
    assert!(queue::claim_next(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn non_retryable_failure_is_terminal_on_first_attempt() {
    let db = test_db("no-retry");
    let job_id = queue::enqueue(&db, JOB_KIND_RECOMPUTE_CASE, "{}").await.unwrap();
    queue::claim_next(&db).await.unwrap().unwrap();
    queue::mark_failed(&db, job_id, "invalid payload", false).await.unwrap();
    let status = queue::job_status(&db, job_id).await.unwrap().unwrap();
    assert_eq!(status.status, "failed");
    assert!(queue::claim_next(&db).await.unwrap().is_none());
}

/// An empty payload fails validation before the store is touched: existing
/// forecasts survive untouched.
#[tokio::test]
async fn invalid_single_case_payload_fails_without_writes() {
    let db = test_db("invalid-payload");
    insert_case(&db, 1, "manual");
    set_case_forecasts(&db, 1, Some(77), None);

    let claimed = ClaimedJob {
        job_id: 1,
        kind: JOB_KIND_RECOMPUTE_CASE.to_string(),
        payload_json: "{}".to_string(),
        attempts: 1,
    };
    let error = job::run_job(&db, &claimed).await.unwrap_err();
    assert!(!error.retryable());
    assert!(error.message().contains("invalid single-case payload"));
    assert_eq!(case_forecasts(&db, 1), (Some(77), None));
}

#[tokio::test]
async fn unknown_job_kind_is_a_non_retryable_error() {
    let db = test_db("unknown-kind");
    let claimed = ClaimedJob {
        job_id: 1,
        kind: "reindex-search".to_string(),
        payload_json: "{}".to_string(),
        attempts: 1,
    };
    let error = job::run_job(&db, &claimed).await.unwrap_err();
    assert!(!error.retryable());
}

#[tokio::test]
async fn single_case_job_updates_group_and_live_runs_only() {
    let db = test_db("single-case-job");
    insert_case(&db, 1, "manual");
    insert_case(&db, 2, "automated");
    insert_link(&db, 1, 2, "same-test", false);

    // Live run with a pending occurrence of case 2.
    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 2, None);
    // Completed run: its stale forecast must survive.
    insert_run(&db, 11, true);
    insert_run_case(&db, 110, 11, 1, Some(5));
    set_run_forecasts(&db, 11, Some(999), None);

    insert_manual_result(&db, 110, 30, false);
    insert_manual_result(&db, 110, 50, false);
    insert_automated_result(&db, 2, 1.2, false);
    insert_automated_result(&db, 2, 1.8, false);

    let claimed = ClaimedJob {
        job_id: 1,
        kind: JOB_KIND_RECOMPUTE_CASE.to_string(),
        payload_json: r#"{"repositoryCaseId":1}"#.to_string(),
        attempts: 1,
    };
    let report = job::run_job(&db, &claimed).await.unwrap();
    assert_eq!(report.cases_ok, 1);
    assert_eq!(report.runs_ok, 1);
    assert_eq!(report.cases_failed, 0);

    assert_eq!(case_forecasts(&db, 1), (Some(40), Some(1.5)));
    assert_eq!(case_forecasts(&db, 2), (Some(40), Some(1.5)));
    assert_eq!(run_forecasts(&db, 10), (Some(40), Some(1.5)));
    assert_eq!(run_forecasts(&db, 11), (Some(999), None));
}

#[tokio::test]
async fn corpus_job_recomputes_every_group_and_aggregates_touched_runs() {
    let db = test_db("corpus-job");
    insert_case(&db, 1, "manual");
    insert_case(&db, 2, "automated");
    insert_case(&db, 3, "manual");
    insert_link(&db, 1, 2, "same-test", false);

    insert_run(&db, 10, false);
    insert_run_case(&db, 100, 10, 1, None);
    insert_run_case(&db, 101, 10, 3, Some(STATUS_UNTESTED));
    insert_run(&db, 11, true);
    insert_run_case(&db, 110, 11, 3, Some(5));
    set_run_forecasts(&db, 11, Some(500), Some(9.0));

    insert_manual_result(&db, 110, 20, false);
    insert_automated_result(&db, 2, 0.75, false);

    let claimed = ClaimedJob {
        job_id: 1,
        kind: JOB_KIND_RECOMPUTE_CORPUS.to_string(),
        payload_json: "{}".to_string(),
        attempts: 1,
    };
    let report = job::run_job(&db, &claimed).await.unwrap();
    assert_eq!(report.cases_ok, 2); // groups {1,2} and {3}
    assert_eq!(report.cases_failed, 0);
    assert_eq!(report.runs_ok, 1); // run 11 is completed, only run 10 aggregates
    assert_eq!(report.runs_failed, 0);

    assert_eq!(case_forecasts(&db, 1), (None, Some(0.75)));
    assert_eq!(case_forecasts(&db, 2), (None, Some(0.75)));
    assert_eq!(case_forecasts(&db, 3), (Some(20), None));
    assert_eq!(run_forecasts(&db, 10), (Some(20), Some(0.75)));
    assert_eq!(run_forecasts(&db, 11), (Some(500), Some(9.0)));
}
