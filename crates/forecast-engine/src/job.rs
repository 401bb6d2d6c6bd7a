//! Job processor: drives group recomputation and run aggregation for the two
//! queue job kinds.

use std::collections::BTreeSet;

use forecast_types::{
    JOB_KIND_RECOMPUTE_CASE, JOB_KIND_RECOMPUTE_CORPUS, JobReport, SingleCasePayload,
};
use tracing::warn;

use crate::corpus;
use crate::db::{self, Db};
use crate::forecast;
use crate::queue::ClaimedJob;
use crate::run;

/// How a job failed, which decides whether the queue redelivers it.
#[derive(Debug)]
pub enum JobError {
    /// Malformed payload or unknown kind. Retrying cannot help.
    Invalid(String),
    /// Store-level failure. The queue's retry policy governs redelivery.
    Store(String),
}

impl JobError {
    pub fn message(&self) -> &str {
        match self {
            JobError::Invalid(message) | JobError::Store(message) => message,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, JobError::Store(_))
    }
}

/// Executes a claimed job to completion. Per-entity failures inside a corpus
/// sweep are tallied in the report rather than failing the job; only
/// structural failures (store unavailable, bad payload) surface as `Err`.
pub async fn run_job(db: &Db, job: &ClaimedJob) -> Result<JobReport, JobError> {
    match job.kind.as_str() {
        JOB_KIND_RECOMPUTE_CASE => run_single_case(db, &job.payload_json).await,
        JOB_KIND_RECOMPUTE_CORPUS => run_full_corpus(db).await,
        other => Err(JobError::Invalid(format!("unknown job kind: {other:?}"))),
    }
}

async fn run_single_case(db: &Db, payload_json: &str) -> Result<JobReport, JobError> {
    let payload: SingleCasePayload = serde_json::from_str(payload_json)
        .map_err(|error| JobError::Invalid(format!("invalid single-case payload: {error}")))?;

    let group = forecast::recompute_group(db, payload.repository_case_id)
        .await
        .map_err(JobError::Store)?;
    let mut report = JobReport::default();
    if group.is_empty() {
        // Case vanished between enqueue and execution; nothing to forecast.
        return Ok(report);
    }
    report.cases_ok = 1;

    let run_ids = db::run_ids_for_cases(db, group.iter().copied().collect())
        .await
        .map_err(JobError::Store)?;
    let live_runs = db::not_completed_runs(db, run_ids)
        .await
        .map_err(JobError::Store)?;

    let mut refreshed = group;
    for run_id in live_runs {
        run::recompute_run(db, run_id, &mut refreshed)
            .await
            .map_err(JobError::Store)?;
        report.runs_ok += 1;
    }
    Ok(report)
}

async fn run_full_corpus(db: &Db) -> Result<JobReport, JobError> {
    let representatives = corpus::enumerate_group_representatives(db)
        .await
        .map_err(JobError::Store)?;

    let mut report = JobReport::default();
    let mut refreshed: BTreeSet<i64> = BTreeSet::new();
    let mut touched_runs: BTreeSet<i64> = BTreeSet::new();

    // Run aggregation is deferred: each group is recomputed once here, and
    // every affected run is aggregated exactly once afterwards.
    for case_id in representatives {
        if refreshed.contains(&case_id) {
            continue;
        }
        match sweep_group(db, case_id).await {
            Ok((group, run_ids)) => {
                refreshed.extend(group);
                touched_runs.extend(run_ids);
                report.cases_ok += 1;
            }
            Err(error) => {
                warn!(%case_id, %error, "corpus sweep: group recomputation failed");
                report.cases_failed += 1;
            }
        }
    }

    let live_runs = db::not_completed_runs(db, touched_runs.into_iter().collect())
        .await
        .map_err(JobError::Store)?;
    for run_id in live_runs {
        match run::recompute_run(db, run_id, &mut refreshed).await {
            Ok(()) => report.runs_ok += 1,
            Err(error) => {
                warn!(%run_id, %error, "corpus sweep: run aggregation failed");
                report.runs_failed += 1;
            }
        }
    }
    Ok(report)
}

async fn sweep_group(db: &Db, case_id: i64) -> Result<(BTreeSet<i64>, Vec<i64>), String> {
    let group = forecast::recompute_group(db, case_id).await?;
    if group.is_empty() {
        return Ok((group, Vec::new()));
    }
    let run_ids = db::run_ids_for_cases(db, group.iter().copied().collect()).await?;
    Ok((group, run_ids))
}
