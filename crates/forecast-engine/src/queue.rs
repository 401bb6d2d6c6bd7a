//! Persistent recomputation job queue.
//!
//! Jobs move `queued -> running -> {completed, failed}`. A retryable failure
//! below the attempt cap goes back to `queued` so the next dequeue redelivers
//! it; validation failures and exhausted retries land in `failed`. The queue
//! lives in the same store the engine reads, so claiming a job is a single
//! transactional row flip.

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::db::{Db, now_nanos};

/// Redelivery cap for retryable failures. A job that fails this many times
/// stays `failed` until something re-enqueues it.
pub const MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub kind: String,
    pub payload_json: String,
    pub attempts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub attempts: i64,
    pub error: Option<String>,
    pub report_json: Option<String>,
}

/// Enqueues a job and returns its id. This is the only trigger boundary the
/// engine exposes: ORM write hooks, schedulers, and test harnesses all call
/// it identically.
pub async fn enqueue(db: &Db, kind: &str, payload_json: &str) -> Result<i64, String> {
    let db = db.clone();
    let kind = kind.to_string();
    let payload_json = payload_json.to_string();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        conn.execute(
            "INSERT INTO jobs (kind, payload_json, status, enqueued_at_ns)
             VALUES (?1, ?2, 'queued', ?3)",
            params![kind, payload_json, now_nanos()],
        )
        .map_err(|error| format!("enqueue {kind} job: {error}"))?;
        let job_id = conn.last_insert_rowid();
        debug!(%job_id, %kind, "job enqueued");
        Ok::<i64, String>(job_id)
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Atomically flips the oldest queued job to `running`, bumping its attempt
/// counter. Returns `None` when the queue is empty.
pub async fn claim_next(db: &Db) -> Result<Option<ClaimedJob>, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.open()?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|error| format!("start claim transaction: {error}"))?;
        let next: Option<(i64, String, String, i64)> = tx
            .query_row(
                "SELECT job_id, kind, payload_json, attempts FROM jobs
                 WHERE status = 'queued' ORDER BY job_id LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|error| format!("select next queued job: {error}"))?;
        let Some((job_id, kind, payload_json, attempts)) = next else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE jobs
             SET status = 'running', attempts = attempts + 1, started_at_ns = ?2,
                 finished_at_ns = NULL
             WHERE job_id = ?1",
            params![job_id, now_nanos()],
        )
        .map_err(|error| format!("claim job {job_id}: {error}"))?;
        tx.commit()
            .map_err(|error| format!("commit claim of job {job_id}: {error}"))?;
        Ok::<Option<ClaimedJob>, String>(Some(ClaimedJob {
            job_id,
            kind,
            payload_json,
            attempts: attempts + 1,
        }))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn mark_completed(db: &Db, job_id: i64, report_json: &str) -> Result<(), String> {
    let db = db.clone();
    let report_json = report_json.to_string();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        conn.execute(
            "UPDATE jobs
             SET status = 'completed', report_json = ?2, error = NULL, finished_at_ns = ?3
             WHERE job_id = ?1",
            params![job_id, report_json, now_nanos()],
        )
        .map_err(|error| format!("complete job {job_id}: {error}"))?;
        Ok::<(), String>(())
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Records a job failure. Retryable failures below [`MAX_ATTEMPTS`] go back
/// to `queued` for redelivery; everything else is terminal.
pub async fn mark_failed(
    db: &Db,
    job_id: i64,
    error_message: &str,
    retryable: bool,
) -> Result<(), String> {
    let db = db.clone();
    let error_message = error_message.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.open()?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|error| format!("start failure transaction: {error}"))?;
        let attempts: i64 = tx
            .query_row(
                "SELECT attempts FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(|error| format!("read attempts for job {job_id}: {error}"))?;
        let next_status = if retryable && attempts < MAX_ATTEMPTS {
            "queued"
        } else {
            "failed"
        };
        tx.execute(
            "UPDATE jobs SET status = ?2, error = ?3, finished_at_ns = ?4 WHERE job_id = ?1",
            params![job_id, next_status, error_message, now_nanos()],
        )
        .map_err(|error| format!("fail job {job_id}: {error}"))?;
        tx.commit()
            .map_err(|error| format!("commit failure of job {job_id}: {error}"))?;
        Ok::<(), String>(())
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn job_status(db: &Db, job_id: i64) -> Result<Option<JobStatus>, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        conn.query_row(
            "SELECT status, attempts, error, report_json FROM jobs WHERE job_id = ?1",
            params![job_id],
            |row| {
                Ok(JobStatus {
                    status: row.get(0)?,
                    attempts: row.get(1)?,
                    error: row.get(2)?,
                    report_json: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|error| format!("read status of job {job_id}: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}
