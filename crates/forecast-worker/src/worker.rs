//! Dequeue loop: bounded-concurrency job processing with a start-rate limit
//! and drain-on-shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use forecast_engine::queue::{self, ClaimedJob};
use forecast_engine::{Db, job};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::rate::StartRateLimiter;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub rate_max_starts: usize,
    pub rate_window: Duration,
    pub poll_interval: Duration,
}

/// Pulls jobs until a shutdown signal arrives, then stops claiming and lets
/// in-flight jobs finish. Dequeue errors are logged and retried after the
/// poll interval; they never kill the worker.
pub async fn run_worker(store: Db, queue_db: Db, config: WorkerConfig) -> Result<(), String> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut limiter = StartRateLimiter::new(config.rate_max_starts, config.rate_window);
    let mut inflight: JoinSet<()> = JoinSet::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        while let Some(joined) = inflight.try_join_next() {
            if let Err(join_error) = joined {
                error!(%join_error, "job task panicked");
            }
        }

        if let Some(delay) = limiter.delay_until_allowed(Instant::now()) {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => continue,
            }
        }

        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = semaphore.clone().acquire_owned() => {
                permit.map_err(|error| format!("acquire job permit: {error}"))?
            }
        };

        match queue::claim_next(&queue_db).await {
            Ok(Some(claimed)) => {
                limiter.record_start(Instant::now());
                info!(
                    job_id = claimed.job_id,
                    kind = %claimed.kind,
                    attempt = claimed.attempts,
                    "job started"
                );
                let store = store.clone();
                let queue_db = queue_db.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    process_job(store, queue_db, claimed).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
            Err(error) => {
                drop(permit);
                error!(%error, "dequeue failed");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }

    info!(in_flight = inflight.len(), "shutdown: draining in-flight jobs");
    while let Some(joined) = inflight.join_next().await {
        if let Err(join_error) = joined {
            error!(%join_error, "job task panicked during drain");
        }
    }
    Ok(())
}

async fn process_job(store: Db, queue_db: Db, claimed: ClaimedJob) {
    match job::run_job(&store, &claimed).await {
        Ok(report) => {
            let report_json = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
            if let Err(error) = queue::mark_completed(&queue_db, claimed.job_id, &report_json).await
            {
                error!(job_id = claimed.job_id, %error, "failed to record job completion");
                return;
            }
            info!(
                job_id = claimed.job_id,
                kind = %claimed.kind,
                cases_ok = report.cases_ok,
                cases_failed = report.cases_failed,
                runs_ok = report.runs_ok,
                runs_failed = report.runs_failed,
                "job completed"
            );
        }
        Err(job_error) => {
            error!(
                job_id = claimed.job_id,
                kind = %claimed.kind,
                error = job_error.message(),
                retryable = job_error.retryable(),
                "job failed"
            );
            if let Err(error) = queue::mark_failed(
                &queue_db,
                claimed.job_id,
                job_error.message(),
                job_error.retryable(),
            )
            .await
            {
                error!(job_id = claimed.job_id, %error, "failed to record job failure");
            }
        }
    }
}
